// 传输协作方：节点间的消息投递

mod memory;

pub use memory::InMemoryNetwork;

use crate::error::Result;
use crate::message::Envelope;

/// 出站传输 trait
///
/// `send` 不应阻塞；入站方向由传输实现调用 [`Node::deliver`](crate::Node::deliver)。
/// 假定每条链路至少投递一次，去重由会话序号完成。
pub trait Transport: Send + Sync {
    fn send(&self, envelope: Envelope) -> Result<()>;
}
