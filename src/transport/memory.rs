use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{P2pFlowError, Result};
use crate::message::{Envelope, PeerId};
use crate::node::Node;

use super::Transport;

/// 进程内网络
///
/// 每个注册节点一条无界队列和一个投递任务，链路内保持发送顺序。
/// `with_redelivery` 会把每条消息投递两次，用于验证去重。
#[derive(Clone, Default)]
pub struct InMemoryNetwork {
    links: Arc<RwLock<HashMap<PeerId, mpsc::UnboundedSender<Envelope>>>>,
    redeliver: bool,
}

impl InMemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_redelivery(mut self) -> Self {
        self.redeliver = true;
        self
    }

    /// 注册节点并启动其入站投递任务
    pub fn register(&self, node: &Node) -> JoinHandle<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
        self.links.write().insert(node.identity().clone(), tx);
        let node = node.clone();
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                let session = envelope.session.clone();
                if let Err(err) = node.deliver(envelope) {
                    warn!(node = %node.identity(), session = %session, %err, "delivery failed");
                }
            }
            debug!(node = %node.identity(), "link closed");
        })
    }
}

impl Transport for InMemoryNetwork {
    fn send(&self, envelope: Envelope) -> Result<()> {
        let links = self.links.read();
        let link = links.get(&envelope.recipient).ok_or_else(|| {
            P2pFlowError::Transport(format!("unknown peer `{}`", envelope.recipient))
        })?;
        if self.redeliver {
            link.send(envelope.clone())
                .map_err(|_| P2pFlowError::Transport("link closed".to_string()))?;
        }
        link.send(envelope)
            .map_err(|_| P2pFlowError::Transport("link closed".to_string()))
    }
}
