// 排空模式：新会话准入控制

mod gate;
mod store;

pub use gate::{Admission, DrainingGate, OverflowPolicy};
pub use store::{DrainingSnapshot, FileHoldingStore, HoldingStore, MemoryHoldingStore};
