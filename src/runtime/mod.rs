// 运行时调度模块

mod scheduler;
mod state;

pub use scheduler::FlowScheduler;
pub use state::{FlowRecord, FlowTable};
