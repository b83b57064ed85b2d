// Flow 模块 - 可挂起的工作流逻辑

pub mod context;
pub mod handle;
pub mod logic;
pub mod registry;

pub use context::FlowContext;
pub use handle::FlowHandle;
pub use logic::{FlowId, FlowLogic, FlowState};
pub use registry::{ResponderFactory, ResponderRegistry};
