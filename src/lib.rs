pub mod config;
pub mod drain;
pub mod error;
pub mod flow;
pub mod message;
pub mod node;
pub mod runtime;
pub mod session;
pub mod transport;
pub mod utils;

pub use config::{DrainingConfig, EnvConfig, NodeConfig};
pub use drain::{
    Admission, DrainingGate, DrainingSnapshot, FileHoldingStore, HoldingStore,
    MemoryHoldingStore, OverflowPolicy,
};
pub use error::{P2pFlowError, Result};
pub use flow::{
    FlowContext, FlowHandle, FlowId, FlowLogic, FlowState, ResponderFactory, ResponderRegistry,
};
pub use message::{decode_payload, encode_payload, Envelope, MessageKind, PeerId, SessionKey};
pub use node::{Node, NodeBuilder};
pub use runtime::{FlowScheduler, FlowTable};
pub use session::{FlowSession, Inbound, SessionManager, SessionState};
pub use transport::{InMemoryNetwork, Transport};
pub use utils::logging;
