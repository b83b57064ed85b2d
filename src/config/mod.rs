pub mod env;
pub mod node_config;

pub use env::EnvConfig;
pub use node_config::{DrainingConfig, NodeConfig};
