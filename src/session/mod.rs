// 会话模块：点对点有序会话及其路由

mod manager;
mod orphans;
mod session;
mod tombstones;

pub use manager::{Inbound, SessionManager};
pub use session::{Receive, Session, SessionState};

use crate::message::{PeerId, SessionKey};

/// flow 持有的会话句柄
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowSession {
    key: SessionKey,
    counterparty: PeerId,
}

impl FlowSession {
    pub(crate) fn new(key: SessionKey, counterparty: PeerId) -> Self {
        Self { key, counterparty }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn counterparty(&self) -> &PeerId {
        &self.counterparty
    }
}
