use std::time::Duration;

use thiserror::Error;

use crate::flow::FlowId;
use crate::message::SessionKey;

pub type Result<T> = std::result::Result<T, P2pFlowError>;

#[derive(Debug, Error)]
pub enum P2pFlowError {
    #[error("session `{session}` closed by counterparty{}", reason_suffix(.reason))]
    SessionClosed {
        session: SessionKey,
        reason: Option<String>,
    },
    #[error("no message on session `{session}` within {timeout:?}")]
    SessionTimeout {
        session: SessionKey,
        timeout: Duration,
    },
    #[error("flow failed: {0}")]
    FlowFailure(String),
    #[error("flow cancelled")]
    Cancelled,
    #[error("draining holding sequence is full (capacity {capacity})")]
    DrainingQueueOverflow { capacity: usize },
    #[error("no responder registered for initiating flow `{0}`")]
    ResponderNotRegistered(String),
    #[error("unknown session `{0}`")]
    UnknownSession(SessionKey),
    #[error("session `{session}` is not owned by `{flow}`")]
    SessionNotOwned { session: SessionKey, flow: FlowId },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("config error: {0}")]
    Config(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn reason_suffix(reason: &Option<String>) -> String {
    match reason {
        Some(reason) => format!(": {reason}"),
        None => String::new(),
    }
}

impl From<serde_json::Error> for P2pFlowError {
    fn from(err: serde_json::Error) -> Self {
        P2pFlowError::Serialization(err.to_string())
    }
}
