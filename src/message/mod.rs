use std::fmt;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// 节点身份
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PeerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// 会话标识
///
/// `id` 由发起方节点分配，配合发起方身份在任意节点上唯一。
/// 响应方从 Initiate 消息中得知该标识。
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey {
    pub initiator: PeerId,
    pub id: u64,
}

impl SessionKey {
    pub fn new(initiator: impl Into<PeerId>, id: u64) -> Self {
        Self {
            initiator: initiator.into(),
            id,
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.initiator, self.id)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageKind {
    /// 打开会话，携带发起方 flow 标识
    Initiate { flow: String },
    Data { payload: Value },
    /// 结束会话；flow 失败时携带错误信息
    Close {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl MessageKind {
    pub fn label(&self) -> &'static str {
        match self {
            MessageKind::Initiate { .. } => "initiate",
            MessageKind::Data { .. } => "data",
            MessageKind::Close { .. } => "close",
        }
    }
}

/// 节点间传输的消息
///
/// `sequence` 按会话、按方向单调递增，从 0 开始；发起方的 Initiate 占用 0。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub sender: PeerId,
    pub recipient: PeerId,
    pub session: SessionKey,
    pub sequence: u64,
    pub kind: MessageKind,
}

impl Envelope {
    pub fn initiate(
        sender: PeerId,
        recipient: PeerId,
        session: SessionKey,
        flow: impl Into<String>,
    ) -> Self {
        Self {
            sender,
            recipient,
            session,
            sequence: 0,
            kind: MessageKind::Initiate { flow: flow.into() },
        }
    }

    pub fn data(
        sender: PeerId,
        recipient: PeerId,
        session: SessionKey,
        sequence: u64,
        payload: Value,
    ) -> Self {
        Self {
            sender,
            recipient,
            session,
            sequence,
            kind: MessageKind::Data { payload },
        }
    }

    pub fn close(
        sender: PeerId,
        recipient: PeerId,
        session: SessionKey,
        sequence: u64,
        error: Option<String>,
    ) -> Self {
        Self {
            sender,
            recipient,
            session,
            sequence,
            kind: MessageKind::Close { error },
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// 将业务值编码为消息负载
pub fn encode_payload<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

pub fn decode_payload<T: DeserializeOwned>(payload: Value) -> Result<T> {
    Ok(serde_json::from_value(payload)?)
}
