#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::time::{sleep, Instant};

use p2pflow::{
    FlowContext, FlowLogic, FlowSession, InMemoryNetwork, Node, NodeConfig, P2pFlowError,
    PeerId, ResponderRegistry, SessionKey,
};

pub const INITIATOR: &str = "InitiateSessionFlow";

/// 打开会话、发送一条消息并等待回复
pub struct InitiateSessionFlow {
    pub counterparty: PeerId,
    pub greeting: String,
}

impl InitiateSessionFlow {
    pub fn new(counterparty: &PeerId) -> Self {
        Self {
            counterparty: counterparty.clone(),
            greeting: "Hi there".to_string(),
        }
    }

    pub fn with_greeting(mut self, greeting: impl Into<String>) -> Self {
        self.greeting = greeting.into();
        self
    }
}

#[async_trait]
impl FlowLogic for InitiateSessionFlow {
    fn name(&self) -> &str {
        INITIATOR
    }

    async fn call(&self, ctx: &mut FlowContext) -> p2pflow::Result<Value> {
        let session = ctx.initiate_flow(self.counterparty.clone())?;
        ctx.send(&session, &self.greeting)?;
        let answer: String = ctx.receive(&session).await?;
        Ok(json!(answer))
    }
}

/// 对每条消息回复 "<message> answer"，直到会话关闭
pub struct EchoResponder {
    pub session: FlowSession,
}

#[async_trait]
impl FlowLogic for EchoResponder {
    fn name(&self) -> &str {
        "EchoResponder"
    }

    async fn call(&self, ctx: &mut FlowContext) -> p2pflow::Result<Value> {
        let mut handled = 0u64;
        loop {
            match ctx.receive::<String>(&self.session).await {
                Ok(message) => {
                    ctx.send(&self.session, &format!("{message} answer"))?;
                    handled += 1;
                }
                Err(P2pFlowError::SessionClosed { .. }) => return Ok(json!(handled)),
                Err(err) => return Err(err),
            }
        }
    }
}

/// 记录响应方 flow 的创建顺序
#[derive(Clone, Default)]
pub struct CreationLog {
    inner: Arc<Mutex<Vec<SessionKey>>>,
}

impl CreationLog {
    pub fn record(&self, key: &SessionKey) {
        self.inner.lock().push(key.clone());
    }

    pub fn entries(&self) -> Vec<SessionKey> {
        self.inner.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

pub fn echo_responders(log: &CreationLog) -> ResponderRegistry {
    let mut responders = ResponderRegistry::new();
    let log = log.clone();
    responders.register(INITIATOR, move |session: FlowSession| {
        log.record(session.key());
        EchoResponder { session }
    });
    responders
}

pub fn test_config() -> NodeConfig {
    NodeConfig {
        worker_threads: 4,
        receive_timeout_ms: Some(30_000),
        ..NodeConfig::default()
    }
}

pub struct Pair {
    pub network: InMemoryNetwork,
    pub initiating: Node,
    pub initiated: Node,
    pub created: CreationLog,
}

pub fn node_pair(network: InMemoryNetwork, initiated_config: NodeConfig) -> Pair {
    let created = CreationLog::default();
    let initiated = Node::builder("O=Bank B")
        .with_config(initiated_config)
        .with_transport(Arc::new(network.clone()))
        .with_responders(echo_responders(&created))
        .build()
        .expect("initiated node");
    let initiating = Node::builder("O=Bank A")
        .with_config(test_config())
        .with_transport(Arc::new(network.clone()))
        .build()
        .expect("initiating node");
    network.register(&initiated);
    network.register(&initiating);
    Pair {
        network,
        initiating,
        initiated,
        created,
    }
}

pub fn pair() -> Pair {
    node_pair(InMemoryNetwork::new(), test_config())
}

/// 轮询等待条件成立
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        if Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        sleep(Duration::from_millis(10)).await;
    }
}
