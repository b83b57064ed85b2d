// 节点：组装会话管理器、排空闸门与调度器，并提供控制接口

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::drain::{DrainingGate, FileHoldingStore, HoldingStore};
use crate::error::{P2pFlowError, Result};
use crate::flow::{FlowHandle, FlowId, FlowLogic, FlowState, ResponderFactory, ResponderRegistry};
use crate::message::{Envelope, PeerId, SessionKey};
use crate::runtime::FlowScheduler;
use crate::session::{FlowSession, Inbound, SessionManager, SessionState};
use crate::transport::Transport;

/// 节点构建器
pub struct NodeBuilder {
    identity: PeerId,
    config: NodeConfig,
    transport: Option<Arc<dyn Transport>>,
    responders: ResponderRegistry,
    holding_store: Option<Arc<dyn HoldingStore>>,
}

impl NodeBuilder {
    pub fn new(identity: impl Into<PeerId>) -> Self {
        Self {
            identity: identity.into(),
            config: NodeConfig::default(),
            transport: None,
            responders: ResponderRegistry::new(),
            holding_store: None,
        }
    }

    pub fn with_config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_responders(mut self, responders: ResponderRegistry) -> Self {
        self.responders = responders;
        self
    }

    pub fn with_responder_factory(
        mut self,
        initiating_flow: impl Into<String>,
        factory: ResponderFactory,
    ) -> Self {
        self.responders.register_factory(initiating_flow, factory);
        self
    }

    pub fn with_responder<F, L>(mut self, initiating_flow: impl Into<String>, build: F) -> Self
    where
        F: Fn(FlowSession) -> L + Send + Sync + 'static,
        L: FlowLogic + 'static,
    {
        self.responders.register(initiating_flow, build);
        self
    }

    /// 覆盖配置中的 `holding_store_path`
    pub fn with_holding_store(mut self, store: Arc<dyn HoldingStore>) -> Self {
        self.holding_store = Some(store);
        self
    }

    pub fn build(self) -> Result<Node> {
        self.config.validate()?;
        let transport = self
            .transport
            .ok_or_else(|| P2pFlowError::Config("node requires a transport".to_string()))?;

        let draining = &self.config.draining;
        let mut gate = DrainingGate::new()
            .with_capacity(draining.holding_capacity, draining.overflow_policy);
        let store = self.holding_store.or_else(|| {
            draining
                .holding_store_path
                .as_ref()
                .map(|path| Arc::new(FileHoldingStore::new(path)) as Arc<dyn HoldingStore>)
        });
        if let Some(store) = store {
            gate = gate.with_store(store)?;
        }
        if draining.enabled_on_start {
            gate.set_enabled(true);
        }
        let gate = Arc::new(gate);

        if self.responders.is_empty() {
            debug!(node = %self.identity, "no responder flows registered");
        }
        let responder_count = self.responders.len();
        let sessions = Arc::new(SessionManager::new(
            self.identity.clone(),
            Arc::clone(&gate),
            Arc::new(self.responders),
            transport,
            self.config.session_tombstones,
        ));
        let runtime = Handle::try_current().map_err(|_| {
            P2pFlowError::Config("node must be built inside a tokio runtime".to_string())
        })?;
        let scheduler = FlowScheduler::new(
            Arc::clone(&sessions),
            self.config.worker_threads,
            self.config.receive_timeout(),
            runtime,
        );

        info!(
            node = %self.identity,
            workers = scheduler.worker_count(),
            responders = responder_count,
            draining = gate.is_enabled(),
            held = gate.held_count(),
            "node ready"
        );

        let node = Node {
            identity: self.identity,
            config: Arc::new(self.config),
            gate,
            sessions,
            scheduler,
        };
        // 上次停机时关闭排空后尚未投递完的 Initiate
        if !node.gate.is_enabled() && node.gate.held_count() > 0 {
            node.set_flows_draining_mode_enabled(false);
        }
        Ok(node)
    }
}

/// 节点句柄，克隆开销很小
#[derive(Clone)]
pub struct Node {
    identity: PeerId,
    config: Arc<NodeConfig>,
    gate: Arc<DrainingGate>,
    sessions: Arc<SessionManager>,
    scheduler: FlowScheduler,
}

impl Node {
    pub fn builder(identity: impl Into<PeerId>) -> NodeBuilder {
        NodeBuilder::new(identity)
    }

    pub fn identity(&self) -> &PeerId {
        &self.identity
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn start_flow(&self, logic: Arc<dyn FlowLogic>) -> FlowHandle {
        self.scheduler.start(logic)
    }

    pub fn start<L: FlowLogic + 'static>(&self, logic: L) -> FlowHandle {
        self.start_flow(Arc::new(logic))
    }

    /// 传输层入站入口
    pub fn deliver(&self, envelope: Envelope) -> Result<()> {
        let session = envelope.session.clone();
        let kind = envelope.kind.label();
        let outcome = self.sessions.handle_inbound(envelope)?;
        debug!(node = %self.identity, session = %session, kind, outcome = outcome.label(), "inbound handled");
        if let Inbound::Spawn { flow, logic, .. } = outcome {
            self.scheduler.start_responder(flow, logic);
        }
        Ok(())
    }

    /// 切换排空模式；关闭时按到达顺序重新投递暂存的 Initiate。
    /// 不等待现有 flow 结束，可以从任意线程调用。
    pub fn set_flows_draining_mode_enabled(&self, enabled: bool) {
        let released = self.gate.set_enabled(enabled);
        if released.is_empty() {
            return;
        }
        for envelope in released {
            let session = envelope.session.clone();
            if let Err(err) = self.deliver(envelope) {
                warn!(node = %self.identity, session = %session, %err, "failed to release held initiate");
            }
        }
        self.gate.checkpoint();
    }

    pub fn is_flows_draining_mode_enabled(&self) -> bool {
        self.gate.is_enabled()
    }

    /// 尚未结束的 flow 数量，供运维判断何时可以安全停机
    pub fn outstanding_flow_count(&self) -> usize {
        self.scheduler.outstanding()
    }

    pub fn held_initiation_count(&self) -> usize {
        self.gate.held_count()
    }

    pub fn held_sessions(&self) -> Vec<SessionKey> {
        self.gate.held_sessions()
    }

    pub fn flow_state(&self, id: FlowId) -> Option<FlowState> {
        self.scheduler.state(id)
    }

    pub fn flow_suspended_on(&self, id: FlowId) -> Option<SessionKey> {
        self.scheduler.suspended_on(id)
    }

    pub fn cancel_flow(&self, id: FlowId) -> bool {
        self.scheduler.cancel(id)
    }

    pub fn session_state(&self, key: &SessionKey) -> Option<SessionState> {
        self.sessions.session_state(key)
    }

    pub fn live_session_count(&self) -> usize {
        self.sessions.live_sessions()
    }

    pub fn idle_workers(&self) -> usize {
        self.scheduler.idle_workers()
    }
}
