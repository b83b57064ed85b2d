use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{P2pFlowError, Result};
use crate::session::FlowSession;

use super::logic::FlowLogic;

/// 响应方工厂：以发起会话构造对端 flow
pub type ResponderFactory =
    Arc<dyn Fn(FlowSession) -> Result<Arc<dyn FlowLogic>> + Send + Sync>;

/// 响应方注册表
///
/// 发起方 flow 标识 -> 响应方工厂，在节点启动时填充。
/// 仅在 Initiate 消息被准入时查询。
#[derive(Clone, Default)]
pub struct ResponderRegistry {
    factories: HashMap<String, ResponderFactory>,
}

impl ResponderRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register_factory<T: Into<String>>(&mut self, initiating_flow: T, factory: ResponderFactory) {
        self.factories.insert(initiating_flow.into(), factory);
    }

    /// 注册不会失败的响应方构造函数
    pub fn register<T, F, L>(&mut self, initiating_flow: T, build: F)
    where
        T: Into<String>,
        F: Fn(FlowSession) -> L + Send + Sync + 'static,
        L: FlowLogic + 'static,
    {
        let factory: ResponderFactory =
            Arc::new(move |session| Ok(Arc::new(build(session)) as Arc<dyn FlowLogic>));
        self.register_factory(initiating_flow, factory);
    }

    pub fn build(&self, initiating_flow: &str, session: FlowSession) -> Result<Arc<dyn FlowLogic>> {
        let factory = self
            .factories
            .get(initiating_flow)
            .ok_or_else(|| P2pFlowError::ResponderNotRegistered(initiating_flow.to_string()))?;
        factory(session)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
