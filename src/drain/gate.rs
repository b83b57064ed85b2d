use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::message::{Envelope, SessionKey};

use super::store::{DrainingSnapshot, HoldingStore};

/// 暂存序列满时的处理策略
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// 丢弃最早暂存的 Initiate，接纳新的
    DropOldest,
    /// 静默丢弃新到达的 Initiate
    DropNewest,
    /// 拒绝新到达的 Initiate，并以 Close 通知发起方
    #[default]
    RejectNew,
}

/// 准入结果
#[derive(Debug)]
pub enum Admission {
    Admitted(Envelope),
    Held,
    /// 因容量被丢弃的消息（可能是更早暂存的那条）
    Dropped(Envelope),
    Rejected(Envelope),
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted(_))
    }
}

#[derive(Default)]
struct DrainingState {
    enabled: bool,
    holding: VecDeque<Envelope>,
}

impl DrainingState {
    fn snapshot(&self) -> DrainingSnapshot {
        DrainingSnapshot {
            enabled: self.enabled,
            held: self.holding.iter().cloned().collect(),
        }
    }
}

/// 排空闸门
///
/// 开关与暂存序列处于同一把锁下：任何 Initiate 的准入判断与开关切换互斥，
/// 因此一条消息要么在关闭前被准入，要么被暂存并在关闭时释放，不会两头落空。
pub struct DrainingGate {
    state: Mutex<DrainingState>,
    capacity: Option<usize>,
    policy: OverflowPolicy,
    store: Option<Arc<dyn HoldingStore>>,
}

impl Default for DrainingGate {
    fn default() -> Self {
        Self::new()
    }
}

impl DrainingGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DrainingState::default()),
            capacity: None,
            policy: OverflowPolicy::default(),
            store: None,
        }
    }

    pub fn with_capacity(mut self, capacity: Option<usize>, policy: OverflowPolicy) -> Self {
        self.capacity = capacity;
        self.policy = policy;
        self
    }

    /// 挂接持久化存储，并恢复上次保存的状态
    pub fn with_store(mut self, store: Arc<dyn HoldingStore>) -> Result<Self> {
        if let Some(snapshot) = store.load()? {
            let mut state = self.state.lock();
            state.enabled = snapshot.enabled;
            state.holding = snapshot.held.into_iter().collect();
            info!(
                enabled = state.enabled,
                held = state.holding.len(),
                "restored draining state"
            );
        }
        self.store = Some(store);
        Ok(self)
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    pub fn held_count(&self) -> usize {
        self.state.lock().holding.len()
    }

    pub fn held_sessions(&self) -> Vec<SessionKey> {
        self.state
            .lock()
            .holding
            .iter()
            .map(|envelope| envelope.session.clone())
            .collect()
    }

    /// Initiate 准入检查
    pub fn admit(&self, envelope: Envelope) -> Admission {
        let mut state = self.state.lock();
        if !state.enabled {
            return Admission::Admitted(envelope);
        }
        if state
            .holding
            .iter()
            .any(|held| held.session == envelope.session)
        {
            debug!(session = %envelope.session, "initiate already held");
            return Admission::Held;
        }

        if let Some(capacity) = self.capacity {
            if state.holding.len() >= capacity {
                match self.policy {
                    OverflowPolicy::DropOldest => {
                        let evicted = state.holding.pop_front();
                        state.holding.push_back(envelope);
                        self.persist(&state);
                        if let Some(evicted) = evicted {
                            warn!(
                                session = %evicted.session,
                                capacity,
                                "holding sequence full, dropping oldest initiate"
                            );
                            return Admission::Dropped(evicted);
                        }
                        return Admission::Held;
                    }
                    OverflowPolicy::DropNewest => {
                        warn!(
                            session = %envelope.session,
                            capacity,
                            "holding sequence full, dropping new initiate"
                        );
                        return Admission::Dropped(envelope);
                    }
                    OverflowPolicy::RejectNew => {
                        warn!(
                            session = %envelope.session,
                            capacity,
                            "holding sequence full, rejecting new initiate"
                        );
                        return Admission::Rejected(envelope);
                    }
                }
            }
        }

        info!(
            session = %envelope.session,
            peer = %envelope.sender,
            position = state.holding.len(),
            "draining mode enabled, holding initiate"
        );
        state.holding.push_back(envelope);
        self.persist(&state);
        Admission::Held
    }

    /// 切换排空模式
    ///
    /// 关闭时在同一临界区内取出全部暂存消息，按到达顺序返回，
    /// 由调用方重新走正常准入路径。重复设置同一值没有额外效果。
    pub fn set_enabled(&self, enabled: bool) -> Vec<Envelope> {
        let mut state = self.state.lock();
        if enabled {
            if !state.enabled {
                state.enabled = true;
                self.persist(&state);
                info!("flows draining mode enabled");
            }
            return Vec::new();
        }

        let was_enabled = state.enabled;
        state.enabled = false;
        let released: Vec<Envelope> = state.holding.drain(..).collect();
        if was_enabled || !released.is_empty() {
            // 释放的消息留在快照里，直到调用方投递完毕后 `checkpoint`
            self.save(&DrainingSnapshot {
                enabled: false,
                held: released.clone(),
            });
            info!(released = released.len(), "flows draining mode disabled");
        }
        released
    }

    /// 持久化当前状态；在 `set_enabled(false)` 释放的消息全部重新投递后调用
    pub fn checkpoint(&self) {
        let state = self.state.lock();
        self.persist(&state);
    }

    fn persist(&self, state: &DrainingState) {
        self.save(&state.snapshot());
    }

    fn save(&self, snapshot: &DrainingSnapshot) {
        if let Some(store) = &self.store {
            if let Err(err) = store.save(snapshot) {
                warn!(%err, "failed to persist draining state");
            }
        }
    }
}
