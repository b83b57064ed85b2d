use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::flow::{FlowId, FlowState};
use crate::message::SessionKey;

// 运行时状态管理

/// 单个 flow 的调度记录
pub struct FlowRecord {
    pub name: String,
    pub state: FlowState,
    /// 挂起时等待的会话（延续标记）
    pub suspended_on: Option<SessionKey>,
    /// 是否仍有句柄等待观察结果
    observed: bool,
    cancel: Option<oneshot::Sender<()>>,
}

/// flow 表
#[derive(Default)]
pub struct FlowTable {
    records: Mutex<HashMap<FlowId, FlowRecord>>,
}

impl FlowTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(
        &self,
        id: FlowId,
        name: String,
        observed: bool,
        cancel: oneshot::Sender<()>,
    ) {
        self.records.lock().insert(
            id,
            FlowRecord {
                name,
                state: FlowState::Created,
                suspended_on: None,
                observed,
                cancel: Some(cancel),
            },
        );
    }

    pub(crate) fn set_state(&self, id: FlowId, state: FlowState) {
        if let Some(record) = self.records.lock().get_mut(&id) {
            record.state = state;
            if state != FlowState::Suspended {
                record.suspended_on = None;
            }
        }
    }

    pub(crate) fn suspend(&self, id: FlowId, session: SessionKey) {
        if let Some(record) = self.records.lock().get_mut(&id) {
            record.state = FlowState::Suspended;
            record.suspended_on = Some(session);
        }
    }

    /// 只有处于挂起状态的 flow 才会被恢复
    pub(crate) fn resume(&self, id: FlowId) -> bool {
        match self.records.lock().get_mut(&id) {
            Some(record) if record.state == FlowState::Suspended => {
                record.state = FlowState::Runnable;
                record.suspended_on = None;
                true
            }
            _ => false,
        }
    }

    /// flow 结束：无人观察的记录立即回收
    pub(crate) fn finish(&self, id: FlowId, state: FlowState) {
        let mut records = self.records.lock();
        let observed = match records.get_mut(&id) {
            Some(record) => {
                record.state = state;
                record.suspended_on = None;
                record.cancel = None;
                record.observed
            }
            None => return,
        };
        if !observed {
            records.remove(&id);
        }
    }

    /// 句柄放弃观察：已结束则回收，否则交给 `finish` 回收
    pub(crate) fn release(&self, id: FlowId) {
        let mut records = self.records.lock();
        let terminal = match records.get_mut(&id) {
            Some(record) => {
                record.observed = false;
                record.state.is_terminal()
            }
            None => return,
        };
        if terminal {
            records.remove(&id);
        }
    }

    pub(crate) fn take_cancel(&self, id: FlowId) -> Option<oneshot::Sender<()>> {
        self.records
            .lock()
            .get_mut(&id)
            .and_then(|record| record.cancel.take())
    }

    pub fn state(&self, id: FlowId) -> Option<FlowState> {
        self.records.lock().get(&id).map(|record| record.state)
    }

    pub fn suspended_on(&self, id: FlowId) -> Option<SessionKey> {
        self.records
            .lock()
            .get(&id)
            .and_then(|record| record.suspended_on.clone())
    }

    /// 尚未结束的 flow 数量
    pub fn outstanding(&self) -> usize {
        self.records
            .lock()
            .values()
            .filter(|record| !record.state.is_terminal())
            .count()
    }
}
