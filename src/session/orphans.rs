use std::collections::{HashMap, VecDeque};

use tracing::debug;

use crate::message::{Envelope, SessionKey};

/// 先于 Initiate 到达的消息，按会话暂存
///
/// 最多跟踪 `capacity` 个会话；超出时丢弃最早开始暂存的会话。
pub(crate) struct Orphans {
    order: VecDeque<SessionKey>,
    early: HashMap<SessionKey, Vec<Envelope>>,
    capacity: usize,
}

impl Orphans {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            early: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// 暂存一条消息；同序号的重复消息返回 false
    pub(crate) fn buffer(&mut self, envelope: Envelope) -> bool {
        let key = envelope.session.clone();
        if let Some(early) = self.early.get_mut(&key) {
            if early.iter().any(|held| held.sequence == envelope.sequence) {
                return false;
            }
            early.push(envelope);
            return true;
        }

        while self.early.len() >= self.capacity {
            match self.order.pop_front() {
                Some(evicted) => {
                    if let Some(dropped) = self.early.remove(&evicted) {
                        debug!(session = %evicted, dropped = dropped.len(), "evicting buffered messages");
                    }
                }
                None => break,
            }
        }
        self.order.push_back(key.clone());
        self.early.insert(key, vec![envelope]);
        true
    }

    pub(crate) fn take(&mut self, key: &SessionKey) -> Vec<Envelope> {
        match self.early.remove(key) {
            Some(early) => {
                self.order.retain(|held| held != key);
                early
            }
            None => Vec::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.early.len()
    }
}
