use std::collections::{HashSet, VecDeque};

use crate::message::SessionKey;

/// 最近关闭的会话键，用于丢弃迟到的重复 Initiate
pub(crate) struct Tombstones {
    order: VecDeque<SessionKey>,
    keys: HashSet<SessionKey>,
    capacity: usize,
}

impl Tombstones {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            keys: HashSet::new(),
            capacity,
        }
    }

    pub(crate) fn insert(&mut self, key: SessionKey) {
        if self.capacity == 0 || !self.keys.insert(key.clone()) {
            return;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.keys.remove(&evicted);
            }
        }
    }

    pub(crate) fn contains(&self, key: &SessionKey) -> bool {
        self.keys.contains(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let mut tombstones = Tombstones::new(2);
        tombstones.insert(SessionKey::new("a", 1));
        tombstones.insert(SessionKey::new("a", 2));
        tombstones.insert(SessionKey::new("a", 3));
        assert!(!tombstones.contains(&SessionKey::new("a", 1)));
        assert!(tombstones.contains(&SessionKey::new("a", 2)));
        assert!(tombstones.contains(&SessionKey::new("a", 3)));
    }
}
