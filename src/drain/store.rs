use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::Envelope;

/// 排空状态快照：开关与暂存的 Initiate（按到达顺序）
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DrainingSnapshot {
    pub enabled: bool,
    #[serde(default)]
    pub held: Vec<Envelope>,
}

/// 排空状态存储 trait
///
/// 在闸门临界区内调用，实现应保持快速、同步。
pub trait HoldingStore: Send + Sync {
    fn load(&self) -> Result<Option<DrainingSnapshot>>;
    fn save(&self, snapshot: &DrainingSnapshot) -> Result<()>;
}

/// 内存存储实现
#[derive(Default)]
pub struct MemoryHoldingStore {
    inner: RwLock<Option<DrainingSnapshot>>,
}

impl MemoryHoldingStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    pub fn snapshot(&self) -> Option<DrainingSnapshot> {
        self.inner.read().clone()
    }
}

impl HoldingStore for MemoryHoldingStore {
    fn load(&self) -> Result<Option<DrainingSnapshot>> {
        Ok(self.inner.read().clone())
    }

    fn save(&self, snapshot: &DrainingSnapshot) -> Result<()> {
        *self.inner.write() = Some(snapshot.clone());
        Ok(())
    }
}

/// JSON 文件存储，节点重启后恢复排空状态
pub struct FileHoldingStore {
    path: PathBuf,
}

impl FileHoldingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HoldingStore for FileHoldingStore {
    fn load(&self) -> Result<Option<DrainingSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn save(&self, snapshot: &DrainingSnapshot) -> Result<()> {
        let raw = serde_json::to_string_pretty(snapshot)?;
        let staging = self.path.with_extension("tmp");
        fs::write(&staging, raw).with_context(|| format!("writing {}", staging.display()))?;
        fs::rename(&staging, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{PeerId, SessionKey};
    use tempfile::tempdir;

    #[test]
    fn file_store_round_trip() {
        let dir = tempdir().expect("temp dir");
        let store = FileHoldingStore::new(dir.path().join("draining.json"));
        assert_eq!(store.load().unwrap(), None);

        let snapshot = DrainingSnapshot {
            enabled: true,
            held: vec![Envelope::initiate(
                PeerId::new("alice"),
                PeerId::new("bob"),
                SessionKey::new("alice", 1),
                "InitiateSessionFlow",
            )],
        };
        store.save(&snapshot).unwrap();
        assert_eq!(store.load().unwrap(), Some(snapshot));
    }
}
