//! Per-plugin advisory locks.
//!
//! Install, uninstall and content writes for the same
//! `(agent, filename, type)` are serialized; unrelated keys never wait on
//! each other. Entries are dropped from the table once nobody holds or
//! waits on them.

use std::sync::Arc;

use {
    dashmap::DashMap,
    tokio::sync::{Mutex, OwnedMutexGuard},
};

use crate::types::PluginType;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PluginKey {
    pub agent_id: String,
    pub filename: String,
    pub plugin_type: PluginType,
}

impl PluginKey {
    pub fn new(agent_id: &str, filename: &str, plugin_type: PluginType) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            filename: filename.to_string(),
            plugin_type,
        }
    }
}

#[derive(Default)]
pub struct KeyedLocks {
    locks: DashMap<PluginKey, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: PluginKey) -> KeyGuard<'_> {
        let mutex = Arc::clone(&self.locks.entry(key.clone()).or_default());
        let guard = mutex.lock_owned().await;
        KeyGuard {
            locks: self,
            key,
            guard: Some(guard),
        }
    }

    /// Number of keys currently held or awaited.
    pub fn active(&self) -> usize {
        self.locks.len()
    }
}

pub struct KeyGuard<'a> {
    locks: &'a KeyedLocks,
    key: PluginKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
