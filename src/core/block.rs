//! Block-prefix set: a membership-only structure used to distinguish
//! "same block, new work" from "new block". Modeled on the node's
//! `known_addresses`-style `RwLock<HashSet<_>>` state.

use std::collections::HashSet;

use tokio::sync::RwLock;

pub struct BlockTracker {
    seen: RwLock<HashSet<String>>,
    current: RwLock<Option<String>>,
}

impl BlockTracker {
    pub fn new() -> Self {
        BlockTracker {
            seen: RwLock::new(HashSet::new()),
            current: RwLock::new(None),
        }
    }

    pub async fn current(&self) -> Option<String> {
        self.current.read().await.clone()
    }

    pub async fn contains(&self, prefix: &str) -> bool {
        self.seen.read().await.contains(prefix)
    }

    /// Records `prefix` if unseen and makes it the current block. Returns
    /// `true` if this was a genuinely new block (prefix never seen before).
    ///
    /// A block prefix, once inserted, never leaves the set for the life of
    /// the process.
    pub async fn observe(&self, prefix: &str) -> bool {
        let is_new = {
            let mut seen = self.seen.write().await;
            seen.insert(prefix.to_string())
        };
        if is_new {
            *self.current.write().await = Some(prefix.to_string());
        }
        is_new
    }
}

impl Default for BlockTracker {
    fn default() -> Self {
        Self::new()
    }
}
