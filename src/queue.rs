//! Work Queue: an ordered collection of staged `WorkUnit`s plus the
//! clone/roll/fresh dispatch policy described in the component design.
//! Modeled on the node's `tokio::sync::{Mutex, RwLock}`-guarded shared
//! state, with a `Notify` standing in for the original's condition variable.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify};

use crate::core::block::BlockTracker;
use crate::core::types::{WorkOrigin, WorkUnit};

struct Inner {
    /// Keyed by `id`; iteration order is the `BTreeMap`'s key order, which
    /// doubles as FIFO admission order since ids are monotonic.
    staged: BTreeMap<u64, WorkUnit>,
    frozen: bool,
    local_work: u64,
    total_discarded: u64,
    count_staged_clones: u64,
}

pub struct WorkQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        WorkQueue {
            inner: Mutex::new(Inner {
                staged: BTreeMap::new(),
                frozen: false,
                local_work: 0,
                total_discarded: 0,
                count_staged_clones: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Returns `false` (and drops the unit) if the queue is frozen, matching
    /// the Stage Arbiter's shutdown-drain behavior.
    pub async fn push(&self, unit: WorkUnit) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.frozen {
            return false;
        }
        if unit.is_clone {
            inner.count_staged_clones += 1;
        }
        inner.staged.insert(unit.id, unit);
        drop(inner);
        self.notify.notify_one();
        true
    }

    /// Oldest staged unit by `id`/`staged_at` order, waiting up to `timeout`
    /// for one to appear. Returns `None` on timeout or once frozen and
    /// drained.
    pub async fn pop(&self, timeout: Duration) -> Option<WorkUnit> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut inner = self.inner.lock().await;
                if let Some((&id, _)) = inner.staged.iter().next() {
                    return inner.staged.remove(&id);
                }
                if inner.frozen {
                    return None;
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(remaining) => return None,
            }
        }
    }

    /// Pops the oldest unit and applies the clone/roll/fresh policy for a
    /// Hasher requesting work with divisor hint `hash_div`. This is the
    /// "hardest logic" in the module: divide first, then roll, then discard
    /// and retry a pop-time-stale unit rather than hand it to a hasher only
    /// to have it filtered later at submit.
    pub async fn get_work(
        &self,
        timeout: Duration,
        hash_div: u64,
        scantime: Duration,
        blocks: &BlockTracker,
    ) -> Option<(WorkUnit, WorkOrigin)> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let mut unit = self.pop(remaining).await?;

            if let Some(clone) = unit.divide(hash_div) {
                self.requeue_local(unit).await;
                return Some((clone, WorkOrigin::Cloned));
            }

            let now = Instant::now();
            if unit.can_roll(now, scantime) {
                unit.roll();
                let delivered = unit.clone();
                self.requeue_local(unit).await;
                return Some((delivered, WorkOrigin::Rolled));
            }

            if let Some(current) = blocks.current().await {
                if unit.is_stale(now, scantime, &current) {
                    self.record_discarded().await;
                    continue;
                }
            }

            return Some((unit, WorkOrigin::Fresh));
        }
    }

    async fn record_discarded(&self) {
        let mut inner = self.inner.lock().await;
        inner.total_discarded += 1;
    }

    async fn requeue_local(&self, unit: WorkUnit) {
        let mut inner = self.inner.lock().await;
        inner.local_work += 1;
        if !inner.frozen {
            inner.staged.insert(unit.id, unit);
        }
        drop(inner);
        self.notify.notify_one();
    }

    /// Subsequent `push` fails and `pop` drains then returns `None`.
    pub async fn freeze(&self) {
        self.inner.lock().await.frozen = true;
        self.notify.notify_waiters();
    }

    pub async fn iter_stale(&self, scantime: Duration, current_block: &str) -> Vec<u64> {
        let now = Instant::now();
        let inner = self.inner.lock().await;
        inner
            .staged
            .values()
            .filter(|u| u.is_stale(now, scantime, current_block))
            .map(|u| u.id)
            .collect()
    }

    /// Removes and counts the given ids as discarded (used when a block
    /// change invalidates everything staged against the old prefix).
    pub async fn discard(&self, ids: &[u64]) -> usize {
        let mut inner = self.inner.lock().await;
        let mut n = 0;
        for id in ids {
            if inner.staged.remove(id).is_some() {
                n += 1;
            }
        }
        inner.total_discarded += n as u64;
        n
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.staged.len()
    }

    pub async fn local_work(&self) -> u64 {
        self.inner.lock().await.local_work
    }

    pub async fn total_discarded(&self) -> u64 {
        self.inner.lock().await.total_discarded
    }

    pub async fn count_staged_clones(&self) -> u64 {
        self.inner.lock().await.count_staged_clones
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::params::WORK_DATA_LEN;
    use crate::core::types::PoolRef;

    fn unit() -> WorkUnit {
        WorkUnit::new(
            [0u8; WORK_DATA_LEN],
            [0u8; 32],
            [0u8; 64],
            [0u8; 32],
            PoolRef { pool_no: 0, generation: 0 },
            true,
        )
    }

    #[tokio::test]
    async fn push_then_pop_returns_oldest_first() {
        let q = WorkQueue::new();
        let a = unit();
        let b = unit();
        let a_id = a.id;
        q.push(a).await;
        q.push(b).await;
        let popped = q.pop(Duration::from_millis(50)).await.unwrap();
        assert_eq!(popped.id, a_id);
    }

    #[tokio::test]
    async fn pop_times_out_on_empty_queue() {
        let q = WorkQueue::new();
        let popped = q.pop(Duration::from_millis(20)).await;
        assert!(popped.is_none());
    }

    #[tokio::test]
    async fn frozen_queue_refuses_push_and_drains_then_empties() {
        let q = WorkQueue::new();
        q.push(unit()).await;
        q.freeze().await;
        assert!(!q.push(unit()).await);
        assert!(q.pop(Duration::from_millis(10)).await.is_some());
        assert!(q.pop(Duration::from_millis(10)).await.is_none());
    }

    #[tokio::test]
    async fn get_work_divides_when_nonce_space_allows() {
        let q = WorkQueue::new();
        q.push(unit()).await;
        let blocks = BlockTracker::new();
        let (delivered, origin) =
            q.get_work(Duration::from_millis(50), 4, Duration::from_secs(60), &blocks).await.unwrap();
        assert_eq!(origin, WorkOrigin::Cloned);
        assert!(delivered.is_clone);
        assert_eq!(q.local_work().await, 1);
        assert_eq!(q.len().await, 1);
    }

    #[tokio::test]
    async fn get_work_rolls_when_not_divisible_and_not_stale() {
        let q = WorkQueue::new();
        q.push(unit()).await;
        let blocks = BlockTracker::new();
        let (delivered, origin) =
            q.get_work(Duration::from_millis(50), 0, Duration::from_secs(60), &blocks).await.unwrap();
        assert_eq!(origin, WorkOrigin::Rolled);
        assert_eq!(delivered.rolls, 1);
    }

    #[tokio::test]
    async fn get_work_discards_pop_time_stale_unit_instead_of_dispatching_it() {
        let q = WorkQueue::new();
        // Not rollable (rolls already maxed) and from a block that no
        // longer matches the tracker's current prefix, so it should be
        // discarded on pop rather than handed out as "fresh".
        let mut stale = unit();
        stale.rolls = crate::core::params::MAX_ROLLS;
        q.push(stale).await;

        let blocks = BlockTracker::new();
        blocks.observe("ffffffffffffffffffffffffffffffffffff").await;

        let result = q.get_work(Duration::from_millis(50), 0, Duration::from_secs(60), &blocks).await;
        assert!(result.is_none());
        assert_eq!(q.total_discarded().await, 1);
        assert_eq!(q.len().await, 0);
    }

    #[tokio::test]
    async fn iter_stale_flags_block_mismatch_and_age() {
        let q = WorkQueue::new();
        q.push(unit()).await;
        let stale = q.iter_stale(Duration::from_secs(60), "ffffffffffffffffffffffffffffffffffff").await;
        assert_eq!(stale.len(), 1);
    }
}
