//! Controller: the single shared context passed to every task, consolidating
//! what the design notes call the source's scattered global state. Locks are
//! per-field rather than one giant monitor, mirroring the node's
//! `NodeState` (`chain`, `mempool`, `peers` each behind their own lock).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, Mutex, RwLock};

use crate::config::Settings;
use crate::core::block::BlockTracker;
use crate::core::types::{Hasher, HasherState};
use crate::pool::PoolRegistry;
use crate::queue::WorkQueue;

/// Global totals the status line and tests read back. Kept as one
/// `Mutex`-guarded struct (the `hash_lock` equivalent) since these fields
/// are always updated together.
#[derive(Debug, Default, Clone)]
pub struct Totals {
    pub total_mhashes: f64,
    pub total_accepted: u64,
    pub total_rejected: u64,
    pub stale_shares: u64,
    pub hw_errors: u64,
}

pub struct Controller {
    pub settings: Settings,
    pub pools: PoolRegistry,
    pub queue: WorkQueue,
    pub blocks: BlockTracker,
    pub hashers: RwLock<Vec<Hasher>>,
    pub totals: Mutex<Totals>,
    pub new_blocks: AtomicU64,
    pub local_work: AtomicU64,
    /// DETECT warnings are suppressed for the cycle immediately following an
    /// LP-originated block change.
    pub suppress_next_detect: AtomicBool,
    /// Single-writer-many-reader restart signal: the atomic flag serves
    /// in-loop checks, the broadcast channel wakes hashers parked in a long
    /// timed wait inside `get_work`.
    restart_flag: AtomicBool,
    restart_tx: broadcast::Sender<()>,
    shutting_down: AtomicBool,
    shares_submitted: AtomicU64,
    /// Last time the ROTATE cursor advanced; gates the Watchdog against
    /// `settings.rotate_period`.
    pub last_rotate: Mutex<Instant>,
    /// Last watchdog tick, used to size the zero-hash sample fed into each
    /// hasher's rolling average while stalled.
    pub last_hashmeter_tick: Mutex<Instant>,
}

impl Controller {
    pub fn new(settings: Settings, pools: PoolRegistry) -> Arc<Self> {
        let (restart_tx, _rx) = broadcast::channel(16);
        let now = Instant::now();
        Arc::new(Controller {
            settings,
            pools,
            queue: WorkQueue::new(),
            blocks: BlockTracker::new(),
            hashers: RwLock::new(Vec::new()),
            totals: Mutex::new(Totals::default()),
            new_blocks: AtomicU64::new(0),
            local_work: AtomicU64::new(0),
            suppress_next_detect: AtomicBool::new(false),
            restart_flag: AtomicBool::new(false),
            restart_tx,
            shutting_down: AtomicBool::new(false),
            shares_submitted: AtomicU64::new(0),
            last_rotate: Mutex::new(now),
            last_hashmeter_tick: Mutex::new(now),
        })
    }

    pub async fn spawn_hashers(&self, cpu_threads: usize, gpu_threads: usize) {
        let mut hashers = self.hashers.write().await;
        let mut id = 0u32;
        for _ in 0..gpu_threads {
            hashers.push(Hasher::new(id, true));
            id += 1;
        }
        for _ in 0..cpu_threads {
            hashers.push(Hasher::new(id, false));
            id += 1;
        }
    }

    pub fn subscribe_restart(&self) -> broadcast::Receiver<()> {
        self.restart_tx.subscribe()
    }

    pub fn restart_requested(&self) -> bool {
        self.restart_flag.load(Ordering::SeqCst)
    }

    pub fn clear_restart(&self) {
        self.restart_flag.store(false, Ordering::SeqCst);
    }

    /// Sets the flag for in-loop checks and wakes anyone parked waiting on
    /// the broadcast channel — used on block change and on explicit restart
    /// requests (e.g. a watchdog-detected device hang).
    pub fn request_restart_all(&self) {
        self.restart_flag.store(true, Ordering::SeqCst);
        let _ = self.restart_tx.send(());
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn record_share_submitted(&self) -> u64 {
        self.shares_submitted.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn share_goal_reached(&self) -> bool {
        match self.settings.shares_goal {
            Some(goal) => self.shares_submitted.load(Ordering::SeqCst) >= goal,
            None => false,
        }
    }

    /// Shuts the pipeline down in the documented order: watchdog, hashers,
    /// stage arbiter, long-poll, fetcher. Each stage responds to
    /// cancellation by freezing its queue and exiting; callers own the
    /// actual task handles and abort them in this order after calling this.
    pub async fn kill_work(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.queue.freeze().await;
        self.request_restart_all();
    }

    pub async fn update_hasher(&self, id: u32, f: impl FnOnce(&mut Hasher)) {
        let mut hashers = self.hashers.write().await;
        if let Some(h) = hashers.iter_mut().find(|h| h.id == id) {
            f(h);
        }
    }

    pub async fn hasher_snapshot(&self) -> Vec<Hasher> {
        self.hashers.read().await.clone()
    }

    pub async fn well_hasher_count(&self) -> usize {
        self.hashers.read().await.iter().filter(|h| h.state == HasherState::Well).count()
    }

    pub async fn hasher_paused(&self, id: u32) -> bool {
        self.hashers.read().await.iter().find(|h| h.id == id).map(|h| h.paused).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Strategy;

    fn settings() -> Settings {
        Settings {
            pools: vec![],
            retries: -1,
            scantime: std::time::Duration::from_secs(60),
            queue_depth: 2,
            pool_strategy: Strategy::Failover,
            rotate_period: std::time::Duration::from_secs(60),
            submit_stale: false,
            failover_only: false,
            dynamic: false,
            log_interval: std::time::Duration::from_secs(5),
            sched_start: None,
            sched_stop: None,
            cpu_threads: 1,
            gpu_threads: 0,
            shares_goal: Some(2),
        }
    }

    #[tokio::test]
    async fn restart_flag_round_trips() {
        let ctrl = Controller::new(settings(), PoolRegistry::new(Strategy::Failover));
        assert!(!ctrl.restart_requested());
        ctrl.request_restart_all();
        assert!(ctrl.restart_requested());
        ctrl.clear_restart();
        assert!(!ctrl.restart_requested());
    }

    #[tokio::test]
    async fn share_goal_reached_after_enough_submissions() {
        let ctrl = Controller::new(settings(), PoolRegistry::new(Strategy::Failover));
        assert!(!ctrl.share_goal_reached());
        ctrl.record_share_submitted();
        ctrl.record_share_submitted();
        assert!(ctrl.share_goal_reached());
    }

    #[tokio::test]
    async fn hasher_paused_reflects_flag_set_by_watchdog() {
        let ctrl = Controller::new(settings(), PoolRegistry::new(Strategy::Failover));
        ctrl.spawn_hashers(1, 0).await;
        assert!(!ctrl.hasher_paused(0).await);
        ctrl.update_hasher(0, |h| h.paused = true).await;
        assert!(ctrl.hasher_paused(0).await);
    }

    #[tokio::test]
    async fn kill_work_freezes_queue_and_flags_shutdown() {
        use crate::core::types::{PoolRef, WorkUnit};
        let ctrl = Controller::new(settings(), PoolRegistry::new(Strategy::Failover));
        ctrl.kill_work().await;
        assert!(ctrl.is_shutting_down());
        let unit = WorkUnit::new([0u8; 128], [0u8; 32], [0u8; 64], [0u8; 32], PoolRef { pool_no: 0, generation: 0 }, true);
        assert!(!ctrl.queue.push(unit).await);
    }
}
