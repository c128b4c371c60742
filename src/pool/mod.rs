//! Pool Registry: tracks configured pools, their health, and the active
//! selection strategy. Mirrors the node's `NodeState`-style consolidation of
//! shared mutable state into a handful of `RwLock`-guarded fields (see
//! `network::NodeState`), but scoped to pool bookkeeping.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::core::types::PoolRef;

/// Which of the registered pools the Fetcher should target next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Failover,
    RoundRobin,
    Rotate,
    LoadBalance,
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "failover" => Ok(Strategy::Failover),
            "round-robin" | "round_robin" => Ok(Strategy::RoundRobin),
            "rotate" => Ok(Strategy::Rotate),
            "load-balance" | "load_balance" => Ok(Strategy::LoadBalance),
            other => Err(format!("unknown pool strategy: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PoolCounters {
    pub accepted: u64,
    pub rejected: u64,
    pub stale_shares: u64,
    pub discarded_work: u64,
    pub getwork_requested: u64,
    pub getfail_occasions: u64,
    pub remotefail_occasions: u64,
}

#[derive(Debug, Clone)]
pub struct Pool {
    pub pool_no: u32,
    pub generation: u64,
    pub url: String,
    pub user: String,
    pub pass: String,
    pub prio: u32,
    pub enabled: bool,
    pub idle: bool,
    pub lagging: bool,
    pub submit_fail: bool,
    pub hdr_path: Option<String>,
    pub counters: PoolCounters,
    pub idle_since: Option<Instant>,
    /// `None` once `remove` detaches the pool from the lookup order; the
    /// record itself is kept alive because in-flight WorkUnits may still
    /// hold a `PoolRef` into it.
    pub removed: bool,
}

impl Pool {
    pub fn work_ref(&self) -> PoolRef {
        PoolRef { pool_no: self.pool_no, generation: self.generation }
    }
}

pub struct PoolConfig {
    pub url: String,
    pub user: String,
    pub pass: String,
}

impl PoolConfig {
    /// Splits a combined `user:pass` form, deriving whichever half is
    /// missing, per §6's credential rule.
    pub fn from_userpass(url: String, userpass: &str) -> Self {
        match userpass.split_once(':') {
            Some((user, pass)) => PoolConfig { url, user: user.to_string(), pass: pass.to_string() },
            None => PoolConfig { url, user: userpass.to_string(), pass: String::new() },
        }
    }
}

struct Inner {
    pools: Vec<Pool>,
    /// Active lookup order: pool indices (into `pools`) that have not been
    /// removed, kept loosely in `prio` order.
    order: Vec<usize>,
    current: Option<usize>,
}

/// Tracks configured pools and drives the failover/round-robin/rotate/
/// load-balance selection policy described in the Pool Registry design.
pub struct PoolRegistry {
    inner: RwLock<Inner>,
    strategy: RwLock<Strategy>,
    failover_only: AtomicBool,
    lb_cursor: AtomicUsize,
}

impl PoolRegistry {
    pub fn new(strategy: Strategy) -> Self {
        PoolRegistry {
            inner: RwLock::new(Inner { pools: Vec::new(), order: Vec::new(), current: None }),
            strategy: RwLock::new(strategy),
            failover_only: AtomicBool::new(false),
            lb_cursor: AtomicUsize::new(0),
        }
    }

    pub fn set_failover_only(&self, on: bool) {
        self.failover_only.store(on, Ordering::Relaxed);
    }

    pub async fn set_strategy(&self, strategy: Strategy) {
        *self.strategy.write().await = strategy;
    }

    pub async fn strategy(&self) -> Strategy {
        *self.strategy.read().await
    }

    /// Appends a new pool. Its priority is one past the lowest currently
    /// assigned, and it becomes current only if this is the first pool.
    pub async fn add(&self, cfg: PoolConfig) -> u32 {
        let mut inner = self.inner.write().await;
        let pool_no = inner.pools.len() as u32;
        let prio = inner.pools.iter().filter(|p| !p.removed).count() as u32;
        inner.pools.push(Pool {
            pool_no,
            generation: 0,
            url: cfg.url,
            user: cfg.user,
            pass: cfg.pass,
            prio,
            enabled: true,
            idle: false,
            lagging: false,
            submit_fail: false,
            hdr_path: None,
            counters: PoolCounters::default(),
            idle_since: None,
            removed: false,
        });
        let idx = inner.pools.len() - 1;
        inner.order.push(idx);
        if inner.current.is_none() {
            inner.current = Some(idx);
        }
        pool_no
    }

    /// Detaches `pool_no` from the lookup order. The record is retained so
    /// WorkUnits already stamped with its `PoolRef` remain valid to inspect.
    pub async fn remove(&self, pool_no: u32) {
        let mut inner = self.inner.write().await;
        let Some(idx) = inner.pools.iter().position(|p| p.pool_no == pool_no && !p.removed) else {
            return;
        };
        let removed_prio = inner.pools[idx].prio;
        inner.pools[idx].removed = true;
        inner.order.retain(|&i| i != idx);
        for p in inner.pools.iter_mut() {
            if !p.removed && p.prio > removed_prio {
                p.prio -= 1;
            }
        }
        if inner.current == Some(idx) {
            inner.current = inner.order.first().copied();
        }
    }

    pub async fn enable(&self, pool_no: u32, enabled: bool) {
        let mut inner = self.inner.write().await;
        if let Some(p) = inner.pools.iter_mut().find(|p| p.pool_no == pool_no) {
            p.enabled = enabled;
        }
    }

    pub async fn current(&self) -> Option<Pool> {
        let inner = self.inner.read().await;
        inner.current.map(|idx| inner.pools[idx].clone())
    }

    pub async fn get(&self, pool_no: u32) -> Option<Pool> {
        let inner = self.inner.read().await;
        inner.pools.iter().find(|p| p.pool_no == pool_no).cloned()
    }

    /// Explicit operator/watchdog switch: `target`'s priority becomes 0 and
    /// every pool that previously sat ahead of it shifts back one slot.
    /// `None` re-runs selection under the current strategy.
    pub async fn switch_pools(&self, target: Option<u32>) {
        let strategy = self.strategy().await;
        let mut inner = self.inner.write().await;
        let target_idx = match target {
            Some(pool_no) => inner.pools.iter().position(|p| p.pool_no == pool_no && !p.removed),
            None => None,
        };

        if let Some(idx) = target_idx {
            let old_prio = inner.pools[idx].prio;
            if old_prio != 0 {
                for p in inner.pools.iter_mut() {
                    if !p.removed && p.prio < old_prio {
                        p.prio += 1;
                    }
                }
                inner.pools[idx].prio = 0;
            }
            inner.current = Some(idx);
            return;
        }

        let candidate = Self::pick(&inner, strategy, false, self.failover_only.load(Ordering::Relaxed));
        if let Some(idx) = candidate {
            inner.current = Some(idx);
            if strategy == Strategy::LoadBalance {
                self.lb_cursor.store(idx, Ordering::Relaxed);
            }
        }
    }

    fn pick(inner: &Inner, strategy: Strategy, lagging: bool, failover_only: bool) -> Option<usize> {
        let alive = |p: &Pool| p.enabled && !p.idle && !p.removed;

        match strategy {
            Strategy::Failover | Strategy::Rotate => inner
                .pools
                .iter()
                .enumerate()
                .filter(|(_, p)| alive(p))
                .min_by_key(|(_, p)| p.prio)
                .map(|(i, _)| i),
            Strategy::RoundRobin => {
                let current = inner.current.unwrap_or(0);
                let n = inner.pools.len();
                if n == 0 {
                    return None;
                }
                (1..=n)
                    .map(|offset| (current + offset) % n)
                    .find(|&i| alive(&inner.pools[i]))
                    .or_else(|| if alive(&inner.pools[current]) { Some(current) } else { None })
            }
            Strategy::LoadBalance => {
                let n = inner.pools.len();
                if n == 0 {
                    return None;
                }
                let start = inner.current.unwrap_or(0);
                (1..=n)
                    .map(|offset| (start + offset) % n)
                    .find(|&i| alive(&inner.pools[i]))
                    .or(inner.current)
            }
        }
        .or_else(|| {
            // `lagging` lets the caller look past the primary even outside
            // LOAD_BALANCE, unless the operator pinned failover-only mode.
            if lagging && !failover_only && strategy != Strategy::LoadBalance {
                inner.pools.iter().enumerate().find(|(_, p)| alive(p)).map(|(i, _)| i)
            } else {
                None
            }
        })
    }

    /// Returns the pool the Fetcher should target next, per the active
    /// strategy, advancing any rotating cursor as a side effect.
    pub async fn select(&self, lagging: bool) -> Option<Pool> {
        let strategy = self.strategy().await;
        let failover_only = self.failover_only.load(Ordering::Relaxed);
        let mut inner = self.inner.write().await;
        let idx = Self::pick(&inner, strategy, lagging, failover_only)?;
        if strategy == Strategy::RoundRobin || strategy == Strategy::LoadBalance {
            inner.current = Some(idx);
        }
        Some(inner.pools[idx].clone())
    }

    /// Idempotent: only the ALIVE→IDLE transition emits a warning and
    /// triggers re-selection.
    pub async fn mark_dead(&self, pool_no: u32) {
        let was_idle = {
            let mut inner = self.inner.write().await;
            let Some(p) = inner.pools.iter_mut().find(|p| p.pool_no == pool_no) else { return };
            let was_idle = p.idle;
            p.idle = true;
            p.idle_since = Some(Instant::now());
            was_idle
        };
        if !was_idle {
            warn!(pool_no, "pool not responding, marking idle");
            self.switch_pools(None).await;
        }
    }

    /// Idempotent: only the IDLE→ALIVE transition emits a "recovered"
    /// message. Promotes the pool back to current only under FAILOVER and
    /// only if it now outranks the current pool.
    pub async fn mark_alive(&self, pool_no: u32) {
        let (was_idle, prio, outranks_current) = {
            let mut inner = self.inner.write().await;
            let Some(idx) = inner.pools.iter().position(|p| p.pool_no == pool_no) else {
                return;
            };
            let was_idle = inner.pools[idx].idle;
            inner.pools[idx].idle = false;
            inner.pools[idx].idle_since = None;
            let prio = inner.pools[idx].prio;
            let outranks = inner.current.map(|c| prio < inner.pools[c].prio).unwrap_or(true);
            (was_idle, prio, outranks)
        };
        if was_idle {
            info!(pool_no, "pool recovered");
        }
        if was_idle && self.strategy().await == Strategy::Failover && outranks_current {
            let _ = prio;
            self.switch_pools(Some(pool_no)).await;
        }
    }

    /// Advances the current pool under the ROTATE strategy; called by the
    /// Watchdog every `rotate_period`. No-op under other strategies.
    pub async fn rotate_next(&self) {
        if self.strategy().await != Strategy::Rotate {
            return;
        }
        let mut inner = self.inner.write().await;
        let n = inner.pools.len();
        if n == 0 {
            return;
        }
        let current = inner.current.unwrap_or(0);
        if let Some(next) = (1..=n)
            .map(|offset| (current + offset) % n)
            .find(|&i| inner.pools[i].enabled && !inner.pools[i].idle && !inner.pools[i].removed)
        {
            inner.current = Some(next);
        }
    }

    pub async fn record_getwork_requested(&self, pool_no: u32) {
        let mut inner = self.inner.write().await;
        if let Some(p) = inner.pools.iter_mut().find(|p| p.pool_no == pool_no) {
            p.counters.getwork_requested += 1;
        }
    }

    pub async fn record_accepted(&self, pool_no: u32) {
        let mut inner = self.inner.write().await;
        if let Some(p) = inner.pools.iter_mut().find(|p| p.pool_no == pool_no) {
            p.counters.accepted += 1;
        }
    }

    pub async fn record_rejected(&self, pool_no: u32) {
        let mut inner = self.inner.write().await;
        if let Some(p) = inner.pools.iter_mut().find(|p| p.pool_no == pool_no) {
            p.counters.rejected += 1;
        }
    }

    pub async fn set_submit_fail(&self, pool_no: u32, failing: bool) {
        let mut inner = self.inner.write().await;
        if let Some(p) = inner.pools.iter_mut().find(|p| p.pool_no == pool_no) {
            p.submit_fail = failing;
        }
    }

    pub async fn all(&self) -> Vec<Pool> {
        self.inner.read().await.pools.iter().filter(|p| !p.removed).cloned().collect()
    }

    /// Invariant check used by tests: exactly one non-removed pool has
    /// `prio == 0`.
    #[cfg(test)]
    pub async fn invariant_single_primary(&self) -> bool {
        let inner = self.inner.read().await;
        inner.pools.iter().filter(|p| !p.removed).filter(|p| p.prio == 0).count() == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(url: &str) -> PoolConfig {
        PoolConfig { url: url.to_string(), user: "u".to_string(), pass: "p".to_string() }
    }

    #[tokio::test]
    async fn failover_promotes_next_on_death_and_reverts_on_recovery() {
        let reg = PoolRegistry::new(Strategy::Failover);
        let p0 = reg.add(cfg("http://p1")).await;
        let p1 = reg.add(cfg("http://p2")).await;

        assert_eq!(reg.current().await.unwrap().pool_no, p0);
        assert!(reg.invariant_single_primary().await);

        reg.mark_dead(p0).await;
        assert_eq!(reg.current().await.unwrap().pool_no, p1);

        reg.mark_alive(p0).await;
        assert_eq!(reg.current().await.unwrap().pool_no, p0);
        assert!(reg.invariant_single_primary().await);
    }

    #[tokio::test]
    async fn mark_dead_is_idempotent() {
        let reg = PoolRegistry::new(Strategy::Failover);
        let p0 = reg.add(cfg("http://p1")).await;
        reg.add(cfg("http://p2")).await;
        reg.mark_dead(p0).await;
        let idle_since_1 = reg.get(p0).await.unwrap().idle_since;
        reg.mark_dead(p0).await;
        let idle_since_2 = reg.get(p0).await.unwrap().idle_since;
        assert_eq!(idle_since_1, idle_since_2);
    }

    #[tokio::test]
    async fn round_robin_cycles_through_enabled_pools() {
        let reg = PoolRegistry::new(Strategy::RoundRobin);
        let p0 = reg.add(cfg("http://p1")).await;
        let p1 = reg.add(cfg("http://p2")).await;
        let first = reg.select(false).await.unwrap().pool_no;
        let second = reg.select(false).await.unwrap().pool_no;
        assert_ne!(first, second);
        assert!([p0, p1].contains(&first));
        assert!([p0, p1].contains(&second));
    }

    #[tokio::test]
    async fn rotate_advances_regardless_of_priority() {
        let reg = PoolRegistry::new(Strategy::Rotate);
        let p0 = reg.add(cfg("http://p1")).await;
        let p1 = reg.add(cfg("http://p2")).await;
        assert_eq!(reg.current().await.unwrap().pool_no, p0);
        reg.rotate_next().await;
        assert_eq!(reg.current().await.unwrap().pool_no, p1);
    }

    #[tokio::test]
    async fn remove_decrements_lower_priority_pools() {
        let reg = PoolRegistry::new(Strategy::Failover);
        let p0 = reg.add(cfg("http://p1")).await;
        let p1 = reg.add(cfg("http://p2")).await;
        let p2 = reg.add(cfg("http://p3")).await;
        reg.remove(p0).await;
        assert_eq!(reg.get(p1).await.unwrap().prio, 0);
        assert_eq!(reg.get(p2).await.unwrap().prio, 1);
        // the removed record is retained, not dropped
        assert!(reg.get(p0).await.unwrap().removed);
    }

    #[tokio::test]
    async fn switch_pools_to_current_is_a_no_op() {
        let reg = PoolRegistry::new(Strategy::Failover);
        let p0 = reg.add(cfg("http://p1")).await;
        reg.add(cfg("http://p2")).await;
        reg.switch_pools(Some(p0)).await;
        assert_eq!(reg.get(p0).await.unwrap().prio, 0);
        assert_eq!(reg.current().await.unwrap().pool_no, p0);
    }

    #[test]
    fn userpass_splits_on_first_colon() {
        let c = PoolConfig::from_userpass("http://x".to_string(), "alice:s3cr:et");
        assert_eq!(c.user, "alice");
        assert_eq!(c.pass, "s3cr:et");
    }
}
