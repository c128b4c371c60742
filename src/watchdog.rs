//! Watchdog: the single task that keeps hashmeter averages moving, pings
//! idle pools, advances the ROTATE cursor, enforces the schedule window, and
//! promotes/demotes hashers through their liveness states.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::controller::Controller;
use crate::core::params::{HASHER_DEAD_AFTER_SECS, HASHER_SICK_AFTER_SECS, WATCHDOG_MIN_INTERVAL_SECS};
use crate::core::types::HasherState;
use crate::schedule::ScheduleWindow;

/// Runs one tick of watchdog bookkeeping. Exposed as its own function (as
/// opposed to inlined in `run`) so tests can drive it deterministically
/// without sleeping.
pub async fn tick(controller: &Controller, schedule: Option<&ScheduleWindow>, now: Instant, wall_clock: chrono_like::Time) {
    // Keep rolling hashrate averages advancing even when every hasher is
    // stalled, by feeding a zero-hash sample sized to the time since the
    // last tick.
    {
        let mut last_tick = controller.last_hashmeter_tick.lock().await;
        let elapsed = now.duration_since(*last_tick);
        *last_tick = now;

        let mut hashers = controller.hashers.write().await;
        for h in hashers.iter_mut() {
            if !elapsed.is_zero() {
                h.update_rolling_mhps(0.0, elapsed);
            }
            if now.duration_since(h.last_report) > Duration::from_secs(HASHER_DEAD_AFTER_SECS) {
                if h.state != HasherState::Dead {
                    warn!(hasher_id = h.id, "device stopped reporting, marking dead");
                }
                h.state = HasherState::Dead;
            } else if now.duration_since(h.last_report) > Duration::from_secs(HASHER_SICK_AFTER_SECS) {
                if h.state == HasherState::Well {
                    warn!(hasher_id = h.id, "device not reporting, marking sick");
                    h.state = HasherState::Sick;
                }
            } else if h.state == HasherState::Sick || h.state == HasherState::NoStart {
                h.state = HasherState::Well;
            }
        }
    }

    {
        let mut last_rotate = controller.last_rotate.lock().await;
        if now.duration_since(*last_rotate) >= controller.settings.rotate_period {
            controller.pools.rotate_next().await;
            *last_rotate = now;
        }
    }

    for pool in controller.pools.all().await {
        if pool.idle {
            let since_idle = pool.idle_since.map(|t| now.duration_since(t)).unwrap_or_default();
            if since_idle >= Duration::from_secs(crate::core::params::IDLE_PING_INTERVAL_SECS) {
                controller.pools.mark_alive(pool.pool_no).await;
            }
        }
    }

    if let Some(window) = schedule {
        let should_mine = window.should_mine(wall_clock);
        let mut hashers = controller.hashers.write().await;
        for h in hashers.iter_mut() {
            h.paused = !should_mine;
        }
        if !should_mine && window.is_stop_only() {
            controller.kill_work().await;
        }
    }
}

/// Long-running loop: ticks every `max(log_interval/2, 1s)`.
pub async fn run(controller: Arc<Controller>, schedule: Option<ScheduleWindow>) {
    let interval = (controller.settings.log_interval / 2).max(Duration::from_secs(WATCHDOG_MIN_INTERVAL_SECS));
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if controller.is_shutting_down() {
            break;
        }
        tick(&controller, schedule.as_ref(), Instant::now(), chrono_like::Time::now()).await;
    }
}

/// Minimal wall-clock-of-day helper, kept local rather than pulling in a
/// full date/time crate for a single HH:MM comparison (see `schedule.rs`).
pub mod chrono_like {
    #[derive(Debug, Clone, Copy)]
    pub struct Time {
        pub minutes_since_midnight: u32,
    }

    impl Time {
        pub fn now() -> Self {
            let secs = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            Time { minutes_since_midnight: ((secs / 60) % (24 * 60)) as u32 }
        }

        pub fn from_hhmm(s: &str) -> Option<Self> {
            let (h, m) = s.split_once(':')?;
            let h: u32 = h.parse().ok()?;
            let m: u32 = m.parse().ok()?;
            if h >= 24 || m >= 60 {
                return None;
            }
            Some(Time { minutes_since_midnight: h * 60 + m })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::pool::{PoolRegistry, Strategy};

    fn settings() -> Settings {
        Settings {
            pools: vec![],
            retries: -1,
            scantime: Duration::from_secs(60),
            queue_depth: 2,
            pool_strategy: Strategy::Failover,
            rotate_period: Duration::from_secs(60),
            submit_stale: false,
            failover_only: false,
            dynamic: false,
            log_interval: Duration::from_secs(5),
            sched_start: None,
            sched_stop: None,
            cpu_threads: 1,
            gpu_threads: 0,
            shares_goal: None,
        }
    }

    #[tokio::test]
    async fn hasher_marked_sick_then_dead_by_silence() {
        let controller = Controller::new(settings(), PoolRegistry::new(Strategy::Failover));
        controller.spawn_hashers(1, 0).await;
        {
            let mut hashers = controller.hashers.write().await;
            hashers[0].state = HasherState::Well;
            hashers[0].last_report = Instant::now() - Duration::from_secs(HASHER_SICK_AFTER_SECS + 1);
        }
        tick(&controller, None, Instant::now(), chrono_like::Time::now()).await;
        assert_eq!(controller.hasher_snapshot().await[0].state, HasherState::Sick);

        {
            let mut hashers = controller.hashers.write().await;
            hashers[0].last_report = Instant::now() - Duration::from_secs(HASHER_DEAD_AFTER_SECS + 1);
        }
        tick(&controller, None, Instant::now(), chrono_like::Time::now()).await;
        assert_eq!(controller.hasher_snapshot().await[0].state, HasherState::Dead);
    }

    #[tokio::test]
    async fn rotate_next_only_fires_once_rotate_period_elapses() {
        use crate::pool::PoolConfig;

        let mut cfg = settings();
        cfg.pool_strategy = Strategy::Rotate;
        cfg.rotate_period = Duration::from_secs(60);
        let registry = PoolRegistry::new(Strategy::Rotate);
        let p0 = registry.add(PoolConfig { url: "http://p1".into(), user: "u".into(), pass: "p".into() }).await;
        let p1 = registry.add(PoolConfig { url: "http://p2".into(), user: "u".into(), pass: "p".into() }).await;
        let controller = Controller::new(cfg, registry);
        assert_eq!(controller.pools.current().await.unwrap().pool_no, p0);

        let start = Instant::now();
        tick(&controller, None, start, chrono_like::Time::now()).await;
        assert_eq!(controller.pools.current().await.unwrap().pool_no, p0);

        tick(&controller, None, start + Duration::from_secs(65), chrono_like::Time::now()).await;
        assert_eq!(controller.pools.current().await.unwrap().pool_no, p1);
    }

    #[tokio::test]
    async fn sick_hasher_recovers_to_well_on_fresh_report() {
        let controller = Controller::new(settings(), PoolRegistry::new(Strategy::Failover));
        controller.spawn_hashers(1, 0).await;
        {
            let mut hashers = controller.hashers.write().await;
            hashers[0].state = HasherState::Sick;
            hashers[0].last_report = Instant::now();
        }
        tick(&controller, None, Instant::now(), chrono_like::Time::now()).await;
        assert_eq!(controller.hasher_snapshot().await[0].state, HasherState::Well);
    }
}
