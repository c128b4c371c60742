//! Long-Poll Listener: one task per long-poll-capable primary pool, holding
//! a blocking RPC open and feeding whatever comes back straight to the
//! Stage Arbiter as an LP-origin event.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::warn;

use crate::arbiter::{FetchedUnit, Origin};
use crate::controller::Controller;
use crate::core::params::{LONGPOLL_FAILURE_WINDOW_SECS, LONGPOLL_MAX_CONSECUTIVE_FAILURES};
use crate::core::types::WorkUnit;
use crate::rpc::{PoolEndpoint, PoolTransport};

/// Runs until cancelled (by a pool switch or shutdown) or until
/// `LONGPOLL_MAX_CONSECUTIVE_FAILURES` failures land inside the failure
/// window.
pub async fn run<T: PoolTransport>(
    controller: Arc<Controller>,
    transport: Arc<T>,
    endpoint: PoolEndpoint,
    path: String,
    arbiter_tx: mpsc::Sender<FetchedUnit>,
) {
    let mut consecutive_failures = 0u32;
    let mut window_start = Instant::now();

    while !controller.is_shutting_down() {
        match transport.long_poll(&endpoint, &path).await {
            Ok(resp) => {
                consecutive_failures = 0;
                let unit = WorkUnit::new(resp.data, resp.midstate, resp.hash1, resp.target, crate::core::types::PoolRef { pool_no: endpoint.pool_no, generation: 0 }, resp.rolltime);
                if arbiter_tx.send(FetchedUnit { unit, origin: Origin::LongPoll }).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                let now = Instant::now();
                if now.duration_since(window_start) > Duration::from_secs(LONGPOLL_FAILURE_WINDOW_SECS) {
                    window_start = now;
                    consecutive_failures = 0;
                }
                consecutive_failures += 1;
                warn!(pool_no = endpoint.pool_no, error = %e, consecutive_failures, "long-poll request failed");
                if consecutive_failures >= LONGPOLL_MAX_CONSECUTIVE_FAILURES {
                    warn!(pool_no = endpoint.pool_no, "long-poll listener giving up after repeated failures");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::pool::{PoolRegistry, Strategy};
    use crate::rpc::mock::MockTransport;

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
    async fn long_poll_forwards_unit_to_arbiter_as_lp_origin() {
        let controller = Controller::new(settings(), PoolRegistry::new(Strategy::Failover));
        let transport = Arc::new(MockTransport::new());
        let (tx, mut rx) = mpsc::channel(4);
        let endpoint = PoolEndpoint { pool_no: 0, url: "http://p1".into(), user: "u".into(), pass: "p".into() };

        let ctrl = controller.clone();
        let handle = tokio::spawn(run(ctrl, transport, endpoint, "/lp".to_string(), tx));

        let fetched = rx.recv().await.unwrap();
        assert_eq!(fetched.origin, Origin::LongPoll);
        controller.kill_work().await;
        let _ = tokio::time::timeout(Duration::from_millis(100), handle).await;
    }
}
