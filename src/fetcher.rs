//! Work Fetcher: drains a `GetWork` command channel, selects a pool, and
//! hands successfully fetched units to the Stage Arbiter. Backoff discipline
//! mirrors the Submit Worker's — both escalate `fail_pause` and share the
//! same retry cap.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::arbiter::{FetchedUnit, Origin};
use crate::controller::Controller;
use crate::core::params::{ATTEMPTS_PER_REQUEST, DEFAULT_FAIL_PAUSE_SECS, FAIL_PAUSE_INCREMENT_SECS};
use crate::core::types::{PoolRef, WorkUnit};
use crate::error::CoordinatorError;
use crate::rpc::{PoolEndpoint, PoolTransport, WorkResponse};

pub struct GetWorkRequest {
    pub lagging: bool,
}

fn response_to_unit(resp: WorkResponse, pool_ref: PoolRef) -> WorkUnit {
    WorkUnit::new(resp.data, resp.midstate, resp.hash1, resp.target, pool_ref, resp.rolltime)
}

/// Runs until `rx` closes or a retry-cap overrun marks the controller
/// fatally shut down.
pub async fn run<T: PoolTransport>(
    controller: Arc<Controller>,
    transport: Arc<T>,
    mut rx: mpsc::Receiver<GetWorkRequest>,
    arbiter_tx: mpsc::Sender<FetchedUnit>,
) {
    while let Some(req) = rx.recv().await {
        if controller.is_shutting_down() {
            break;
        }
        match fetch_one(&controller, &*transport, req.lagging).await {
            Ok(unit) => {
                let _ = arbiter_tx.send(FetchedUnit { unit, origin: Origin::Fetch }).await;
            }
            Err(e) if e.is_fatal() => {
                error!(error = %e, "fetcher exhausted retries, shutting down");
                controller.kill_work().await;
                break;
            }
            Err(e) => {
                warn!(error = %e, "fetch request abandoned");
            }
        }
    }
}

/// One logical `GetWork` request: up to `ATTEMPTS_PER_REQUEST` attempts
/// against the selected pool, then an escalating sleep, until `opt_retries`
/// is exhausted (a negative value means unbounded retries).
async fn fetch_one<T: PoolTransport>(
    controller: &Controller,
    transport: &T,
    lagging: bool,
) -> Result<WorkUnit, CoordinatorError> {
    let mut fail_pause = Duration::from_secs(DEFAULT_FAIL_PAUSE_SECS);
    let mut attempts_total = 0i32;

    loop {
        let pool = controller
            .pools
            .select(lagging)
            .await
            .ok_or_else(|| CoordinatorError::fatal("no pools reachable"))?;
        let endpoint = PoolEndpoint { pool_no: pool.pool_no, url: pool.url.clone(), user: pool.user.clone(), pass: pool.pass.clone() };

        let mut last_err = None;
        for _ in 0..ATTEMPTS_PER_REQUEST {
            match transport.get_work(&endpoint).await {
                Ok(resp) => {
                    controller.pools.record_getwork_requested(pool.pool_no).await;
                    controller.pools.mark_alive(pool.pool_no).await;
                    return Ok(response_to_unit(resp, pool.work_ref()));
                }
                Err(e) => last_err = Some(e),
            }
        }

        controller.pools.mark_dead(pool.pool_no).await;
        attempts_total += 1;
        if controller.settings.retries >= 0 && attempts_total > controller.settings.retries {
            return Err(CoordinatorError::fatal(format!(
                "exceeded retry cap fetching work: {}",
                last_err.map(|e| e.to_string()).unwrap_or_default()
            )));
        }

        tokio::time::sleep(fail_pause).await;
        fail_pause += Duration::from_secs(FAIL_PAUSE_INCREMENT_SECS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::pool::{PoolConfig, PoolRegistry, Strategy};
    use crate::rpc::mock::MockTransport;

    fn settings(retries: i32) -> Settings {
        Settings {
            pools: vec![],
            retries,
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
    async fn fetch_one_succeeds_against_healthy_pool() {
        let registry = PoolRegistry::new(Strategy::Failover);
        registry.add(PoolConfig { url: "http://p1".into(), user: "u".into(), pass: "p".into() }).await;
        let controller = Controller::new(settings(-1), registry);
        let transport = MockTransport::new();
        let unit = fetch_one(&controller, &transport, false).await.unwrap();
        assert_eq!(unit.data[0], 0xAA);
    }

    #[tokio::test]
    async fn fetch_one_is_fatal_once_retry_cap_exhausted() {
        let registry = PoolRegistry::new(Strategy::Failover);
        registry.add(PoolConfig { url: "http://p1".into(), user: "u".into(), pass: "p".into() }).await;
        let controller = Controller::new(settings(0), registry);
        let transport = MockTransport::new();
        transport.fail_next_n(100);
        let result = fetch_one(&controller, &transport, false).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().is_fatal());
    }
}
