//! Submit Worker: consumes `SubmitWork` commands, filters stale finds, and
//! retries failed submissions with the same backoff discipline as the
//! Fetcher.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::controller::Controller;
use crate::core::params::{DEFAULT_FAIL_PAUSE_SECS, FAIL_PAUSE_INCREMENT_SECS};
use crate::core::types::WorkUnit;
use crate::rpc::{PoolEndpoint, PoolTransport};

pub struct SubmitCommand {
    pub unit: WorkUnit,
    pub hasher_id: u32,
}

pub async fn run<T: PoolTransport>(
    controller: Arc<Controller>,
    transport: Arc<T>,
    mut rx: mpsc::Receiver<SubmitCommand>,
) {
    while let Some(cmd) = rx.recv().await {
        submit_one(&controller, &*transport, cmd).await;
        if controller.share_goal_reached() {
            info!("share goal reached, initiating shutdown");
            controller.kill_work().await;
            break;
        }
    }
}

async fn submit_one<T: PoolTransport>(controller: &Controller, transport: &T, cmd: SubmitCommand) {
    let SubmitCommand { unit, hasher_id } = cmd;
    let current_block = controller.blocks.current().await.unwrap_or_default();

    if !controller.settings.submit_stale && unit.is_stale(Instant::now(), controller.settings.scantime, &current_block) {
        let mut totals = controller.totals.lock().await;
        totals.stale_shares += 1;
        controller.pools.mark_alive(unit.pool.pool_no).await;
        return;
    }

    let data_hex = hex::encode(unit.data);
    let mut fail_pause = Duration::from_secs(DEFAULT_FAIL_PAUSE_SECS);
    let mut attempts = 0i32;

    loop {
        let Some(pool) = controller.pools.get(unit.pool.pool_no).await else {
            warn!(pool_no = unit.pool.pool_no, "submit target pool no longer known");
            return;
        };
        let endpoint = PoolEndpoint { pool_no: pool.pool_no, url: pool.url.clone(), user: pool.user.clone(), pass: pool.pass.clone() };

        match transport.submit_work(&endpoint, &data_hex).await {
            Ok(true) => {
                controller.pools.record_accepted(pool.pool_no).await;
                controller.pools.set_submit_fail(pool.pool_no, false).await;
                controller.update_hasher(hasher_id, |h| h.accepted += 1).await;
                controller.record_share_submitted();
                info!(pool_no = pool.pool_no, hash_prefix = %hex::encode(&unit.data[..4]), "accepted");
                return;
            }
            Ok(false) => {
                controller.pools.record_rejected(pool.pool_no).await;
                controller.update_hasher(hasher_id, |h| h.rejected += 1).await;
                warn!(pool_no = pool.pool_no, "share rejected");
                return;
            }
            Err(e) => {
                attempts += 1;
                if controller.settings.retries >= 0 && attempts > controller.settings.retries {
                    controller.pools.set_submit_fail(pool.pool_no, true).await;
                    warn!(pool_no = pool.pool_no, error = %e, "submit failed persistently, caching share as lost");
                    return;
                }
                tokio::time::sleep(fail_pause).await;
                fail_pause += Duration::from_secs(FAIL_PAUSE_INCREMENT_SECS);
            }
        }
    }
}
