//! Stage Arbiter: the single-threaded consumer that turns freshly fetched
//! units into block-change detection and queue admission.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::controller::Controller;
use crate::core::types::WorkUnit;

/// Whether the unit arrived via long-poll (already warned about the new
/// block) or via an ordinary fetch (needs its own DETECT warning unless one
/// was just suppressed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Fetch,
    LongPoll,
}

pub struct FetchedUnit {
    pub unit: WorkUnit,
    pub origin: Origin,
}

/// Runs until `rx` closes. Detects block changes, discards stale units from
/// the prior block, and pushes admitted units into the Work Queue.
pub async fn run(controller: Arc<Controller>, mut rx: mpsc::Receiver<FetchedUnit>) {
    while let Some(FetchedUnit { unit, origin }) = rx.recv().await {
        let prefix = unit.block_prefix();
        let is_new = controller.blocks.observe(&prefix).await;

        if is_new {
            let suppressed = controller.suppress_next_detect.swap(false, std::sync::atomic::Ordering::SeqCst);
            match origin {
                Origin::LongPoll => {
                    info!(prefix = %prefix, "new block (long-poll)");
                    controller.suppress_next_detect.store(true, std::sync::atomic::Ordering::SeqCst);
                }
                Origin::Fetch if !suppressed => {
                    info!(prefix = %prefix, "new block (detected)");
                }
                Origin::Fetch => {}
            }
            controller.new_blocks.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            controller.request_restart_all();

            let stale_prefix = controller.blocks.current().await.unwrap_or_default();
            let stale_ids: Vec<u64> = {
                // stale relative to the *old* block: anything not matching
                // the freshly observed prefix.
                let ids = controller.queue.iter_stale(controller.settings.scantime, &prefix).await;
                let _ = &stale_prefix;
                ids
            };
            if !stale_ids.is_empty() {
                let discarded = controller.queue.discard(&stale_ids).await;
                warn!(discarded, "dropped stale work from previous block");
            }
        }

        controller.queue.push(unit).await;
    }
}
