//! Hasher Pool: CPU/GPU worker tasks that scan nonce ranges, plus the
//! `HashBackend`/`DeviceProvisioner`/`DeviceTuner` collaborator traits the
//! real scanning/enumeration/tuning logic sits behind (out of scope per the
//! purpose statement — concrete CPU-only defaults are supplied so the
//! pipeline runs end to end). Scan loop shape is grounded on the node's
//! `mine_block_parallel` nonce-range split and progress-log cadence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tracing::debug;

use crate::controller::Controller;
use crate::core::params::{
    GPU_INTENSITY_LOW_MS, GPU_INTENSITY_MAX, GPU_INTENSITY_MIN, GPU_INTENSITY_TARGET_MS, NONCE_OFFSET,
    PAUSE_POLL_INTERVAL_SECS,
};
use crate::core::types::{HasherState, WorkUnit};
use crate::fetcher::GetWorkRequest;
use crate::submit::SubmitCommand;

/// Double-SHA256 scan over a bounded nonce range, abstracted so alternate
/// kernels (GPU, optimized CPU variants) can be swapped in without touching
/// the pipeline above it.
pub trait HashBackend: Send + Sync {
    /// Scans `[start_nonce, start_nonce + count)`, returning the first nonce
    /// whose double-SHA256 meets `target`, or `None` if the range is
    /// exhausted or `restart` becomes set mid-scan.
    fn scan(&self, data: &[u8], target: &[u8], start_nonce: u32, count: u64, restart: &AtomicBool) -> Option<u32>;

    /// Defensive re-check performed by the Submit path before trusting a
    /// reported find.
    fn fulltest(&self, data: &[u8], target: &[u8]) -> bool;
}

fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    second.into()
}

/// Meets target if the hash, read as a little-endian integer, is <= target
/// read the same way — the getwork convention.
fn meets_target(hash: &[u8; 32], target: &[u8]) -> bool {
    for (h, t) in hash.iter().rev().zip(target.iter().rev()) {
        if h < t {
            return true;
        }
        if h > t {
            return false;
        }
    }
    true
}

/// Reference CPU backend: a real, unoptimized double-SHA256 scan. Provided
/// so the pipeline is runnable end to end; optimized kernels are a
/// collaborator's concern.
#[derive(Default)]
pub struct CpuHashBackend;

impl HashBackend for CpuHashBackend {
    fn scan(&self, data: &[u8], target: &[u8], start_nonce: u32, count: u64, restart: &AtomicBool) -> Option<u32> {
        let mut buf = data.to_vec();
        let mut nonce = start_nonce;
        for i in 0..count {
            if i % 4096 == 0 && restart.load(Ordering::Relaxed) {
                return None;
            }
            buf[NONCE_OFFSET..NONCE_OFFSET + 4].copy_from_slice(&nonce.to_be_bytes());
            let hash = double_sha256(&buf);
            if meets_target(&hash, target) {
                return Some(nonce);
            }
            nonce = match nonce.checked_add(1) {
                Some(n) => n,
                None => return None,
            };
        }
        None
    }

    fn fulltest(&self, data: &[u8], target: &[u8]) -> bool {
        meets_target(&double_sha256(data), target)
    }
}

pub struct DeviceDescriptor {
    pub id: u32,
    pub is_gpu: bool,
    pub name: String,
}

pub trait DeviceProvisioner: Send + Sync {
    fn enumerate(&self) -> Vec<DeviceDescriptor>;
}

/// Default provisioner: stands in for OpenCL device enumeration by
/// reporting one descriptor per requested CPU thread.
pub struct CpuProvisioner {
    pub cpu_threads: usize,
}

impl DeviceProvisioner for CpuProvisioner {
    fn enumerate(&self) -> Vec<DeviceDescriptor> {
        (0..self.cpu_threads).map(|id| DeviceDescriptor { id: id as u32, is_gpu: false, name: format!("cpu{id}") }).collect()
    }
}

pub struct TuneAdjustment {
    pub changed: bool,
}

pub trait DeviceTuner: Send + Sync {
    fn tune(&self, hasher: &crate::core::types::Hasher) -> TuneAdjustment;
}

/// Stands in for fan/clock/auto-GPU control. Always reports "no change" —
/// the GPU worker's own `scan_intensity` feedback loop is independent of
/// this collaborator, matching the original's split between dynamic
/// intensity (core) and auto-fan/auto-gpu (external tuner).
#[derive(Default)]
pub struct NoopTuner;

impl DeviceTuner for NoopTuner {
    fn tune(&self, _hasher: &crate::core::types::Hasher) -> TuneAdjustment {
        TuneAdjustment { changed: false }
    }
}

/// Adjusts `scan_intensity` within `[GPU_INTENSITY_MIN, GPU_INTENSITY_MAX]`
/// to track a 3-7ms kernel-latency band, per the GPU-specific detail floor.
/// Pulled out as a pure function so the feedback loop is unit-testable
/// without a real device.
pub fn adjust_intensity(current: i32, last_batch: Duration) -> i32 {
    let ms = last_batch.as_secs_f64() * 1000.0;
    let next = if ms > GPU_INTENSITY_TARGET_MS {
        current - 1
    } else if ms < GPU_INTENSITY_LOW_MS {
        current + 1
    } else {
        current
    };
    next.clamp(GPU_INTENSITY_MIN, GPU_INTENSITY_MAX)
}

pub fn intensity_to_threads(intensity: i32) -> u64 {
    1u64 << (15 + intensity).clamp(0, 62)
}

/// One hasher's main loop, per the component design's six numbered steps.
pub async fn run<B: HashBackend + 'static>(
    controller: Arc<Controller>,
    hasher_id: u32,
    is_gpu: bool,
    hash_div: u64,
    backend: Arc<B>,
    get_work_tx: mpsc::Sender<GetWorkRequest>,
    submit_tx: mpsc::Sender<SubmitCommand>,
) {
    let mut intensity = 0i32;
    let pop_timeout = Duration::from_secs(crate::core::params::DEFAULT_POP_TIMEOUT_SECS);
    // Prefetch once the scan has been running for two-thirds of scantime,
    // so a fresh unit is usually staged before this one runs dry.
    let request_interval = controller.settings.scantime.mul_f64(2.0 / 3.0);

    loop {
        if controller.is_shutting_down() {
            break;
        }

        // Schedule-window pause: park until unpaused rather than keep
        // mining, waking early on a restart broadcast (e.g. a block change)
        // and otherwise re-checking once a second.
        if controller.hasher_paused(hasher_id).await {
            let mut rx = controller.subscribe_restart();
            while controller.hasher_paused(hasher_id).await && !controller.is_shutting_down() {
                tokio::select! {
                    _ = rx.recv() => {}
                    _ = tokio::time::sleep(Duration::from_secs(PAUSE_POLL_INTERVAL_SECS)) => {}
                }
            }
            continue;
        }

        let Some((unit, _origin)) =
            dispatch_one(&controller, hash_div, pop_timeout).await
        else {
            continue;
        };

        let restart_flag = Arc::new(AtomicBool::new(false));
        let watcher_flag = restart_flag.clone();
        let mut watcher_rx = controller.subscribe_restart();
        let watcher = tokio::spawn(async move {
            let _ = watcher_rx.recv().await;
            watcher_flag.store(true, Ordering::Relaxed);
        });

        // Fire a prefetch GetWork request once this scan has run long
        // enough that a fresh unit should already be staged by the time
        // this one is exhausted.
        let prefetch_tx = get_work_tx.clone();
        let prefetch = tokio::spawn(async move {
            tokio::time::sleep(request_interval).await;
            let _ = prefetch_tx.send(GetWorkRequest { lagging: false }).await;
        });

        let scan_count = if is_gpu { intensity_to_threads(intensity) } else { 1 << 20 };
        let data = unit.data.to_vec();
        let target = unit.target.to_vec();
        let start_nonce = unit.nonce();
        let backend2 = backend.clone();
        let restart2 = restart_flag.clone();

        let batch_started = Instant::now();
        let found = tokio::task::spawn_blocking(move || backend2.scan(&data, &target, start_nonce, scan_count, &restart2))
            .await
            .unwrap_or(None);
        let batch_elapsed = batch_started.elapsed();
        watcher.abort();
        prefetch.abort();

        if is_gpu && controller.settings.dynamic {
            intensity = adjust_intensity(intensity, batch_elapsed);
        }

        controller
            .update_hasher(hasher_id, |h| {
                h.update_rolling_mhps(scan_count as f64 / 1_000_000.0, batch_elapsed);
                h.last_report = Instant::now();
                h.state = HasherState::Well;
                h.scan_intensity = intensity;
            })
            .await;

        if let Some(nonce) = found {
            let mut mined = unit.clone();
            mined.set_nonce(nonce);
            if backend.fulltest(&mined.data, &mined.target) {
                let _ = submit_tx.send(SubmitCommand { unit: mined, hasher_id }).await;
            } else {
                controller.update_hasher(hasher_id, |h| h.hw_errors += 1).await;
                debug!(hasher_id, "fulltest rejected reported find");
            }
        }
    }
}

/// Spawns `cpu_threads + gpu_threads` hasher tasks. Each pulls work directly
/// from the shared Work Queue via `dispatch_one`, so the only channels
/// crossing into a hasher task are the prefetch request to the Fetcher and
/// the completed-share handoff to the Submit Worker.
pub fn spawn_pool<B: HashBackend + 'static>(
    controller: Arc<Controller>,
    backend: Arc<B>,
    cpu_threads: usize,
    gpu_threads: usize,
    hash_div: u64,
    get_work_tx: mpsc::Sender<GetWorkRequest>,
    submit_tx: mpsc::Sender<SubmitCommand>,
) {
    let mut id = 0u32;
    for _ in 0..gpu_threads {
        tokio::spawn(run(controller.clone(), id, true, hash_div, backend.clone(), get_work_tx.clone(), submit_tx.clone()));
        id += 1;
    }
    for _ in 0..cpu_threads {
        tokio::spawn(run(controller.clone(), id, false, hash_div, backend.clone(), get_work_tx.clone(), submit_tx.clone()));
        id += 1;
    }
}

/// Pulls one dispatchable unit from the Work Queue for a hasher, applying
/// the clone/roll/fresh policy. Exposed as its own function so the hasher
/// loop and tests share one entry point.
pub async fn dispatch_one(controller: &Controller, hash_div: u64, timeout: Duration) -> Option<(WorkUnit, crate::core::types::WorkOrigin)> {
    controller.queue.get_work(timeout, hash_div, controller.settings.scantime, &controller.blocks).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_backend_finds_easy_target() {
        let backend = CpuHashBackend;
        let data = vec![0u8; 128];
        let target = [0xff; 32]; // trivially met by any hash
        let restart = AtomicBool::new(false);
        let found = backend.scan(&data, &target, 0, 16, &restart);
        assert_eq!(found, Some(0));
    }

    #[test]
    fn cpu_backend_respects_restart_flag() {
        let backend = CpuHashBackend;
        let data = vec![0u8; 128];
        let target = [0x00; 32]; // effectively unreachable
        let restart = AtomicBool::new(true);
        let found = backend.scan(&data, &target, 0, 1_000_000, &restart);
        assert_eq!(found, None);
    }

    #[test]
    fn fulltest_agrees_with_scan_result() {
        let backend = CpuHashBackend;
        let mut data = vec![0u8; 128];
        let target = [0xff; 32];
        let restart = AtomicBool::new(false);
        let nonce = backend.scan(&data, &target, 0, 4, &restart).unwrap();
        data[NONCE_OFFSET..NONCE_OFFSET + 4].copy_from_slice(&nonce.to_be_bytes());
        assert!(backend.fulltest(&data, &target));
    }

    #[test]
    fn intensity_increases_when_batches_are_fast() {
        let next = adjust_intensity(0, Duration::from_millis(1));
        assert_eq!(next, 1);
    }

    #[test]
    fn intensity_decreases_when_batches_are_slow() {
        let next = adjust_intensity(0, Duration::from_millis(10));
        assert_eq!(next, -1);
    }

    #[test]
    fn intensity_clamped_to_bounds() {
        assert_eq!(adjust_intensity(GPU_INTENSITY_MAX, Duration::from_millis(1)), GPU_INTENSITY_MAX);
        assert_eq!(adjust_intensity(GPU_INTENSITY_MIN, Duration::from_millis(10)), GPU_INTENSITY_MIN);
    }
}
