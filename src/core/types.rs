//! Core data model: `WorkUnit`, `PoolRef`, `Hasher`, and the small pure
//! helpers the rest of the pipeline builds on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::params::*;

static NEXT_WORK_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate the next globally unique, monotonically increasing WorkUnit id.
pub fn next_work_id() -> u64 {
    NEXT_WORK_ID.fetch_add(1, Ordering::Relaxed)
}

/// A weak reference to a Pool record: an arena index plus the generation it
/// was issued under. See the Pool Registry design notes for why pools are
/// arena-allocated rather than freed on `remove`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolRef {
    pub pool_no: u32,
    pub generation: u64,
}

/// Opaque block header scaffold plus hasher-facing precomputed state.
#[derive(Debug, Clone)]
pub struct WorkUnit {
    pub id: u64,
    pub data: [u8; WORK_DATA_LEN],
    pub midstate: [u8; WORK_MIDSTATE_LEN],
    pub hash1: [u8; WORK_HASH1_LEN],
    pub target: [u8; WORK_TARGET_LEN],
    pub pool: PoolRef,
    pub staged_at: Instant,
    pub rolltime: bool,
    pub rolls: u32,
    pub is_clone: bool,
    pub is_mined: bool,
    pub thr_id: Option<u32>,
}

impl WorkUnit {
    pub fn new(
        data: [u8; WORK_DATA_LEN],
        midstate: [u8; WORK_MIDSTATE_LEN],
        hash1: [u8; WORK_HASH1_LEN],
        target: [u8; WORK_TARGET_LEN],
        pool: PoolRef,
        rolltime: bool,
    ) -> Self {
        WorkUnit {
            id: next_work_id(),
            data,
            midstate,
            hash1,
            target,
            pool,
            staged_at: Instant::now(),
            rolltime,
            rolls: 0,
            is_clone: false,
            is_mined: false,
            thr_id: None,
        }
    }

    pub fn nonce(&self) -> u32 {
        u32::from_be_bytes(self.data[NONCE_OFFSET..NONCE_OFFSET + 4].try_into().unwrap())
    }

    pub fn set_nonce(&mut self, nonce: u32) {
        self.data[NONCE_OFFSET..NONCE_OFFSET + 4].copy_from_slice(&nonce.to_be_bytes());
    }

    pub fn ntime(&self) -> u32 {
        u32::from_be_bytes(self.data[NTIME_OFFSET..NTIME_OFFSET + 4].try_into().unwrap())
    }

    pub fn set_ntime(&mut self, ntime: u32) {
        self.data[NTIME_OFFSET..NTIME_OFFSET + 4].copy_from_slice(&ntime.to_be_bytes());
    }

    /// First `BLOCK_PREFIX_LEN` bytes of `data`, hex-encoded — the block
    /// fingerprint used to distinguish "same block" from "new block".
    pub fn block_prefix(&self) -> String {
        hex::encode(&self.data[..BLOCK_PREFIX_LEN])
    }

    /// Eligible to be rolled: server allows it, not stale against `now`
    /// given `scantime`, under the roll cap, and not already a clone.
    pub fn can_roll(&self, now: Instant, scantime: Duration) -> bool {
        self.rolltime
            && self.rolls < MAX_ROLLS
            && !self.is_clone
            && now.saturating_duration_since(self.staged_at) < scantime
    }

    /// Advance the timestamp by one second and reset the nonce, per the
    /// "roll" operation in the glossary.
    pub fn roll(&mut self) {
        let ntime = self.ntime();
        self.set_ntime(ntime.wrapping_add(1));
        self.set_nonce(0);
        self.rolls += 1;
    }

    /// Split this unit's remaining nonce space by `hash_div`, returning a
    /// clone that starts at the lower region while `self` is advanced past
    /// it. Returns `None` if there isn't enough remaining nonce space to
    /// divide (the caller falls through to roll-or-fresh).
    pub fn divide(&mut self, hash_div: u64) -> Option<WorkUnit> {
        if self.is_clone || hash_div == 0 {
            return None;
        }
        let hash_inc = MAX_NONCE / hash_div * 2;
        let nonce = self.nonce() as u64;
        if nonce + hash_inc >= MAX_NONCE {
            return None;
        }
        let mut clone = self.clone();
        clone.id = next_work_id();
        clone.is_clone = true;
        clone.rolls = 0;
        // The clone scans the lower region starting at the current nonce;
        // the original is advanced past it so re-pushing never overlaps.
        self.set_nonce((nonce + hash_inc) as u32);
        Some(clone)
    }

    pub fn is_stale(&self, now: Instant, scantime: Duration, current_block: &str) -> bool {
        now.saturating_duration_since(self.staged_at) >= scantime
            || self.block_prefix() != current_block
    }
}

/// Which path `queue::get_work` took — kept explicit (rather than inferred
/// from before/after state) so tests can assert on it directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkOrigin {
    Cloned,
    Rolled,
    Fresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HasherState {
    NoStart,
    Well,
    Sick,
    Dead,
}

#[derive(Debug, Clone)]
pub struct Hasher {
    pub id: u32,
    pub is_gpu: bool,
    pub rolling_mhps: f64,
    pub total_mhashes: f64,
    pub accepted: u64,
    pub rejected: u64,
    pub hw_errors: u64,
    pub last_report: Instant,
    pub state: HasherState,
    pub paused: bool,
    pub reported_getwork: bool,
    pub scan_intensity: i32,
}

impl Hasher {
    pub fn new(id: u32, is_gpu: bool) -> Self {
        Hasher {
            id,
            is_gpu,
            rolling_mhps: 0.0,
            total_mhashes: 0.0,
            accepted: 0,
            rejected: 0,
            hw_errors: 0,
            last_report: Instant::now(),
            state: HasherState::NoStart,
            paused: false,
            reported_getwork: false,
            scan_intensity: 0,
        }
    }

    /// Exponential moving average update used by the hashmeter, matching
    /// the "rolling" hashrate the original keeps per device.
    pub fn update_rolling_mhps(&mut self, mhashes: f64, elapsed: Duration) {
        let instant = if elapsed.as_secs_f64() > 0.0 {
            mhashes / elapsed.as_secs_f64()
        } else {
            0.0
        };
        const ALPHA: f64 = 0.25;
        self.rolling_mhps = self.rolling_mhps * (1.0 - ALPHA) + instant * ALPHA;
        self.total_mhashes += mhashes;
        self.last_report = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_with_prefix(prefix_byte: u8) -> WorkUnit {
        let mut data = [0u8; WORK_DATA_LEN];
        data[0] = prefix_byte;
        WorkUnit::new(
            data,
            [0u8; WORK_MIDSTATE_LEN],
            [0u8; WORK_HASH1_LEN],
            [0u8; WORK_TARGET_LEN],
            PoolRef { pool_no: 0, generation: 0 },
            true,
        )
    }

    #[test]
    fn nonce_roundtrip() {
        let mut u = unit_with_prefix(0xAA);
        u.set_nonce(0x12345678);
        assert_eq!(u.nonce(), 0x12345678);
        assert_eq!(&u.data[NONCE_OFFSET..NONCE_OFFSET + 4], &[0x12, 0x34, 0x56, 0x78]);
    }

    #[test]
    fn roll_resets_nonce_and_bumps_rolls() {
        let mut u = unit_with_prefix(0xAA);
        u.set_nonce(42);
        u.set_ntime(100);
        u.roll();
        assert_eq!(u.nonce(), 0);
        assert_eq!(u.ntime(), 101);
        assert_eq!(u.rolls, 1);
    }

    #[test]
    fn divide_produces_non_overlapping_clone() {
        let mut u = unit_with_prefix(0xAA);
        let original_nonce = u.nonce() as u64;
        let clone = u.divide(4).expect("should divide");
        assert!(clone.is_clone);
        assert_eq!(clone.rolls, 0);
        assert!((clone.nonce() as u64) >= original_nonce);
        assert!((u.nonce() as u64) >= original_nonce + MAX_NONCE / 4 * 2);
    }

    #[test]
    fn divide_refuses_on_clone() {
        let mut u = unit_with_prefix(0xAA);
        u.is_clone = true;
        assert!(u.divide(4).is_none());
    }

    #[test]
    fn ids_are_monotonic() {
        let a = unit_with_prefix(1);
        let b = unit_with_prefix(2);
        assert!(b.id > a.id);
    }
}
