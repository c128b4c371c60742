//! Coordinator constants.
//!
//! All magic numbers that the pipeline logic depends on live here so the
//! clone/roll/retry algorithms read against named values instead of bare
//! literals.

/// Size of the opaque block header scaffold, in bytes.
pub const WORK_DATA_LEN: usize = 128;
pub const WORK_MIDSTATE_LEN: usize = 32;
pub const WORK_HASH1_LEN: usize = 64;
pub const WORK_TARGET_LEN: usize = 32;

/// Offset of the big-endian timestamp field within `data`, used for rolling.
pub const NTIME_OFFSET: usize = 68;
/// Offset of the nonce field within `data`.
pub const NONCE_OFFSET: usize = 76;

/// Number of leading bytes of `data` used as the block-prefix fingerprint.
pub const BLOCK_PREFIX_LEN: usize = 18;

/// Upper bound of the 32-bit nonce space a single WorkUnit can be divided
/// across.
pub const MAX_NONCE: u64 = u32::MAX as u64 + 1;

/// Maximum number of times a unit may be rolled before it is no longer
/// eligible for further rolling.
pub const MAX_ROLLS: u32 = 10;

/// Number of RPC attempts issued per single fetch/submit request before
/// falling back to the sleeping backoff loop.
pub const ATTEMPTS_PER_REQUEST: u32 = 3;

/// Initial and per-failure increment of the fetch/submit backoff, in
/// seconds.
pub const DEFAULT_FAIL_PAUSE_SECS: u64 = 5;
pub const FAIL_PAUSE_INCREMENT_SECS: u64 = 5;

/// Default timeout for a blocking pop from the Work Queue.
pub const DEFAULT_POP_TIMEOUT_SECS: u64 = 60;

/// Default scantime: maximum age, in seconds, before a staged unit is
/// considered stale.
pub const DEFAULT_SCANTIME_SECS: u64 = 60;

/// Default depth the Work Queue tries to keep staged.
pub const DEFAULT_QUEUE_DEPTH: usize = 2;

/// Watchdog tick floor, in seconds.
pub const WATCHDOG_MIN_INTERVAL_SECS: u64 = 1;

/// Hasher liveness thresholds used by the watchdog (§4.8).
pub const HASHER_SICK_AFTER_SECS: u64 = 60;
pub const HASHER_DEAD_AFTER_SECS: u64 = 600;

/// Long-poll listener failure thresholds (§4.7).
pub const LONGPOLL_FAILURE_WINDOW_SECS: u64 = 30;
pub const LONGPOLL_MAX_CONSECUTIVE_FAILURES: u32 = 10;

/// GPU dynamic-intensity target kernel latency band, in milliseconds.
pub const GPU_INTENSITY_TARGET_MS: f64 = 7.0;
pub const GPU_INTENSITY_LOW_MS: f64 = 3.0;
pub const GPU_INTENSITY_MIN: i32 = -10;
pub const GPU_INTENSITY_MAX: i32 = 10;

/// How often the watchdog pings an individual idle pool, at most.
pub const IDLE_PING_INTERVAL_SECS: u64 = 60;

/// How often a paused hasher re-checks its schedule-window pause flag.
pub const PAUSE_POLL_INTERVAL_SECS: u64 = 1;
