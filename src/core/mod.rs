//! Core data model shared by every stage of the pipeline: work units, pool
//! references, hasher bookkeeping, and the block-prefix set.

pub mod block;
pub mod params;
pub mod types;

pub use block::BlockTracker;
pub use types::{next_work_id, Hasher, HasherState, PoolRef, WorkOrigin, WorkUnit};
