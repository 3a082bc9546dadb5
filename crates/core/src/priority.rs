//! Priority derivation: resolved strategy → dispatch weight.
//!
//! Lower weights are dispatched sooner. Latency-sensitive work (`Async`) must
//! overtake bulk work (`Batch`) whenever both are pending.

use crate::strategy::Strategy;

/// Numeric dispatch weight; lower = sooner.
pub type PriorityWeight = i32;

/// Reserved: `Sync` work never reaches the queue.
pub const SYNC_PRIORITY: PriorityWeight = 0;
pub const ASYNC_PRIORITY: PriorityWeight = 1;
/// Unresolved / standard work.
pub const STANDARD_PRIORITY: PriorityWeight = 5;
pub const BATCH_PRIORITY: PriorityWeight = 10;

/// Total mapping from strategy to priority weight.
pub fn priority_weight(strategy: Strategy) -> PriorityWeight {
    match strategy {
        Strategy::Sync => SYNC_PRIORITY,
        Strategy::Async => ASYNC_PRIORITY,
        Strategy::Auto => STANDARD_PRIORITY,
        Strategy::Batch => BATCH_PRIORITY,
    }
}
