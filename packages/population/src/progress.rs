//! Progress reporting for long aggregation passes.
//!
//! The aggregator never knows how many rows a stream holds, so progress is
//! reported as a running row count. Rendering lives upstream (the CLI
//! wires an `indicatif` spinner in); library code and tests use
//! [`NullProgress`].

use std::sync::Arc;

/// Receives progress updates from a streaming pass.
///
/// Implementations must be `Send + Sync` so a single reporter can be
/// shared behind an [`Arc`].
pub trait ProgressCallback: Send + Sync {
    /// Advance the processed-row counter by `delta`.
    fn inc(&self, delta: u64);

    /// Update the message displayed alongside the counter.
    fn set_message(&self, msg: String);

    /// Mark the pass as complete with a final message.
    fn finish(&self, msg: String);
}

/// Discards every update.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
}

/// Returns a shared [`NullProgress`].
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
