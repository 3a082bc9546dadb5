//! Process-wide tracing setup shared by every binary that embeds the
//! enrichment pipeline.

/// Install the tracing subscriber.
///
/// Safe to call multiple times; calls after the first become no-ops.
pub fn init() {
    tracing::init();
}

/// Subscriber configuration (filter, output format).
pub mod tracing;

pub use self::tracing::LogFormat;
