//! Active-session monitoring: snapshot reconciliation plus the small
//! classifiers it applies to each new playback.

mod device;
mod location;
mod reconciler;

pub use device::classify_device;
pub use location::{LocationResolver, PrefixTableResolver, UnknownLocation};
pub use reconciler::{completion_ratio, SessionEvent, SessionReconciler, TrackedSession};

/// Upstream position and runtime unit: 100ns ticks.
pub const TICKS_PER_SECOND: i64 = 10_000_000;
