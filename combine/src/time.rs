use once_cell::sync::Lazy;
use std::time::{Duration, Instant};

// Completion timestamps are stored as nanoseconds since this instant.
static COMBINE_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Nanoseconds since the process-wide epoch, for storing in an atomic.
pub(crate) fn now_nanos() -> u64 {
  duration_to_nanos(COMBINE_EPOCH.elapsed())
}

/// Saturates at `u64::MAX`, which keeps huge `alive_time`s from wrapping.
pub(crate) fn duration_to_nanos(duration: Duration) -> u64 {
  u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
