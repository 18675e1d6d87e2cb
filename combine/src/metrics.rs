use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_utils::CachePadded;

/// A thread-safe, internal metrics collector shared by a group and all of its
/// combiners. All fields are atomic to allow for lock-free updates.
#[derive(Debug)]
pub struct Metrics {
  // --- Admission ---
  pub(crate) cached_hits: CachePadded<AtomicU64>,
  pub(crate) leaders: CachePadded<AtomicU64>,
  pub(crate) followers: CachePadded<AtomicU64>,
  pub(crate) rejected: CachePadded<AtomicU64>,
  pub(crate) timeouts: CachePadded<AtomicU64>,

  // --- Decisions ---
  pub(crate) decided_ok: CachePadded<AtomicU64>,
  pub(crate) decided_err: CachePadded<AtomicU64>,

  // --- Registry ---
  pub(crate) combiners_created: CachePadded<AtomicU64>,
  pub(crate) combiners_evicted: CachePadded<AtomicU64>,

  created_at: Instant,
}

impl Default for Metrics {
  fn default() -> Self {
    Self {
      cached_hits: CachePadded::new(AtomicU64::new(0)),
      leaders: CachePadded::new(AtomicU64::new(0)),
      followers: CachePadded::new(AtomicU64::new(0)),
      rejected: CachePadded::new(AtomicU64::new(0)),
      timeouts: CachePadded::new(AtomicU64::new(0)),
      decided_ok: CachePadded::new(AtomicU64::new(0)),
      decided_err: CachePadded::new(AtomicU64::new(0)),
      combiners_created: CachePadded::new(AtomicU64::new(0)),
      combiners_evicted: CachePadded::new(AtomicU64::new(0)),
      created_at: Instant::now(),
    }
  }
}

impl Metrics {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  #[inline]
  pub(crate) fn incr(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
  }

  /// Creates a point-in-time snapshot of the current metrics.
  pub(crate) fn snapshot(&self) -> MetricsSnapshot {
    let cached_hits = self.cached_hits.load(Ordering::Relaxed);
    let leaders = self.leaders.load(Ordering::Relaxed);
    let followers = self.followers.load(Ordering::Relaxed);
    let rejected = self.rejected.load(Ordering::Relaxed);
    let total_calls = cached_hits + leaders + followers + rejected;

    MetricsSnapshot {
      cached_hits,
      leaders,
      followers,
      rejected,
      coalescing_ratio: if total_calls == 0 {
        0.0
      } else {
        (total_calls - leaders) as f64 / total_calls as f64
      },
      timeouts: self.timeouts.load(Ordering::Relaxed),
      decided_ok: self.decided_ok.load(Ordering::Relaxed),
      decided_err: self.decided_err.load(Ordering::Relaxed),
      combiners_created: self.combiners_created.load(Ordering::Relaxed),
      combiners_evicted: self.combiners_evicted.load(Ordering::Relaxed),
      uptime_secs: self.created_at.elapsed().as_secs(),
    }
  }
}

/// A point-in-time, public-facing snapshot of the coalescing metrics.
#[derive(Clone)]
pub struct MetricsSnapshot {
  /// Calls answered from an already decided result.
  pub cached_hits: u64,
  /// Calls that ran the fetcher themselves.
  pub leaders: u64,
  /// Calls that only waited for the decision.
  pub followers: u64,
  /// Calls rejected because the admission quota was exhausted.
  pub rejected: u64,
  /// Share of calls that did not run the fetcher.
  pub coalescing_ratio: f64,
  /// Admitted calls whose wait deadline elapsed.
  pub timeouts: u64,
  /// Combiners that decided on a success.
  pub decided_ok: u64,
  /// Combiners that decided on a failure.
  pub decided_err: u64,
  pub combiners_created: u64,
  pub combiners_evicted: u64,
  /// The number of seconds since the metrics were created.
  pub uptime_secs: u64,
}

impl fmt::Debug for MetricsSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MetricsSnapshot")
      .field("cached_hits", &self.cached_hits)
      .field("leaders", &self.leaders)
      .field("followers", &self.followers)
      .field("rejected", &self.rejected)
      .field(
        "coalescing_ratio",
        &format!("{:.2}%", self.coalescing_ratio * 100.0),
      )
      .field("timeouts", &self.timeouts)
      .field("decided_ok", &self.decided_ok)
      .field("decided_err", &self.decided_err)
      .field("combiners_created", &self.combiners_created)
      .field("combiners_evicted", &self.combiners_evicted)
      .field("uptime_secs", &self.uptime_secs)
      .finish()
  }
}
