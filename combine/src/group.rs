use crate::combiner::Combiner;
use crate::config::CombineConfig;
use crate::error::{BuildError, CombineError};
use crate::fetcher::Fetcher;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::scheduler::{Registration, Scheduler};
use crate::task::janitor::ThreadScheduler;

use core::fmt;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use tracing::debug;

/// Default cadence at which a scheduler runs [`Group::sweep`].
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(20);

/// The number of entries a single sweep pass examines.
pub const SWEEP_BUDGET: usize = 1000;

/// The maximum number of passes one call to [`Group::sweep`] makes.
pub const SWEEP_PASSES: usize = 3;

// Used to give each group's janitor a distinct name.
static GROUP_ID: AtomicU64 = AtomicU64::new(0);

/// A keyed registry of combiners.
///
/// Concurrent calls for the same key share one combiner for as long as it is
/// alive; once it has decided and its `alive_time` has passed, the next
/// lookup installs a fresh one.
pub struct Group<K, R, V: Send + Sync, E: Send + Sync, H = ahash::RandomState> {
  shared: Arc<GroupShared<K, R, V, E, H>>,
  // Dropped with the group, which stops the scheduled sweeps.
  _sweeper: Option<Registration>,
}

pub(crate) struct GroupShared<K, R, V: Send + Sync, E: Send + Sync, H> {
  id: u64,
  registry: RwLock<Registry<K, R, V, E, H>>,
  fetcher: Arc<dyn Fetcher<R, V, E>>,
  config: CombineConfig,
  metrics: Arc<Metrics>,
}

struct Registry<K, R, V: Send + Sync, E: Send + Sync, H> {
  entries: HashMap<K, Combiner<R, V, E>, H>,
  // Where the next sweep pass resumes, in iteration order.
  cursor: usize,
}

impl<K, R, V: Send + Sync, E: Send + Sync, H> fmt::Debug for Group<K, R, V, E, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Group")
      .field("id", &self.shared.id)
      .field("len", &self.shared.registry.read().entries.len())
      .field("config", &self.shared.config)
      .field("scheduled", &self._sweeper.is_some())
      .finish()
  }
}

impl<K, R, V, E> Group<K, R, V, E, ahash::RandomState>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  R: 'static,
  V: Send + Sync + 'static,
  E: Send + Sync + 'static,
{
  /// Creates a group with the given config whose sweep runs on a
  /// [`ThreadScheduler`] every [`DEFAULT_SWEEP_INTERVAL`].
  pub fn new<F>(fetcher: F, config: CombineConfig) -> Self
  where
    F: Fetcher<R, V, E> + 'static,
  {
    let scheduler = ThreadScheduler::new();
    GroupShared::new(
      Arc::new(fetcher),
      config,
      ahash::RandomState::default(),
    )
    .into_group(Some((&scheduler as &dyn Scheduler, DEFAULT_SWEEP_INTERVAL)))
  }
}

impl<K, R, V, E, H> Group<K, R, V, E, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  R: 'static,
  V: Send + Sync + 'static,
  E: Send + Sync + 'static,
  H: BuildHasher + Send + Sync + 'static,
{
  /// Returns the alive combiner for `key`, creating one if there is none.
  pub fn get_combine(&self, key: &K) -> Combiner<R, V, E> {
    self.shared.get_combine(key)
  }

  /// Looks up the combiner for `key` and executes `request` through it.
  ///
  /// The registry lock is released before the combiner runs.
  pub fn execute(&self, key: &K, request: &R) -> Result<Arc<V>, CombineError<E>> {
    let combiner = self.get_combine(key);
    combiner.execute(request)
  }

  /// Removes dead combiners, examining at most [`SWEEP_BUDGET`] entries per
  /// pass for up to [`SWEEP_PASSES`] passes. Returns how many were removed.
  ///
  /// The registry is write-locked for the whole call, so very large bursts
  /// of dead entries may take several sweeps to drain.
  pub fn sweep(&self) -> usize {
    self.shared.sweep()
  }
}

impl<K, R, V: Send + Sync, E: Send + Sync, H> Group<K, R, V, E, H> {
  /// The number of combiners currently registered, alive or not.
  pub fn len(&self) -> usize {
    self.shared.registry.read().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn config(&self) -> &CombineConfig {
    &self.shared.config
  }

  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot()
  }

  /// Whether a scheduler is driving this group's sweeps.
  pub fn is_scheduled(&self) -> bool {
    self._sweeper.is_some()
  }
}

impl<K, R, V, E, H> GroupShared<K, R, V, E, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  R: 'static,
  V: Send + Sync + 'static,
  E: Send + Sync + 'static,
  H: BuildHasher + Send + Sync + 'static,
{
  fn new(fetcher: Arc<dyn Fetcher<R, V, E>>, config: CombineConfig, hasher: H) -> Self {
    Self {
      id: GROUP_ID.fetch_add(1, Ordering::Relaxed) + 1,
      registry: RwLock::new(Registry {
        entries: HashMap::with_capacity_and_hasher(256, hasher),
        cursor: 0,
      }),
      fetcher,
      config,
      metrics: Arc::new(Metrics::new()),
    }
  }

  fn into_group(self, sweeper: Option<(&dyn Scheduler, Duration)>) -> Group<K, R, V, E, H> {
    let shared = Arc::new(self);
    let registration = sweeper.map(|(scheduler, interval)| {
      let weak: Weak<Self> = Arc::downgrade(&shared);
      let name = format!("fibre-combine-group-{}-sweep", shared.id);
      scheduler.register(
        &name,
        interval,
        Box::new(move || {
          if let Some(shared) = weak.upgrade() {
            shared.sweep();
          }
        }),
      )
    });

    Group {
      shared,
      _sweeper: registration,
    }
  }

  fn get_combine(&self, key: &K) -> Combiner<R, V, E> {
    {
      let registry = self.registry.read();
      if let Some(combiner) = registry.entries.get(key) {
        if combiner.is_alive() {
          return combiner.clone();
        }
      }
    }

    let mut registry = self.registry.write();
    // Another caller may have installed one while we waited for the lock.
    if let Some(combiner) = registry.entries.get(key) {
      if combiner.is_alive() {
        return combiner.clone();
      }
    }

    let combiner = Combiner::with_parts(self.fetcher.clone(), self.config, self.metrics.clone());
    registry.entries.insert(key.clone(), combiner.clone());
    Metrics::incr(&self.metrics.combiners_created);
    combiner
  }

  fn sweep(&self) -> usize {
    let mut registry = self.registry.write();
    let mut removed = 0;

    for _ in 0..SWEEP_PASSES {
      let len = registry.entries.len();
      if len == 0 {
        break;
      }
      let start = if registry.cursor >= len { 0 } else { registry.cursor };

      let mut dead = Vec::new();
      let mut examined = 0;
      for (key, combiner) in registry.entries.iter().skip(start).take(SWEEP_BUDGET) {
        examined += 1;
        if !combiner.is_alive() {
          dead.push(key.clone());
        }
      }

      for key in &dead {
        registry.entries.remove(key);
      }
      removed += dead.len();

      let next = start + examined - dead.len();
      registry.cursor = if next >= registry.entries.len() { 0 } else { next };

      // The whole registry fit in one pass.
      if len <= SWEEP_BUDGET {
        break;
      }
    }

    if removed > 0 {
      self
        .metrics
        .combiners_evicted
        .fetch_add(removed as u64, Ordering::Relaxed);
    }
    debug!(
      group = self.id,
      removed,
      remaining = registry.entries.len(),
      "combine group swept"
    );
    removed
  }
}

/// A builder for [`Group`].
pub struct GroupBuilder<H = ahash::RandomState> {
  config: CombineConfig,
  sweep_interval: Duration,
  scheduler: Option<Arc<dyn Scheduler>>,
  hasher: H,
}

impl<H> fmt::Debug for GroupBuilder<H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("GroupBuilder")
      .field("config", &self.config)
      .field("sweep_interval", &self.sweep_interval)
      .field("has_scheduler", &self.scheduler.is_some())
      .finish_non_exhaustive()
  }
}

impl GroupBuilder<ahash::RandomState> {
  /// Creates a new `GroupBuilder` with default settings: default policy and
  /// a [`ThreadScheduler`] sweeping every [`DEFAULT_SWEEP_INTERVAL`].
  pub fn new() -> Self {
    Self {
      config: CombineConfig::default(),
      sweep_interval: DEFAULT_SWEEP_INTERVAL,
      scheduler: Some(Arc::new(ThreadScheduler::new())),
      hasher: ahash::RandomState::default(),
    }
  }
}

impl Default for GroupBuilder<ahash::RandomState> {
  fn default() -> Self {
    Self::new()
  }
}

impl<H> GroupBuilder<H> {
  /// Sets the policy every combiner in the group is created with.
  pub fn config(mut self, config: CombineConfig) -> Self {
    self.config = config;
    self
  }

  /// Sets how often the scheduler runs the eviction sweep.
  ///
  /// Defaults to 20 seconds. Has no effect after [`GroupBuilder::no_scheduler`].
  pub fn sweep_interval(mut self, interval: Duration) -> Self {
    self.sweep_interval = interval;
    self
  }

  /// Sets the scheduler that drives eviction sweeps, replacing the default
  /// [`ThreadScheduler`].
  pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
    self.scheduler = Some(scheduler);
    self
  }

  /// Disables scheduled sweeps.
  ///
  /// Dead combiners are then only replaced on lookup, and [`Group::sweep`]
  /// must be called by the embedding system.
  pub fn no_scheduler(mut self) -> Self {
    self.scheduler = None;
    self
  }

  /// Sets the hasher for the registry map.
  pub fn hasher<H2>(self, hasher: H2) -> GroupBuilder<H2> {
    GroupBuilder {
      config: self.config,
      sweep_interval: self.sweep_interval,
      scheduler: self.scheduler,
      hasher,
    }
  }

  /// Builds the group and registers its sweep with the scheduler, if any.
  pub fn build<K, R, V, E, F>(self, fetcher: F) -> Result<Group<K, R, V, E, H>, BuildError>
  where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    R: 'static,
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
    H: BuildHasher + Send + Sync + 'static,
    F: Fetcher<R, V, E> + 'static,
  {
    self.validate()?;
    let shared = GroupShared::new(Arc::new(fetcher), self.config, self.hasher);
    let sweeper = self
      .scheduler
      .as_deref()
      .map(|scheduler| (scheduler, self.sweep_interval));
    Ok(shared.into_group(sweeper))
  }

  pub(crate) fn validate(&self) -> Result<(), BuildError> {
    if self.scheduler.is_some() && self.sweep_interval.is_zero() {
      return Err(BuildError::ZeroSweepInterval);
    }
    Ok(())
  }
}
