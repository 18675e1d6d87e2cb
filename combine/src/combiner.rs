//! The per-key coalescing state machine.
//!
//! A [`Combiner`] admits concurrent callers in arrival order:
//!
//! - the first `allow_n` callers are **leaders** and each runs the fetcher
//!   on its own thread (a hedged fan-out);
//! - callers after them, up to `max_wait_n` in total, are **followers** and
//!   only wait for the decision;
//! - everyone beyond `max_wait_n` is rejected without waiting.
//!
//! Leaders are admitted callers too, so with `max_wait_n < allow_n` only
//! `max_wait_n` leaders run; [`CombineConfig::leader_slots`] is that number.
//!
//! A single background decision task receives leader outcomes and finalizes
//! the combiner on the first success, or on the last failure once every
//! leader slot has failed. If the task cannot be started, leaders drain the
//! queue themselves after their own fetch. The decided outcome is cached and returned
//! to every admitted caller and to later callers within `alive_time`.

use crate::config::CombineConfig;
use crate::error::CombineError;
use crate::fetcher::Fetcher;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::signal::Signal;
use crate::task::decision::DecisionTask;
use crate::time;

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fibre::mpsc;
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, trace, warn};

/// A leader's outcome as carried to the decision task and cached afterwards.
pub(crate) type Outcome<V, E> = Result<Arc<V>, Arc<E>>;

/// The decision state of a combiner.
///
/// It leaves `Pending` exactly once and never goes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
  Pending = 0,
  Succeeded = 1,
  Failed = 2,
}

impl Status {
  fn from_u8(raw: u8) -> Self {
    match raw {
      0 => Status::Pending,
      1 => Status::Succeeded,
      _ => Status::Failed,
    }
  }

  pub fn is_pending(self) -> bool {
    self == Status::Pending
  }
}

/// Coalesces concurrent calls for one logical key.
///
/// Cloning is cheap and yields a handle to the same combiner.
pub struct Combiner<R, V: Send + Sync, E: Send + Sync> {
  pub(crate) shared: Arc<CombinerShared<R, V, E>>,
}

/// The state shared between combiner handles and the decision task.
pub(crate) struct CombinerShared<R, V: Send + Sync, E: Send + Sync> {
  config: CombineConfig,
  fetcher: Arc<dyn Fetcher<R, V, E>>,
  metrics: Arc<Metrics>,

  status: AtomicU8,
  admitted: AtomicU32,
  completed: AtomicU32,
  completed_at: AtomicU64,
  outcome: OnceCell<Outcome<V, E>>,
  signal: Signal,

  // Pushes happen under the read side; finalize and close take the write side.
  queue: RwLock<Option<mpsc::BoundedSender<Outcome<V, E>>>>,
  // Taken by the decision task once it runs; leaders drain it inline until then.
  receiver: Mutex<Option<mpsc::BoundedReceiver<Outcome<V, E>>>>,
  decision: OnceCell<DecisionTask>,
}

impl<R, V: Send + Sync, E: Send + Sync> Clone for Combiner<R, V, E> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl<R, V: Send + Sync, E: Send + Sync> fmt::Debug for Combiner<R, V, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Combiner")
      .field("status", &self.shared.status())
      .field("admitted", &self.shared.admitted.load(Ordering::Relaxed))
      .field("completed", &self.shared.completed.load(Ordering::Relaxed))
      .field("config", &self.shared.config)
      .field(
        "deciding",
        &self
          .shared
          .decision
          .get()
          .is_some_and(|task| !task.is_finished()),
      )
      .finish_non_exhaustive()
  }
}

impl<R, V, E> Combiner<R, V, E>
where
  R: 'static,
  V: Send + Sync + 'static,
  E: Send + Sync + 'static,
{
  /// Creates a standalone combiner with its own metrics.
  pub fn new<F>(fetcher: F, config: CombineConfig) -> Self
  where
    F: Fetcher<R, V, E> + 'static,
  {
    Self::with_parts(Arc::new(fetcher), config, Arc::new(Metrics::new()))
  }

  pub(crate) fn with_parts(
    fetcher: Arc<dyn Fetcher<R, V, E>>,
    config: CombineConfig,
    metrics: Arc<Metrics>,
  ) -> Self {
    // Never more than one outcome per leader slot is pushed.
    let capacity = (config.leader_slots() as usize).max(1);
    let (sender, receiver) = mpsc::bounded(capacity);
    Self {
      shared: Arc::new(CombinerShared {
        config,
        fetcher,
        metrics,
        status: AtomicU8::new(Status::Pending as u8),
        admitted: AtomicU32::new(0),
        completed: AtomicU32::new(0),
        completed_at: AtomicU64::new(0),
        outcome: OnceCell::new(),
        signal: Signal::new(),
        queue: RwLock::new(Some(sender)),
        receiver: Mutex::new(Some(receiver)),
        decision: OnceCell::new(),
      }),
    }
  }

  /// Runs `request` through the combiner and returns the shared decision.
  ///
  /// Depending on its admission number the caller either runs the fetcher
  /// itself, waits for other leaders, or is rejected with
  /// [`CombineError::QuotaExceeded`]. An admitted caller that does not see a
  /// decision within the configured timeout gets [`CombineError::Timeout`];
  /// its own fetch, if any, still runs to completion.
  pub fn execute(&self, request: &R) -> Result<Arc<V>, CombineError<E>> {
    // Fast path: already decided, no admission needed.
    if let Some(result) = self.shared.cached() {
      Metrics::incr(&self.shared.metrics.cached_hits);
      return result;
    }

    let n = self.shared.admit();
    if n > self.shared.config.max_wait_n() {
      return self.reject();
    }

    if n <= self.shared.config.leader_slots() {
      Metrics::incr(&self.shared.metrics.leaders);
      if n == 1 {
        self.shared.start_decision();
      }
      self.lead(request);
    } else {
      Metrics::incr(&self.shared.metrics.followers);
    }

    self.wait()
  }

  /// Runs the fetcher and hands the outcome to the decision task.
  fn lead(&self, request: &R) {
    let outcome = self
      .shared
      .fetcher
      .fetch(request)
      .map(Arc::new)
      .map_err(Arc::new);

    {
      let queue = self.shared.queue.read();
      if !self.shared.status().is_pending() {
        // Decided while we were fetching.
        return;
      }
      if let Some(sender) = queue.as_ref() {
        if sender.try_send(outcome).is_err() {
          trace!("decision queue refused a leader outcome");
        }
      }
    }

    if self.shared.decision.get().is_none() && !self.shared.start_decision() {
      self.shared.decide_inline();
    }
  }

  fn wait(&self) -> Result<Arc<V>, CombineError<E>> {
    if self.shared.signal.wait_timeout(self.shared.config.timeout()) {
      if let Some(result) = self.shared.cached() {
        return result;
      }
    }
    Metrics::incr(&self.shared.metrics.timeouts);
    Err(CombineError::Timeout)
  }

  fn reject(&self) -> Result<Arc<V>, CombineError<E>> {
    {
      // The decision may have landed between the fast path and admission.
      let _queue = self.shared.queue.read();
      if let Some(result) = self.shared.cached() {
        Metrics::incr(&self.shared.metrics.cached_hits);
        return result;
      }
    }
    Metrics::incr(&self.shared.metrics.rejected);
    Err(CombineError::QuotaExceeded)
  }
}

impl<R, V: Send + Sync, E: Send + Sync> Combiner<R, V, E> {
  pub fn status(&self) -> Status {
    self.shared.status()
  }

  /// Whether the combiner should still be handed out for new calls: it is
  /// undecided, or it decided less than `alive_time` ago.
  pub fn is_alive(&self) -> bool {
    self.shared.is_alive()
  }

  /// The number of callers that went through admission.
  pub fn admitted(&self) -> u32 {
    self.shared.admitted.load(Ordering::Acquire)
  }

  /// The number of leader outcomes the decision task has received.
  pub fn completed(&self) -> u32 {
    self.shared.completed.load(Ordering::Acquire)
  }

  /// When the combiner was decided, as time since the process-wide epoch.
  pub fn completed_at(&self) -> Option<Duration> {
    if self.shared.status().is_pending() {
      return None;
    }
    Some(Duration::from_nanos(
      self.shared.completed_at.load(Ordering::Acquire),
    ))
  }

  pub fn config(&self) -> &CombineConfig {
    &self.shared.config
  }

  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot()
  }

  /// Returns `true` if both handles refer to the same combiner.
  pub fn ptr_eq(this: &Self, other: &Self) -> bool {
    Arc::ptr_eq(&this.shared, &other.shared)
  }
}

impl<R, V: Send + Sync, E: Send + Sync> CombinerShared<R, V, E> {
  pub(crate) fn status(&self) -> Status {
    Status::from_u8(self.status.load(Ordering::Acquire))
  }

  pub(crate) fn is_alive(&self) -> bool {
    if self.status().is_pending() {
      return true;
    }
    let alive_until = self
      .completed_at
      .load(Ordering::Acquire)
      .saturating_add(time::duration_to_nanos(self.config.alive_time()));
    time::now_nanos() < alive_until
  }

  fn cached(&self) -> Option<Result<Arc<V>, CombineError<E>>> {
    self.outcome.get().map(|outcome| match outcome {
      Ok(value) => Ok(value.clone()),
      Err(err) => Err(CombineError::Fetch(err.clone())),
    })
  }

  /// Takes the next admission number, saturating at `u32::MAX` so that an
  /// overflowing caller is classified as rejected rather than as a leader.
  fn admit(&self) -> u32 {
    let prev = self
      .admitted
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
        Some(n.saturating_add(1))
      })
      .unwrap_or(u32::MAX);
    prev.saturating_add(1)
  }

  /// Counts one received leader outcome and applies the decision rule.
  ///
  /// A failure is held back until every leader slot has reported; the first
  /// success or the last failure finalizes the combiner and closes the queue.
  /// Returns `true` once the outcome decided the combiner.
  pub(crate) fn accept(&self, outcome: Outcome<V, E>) -> bool {
    let done = self.completed.fetch_add(1, Ordering::AcqRel) + 1;
    let slots = self.config.leader_slots();
    if done < slots && outcome.is_err() {
      trace!(done, slots, "leader attempt failed, awaiting others");
      return false;
    }

    self.finalize(outcome);
    self.close_queue();
    true
  }

  /// Takes the receiver for the decision task. `None` once it is running.
  pub(crate) fn take_receiver(&self) -> Option<mpsc::BoundedReceiver<Outcome<V, E>>> {
    self.receiver.lock().take()
  }

  /// Decides from the buffered outcomes on the caller's thread.
  ///
  /// Used while no decision task runs. Each leader drains after its own push,
  /// so no outcome is left unread.
  fn decide_inline(&self) {
    let receiver = self.receiver.lock();
    let Some(receiver) = receiver.as_ref() else {
      return;
    };
    while let Ok(outcome) = receiver.try_recv() {
      if self.accept(outcome) {
        break;
      }
    }
  }

  /// Moves the combiner out of `Pending` and caches `outcome`.
  ///
  /// The status transition and the cache write happen under the queue's
  /// write lock, so no leader can push while the decision is being made.
  /// Returns `false` if the combiner was already decided.
  pub(crate) fn finalize(&self, outcome: Outcome<V, E>) -> bool {
    let next = if outcome.is_ok() {
      Status::Succeeded
    } else {
      Status::Failed
    };

    let _queue = self.queue.write();
    if !self.status().is_pending() {
      return false;
    }
    self.completed_at.store(time::now_nanos(), Ordering::Release);
    if self
      .status
      .compare_exchange(
        Status::Pending as u8,
        next as u8,
        Ordering::AcqRel,
        Ordering::Acquire,
      )
      .is_err()
    {
      return false;
    }

    if self.outcome.set(outcome).is_err() {
      error!("combiner outcome was already cached");
    }
    self.signal.fire();

    match next {
      Status::Succeeded => Metrics::incr(&self.metrics.decided_ok),
      _ => Metrics::incr(&self.metrics.decided_err),
    }
    debug!(
      status = ?next,
      completed = self.completed.load(Ordering::Relaxed),
      admitted = self.admitted.load(Ordering::Relaxed),
      "combiner decided"
    );
    true
  }

  /// Closes the decision queue; later leader outcomes are dropped.
  pub(crate) fn close_queue(&self) {
    self.queue.write().take();
  }
}

impl<R, V, E> CombinerShared<R, V, E>
where
  R: 'static,
  V: Send + Sync + 'static,
  E: Send + Sync + 'static,
{
  /// Starts the decision task unless it is already running.
  ///
  /// Returns `false` if the thread could not be spawned; the receiver then
  /// stays in place so a later leader can retry or decide inline.
  fn start_decision(self: &Arc<Self>) -> bool {
    match self
      .decision
      .get_or_try_init(|| DecisionTask::spawn(Arc::downgrade(self)))
    {
      Ok(_) => true,
      Err(err) => {
        warn!(error = %err, "failed to spawn combiner decision task, deciding inline");
        false
      }
    }
  }
}
