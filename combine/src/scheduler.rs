use std::fmt;
use std::time::Duration;

/// A periodic task handed to a [`Scheduler`].
pub type Task = Box<dyn Fn() + Send + Sync + 'static>;

/// Something that can run a callback repeatedly at a fixed interval.
///
/// A `Group` uses this to drive its eviction sweeps; it never manages timers
/// itself. See [`ThreadScheduler`](crate::ThreadScheduler) for the bundled
/// thread-backed implementation.
pub trait Scheduler: Send + Sync + 'static {
  /// Registers `task` to be invoked every `interval` until the returned
  /// `Registration` is cancelled or dropped.
  fn register(&self, name: &str, interval: Duration, task: Task) -> Registration;
}

/// The handle to a registered periodic task.
///
/// Dropping it deregisters the task.
#[must_use = "dropping a Registration deregisters its task"]
pub struct Registration {
  cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Registration {
  /// Creates a registration that runs `cancel` once when cancelled or dropped.
  pub fn new<F>(cancel: F) -> Self
  where
    F: FnOnce() + Send + Sync + 'static,
  {
    Self {
      cancel: Some(Box::new(cancel)),
    }
  }

  /// A registration with nothing to cancel, for schedulers whose tasks
  /// cannot be deregistered.
  pub fn detached() -> Self {
    Self { cancel: None }
  }

  pub fn cancel(mut self) {
    self.run_cancel();
  }

  fn run_cancel(&mut self) {
    if let Some(cancel) = self.cancel.take() {
      cancel();
    }
  }
}

impl Drop for Registration {
  fn drop(&mut self) {
    self.run_cancel();
  }
}

impl fmt::Debug for Registration {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Registration")
      .field("active", &self.cancel.is_some())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  #[test]
  fn cancel_runs_once() {
    let count = Arc::new(AtomicUsize::new(0));
    let registration = Registration::new({
      let count = count.clone();
      move || {
        count.fetch_add(1, Ordering::SeqCst);
      }
    });
    registration.cancel();
    assert_eq!(count.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn drop_cancels() {
    let count = Arc::new(AtomicUsize::new(0));
    {
      let _registration = Registration::new({
        let count = count.clone();
        move || {
          count.fetch_add(1, Ordering::SeqCst);
        }
      });
    }
    assert_eq!(count.load(Ordering::SeqCst), 1);
    drop(Registration::detached());
  }
}
