use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A single-fire broadcast used to release everyone waiting on a decision.
///
/// Once fired it stays fired, so a waiter that arrives late returns at once
/// instead of blocking.
#[derive(Debug, Default)]
pub(crate) struct Signal {
  fired: Mutex<bool>,
  cond: Condvar,
}

impl Signal {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// Fires the signal, waking all waiters.
  ///
  /// Returns `false` if it had already been fired.
  pub(crate) fn fire(&self) -> bool {
    let mut fired = self.fired.lock();
    if *fired {
      return false;
    }
    *fired = true;
    self.cond.notify_all();
    true
  }

  #[cfg(test)]
  pub(crate) fn is_fired(&self) -> bool {
    *self.fired.lock()
  }

  /// Blocks until the signal fires or `timeout` elapses.
  ///
  /// Returns `true` if the signal fired.
  pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
    let deadline = Instant::now().checked_add(timeout);
    let mut fired = self.fired.lock();
    while !*fired {
      match deadline {
        Some(deadline) => {
          if self.cond.wait_until(&mut fired, deadline).timed_out() {
            return *fired;
          }
        }
        None => self.cond.wait(&mut fired),
      }
    }
    true
  }
}
