use crate::scheduler::{Registration, Scheduler, Task};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error};

/// A [`Scheduler`] that runs every registered task on its own background
/// thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadScheduler;

impl ThreadScheduler {
  pub fn new() -> Self {
    Self
  }
}

impl Scheduler for ThreadScheduler {
  fn register(&self, name: &str, interval: Duration, task: Task) -> Registration {
    match Janitor::spawn(name, interval, task) {
      Ok(janitor) => Registration::new(move || janitor.stop()),
      Err(err) => {
        error!(task = name, error = %err, "failed to spawn janitor thread");
        Registration::detached()
      }
    }
  }
}

/// The background thread behind one registration.
pub(crate) struct Janitor {
  handle: JoinHandle<()>, // When janitor is dropped, thread is exited
  stop_flag: Arc<AtomicBool>,
}

impl Janitor {
  /// Spawns a new janitor thread that runs `task` once per `tick_interval`.
  pub(crate) fn spawn(name: &str, tick_interval: Duration, task: Task) -> std::io::Result<Self> {
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_clone = stop_flag.clone();
    let task_name = name.to_string();

    let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
      debug!(task = %task_name, ?tick_interval, "janitor started");
      loop {
        // Sleep first: the task has nothing to do right after registration.
        let deadline = Instant::now() + tick_interval;
        while !stop_clone.load(Ordering::Acquire) {
          let now = Instant::now();
          if now >= deadline {
            break;
          }
          thread::park_timeout(deadline - now);
        }
        if stop_clone.load(Ordering::Acquire) {
          break;
        }

        task();
      }
      debug!(task = %task_name, "janitor stopped");
    })?;

    Ok(Self { handle, stop_flag })
  }

  /// Signals the janitor thread to stop and wakes it if it is sleeping.
  pub(crate) fn stop(self) {
    self.stop_flag.store(true, Ordering::Release);
    self.handle.thread().unpark();
  }
}
