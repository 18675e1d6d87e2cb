use crate::combiner::CombinerShared;

use std::io;
use std::sync::Weak;
use std::thread::{self, JoinHandle};

use tracing::trace;

const DECISION_THREAD_NAME: &str = "fibre-combine-decision";

#[cfg(test)]
thread_local! {
  // Makes `DecisionTask::spawn` fail on the current thread.
  pub(crate) static FAIL_SPAWN: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

/// The background task that collects leader outcomes for one combiner and
/// performs its one-time finalization.
///
/// It is detached from every caller: callers only observe it through the
/// combiner's completion signal.
pub(crate) struct DecisionTask {
  handle: JoinHandle<()>,
}

impl DecisionTask {
  /// Spawns the decision thread.
  ///
  /// The thread holds only a weak reference to the combiner so that a
  /// combiner dropped while still pending disconnects the queue and lets the
  /// thread exit. It takes the receiver once it runs, so a failed spawn
  /// leaves the receiver with the combiner.
  pub(crate) fn spawn<R, V, E>(shared: Weak<CombinerShared<R, V, E>>) -> io::Result<Self>
  where
    R: 'static,
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
  {
    #[cfg(test)]
    if FAIL_SPAWN.with(|fail| fail.get()) {
      return Err(io::Error::new(io::ErrorKind::Other, "decision spawn disabled"));
    }

    let handle = thread::Builder::new()
      .name(DECISION_THREAD_NAME.to_string())
      .spawn(move || Self::run(shared))?;

    Ok(Self { handle })
  }

  pub(crate) fn is_finished(&self) -> bool {
    self.handle.is_finished()
  }

  fn run<R, V, E>(shared: Weak<CombinerShared<R, V, E>>)
  where
    V: Send + Sync,
    E: Send + Sync,
  {
    let Some(core) = shared.upgrade() else {
      return;
    };
    let Some(receiver) = core.take_receiver() else {
      return;
    };
    drop(core);

    // Ends when every sender is gone, i.e. the combiner was dropped undecided.
    while let Ok(outcome) = receiver.recv() {
      let Some(core) = shared.upgrade() else {
        break;
      };
      if core.accept(outcome) {
        break;
      }
    }

    // Anything still buffered lost the race and is discarded.
    let mut discarded = 0usize;
    while receiver.try_recv().is_ok() {
      discarded += 1;
    }
    if discarded > 0 {
      trace!(discarded, "dropped late leader outcomes");
    }
  }
}
