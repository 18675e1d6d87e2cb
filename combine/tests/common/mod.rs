#![allow(dead_code)]

use fibre_combine::Fetcher;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

/// A fetcher that alternates error, success, error, ... across calls and
/// counts how often it ran.
#[derive(Default)]
pub struct AlternatingFetcher {
  pub calls: AtomicUsize,
  flip: AtomicU32,
  pub delay: Duration,
}

impl AlternatingFetcher {
  pub fn with_delay(delay: Duration) -> Self {
    Self {
      delay,
      ..Default::default()
    }
  }
}

impl Fetcher<u32, u32, String> for AlternatingFetcher {
  fn fetch(&self, _request: &u32) -> Result<u32, String> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    thread::sleep(self.delay);
    if self.flip.fetch_xor(1, Ordering::SeqCst) == 0 {
      Err("error".to_string())
    } else {
      Ok(1)
    }
  }
}

/// Wraps a shared fetcher in a closure so the test keeps a handle to it.
pub fn shared<F>(fetcher: &Arc<F>) -> impl Fn(&u32) -> Result<u32, String> + Send + Sync + 'static
where
  F: Fetcher<u32, u32, String> + 'static,
{
  let fetcher = fetcher.clone();
  move |request: &u32| fetcher.fetch(request)
}

/// Runs `f` on `n` threads released at the same instant and collects the
/// results in spawn order.
pub fn run_concurrently<T, F>(n: usize, f: F) -> Vec<T>
where
  T: Send + 'static,
  F: Fn(usize) -> T + Send + Sync + 'static,
{
  let f = Arc::new(f);
  let barrier = Arc::new(Barrier::new(n));
  let handles: Vec<_> = (0..n)
    .map(|i| {
      let f = f.clone();
      let barrier = barrier.clone();
      thread::spawn(move || {
        barrier.wait();
        f(i)
      })
    })
    .collect();

  handles.into_iter().map(|h| h.join().unwrap()).collect()
}
