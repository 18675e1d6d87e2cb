/// The unit of work a combiner coalesces.
///
/// A fetcher is invoked synchronously on the leader's own thread, up to
/// `allow_n` times concurrently per combiner, so it must be safe to call
/// concurrently with itself. Calls are never cancelled once started.
///
/// Any `Fn(&R) -> Result<V, E> + Send + Sync` closure is a fetcher.
pub trait Fetcher<R, V, E>: Send + Sync {
  fn fetch(&self, request: &R) -> Result<V, E>;
}

impl<R, V, E, F> Fetcher<R, V, E> for F
where
  F: Fn(&R) -> Result<V, E> + Send + Sync,
{
  fn fetch(&self, request: &R) -> Result<V, E> {
    self(request)
  }
}
