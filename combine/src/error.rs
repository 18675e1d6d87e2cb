use std::sync::Arc;

use thiserror::Error;

/// Errors returned to a caller of `Combiner::execute` or `Group::execute`.
#[derive(Debug, Error)]
pub enum CombineError<E> {
  /// More callers were admitted for this key than `max_wait_n` allows and
  /// no decided result existed yet.
  #[error("combine quota exceeded")]
  QuotaExceeded,
  /// The caller's wait deadline elapsed before a result was decided.
  ///
  /// Work already in flight is not cancelled and may still decide the result
  /// for later callers.
  #[error("combine wait timed out")]
  Timeout,
  /// The fetcher's own error, shared by every caller of the decision it
  /// finalized.
  #[error("fetch failed: {0}")]
  Fetch(Arc<E>),
}

impl<E> CombineError<E> {
  /// Returns the fetcher's error if this is a `Fetch` error.
  pub fn fetch_error(&self) -> Option<&E> {
    match self {
      CombineError::Fetch(err) => Some(err.as_ref()),
      _ => None,
    }
  }

  pub fn is_timeout(&self) -> bool {
    matches!(self, CombineError::Timeout)
  }

  pub fn is_quota_exceeded(&self) -> bool {
    matches!(self, CombineError::QuotaExceeded)
  }
}

// Manual impl: a derive would require `E: Clone` even though only the `Arc` is cloned.
impl<E> Clone for CombineError<E> {
  fn clone(&self) -> Self {
    match self {
      CombineError::QuotaExceeded => CombineError::QuotaExceeded,
      CombineError::Timeout => CombineError::Timeout,
      CombineError::Fetch(err) => CombineError::Fetch(err.clone()),
    }
  }
}

/// Errors that can occur when building a `Group`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
  /// A scheduler was configured with a sweep interval of zero.
  #[error("sweep interval cannot be zero")]
  ZeroSweepInterval,
}
