use std::time::Duration;

/// Default number of leaders allowed to run the work concurrently per key.
pub const DEFAULT_ALLOW_N: u8 = 3;

/// Upper bound on `allow_n`.
///
/// Admission numbers are compared against the leader slots in a signed 8-bit
/// range, so no more than 127 leaders can ever run for a single key.
pub const MAX_ALLOW_N: u8 = i8::MAX as u8;

/// Default number of callers admitted per key, leaders included.
pub const DEFAULT_MAX_WAIT_N: u32 = 1000;

/// Default deadline for a caller waiting on a decision.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Tunable admission and reuse policy shared by every combiner of a group.
///
/// Build one with [`CombineConfig::builder`]; unset or out-of-range values are
/// replaced with the documented defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CombineConfig {
  allow_n: u8,
  max_wait_n: u32,
  timeout: Duration,
  alive_time: Duration,
}

impl CombineConfig {
  /// Creates a config, normalizing every value the same way the builder does.
  pub fn new(allow_n: u8, max_wait_n: u32, timeout: Duration, alive_time: Duration) -> Self {
    Self::builder()
      .allow_n(allow_n)
      .max_wait_n(max_wait_n)
      .timeout(timeout)
      .alive_time(alive_time)
      .build()
  }

  pub fn builder() -> CombineConfigBuilder {
    CombineConfigBuilder::default()
  }

  /// Maximum number of concurrent executions of the work per combiner.
  pub fn allow_n(&self) -> u8 {
    self.allow_n
  }

  /// Maximum number of callers admitted per combiner before rejection.
  pub fn max_wait_n(&self) -> u32 {
    self.max_wait_n
  }

  /// How many callers for one combiner actually run the work.
  ///
  /// Leaders are admitted callers too, so a quota below `allow_n` also caps
  /// the leaders, and the decision waits for exactly this many failures.
  pub fn leader_slots(&self) -> u32 {
    u32::from(self.allow_n).min(self.max_wait_n)
  }

  /// How long an admitted caller waits for the decision.
  pub fn timeout(&self) -> Duration {
    self.timeout
  }

  /// How long a decided combiner keeps serving its cached result.
  pub fn alive_time(&self) -> Duration {
    self.alive_time
  }
}

impl Default for CombineConfig {
  fn default() -> Self {
    Self {
      allow_n: DEFAULT_ALLOW_N,
      max_wait_n: DEFAULT_MAX_WAIT_N,
      timeout: DEFAULT_TIMEOUT,
      alive_time: Duration::ZERO,
    }
  }
}

/// A builder for [`CombineConfig`].
#[derive(Debug, Clone, Default)]
pub struct CombineConfigBuilder {
  allow_n: Option<u8>,
  max_wait_n: Option<u32>,
  timeout: Option<Duration>,
  alive_time: Option<Duration>,
}

impl CombineConfigBuilder {
  /// Sets how many leaders may run the work concurrently for one key.
  ///
  /// Zero falls back to the default of 3; values above 127 are clamped.
  pub fn allow_n(mut self, n: u8) -> Self {
    self.allow_n = Some(n);
    self
  }

  /// Sets how many callers (leaders and followers) a combiner admits.
  ///
  /// Zero is honoured and rejects every caller that finds no decided result.
  pub fn max_wait_n(mut self, n: u32) -> Self {
    self.max_wait_n = Some(n);
    self
  }

  /// Sets the per-caller wait deadline. Zero falls back to the default of 1s.
  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  /// Sets the reuse window after a combiner decides. Defaults to zero.
  pub fn alive_time(mut self, alive_time: Duration) -> Self {
    self.alive_time = Some(alive_time);
    self
  }

  pub fn build(self) -> CombineConfig {
    let allow_n = match self.allow_n {
      Some(0) | None => DEFAULT_ALLOW_N,
      Some(n) => n.min(MAX_ALLOW_N),
    };
    let timeout = match self.timeout {
      Some(t) if !t.is_zero() => t,
      _ => DEFAULT_TIMEOUT,
    };

    CombineConfig {
      allow_n,
      max_wait_n: self.max_wait_n.unwrap_or(DEFAULT_MAX_WAIT_N),
      timeout,
      alive_time: self.alive_time.unwrap_or(Duration::ZERO),
    }
  }
}
