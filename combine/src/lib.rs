//! Request coalescing for protecting a backend from request storms.
//!
//! Many concurrent callers asking for the same piece of work are collapsed
//! into a bounded number of real executions, and the single decided outcome
//! is fanned back out to every caller.
//!
//! # Features
//! - **Admission Control**: Each key admits at most `allow_n` leaders that
//!   actually run the work, up to `max_wait_n` callers in total; the rest are
//!   rejected without waiting.
//! - **Hedged Fan-out**: Leaders run the same work in parallel. The first
//!   success wins; if every leader fails, the last failure is shared.
//! - **Result Reuse**: A decided result keeps being served for `alive_time`
//!   after completion.
//! - **Keyed Registry**: `Group` maps keys to combiners and evicts dead ones in
//!   bounded sweeps, by default every 20s on a background thread, or on a
//!   pluggable `Scheduler`.
//! - **Observability**: Exposes admission and decision counters.

// Public modules that form the API
pub mod combiner;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod group;
pub mod metrics;
pub mod scheduler;

// Internal, crate-only modules
mod signal;
mod task;
mod time;

// Re-export the primary user-facing types for convenience
pub use combiner::{Combiner, Status};
pub use config::{CombineConfig, CombineConfigBuilder};
pub use error::{BuildError, CombineError};
pub use fetcher::Fetcher;
pub use group::{Group, GroupBuilder};
pub use metrics::MetricsSnapshot;
pub use scheduler::{Registration, Scheduler};
pub use task::janitor::ThreadScheduler;
