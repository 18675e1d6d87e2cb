use fibre_combine::config::{DEFAULT_ALLOW_N, DEFAULT_MAX_WAIT_N, DEFAULT_TIMEOUT, MAX_ALLOW_N};
use fibre_combine::group::DEFAULT_SWEEP_INTERVAL;
use fibre_combine::{BuildError, CombineConfig, Group, GroupBuilder, ThreadScheduler};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_config_defaults() {
  let config = CombineConfig::default();
  assert_eq!(config.allow_n(), DEFAULT_ALLOW_N);
  assert_eq!(config.max_wait_n(), DEFAULT_MAX_WAIT_N);
  assert_eq!(config.timeout(), DEFAULT_TIMEOUT);
  assert_eq!(config.alive_time(), Duration::ZERO);
  assert_eq!(DEFAULT_SWEEP_INTERVAL, Duration::from_secs(20));
}

#[test]
fn test_config_normalizes_out_of_range_values() {
  let config = CombineConfig::builder()
    .allow_n(0)
    .timeout(Duration::ZERO)
    .build();
  assert_eq!(config.allow_n(), DEFAULT_ALLOW_N);
  assert_eq!(config.timeout(), DEFAULT_TIMEOUT);

  let config = CombineConfig::builder().allow_n(u8::MAX).build();
  assert_eq!(config.allow_n(), MAX_ALLOW_N);
}

#[test]
fn test_group_builder_defaults() {
  let group: Group<u32, u32, u32, String> = GroupBuilder::new().build(|req: &u32| Ok(*req)).unwrap();
  assert_eq!(*group.config(), CombineConfig::default());
  assert!(group.is_scheduled());
  assert!(group.is_empty());
}

#[test]
fn test_group_new_is_scheduled() {
  let group: Group<u32, u32, u32, String> = Group::new(|req: &u32| Ok(*req), CombineConfig::default());
  assert!(group.is_scheduled());
}

#[test]
fn test_group_builder_without_scheduler() {
  let group: Group<u32, u32, u32, String> = GroupBuilder::new()
    .no_scheduler()
    .sweep_interval(Duration::ZERO)
    .build(|req: &u32| Ok(*req))
    .unwrap();
  assert!(!group.is_scheduled());
}

#[test]
fn test_group_builder_rejects_zero_sweep_interval() {
  let result: Result<Group<u32, u32, u32, String>, _> = GroupBuilder::new()
    .scheduler(Arc::new(ThreadScheduler::new()))
    .sweep_interval(Duration::ZERO)
    .build(|req: &u32| Ok(*req));
  assert_eq!(result.unwrap_err(), BuildError::ZeroSweepInterval);
}
