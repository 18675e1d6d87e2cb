mod common;

use common::run_concurrently;
use fibre_combine::{CombineConfig, Combiner, Group, GroupBuilder, Status, ThreadScheduler};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const TINY_ALIVE: Duration = Duration::from_millis(100);
const SLEEP_MARGIN: Duration = Duration::from_millis(100);

fn counting_group(
  alive_time: Duration,
) -> (Group<String, u32, u32, String>, Arc<AtomicUsize>) {
  let calls = Arc::new(AtomicUsize::new(0));
  let group = Group::new(
    {
      let calls = calls.clone();
      move |req: &u32| {
        calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        Ok(req * 10)
      }
    },
    CombineConfig::builder()
      .alive_time(alive_time)
      .timeout(Duration::from_secs(2))
      .build(),
  );
  (group, calls)
}

#[test]
fn test_sync_concurrent_get_combine_shares_one_instance() {
  let (group, _) = counting_group(Duration::ZERO);
  let group = Arc::new(group);

  let combiners = run_concurrently(16, {
    let group = group.clone();
    move |_| group.get_combine(&"k".to_string())
  });

  for combiner in &combiners {
    assert!(Combiner::ptr_eq(&combiners[0], combiner));
  }
  assert_eq!(group.len(), 1);
  assert_eq!(group.metrics().combiners_created, 1);
}

#[test]
fn test_sync_group_coalesces_per_key() {
  let (group, calls) = counting_group(Duration::from_secs(60));
  let group = Arc::new(group);

  let results = run_concurrently(30, {
    let group = group.clone();
    move |i| {
      let key = format!("key-{}", i % 3);
      let value = group.execute(&key, &((i % 3) as u32)).unwrap();
      (i % 3, *value)
    }
  });

  for (slot, value) in results {
    assert_eq!(value, slot as u32 * 10);
  }
  // Each of the three keys ran its fetcher at most allow_n (3) times.
  assert!(calls.load(Ordering::SeqCst) <= 9);
  assert_eq!(group.len(), 3);
}

#[test]
fn test_sync_cached_result_within_alive_time() {
  let (group, calls) = counting_group(Duration::from_secs(60));
  let key = "cached".to_string();

  assert_eq!(*group.execute(&key, &4).unwrap(), 40);
  assert_eq!(calls.load(Ordering::SeqCst), 1);

  // Same combiner, decided result, no new work.
  let combiner = group.get_combine(&key);
  assert_eq!(combiner.status(), Status::Succeeded);
  assert_eq!(*group.execute(&key, &4).unwrap(), 40);
  assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_sync_sweep_then_lookup_yields_new_combiner() {
  let (group, calls) = counting_group(TINY_ALIVE);
  let key = "expiring".to_string();

  let first = group.get_combine(&key);
  assert_eq!(*first.execute(&1).unwrap(), 10);
  assert!(first.is_alive());

  thread::sleep(TINY_ALIVE + SLEEP_MARGIN);
  assert!(!first.is_alive());
  assert_eq!(group.sweep(), 1);
  assert!(group.is_empty());

  let second = group.get_combine(&key);
  assert!(!Combiner::ptr_eq(&first, &second));
  assert!(second.status().is_pending());
  assert_eq!(second.admitted(), 0);

  assert_eq!(*second.execute(&2).unwrap(), 20);
  assert_eq!(calls.load(Ordering::SeqCst), 2);
  assert_eq!(group.metrics().combiners_evicted, 1);
}

#[test]
fn test_sync_scheduled_sweep_evicts_dead_entries() {
  let group: Group<u32, u32, u32, String> = GroupBuilder::new()
    .config(CombineConfig::builder().alive_time(TINY_ALIVE).build())
    .scheduler(Arc::new(ThreadScheduler::new()))
    .sweep_interval(Duration::from_millis(20))
    .build(|req: &u32| Ok(*req))
    .unwrap();
  assert!(group.is_scheduled());

  for key in 0..10 {
    group.execute(&key, &key).unwrap();
  }
  assert_eq!(group.len(), 10);

  thread::sleep(TINY_ALIVE + SLEEP_MARGIN);
  assert!(group.is_empty(), "janitor should have swept dead combiners");
  assert_eq!(group.metrics().combiners_evicted, 10);
}

#[test]
fn test_sync_pending_combiner_survives_sweep() {
  let group: Group<u32, u32, u32, String> = Group::new(
    |_: &u32| {
      thread::sleep(Duration::from_millis(150));
      Ok(1)
    },
    CombineConfig::default(),
  );
  let group = Arc::new(group);

  let caller = {
    let group = group.clone();
    thread::spawn(move || group.execute(&1, &0))
  };
  thread::sleep(Duration::from_millis(30));

  assert_eq!(group.sweep(), 0);
  assert_eq!(group.len(), 1);
  assert_eq!(*caller.join().unwrap().unwrap(), 1);
}

#[test]
fn test_sync_quota_below_allow_n_does_not_wedge_key() {
  let group: Group<u32, u32, u32, String> = Group::new(
    |_: &u32| {
      thread::sleep(Duration::from_millis(20));
      Err("backend down".to_string())
    },
    CombineConfig::builder()
      .allow_n(3)
      .max_wait_n(2)
      .timeout(Duration::from_millis(500))
      .build(),
  );
  let group = Arc::new(group);

  let results = run_concurrently(2, {
    let group = group.clone();
    move |_| group.execute(&7, &7)
  });
  for result in results {
    let err = result.unwrap_err();
    assert_eq!(err.fetch_error().map(String::as_str), Some("backend down"));
  }

  // alive_time is zero, so the failed combiner is dead and gets replaced.
  assert_eq!(group.get_combine(&7).status(), Status::Pending);
  let err = group.execute(&7, &7).unwrap_err();
  assert!(!err.is_quota_exceeded());
  assert_eq!(err.fetch_error().map(String::as_str), Some("backend down"));
}
