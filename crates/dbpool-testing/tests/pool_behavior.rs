//! Behavioral tests for the blocking pool under concurrency.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use dbpool::{ConnectionId, ConnectionState, Pool, PoolConfig, PoolError};
use dbpool_testing::MockFactory;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn pool(factory: MockFactory, capacity: u32, max_wait_ms: u64, poll_ms: u64) -> Pool<MockFactory> {
    init_tracing();
    Pool::builder(factory)
        .capacity(capacity)
        .max_wait(Duration::from_millis(max_wait_ms))
        .poll_interval(Duration::from_millis(poll_ms))
        .build()
        .unwrap()
}

#[test]
fn capacity_holds_under_contention() {
    let pool = pool(MockFactory::new(), 3, 5_000, 10);
    let violated = Arc::new(AtomicBool::new(false));

    thread::scope(|s| {
        for _ in 0..8 {
            let pool = pool.clone();
            let violated = Arc::clone(&violated);
            s.spawn(move || {
                for _ in 0..25 {
                    let conn = pool.acquire().unwrap();
                    if !conn.claim() {
                        violated.store(true, Ordering::SeqCst);
                    }
                    if pool.status().total > 3 {
                        violated.store(true, Ordering::SeqCst);
                    }
                    thread::sleep(Duration::from_micros(200));
                    conn.unclaim();
                    pool.release(conn);
                }
            });
        }
    });

    assert!(!violated.load(Ordering::SeqCst), "capacity or exclusivity violated");
    assert!(pool.factory().opens() <= 3);
    assert!(pool.factory().max_live() <= 3);
    assert_eq!(pool.metrics().checkouts_successful, 200);
    assert_eq!(pool.status().in_use, 0);
}

#[test]
fn idle_connection_is_reused_for_waiter() {
    let pool = pool(MockFactory::new(), 1, 5_000, 50);
    let held = pool.acquire().unwrap();
    let serial = held.serial();

    let waiter = {
        let pool = pool.clone();
        thread::spawn(move || {
            let conn = pool.acquire().unwrap();
            conn.serial()
        })
    };

    thread::sleep(Duration::from_millis(100));
    pool.release(held);

    assert_eq!(waiter.join().unwrap(), serial);
    assert_eq!(pool.factory().opens(), 1);
}

#[test]
fn exhaustion_respects_wait_budget() {
    let pool = pool(MockFactory::new(), 1, 300, 50);
    let _held = pool.acquire().unwrap();

    let contender = {
        let pool = pool.clone();
        thread::spawn(move || {
            let started = Instant::now();
            let result = pool.acquire();
            (result.map(|c| c.id()), started.elapsed())
        })
    };

    let (result, elapsed) = contender.join().unwrap();
    assert!(matches!(result, Err(PoolError::PoolExhausted { .. })));
    assert!(elapsed >= Duration::from_millis(300), "returned too early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(450), "waited too long: {elapsed:?}");
}

#[test]
fn release_wakes_blocked_waiter() {
    let pool = pool(MockFactory::new(), 1, 5_000, 50);
    let held = pool.acquire().unwrap();

    let waiter = {
        let pool = pool.clone();
        thread::spawn(move || {
            let conn = pool.acquire().unwrap();
            (conn.id(), Instant::now())
        })
    };

    thread::sleep(Duration::from_millis(120));
    let released_at = Instant::now();
    pool.release(held);

    let (id, acquired_at) = waiter.join().unwrap();
    assert_eq!(id, ConnectionId::new(1));
    assert!(
        acquired_at.duration_since(released_at) < Duration::from_millis(150),
        "waiter took {:?} to observe the release",
        acquired_at.duration_since(released_at)
    );
}

#[test]
fn shutdown_is_idempotent_and_final() {
    let pool = pool(MockFactory::new(), 2, 100, 10);
    let held = pool.acquire().unwrap();
    pool.release(pool.acquire().unwrap());

    pool.shutdown();
    pool.shutdown();

    assert!(held.is_closed());
    assert_eq!(pool.factory().closes(), 2);
    assert_eq!(pool.factory().live(), 0);

    let attempts = pool.factory().open_attempts();
    assert!(matches!(pool.acquire(), Err(PoolError::PoolClosed)));
    assert_eq!(pool.factory().open_attempts(), attempts);

    pool.release(held);
    assert_eq!(pool.status().total, 0);
}

#[test]
fn shutdown_wakes_blocked_waiters() {
    let pool = pool(MockFactory::new(), 1, 5_000, 1_000);
    let _held = pool.acquire().unwrap();

    let waiter = {
        let pool = pool.clone();
        thread::spawn(move || {
            let started = Instant::now();
            (pool.acquire().map(|c| c.id()), started.elapsed())
        })
    };

    thread::sleep(Duration::from_millis(100));
    pool.shutdown();

    let (result, elapsed) = waiter.join().unwrap();
    assert!(matches!(result, Err(PoolError::PoolClosed)));
    assert!(elapsed < Duration::from_millis(1_000));
}

#[test]
fn stale_connection_is_replaced() {
    init_tracing();
    let pool = Pool::builder(MockFactory::new())
        .capacity(1)
        .validate_on_borrow("SELECT 1")
        .build()
        .unwrap();

    let conn = pool.acquire().unwrap();
    let stale_serial = conn.serial();
    pool.release(conn);

    pool.factory().mark_stale(stale_serial);
    let conn = pool.acquire().unwrap();

    assert_eq!(conn.id(), ConnectionId::new(1));
    assert_ne!(conn.serial(), stale_serial);
    assert!(!conn.is_closed());
    assert_eq!(pool.factory().opens(), 2);
    assert_eq!(pool.factory().closes(), 1);
    assert_eq!(pool.factory().live(), 1);
}

#[test]
fn failed_reopen_keeps_identifier_born() {
    init_tracing();
    let pool = Pool::builder(MockFactory::new())
        .capacity(1)
        .max_wait(Duration::from_millis(200))
        .validate_on_borrow("SELECT 1")
        .build()
        .unwrap();

    let conn = pool.acquire().unwrap();
    let stale_serial = conn.serial();
    pool.release(conn);

    pool.factory().mark_stale(stale_serial);
    pool.factory().fail_next_opens(1);
    assert!(matches!(pool.acquire(), Err(PoolError::OpenError(_))));

    assert_eq!(
        pool.connection_state(ConnectionId::new(1)),
        ConnectionState::Idle
    );
    assert_eq!(pool.status().available, 1);
    assert_eq!(pool.factory().live(), 0);

    let conn = pool.acquire().unwrap();
    assert_eq!(conn.id(), ConnectionId::new(1));
    assert_ne!(conn.serial(), stale_serial);
    assert!(!conn.is_closed());
    assert_eq!(pool.factory().live(), 1);
}

#[test]
fn healthy_connection_is_validated_not_reopened() {
    init_tracing();
    let pool = Pool::builder(MockFactory::new())
        .capacity(1)
        .validate_on_borrow("SELECT 1")
        .build()
        .unwrap();

    pool.release(pool.acquire().unwrap());
    let conn = pool.acquire().unwrap();

    assert_eq!(conn.serial(), 1);
    assert_eq!(pool.factory().validations(), 1);
    assert_eq!(pool.factory().opens(), 1);
}

#[test]
fn open_failure_frees_slot_for_waiter() {
    let factory = MockFactory::new().with_open_delay(Duration::from_millis(100));
    factory.fail_next_opens(1);
    let pool = pool(factory, 1, 2_000, 20);

    let failing = {
        let pool = pool.clone();
        thread::spawn(move || pool.acquire().map(|c| c.id()))
    };
    thread::sleep(Duration::from_millis(30));

    // The failing open still holds the only slot, so this call waits for it.
    let conn = pool.acquire().unwrap();

    assert!(matches!(failing.join().unwrap(), Err(PoolError::OpenError(_))));
    assert_eq!(conn.id(), ConnectionId::new(1));
    assert_eq!(pool.factory().open_attempts(), 2);
    assert_eq!(pool.metrics().open_failures, 1);
}

#[test]
fn opens_run_outside_the_lock() {
    let factory = MockFactory::new().with_open_delay(Duration::from_millis(200));
    let pool = pool(factory, 2, 2_000, 20);

    let started = Instant::now();
    let openers: Vec<_> = (0..2)
        .map(|_| {
            let pool = pool.clone();
            thread::spawn(move || pool.acquire().map(|c| c.id()))
        })
        .collect();

    thread::sleep(Duration::from_millis(50));
    let probe = Instant::now();
    let status = pool.status();
    assert!(probe.elapsed() < Duration::from_millis(100));
    assert_eq!(status.in_use, 2);
    assert_eq!(
        pool.connection_state(ConnectionId::new(1)),
        ConnectionState::Unborn
    );

    let mut ids: Vec<_> = openers
        .into_iter()
        .map(|h| h.join().unwrap().unwrap())
        .collect();
    ids.sort();

    assert_eq!(ids, vec![ConnectionId::new(1), ConnectionId::new(2)]);
    assert_eq!(pool.factory().max_concurrent_opens(), 2);
    assert!(started.elapsed() < Duration::from_millis(400));
}

#[test]
fn shutdown_during_open_closes_new_connection() {
    let factory = MockFactory::new().with_open_delay(Duration::from_millis(150));
    let pool = pool(factory, 1, 1_000, 20);

    let opener = {
        let pool = pool.clone();
        thread::spawn(move || pool.acquire().map(|c| c.id()))
    };
    thread::sleep(Duration::from_millis(50));
    pool.shutdown();

    assert!(matches!(opener.join().unwrap(), Err(PoolError::PoolClosed)));
    assert_eq!(pool.factory().opens(), 1);
    assert_eq!(pool.factory().live(), 0);
}

#[test]
fn pool_from_json_config_passes_target_to_factory() {
    init_tracing();
    let path = std::env::temp_dir().join(format!("dbpool-config-{}.json", std::process::id()));
    std::fs::write(
        &path,
        r#"{
            "database": {
                "type": "QPSQL",
                "host": "10.0.0.7",
                "database_name": "inventory",
                "username": "reader",
                "password": "s3cret",
                "port": 0,
                "max_connection_count": 2
            }
        }"#,
    )
    .unwrap();

    let config = PoolConfig::from_json_file(&path).unwrap();
    std::fs::remove_file(&path).ok();

    let pool = Pool::new(config, MockFactory::new()).unwrap();
    pool.with_connection(|conn| assert_eq!(conn.id(), ConnectionId::new(1)))
        .unwrap();

    let target = pool.factory().last_target().expect("factory was called");
    assert_eq!(target.driver, "QPSQL");
    assert_eq!(target.host, "10.0.0.7");
    assert_eq!(target.database, "inventory");
    assert_eq!(target.username, "reader");
    assert_eq!(target.password, "s3cret");
    assert_eq!(target.port, None);
    assert_eq!(pool.status().available, 1);
}
