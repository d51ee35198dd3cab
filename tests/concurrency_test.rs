use backend_pool::{Manager, Pool, PoolConfig, PoolError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct TestConnection {
    pub id: u64,
}

/// Opens connections after an optional delay, like a slow network handshake
#[derive(Debug, Default)]
pub struct TestManager {
    pub connect_delay: Duration,
    pub opened: AtomicU64,
    pub closed: AtomicU64,
}

impl Manager for TestManager {
    type Connection = TestConnection;
    type Context = ();
    type Error = String;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        let id = self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(TestConnection { id })
    }

    async fn prepare(&self, _conn: &mut Self::Connection) -> Result<Self::Context, Self::Error> {
        Ok(())
    }

    fn close(&self, _conn: Self::Connection, _ctx: Self::Context) -> Result<(), Self::Error> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn assert_bounded(pool: &Pool<TestManager>) {
    let s = pool.state();
    assert!(
        s.borrowed + s.idle + s.connecting <= s.max_connections,
        "state out of bounds: {}",
        s
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_at_most_max_borrowers() {
    let max = 5;
    let pool = Pool::new(TestManager::default(), PoolConfig::new(0, max))
        .await
        .unwrap();
    let active = Arc::new(AtomicU64::new(0));
    let peak = Arc::new(AtomicU64::new(0));

    let start = Instant::now();
    let mut handles = vec![];
    for _ in 0..max + 5 {
        let pool = pool.clone();
        let active = active.clone();
        let peak = peak.clone();
        handles.push(tokio::spawn(async move {
            let conn = pool.get().await.unwrap();
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            active.fetch_sub(1, Ordering::SeqCst);
            drop(conn);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= max);
    // the last five only ran after the first holders returned
    assert!(start.elapsed() >= Duration::from_millis(55));
    let state = pool.state();
    assert_eq!(state.borrowed, 0);
    assert_eq!(state.waits, 0);
    assert!(state.connections <= max);
    assert!(pool.manager.opened.load(Ordering::SeqCst) <= max);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_waiters_share_an_in_flight_batch() {
    let manager = TestManager {
        connect_delay: Duration::from_millis(20),
        ..TestManager::default()
    };
    let pool = Pool::new(manager, PoolConfig::new(0, 2)).await.unwrap();

    let a = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get().await.map(|c| c.id()) })
    };
    let b = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get().await.map(|c| c.id()) })
    };
    let a = a.await.unwrap().unwrap();
    let b = b.await.unwrap().unwrap();
    assert!(a < 2 && b < 2);
    assert_eq!(pool.manager.opened.load(Ordering::SeqCst), 2);
    assert_eq!(pool.state().idle, 2);
    assert_bounded(&pool);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_invariants_under_churn() {
    let config = PoolConfig::new(2, 6).with_cleanup_interval(Duration::ZERO);
    let pool = Pool::new(TestManager::default(), config).await.unwrap();

    let mut handles = vec![];
    for task in 0..12u64 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            for round in 0..20u64 {
                let conn = pool.get().await.unwrap();
                assert_bounded(&pool);
                tokio::task::yield_now().await;
                if (task + round) % 3 == 0 {
                    pool.close_failing_connection(conn);
                } else {
                    pool.return_connection(conn);
                }
            }
        }));
    }
    let trimmer = {
        let pool = pool.clone();
        tokio::spawn(async move {
            for _ in 0..50 {
                pool.check_for_cleanup();
                assert_bounded(&pool);
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
    };
    for handle in handles {
        handle.await.unwrap();
    }
    trimmer.await.unwrap();

    let state = pool.state();
    assert_eq!(state.borrowed, 0);
    assert_eq!(state.connecting, 0);
    assert_eq!(state.waits, 0);
    let opened = pool.manager.opened.load(Ordering::SeqCst);
    let closed = pool.manager.closed.load(Ordering::SeqCst);
    assert_eq!(opened - closed, state.idle);
}

#[tokio::test]
async fn test_background_cleanup() {
    let config = PoolConfig::new(1, 10).with_cleanup_interval(Duration::from_millis(30));
    let pool = Pool::new(TestManager::default(), config).await.unwrap();
    assert!(pool.start_cleanup());
    assert!(!pool.start_cleanup());

    let mut held = vec![];
    for _ in 0..6 {
        held.push(pool.get().await.unwrap());
    }
    drop(held);
    assert_eq!(pool.state().idle, 6);

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(pool.state().idle, 1);

    pool.close();
    assert!(!pool.start_cleanup());
}

#[tokio::test]
async fn test_cancelled_allocation_keeps_accounting() {
    let manager = TestManager {
        connect_delay: Duration::from_millis(50),
        ..TestManager::default()
    };
    let pool = Pool::new(manager, PoolConfig::new(0, 3)).await.unwrap();
    let r = pool.get_timeout(Some(Duration::from_millis(70))).await;
    assert!(r.is_err());
    let state = pool.state();
    assert_eq!(state.connecting, 0);
    assert_eq!(state.borrowed, 0);
    // the one connection opened before the deadline was kept
    assert_eq!(state.idle, 1);
    assert_bounded(&pool);

    let conn = pool.get().await.unwrap();
    assert_eq!(conn.id, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_during_allocation_closes_the_batch() {
    let manager = TestManager {
        connect_delay: Duration::from_millis(30),
        ..TestManager::default()
    };
    let pool = Pool::new(manager, PoolConfig::new(0, 3)).await.unwrap();
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get().await.map(|c| c.id()) })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    pool.close();

    let r = waiter.await.unwrap();
    assert!(matches!(r, Err(PoolError::Closed)));
    let state = pool.state();
    assert_eq!(state.idle, 0);
    assert_eq!(state.connecting, 0);
    assert_eq!(state.borrowed, 0);
    assert_eq!(pool.manager.opened.load(Ordering::SeqCst), 3);
    assert_eq!(pool.manager.closed.load(Ordering::SeqCst), 3);
}
