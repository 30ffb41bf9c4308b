//! A small first-party connection pool over `rusqlite::Connection`.
//!
//! `rusqlite::Connection` is blocking and not `Sync`, so every query has to
//! run on a blocking-pool thread (`spawn_blocking`) rather than directly in
//! an async fn; this pool hands out exclusive ownership of one connection
//! per query via a semaphore-gated idle list, matching §5's "bounded
//! connection pool, size = 10-20; handlers acquire, run query, release; no
//! cross-request connection reuse."

use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;
use tokio::sync::Semaphore;

pub struct SqlitePool {
    semaphore: Arc<Semaphore>,
    idle: Arc<Mutex<Vec<Connection>>>,
}

impl SqlitePool {
    pub fn open(db_path: &str, size: usize) -> anyhow::Result<Self> {
        let mut idle = Vec::with_capacity(size);
        for _ in 0..size {
            idle.push(Connection::open(db_path)?);
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(size)),
            idle: Arc::new(Mutex::new(idle)),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory(size: usize) -> anyhow::Result<Self> {
        let mut idle = Vec::with_capacity(size);
        for _ in 0..size {
            idle.push(Connection::open_in_memory()?);
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(size)),
            idle: Arc::new(Mutex::new(idle)),
        })
    }

    /// Acquires a connection, runs `f` on the blocking thread pool, and
    /// returns the connection to the idle list regardless of outcome.
    pub async fn with_connection<F, R>(&self, f: F) -> Result<R, rusqlite::Error>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("pool semaphore is never closed");
        let idle = self.idle.clone();
        let conn = idle.lock().pop().expect("permit count matches idle connection count");

        let (conn, result) = tokio::task::spawn_blocking(move || {
            let result = f(&conn);
            (conn, result)
        })
        .await
        .expect("sqlite worker thread panicked");

        idle.lock().push(conn);
        drop(permit);

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn connections_are_returned_to_the_idle_list_after_use() {
        let pool = SqlitePool::open_in_memory(2).unwrap();
        for _ in 0..5 {
            let n: i64 = pool.with_connection(|conn| conn.query_row("SELECT 1", [], |row| row.get(0))).await.unwrap();
            assert_eq!(n, 1);
        }
    }

    #[tokio::test]
    async fn pool_size_bounds_concurrent_connection_use() {
        // §5: "bounded connection pool ... handlers acquire, run query,
        // release; no cross-request connection reuse." With a pool of size
        // 1, a second acquirer must wait for the first to release.
        let pool = Arc::new(SqlitePool::open_in_memory(1).unwrap());
        let concurrent = Arc::new(AtomicU32::new(0));
        let max_concurrent = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let pool = pool.clone();
            let concurrent = concurrent.clone();
            let max_concurrent = max_concurrent.clone();
            handles.push(tokio::spawn(async move {
                pool.with_connection(move |conn| {
                    let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                    max_concurrent.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(10));
                    concurrent.fetch_sub(1, Ordering::SeqCst);
                    conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                })
                .await
                .unwrap()
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
    }
}
