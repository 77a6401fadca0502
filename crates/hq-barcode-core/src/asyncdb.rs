//! Async DB Wrapper: offloads tracking-store reads to a bounded
//! worker pool so the UI thread is never blocked.
//!
//! Grounded in `examples/original_source/database/async_db.py`'s
//! `AsyncDatabaseWrapper` (`ThreadPoolExecutor(max_workers=2)`,
//! `execute`/`execute_with_callback`/`shutdown`), restated with
//! `tokio::task::spawn_blocking` bounded by a `Semaphore` of the same
//! default width instead of a dedicated thread pool — idiomatic for a crate
//! already built on the teacher's tokio runtime.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::error;

use crate::error::Error;

const DEFAULT_WORKERS: usize = 2;

/// Bounds how many blocking tracking-store operations run concurrently.
#[derive(Clone)]
pub struct AsyncDbWrapper {
    permits: Arc<Semaphore>,
}

impl Default for AsyncDbWrapper {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}

impl AsyncDbWrapper {
    pub fn new(max_workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_workers.max(1))),
        }
    }

    /// Runs `op` on a blocking-pool thread, queued behind at most
    /// `max_workers` concurrent operations. Ordering across submissions is
    /// not guaranteed.
    pub async fn execute<F, T>(&self, op: F) -> Result<T, Error>
    where
        F: FnOnce() -> Result<T, Error> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::internal("async db wrapper semaphore closed"))?;
        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            op()
        })
        .await
        .map_err(|e| Error::internal(format!("async db worker panicked: {e}")))?;
        result
    }

    /// Runs `op` in the background and invokes `on_success`/`on_error` from
    /// the worker thread once it completes; callers are responsible for
    /// marshaling the result back to their own thread (matching the
    /// original's callback contract — it never assumes a UI event loop).
    pub fn execute_with_callback<F, T, S, E>(&self, op: F, on_success: S, on_error: E)
    where
        F: FnOnce() -> Result<T, Error> + Send + 'static,
        T: Send + 'static,
        S: FnOnce(T) + Send + 'static,
        E: FnOnce(Error) + Send + 'static,
    {
        let wrapper = self.clone();
        tokio::spawn(async move {
            match wrapper.execute(op).await {
                Ok(value) => on_success(value),
                Err(err) => {
                    error!(error = %err, "async db background operation failed");
                    on_error(err);
                }
            }
        });
    }

    /// Waits for all permits to be returned, i.e. all in-flight operations
    /// to finish, then drops the semaphore so further `execute` calls fail
    /// fast.
    pub async fn shutdown(self) {
        let total = self.permits.available_permits();
        // Acquiring every permit blocks until all in-flight work releases
        // its permit, giving us a `wait=true`-equivalent join point.
        if let Ok(_guard) = self.permits.acquire_many(total as u32).await {
            // permits drop here, wrapper is no longer usable for new work
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn execute_returns_blocking_result() {
        let wrapper = AsyncDbWrapper::default();
        let result = wrapper.execute(|| Ok::<_, Error>(42)).await.unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn execute_propagates_errors() {
        let wrapper = AsyncDbWrapper::default();
        let result: Result<i32, Error> = wrapper.execute(|| Err(Error::internal("boom"))).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn concurrency_is_bounded_by_worker_count() {
        let wrapper = AsyncDbWrapper::new(2);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let wrapper = wrapper.clone();
            let in_flight = in_flight.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                wrapper
                    .execute(move || {
                        let cur = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(cur, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(30));
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, Error>(())
                    })
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn execute_with_callback_invokes_on_success() {
        let wrapper = AsyncDbWrapper::default();
        let (tx, rx) = tokio::sync::oneshot::channel();
        wrapper.execute_with_callback(
            || Ok::<_, Error>(7),
            move |v| {
                let _ = tx.send(v);
            },
            |_e| panic!("should not error"),
        );
        let value = rx.await.unwrap();
        assert_eq!(value, 7);
    }
}
