use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::config::RetryConfig;
use crate::session::SessionId;
use crate::staging::ChunkStaging;

/// Handle to the background task that purges staged chunks after a successful finalize.
///
/// Jobs are processed one at a time in the order they were scheduled. A job that still fails
/// after the configured number of attempts is logged and counted, never propagated; the staged
/// bytes it leaves behind are residue, not corruption.
#[derive(Clone)]
pub struct CleanupQueue {
    tx: mpsc::UnboundedSender<SessionId>,
    shared: Arc<Shared>,
}

/// Point-in-time view of the cleanup worker's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CleanupSnapshot {
    pub pending: usize,
    pub completed: u64,
    pub failed: u64,
}

struct Shared {
    pending: watch::Sender<usize>,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl Shared {
    fn finish(&self, ok: bool) {
        if ok {
            self.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.pending.send_modify(|n| *n = n.saturating_sub(1));
    }
}

impl CleanupQueue {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn(staging: ChunkStaging, config: RetryConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (pending, _) = watch::channel(0usize);
        let shared = Arc::new(Shared {
            pending,
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });

        tokio::spawn(run(rx, staging, config, shared.clone()));

        Self { tx, shared }
    }

    pub fn schedule(&self, session: SessionId) {
        self.shared.pending.send_modify(|n| *n += 1);
        if self.tx.send(session).is_err() {
            tracing::error!(%session, "cleanup worker has stopped; staged chunks left behind");
            self.shared.finish(false);
        }
    }

    pub fn snapshot(&self) -> CleanupSnapshot {
        CleanupSnapshot {
            pending: *self.shared.pending.borrow(),
            completed: self.shared.completed.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
        }
    }

    /// Resolve once every scheduled job has either completed or failed.
    pub async fn wait_idle(&self) {
        let mut rx = self.shared.pending.subscribe();
        // the sender lives in `shared`, so the channel cannot close while we hold `self`
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<SessionId>,
    staging: ChunkStaging,
    config: RetryConfig,
    shared: Arc<Shared>,
) {
    let attempts = config.attempts.max(1);
    while let Some(session) = rx.recv().await {
        let mut ok = false;
        for attempt in 1..=attempts {
            match staging.purge(&session).await {
                Ok(()) => {
                    tracing::debug!(%session, attempt, "purged staged chunks");
                    ok = true;
                    break;
                }
                Err(e) if attempt < attempts => {
                    tracing::warn!(%session, attempt, error = %e, "staging cleanup failed, retrying");
                    tokio::time::sleep(config.delay(attempt)).await;
                }
                Err(e) => {
                    tracing::error!(%session, attempts, error = %e, "giving up on staging cleanup");
                }
            }
        }
        shared.finish(ok);
    }
    tracing::debug!("cleanup worker stopped");
}

#[cfg(test)]
mod test {
    use std::sync::atomic::AtomicU32;

    use async_trait::async_trait;
    use bytes::Bytes;

    use super::*;
    use crate::errors::{Error, Result};
    use crate::memory::MemoryStagingBackend;
    use crate::stores::StagingBackend;

    /// Fails `purge_all` a fixed number of times before delegating.
    struct Flaky {
        inner: MemoryStagingBackend,
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl StagingBackend for Flaky {
        async fn put(&self, session: &SessionId, index: u32, bytes: Bytes) -> Result<()> {
            self.inner.put(session, index, bytes).await
        }

        async fn get(&self, session: &SessionId, index: u32) -> Result<Bytes> {
            self.inner.get(session, index).await
        }

        async fn delete(&self, session: &SessionId, index: u32) -> Result<()> {
            self.inner.delete(session, index).await
        }

        async fn purge_all(&self, session: &SessionId) -> Result<()> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(Error::io("staging unavailable"));
            }
            self.inner.purge_all(session).await
        }
    }

    fn flaky(failures: u32) -> Arc<Flaky> {
        Arc::new(Flaky {
            inner: MemoryStagingBackend::default(),
            failures_left: AtomicU32::new(failures),
        })
    }

    fn config(attempts: u32) -> RetryConfig {
        RetryConfig {
            attempts,
            backoff_ms: 1,
        }
    }

    #[tokio::test]
    async fn retries_until_purge_succeeds() {
        let backend = flaky(2);
        let session = SessionId::new();
        backend.put(&session, 0, Bytes::from_static(b"x")).await.unwrap();

        let queue = CleanupQueue::spawn(ChunkStaging::new(backend.clone()), config(3));
        queue.schedule(session);
        queue.wait_idle().await;

        assert_eq!(
            queue.snapshot(),
            CleanupSnapshot {
                pending: 0,
                completed: 1,
                failed: 0
            }
        );
        assert_eq!(backend.inner.staged_count(&session), 0);
    }

    #[tokio::test]
    async fn exhausted_attempts_are_counted_as_failed() {
        let backend = flaky(5);
        let session = SessionId::new();
        backend.put(&session, 0, Bytes::from_static(b"x")).await.unwrap();

        let queue = CleanupQueue::spawn(ChunkStaging::new(backend.clone()), config(2));
        queue.schedule(session);
        queue.wait_idle().await;

        let snapshot = queue.snapshot();
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.completed, 0);
        assert_eq!(backend.inner.staged_count(&session), 1);
    }

    #[tokio::test]
    async fn wait_idle_returns_immediately_with_nothing_scheduled() {
        let queue = CleanupQueue::spawn(
            ChunkStaging::new(Arc::new(MemoryStagingBackend::default())),
            config(1),
        );
        queue.wait_idle().await;
        assert_eq!(queue.snapshot(), CleanupSnapshot::default());
    }
}
