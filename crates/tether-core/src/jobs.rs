//! Background work queued by the pool.
//!
//! Retiring a connection and redistributing its topics must not block the
//! caller of `remove_topics`, so they run on a single worker task per pool.
//! A pending-job counter lets callers wait for the queue to drain.

use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info_span, Instrument};

use crate::connection::Connection;
use crate::metrics;
use crate::pool::PoolInner;

/// One unit of deferred pool work.
pub(crate) enum Job {
    /// Stop a connection that was popped off the pool.
    Retire(Connection),
    /// Reassign recycled topics to the remaining connections.
    Redistribute,
}

/// Sender side of the job queue.
pub(crate) struct JobQueue {
    tx: mpsc::UnboundedSender<Job>,
    pending: Arc<watch::Sender<usize>>,
}

impl JobQueue {
    /// Spawn the worker. Requires a Tokio runtime.
    pub(crate) fn spawn(pool: Weak<PoolInner>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (pending, _) = watch::channel(0);
        let pending = Arc::new(pending);

        tokio::spawn(worker(pool, rx, Arc::clone(&pending)).instrument(info_span!("pool")));

        Self { tx, pending }
    }

    pub(crate) fn push(&self, job: Job) {
        self.pending.send_modify(|n| *n += 1);
        if self.tx.send(job).is_err() {
            self.pending.send_modify(|n| *n = n.saturating_sub(1));
        }
    }

    /// Number of jobs queued or running.
    pub(crate) fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    /// Wait until no job is queued or running.
    pub(crate) async fn settled(&self) {
        let mut rx = self.pending.subscribe();
        // The sender is owned by `self`, so this cannot fail.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

async fn worker(
    pool: Weak<PoolInner>,
    mut rx: mpsc::UnboundedReceiver<Job>,
    pending: Arc<watch::Sender<usize>>,
) {
    while let Some(job) = rx.recv().await {
        if let Some(pool) = pool.upgrade() {
            run(&pool, job).await;
        }
        pending.send_modify(|n| *n = n.saturating_sub(1));
    }
    debug!("Job queue closed");
}

async fn run(pool: &PoolInner, job: Job) {
    match job {
        Job::Retire(connection) => pool.retire(connection).await,
        Job::Redistribute => {
            if let Err(e) = pool.redistribute().await {
                metrics::record_redistribute_failure();
                error!(error = %e, "Failed to redistribute recycled topics");
            }
        }
    }
}
