//! Growable pool of session tasks

use std::future::Future;
use std::sync::{Mutex, PoisonError};

use tokio::task::{AbortHandle, JoinSet};
use tracing::debug;

/// Unbounded set of spawned tasks that can be aborted together
#[derive(Debug, Default)]
pub struct TaskPool {
    tasks: Mutex<JoinSet<()>>,
}

impl TaskPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a task into the pool, reaping any that already finished
    pub fn spawn<F>(&self, task: F) -> AbortHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        while let Some(result) = tasks.try_join_next() {
            if let Err(err) = result {
                if err.is_panic() {
                    debug!(error = %err, "pooled task panicked");
                }
            }
        }
        tasks.spawn(task)
    }

    /// Number of tasks not yet reaped
    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Abort every task in the pool
    pub fn shutdown(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(tasks = tasks.len(), "shutting down task pool");
        tasks.abort_all();
        tasks.detach_all();
    }
}
