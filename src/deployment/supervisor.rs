//! Ownership of background creation tasks
//!
//! Each deployment has at most one live creation task. A task is registered
//! before it is spawned and removes itself when it finishes, but only if its
//! attempt number is still the current one for that id.
//!
//! A task commits its outcome through `TaskControl::commit`; once committed,
//! cancel requests are refused, and once a cancel is accepted the commit fails.

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::model::DeploymentId;

const OPEN: u8 = 0;
const COMMITTED: u8 = 1;
const CANCELLED: u8 = 2;

/// Cancellation signal and commit gate handed to a creation task
#[derive(Clone)]
pub struct TaskControl {
    token: CancellationToken,
    phase: Arc<AtomicU8>,
}

impl TaskControl {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            phase: Arc::new(AtomicU8::new(OPEN)),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Claim a successful outcome; false when cancellation got there first
    pub fn commit(&self) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        self.phase
            .compare_exchange(OPEN, COMMITTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Request cancellation; false when the task has already committed
    fn request_cancel(&self) -> bool {
        match self
            .phase
            .compare_exchange(OPEN, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) | Err(CANCELLED) => {
                self.token.cancel();
                true
            }
            Err(_) => false,
        }
    }

    /// Cancel unconditionally (delete, shutdown, relaunch)
    fn abort(&self) {
        self.phase.store(CANCELLED, Ordering::Release);
        self.token.cancel();
    }
}

struct TaskEntry {
    attempt: u64,
    control: TaskControl,
    handle: Option<JoinHandle<()>>,
}

/// Registry of in-flight creation tasks
#[derive(Clone, Default)]
pub struct TaskSupervisor {
    tasks: Arc<DashMap<DeploymentId, TaskEntry>>,
    attempts: Arc<AtomicU64>,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `task` for `id`, replacing (and cancelling) any previous one.
    ///
    /// Returns the attempt number assigned to the new task.
    pub fn launch<F, Fut>(&self, id: DeploymentId, task: F) -> u64
    where
        F: FnOnce(TaskControl) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        let control = TaskControl::new();

        let previous = self.tasks.insert(
            id,
            TaskEntry {
                attempt,
                control: control.clone(),
                handle: None,
            },
        );
        if let Some(previous) = previous {
            previous.control.abort();
        }

        let fut = task(control);
        let tasks = self.tasks.clone();
        let handle = tokio::spawn(async move {
            fut.await;
            tasks.remove_if(&id, |_, entry| entry.attempt == attempt);
            debug!("Creation task {} attempt {} finished", id, attempt);
        });

        // The task may already have finished and deregistered itself
        if let Some(mut entry) = self.tasks.get_mut(&id) {
            if entry.attempt == attempt {
                entry.handle = Some(handle);
            }
        }
        attempt
    }

    /// Signal cancellation; returns false when nothing is running for `id`
    /// or its task has already committed
    pub fn cancel(&self, id: &DeploymentId) -> bool {
        match self.tasks.get(id) {
            Some(entry) => entry.control.request_cancel(),
            None => false,
        }
    }

    /// Cancel the task for `id` and wait until it has stopped
    pub async fn cancel_and_wait(&self, id: &DeploymentId) {
        let Some((_, entry)) = self.tasks.remove(id) else {
            return;
        };
        entry.control.abort();
        if let Some(handle) = entry.handle {
            let _ = handle.await;
        }
    }

    /// Wait for the current task of `id` without cancelling it
    pub async fn wait(&self, id: &DeploymentId) {
        let handle = self
            .tasks
            .get_mut(id)
            .and_then(|mut entry| entry.handle.take());
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn is_running(&self, id: &DeploymentId) -> bool {
        self.tasks.contains_key(id)
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Cancel every task (used on shutdown)
    pub fn cancel_all(&self) {
        for entry in self.tasks.iter() {
            entry.control.abort();
        }
    }
}
