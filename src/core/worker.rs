//! Push workers and the provider seam they drive.
//!
//! A [`Worker`] owns one provider connection and a single-threaded tokio
//! runtime for it. Its [`Worker::run`] loop lives on a dedicated OS thread and
//! blocks on a command channel; each `Subscribe` command makes it drain a
//! task's device queue, pushing once per device.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::error::DispatchError;
use super::message::Task;
use super::outcome::{OutcomeKind, OutcomeRecord};
use super::pool::Pool;
use crate::util::clock::now_ms;

/// Provider reply for one push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {
    /// HTTP status returned by the gateway.
    pub status: u16,
    /// `apns-id` header.
    pub apns_id: Option<String>,
    /// Rejection reason from the response body.
    pub reason: Option<String>,
}

impl PushResponse {
    /// `200` with no reason.
    #[must_use]
    pub const fn accepted(apns_id: Option<String>) -> Self {
        Self {
            status: 200,
            apns_id,
            reason: None,
        }
    }

    /// Whether the gateway accepted the notification.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Provider failures. None of them are retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Connection or protocol failure.
    #[error("transport error: {0}")]
    Transport(String),
    /// The gateway answered with a non-success status.
    #[error("rejected with status {status}: {reason}")]
    Rejected {
        /// HTTP status.
        status: u16,
        /// Reason string.
        reason: String,
    },
    /// The payload could not be produced.
    #[error("payload error: {0}")]
    Payload(String),
}

/// Client for the push gateway. One instance per worker.
#[async_trait]
pub trait PushProvider: Send + Sync + 'static {
    /// Deliver `payload` to `device`, once.
    async fn push(&self, payload: &[u8], device: &str) -> Result<PushResponse, ProviderError>;

    /// Release the underlying connection.
    fn close(&self) {}
}

/// Builds a provider for each new worker.
pub trait ProviderFactory: Send + Sync + 'static {
    /// Create a provider.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] when credentials or connections cannot be set up.
    fn create(&self) -> Result<Box<dyn PushProvider>, ProviderError>;
}

impl<F> ProviderFactory for F
where
    F: Fn() -> Result<Box<dyn PushProvider>, ProviderError> + Send + Sync + 'static,
{
    fn create(&self) -> Result<Box<dyn PushProvider>, ProviderError> {
        self()
    }
}

/// Outcome of one push attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushResult {
    /// Device the push targeted.
    pub device: String,
    /// Provider reply, when one arrived.
    pub response: Option<PushResponse>,
    /// Why the push did not succeed.
    pub error: Option<ProviderError>,
}

impl PushResult {
    /// Whether the push was accepted.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Worker lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Idle, waiting for a subscribe command.
    Spare,
    /// Draining a task.
    Running,
    /// Run loop has exited.
    Stopped,
}

/// Commands accepted by the run loop.
pub enum WorkerCommand {
    /// Drain `task`, then send the worker id on `done`.
    Subscribe {
        /// Task to drain.
        task: Task,
        /// Completion signal.
        done: Sender<usize>,
    },
    /// Leave the run loop.
    Stop,
}

/// A push worker.
pub struct Worker {
    id: Mutex<usize>,
    uuid: Uuid,
    status: Mutex<WorkerStatus>,
    pool: Mutex<Weak<Pool>>,
    provider: Box<dyn PushProvider>,
    runtime: tokio::runtime::Runtime,
    commands: Sender<WorkerCommand>,
    inbox: Receiver<WorkerCommand>,
    destroyed: AtomicBool,
}

impl Worker {
    /// Wrap a provider in a worker with its own current-thread runtime.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::WorkerCreate`] if the runtime cannot be built.
    pub fn new(provider: Box<dyn PushProvider>) -> Result<Self, DispatchError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| DispatchError::WorkerCreate(e.to_string()))?;
        let (commands, inbox) = unbounded();
        Ok(Self {
            id: Mutex::new(0),
            uuid: Uuid::new_v4(),
            status: Mutex::new(WorkerStatus::Spare),
            pool: Mutex::new(Weak::new()),
            provider,
            runtime,
            commands,
            inbox,
            destroyed: AtomicBool::new(false),
        })
    }

    /// Index within the owning pool.
    #[must_use]
    pub fn id(&self) -> usize {
        *self.id.lock()
    }

    /// Unique identity.
    #[must_use]
    pub const fn uuid(&self) -> &Uuid {
        &self.uuid
    }

    /// Display name, `pool-<p>-worker-<w>`.
    #[must_use]
    pub fn name(&self) -> String {
        match self.pool() {
            Some(pool) => format!("{}-worker-{}", pool.name(), self.id()),
            None => format!("worker-{}", self.id()),
        }
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> WorkerStatus {
        *self.status.lock()
    }

    /// Owning pool, if it is still alive.
    #[must_use]
    pub fn pool(&self) -> Option<Arc<Pool>> {
        self.pool.lock().upgrade()
    }

    /// Attach to a pool slot.
    pub(crate) fn bind(&self, id: usize, pool: Weak<Pool>) {
        *self.id.lock() = id;
        *self.pool.lock() = pool;
    }

    /// Sender for the run loop.
    pub(crate) fn command_sender(&self) -> Sender<WorkerCommand> {
        self.commands.clone()
    }

    fn set_status(&self, next: WorkerStatus) -> bool {
        let mut status = self.status.lock();
        if *status == WorkerStatus::Stopped {
            return false;
        }
        *status = next;
        true
    }

    /// Long-lived command loop. Call on the worker's own thread.
    pub fn run(&self) {
        debug!(worker = %self.name(), "worker started");
        while let Ok(command) = self.inbox.recv() {
            match command {
                WorkerCommand::Subscribe { task, done } => {
                    if self.set_status(WorkerStatus::Running) {
                        self.subscribe(&task);
                        self.set_status(WorkerStatus::Spare);
                    } else {
                        warn!(worker = %self.name(), task_id = task.id(), "stopped worker skipped task");
                    }
                    let _ = done.send(self.id());
                }
                WorkerCommand::Stop => break,
            }
        }
        *self.status.lock() = WorkerStatus::Stopped;
        debug!(worker = %self.name(), "worker exiting");
    }

    /// Ask the run loop to exit once the current subscribe finishes.
    pub fn stop(&self) {
        let _ = self.commands.send(WorkerCommand::Stop);
    }

    /// Drain the task's device queue, pushing once per device and recording
    /// each outcome on the pool's `ok` or `fail` sink. Returns the number of
    /// devices handled.
    pub fn subscribe(&self, task: &Task) -> usize {
        let payload = task
            .message()
            .marshal()
            .map_err(|e| ProviderError::Payload(e.to_string()));
        let mut handled = 0usize;
        let mut unrecorded = 0usize;
        while let Some(device) = task.devices().subscribe() {
            let result = match &payload {
                Ok(bytes) => self.push(bytes, &device),
                Err(e) => PushResult {
                    device,
                    response: None,
                    error: Some(e.clone()),
                },
            };
            if !self.record(task, &result) {
                unrecorded += 1;
            }
            handled += 1;
        }
        if unrecorded > 0 {
            error!(worker = %self.name(), task_id = task.id(), unrecorded, "outcomes missing from sinks");
        }
        debug!(worker = %self.name(), task_id = task.id(), handled, "worker drained task");
        handled
    }

    /// One push attempt. Never panics and never retries.
    pub fn push(&self, payload: &[u8], device: &str) -> PushResult {
        let outcome = self.runtime.block_on(self.provider.push(payload, device));
        match outcome {
            Ok(response) if response.is_success() => PushResult {
                device: device.to_string(),
                response: Some(response),
                error: None,
            },
            Ok(response) => {
                let error = ProviderError::Rejected {
                    status: response.status,
                    reason: response.reason.clone().unwrap_or_default(),
                };
                PushResult {
                    device: device.to_string(),
                    response: Some(response),
                    error: Some(error),
                }
            }
            Err(e) => PushResult {
                device: device.to_string(),
                response: None,
                error: Some(e),
            },
        }
    }

    /// Write the outcome to the pool's sink. Returns `false` when the pool is
    /// gone and the outcome could only be logged.
    fn record(&self, task: &Task, result: &PushResult) -> bool {
        let kind = if result.is_ok() {
            OutcomeKind::Ok
        } else {
            OutcomeKind::Fail
        };
        let Some(pool) = self.pool() else {
            error!(
                worker = %self.name(),
                task_id = task.id(),
                device = %result.device,
                outcome = kind.as_str(),
                error = ?result.error,
                "worker detached from pool, outcome not recorded"
            );
            return false;
        };
        let record = OutcomeRecord {
            at_ms: now_ms(),
            scope: pool.name(),
            task_id: task.id(),
            worker_id: Some(self.id()),
            device: Some(result.device.clone()),
            status: result.response.as_ref().map(|r| r.status),
            apns_id: result.response.as_ref().and_then(|r| r.apns_id.clone()),
            error: result.error.as_ref().map(ToString::to_string),
        };
        pool.sinks().record(kind, &record);
        true
    }

    /// Release the provider connection.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::WorkerDestroyed`] on a second call.
    pub fn destroy(&self) -> Result<(), DispatchError> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return Err(DispatchError::WorkerDestroyed);
        }
        self.provider.close();
        *self.status.lock() = WorkerStatus::Stopped;
        debug!(worker = %self.name(), "worker destroyed");
        Ok(())
    }

    /// Whether [`Worker::destroy`] has run.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id())
            .field("uuid", &self.uuid)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if !self.destroyed.load(Ordering::Acquire) {
            error!(uuid = %self.uuid, "worker dropped without destroy, closing provider");
            self.provider.close();
        }
    }
}
