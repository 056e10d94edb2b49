//! API-facing request/response models.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::builders::QueueBuilder;
use crate::core::{ApnsMessage, DeviceQueue, DispatchError, PoolSnapshot, TaskQueue};

/// Push job submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSubmission {
    /// Source key; the configured default when absent.
    #[serde(default)]
    pub key: Option<String>,
    /// Inline device list. Takes precedence over `key`.
    #[serde(default)]
    pub devices: Option<Vec<String>>,
    /// Payload sent to every device.
    pub message: ApnsMessage,
}

/// Accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// Tasks waiting after this one was added.
    pub depth: usize,
}

/// Queue and pool status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Tasks waiting in the ring.
    pub waiting: usize,
    /// Created pools.
    pub pools: Vec<PoolSnapshot>,
    /// Whether the dispatcher was stopped.
    pub stopped: bool,
}

impl QueueSnapshot {
    /// Capture `queue`.
    #[must_use]
    pub fn capture(queue: &TaskQueue) -> Self {
        Self {
            waiting: queue.len(),
            pools: queue.pool_snapshot(),
            stopped: queue.is_stopped(),
        }
    }
}

/// Health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag.
    pub ok: bool,
}

/// Enqueue a submission. Inline devices are loaded directly; otherwise
/// `builder` is re-keyed and loaded in the background.
///
/// # Errors
///
/// Propagates [`TaskQueue::add`] and loader failures.
pub fn submit_task(
    queue: &TaskQueue,
    builder: &QueueBuilder,
    req: TaskSubmission,
) -> Result<SubmitResponse, DispatchError> {
    let depth = match req.devices {
        Some(devices) => {
            let capacity = queue.env().pool_config().capacity;
            queue.add(Arc::new(DeviceQueue::from_devices(devices, capacity)), req.message)?
        }
        None => {
            let builder = match req.key.as_deref().filter(|k| !k.is_empty()) {
                Some(key) => QueueBuilder::new(builder.source(), key),
                None => builder.clone(),
            };
            queue.add_by_queue_builder(&builder, req.message)?
        }
    };
    Ok(SubmitResponse { depth })
}
