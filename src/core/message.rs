//! Push payloads and the immutable task descriptor.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::device_queue::DeviceQueue;
use super::error::DispatchError;

/// Identifier assigned to a task by the task queue.
pub type TaskId = u64;

/// Anything that can be serialized into a provider payload.
///
/// The same bytes are written to the log when a task starts and sent to the
/// provider for every device.
pub trait Message: Send + Sync + 'static {
    /// Canonical JSON bytes of the payload.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Serialization`] when the payload cannot be encoded.
    fn marshal(&self) -> Result<Vec<u8>, DispatchError>;
}

/// Blanket implementation: any serializable type is a message.
impl<T> Message for T
where
    T: Serialize + Send + Sync + 'static,
{
    fn marshal(&self) -> Result<Vec<u8>, DispatchError> {
        serde_json::to_vec(self).map_err(|e| DispatchError::Serialization(e.to_string()))
    }
}

/// Alert text: a plain string or a localized dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Alert {
    /// Body text only.
    Text(String),
    /// Title, subtitle and body.
    Rich {
        /// Title line.
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        /// Subtitle line.
        #[serde(skip_serializing_if = "Option::is_none")]
        subtitle: Option<String>,
        /// Body text.
        body: String,
    },
}

/// The `aps` dictionary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aps {
    /// Alert shown to the user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<Alert>,
    /// App icon badge.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge: Option<u32>,
    /// Sound name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
    /// Background update flag.
    #[serde(rename = "content-available", skip_serializing_if = "Option::is_none")]
    pub content_available: Option<u8>,
    /// Notification service extension flag.
    #[serde(rename = "mutable-content", skip_serializing_if = "Option::is_none")]
    pub mutable_content: Option<u8>,
    /// Action category.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Grouping identifier.
    #[serde(rename = "thread-id", skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

/// APNs notification payload: `aps` plus custom top-level keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApnsMessage {
    /// Apple-defined keys.
    pub aps: Aps,
    /// App-defined keys, serialized beside `aps`.
    #[serde(flatten)]
    pub custom: Map<String, Value>,
}

impl ApnsMessage {
    /// Alert-only message.
    pub fn alert(body: impl Into<String>) -> Self {
        Self {
            aps: Aps {
                alert: Some(Alert::Text(body.into())),
                ..Aps::default()
            },
            custom: Map::new(),
        }
    }

    /// Set the badge.
    #[must_use]
    pub const fn with_badge(mut self, badge: u32) -> Self {
        self.aps.badge = Some(badge);
        self
    }

    /// Set the sound.
    #[must_use]
    pub fn with_sound(mut self, sound: impl Into<String>) -> Self {
        self.aps.sound = Some(sound.into());
        self
    }

    /// Add a custom key.
    #[must_use]
    pub fn with_custom(mut self, key: impl Into<String>, value: Value) -> Self {
        self.custom.insert(key.into(), value);
        self
    }
}

/// A device queue paired with the message every device receives.
///
/// Cloning is cheap; the queue and the message are shared.
#[derive(Clone)]
pub struct Task {
    id: TaskId,
    devices: Arc<DeviceQueue>,
    message: Arc<dyn Message>,
}

impl Task {
    pub(crate) fn new(id: TaskId, devices: Arc<DeviceQueue>, message: Arc<dyn Message>) -> Self {
        Self {
            id,
            devices,
            message,
        }
    }

    /// Task identifier.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Device queue this task drains.
    #[must_use]
    pub fn devices(&self) -> &Arc<DeviceQueue> {
        &self.devices
    }

    /// Message sent to every device.
    #[must_use]
    pub fn message(&self) -> &dyn Message {
        self.message.as_ref()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("status", &self.devices.status())
            .field("remaining", &self.devices.len())
            .finish_non_exhaustive()
    }
}
