//! Build device queues from configured sources.

use std::fmt;
use std::sync::Arc;
use std::thread;

use tracing::{debug, warn};

use crate::config::QueueSourceConfig;
use crate::core::{DeviceQueue, DispatchError};
use crate::infra::source::{ApiSource, DeviceSource, FileSource, MysqlSource};

/// A device source plus the key to fetch.
#[derive(Clone)]
pub struct QueueBuilder {
    source: Arc<dyn DeviceSource>,
    key: String,
}

impl QueueBuilder {
    /// Builder over an explicit source.
    pub fn new(source: Arc<dyn DeviceSource>, key: impl Into<String>) -> Self {
        Self {
            source,
            key: key.into(),
        }
    }

    /// Builder for the configured `queue.method`. `key` falls back to the
    /// method's default key when `None` or empty.
    #[must_use]
    pub fn from_config(cfg: &QueueSourceConfig, key: Option<&str>) -> Self {
        let key = key
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| cfg.default_key())
            .to_string();
        let source: Arc<dyn DeviceSource> = match cfg {
            QueueSourceConfig::Api { uri, .. } => Arc::new(ApiSource::new(uri.clone())),
            QueueSourceConfig::Mysql { dsn, sql } => Arc::new(MysqlSource::new(dsn.clone(), sql.clone())),
            QueueSourceConfig::File { path, .. } => Arc::new(FileSource::new(path.clone())),
        };
        Self { source, key }
    }

    /// Swap the source, keeping the key.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn DeviceSource>) -> Self {
        self.source = source;
        self
    }

    /// Shared source.
    #[must_use]
    pub fn source(&self) -> Arc<dyn DeviceSource> {
        Arc::clone(&self.source)
    }

    /// Key passed to the source.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Fetch and load on the calling thread. The queue is `Pending` on success
    /// and `Closed` with the failure recorded otherwise.
    #[must_use]
    pub fn to_device_queue(&self, capacity: usize) -> Arc<DeviceQueue> {
        let queue = Arc::new(DeviceQueue::new(capacity));
        load(self.source.as_ref(), &self.key, &queue);
        queue
    }

    /// Return an empty queue at once and load it on a background thread.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Backend`] if the loader thread cannot be spawned.
    pub fn async_to_device_queue(&self, capacity: usize) -> Result<Arc<DeviceQueue>, DispatchError> {
        let queue = Arc::new(DeviceQueue::new(capacity));
        let (source, key, target) = (Arc::clone(&self.source), self.key.clone(), Arc::clone(&queue));
        thread::Builder::new()
            .name(format!("{}-loader", source.name()))
            .spawn(move || load(source.as_ref(), &key, &target))
            .map_err(|e| DispatchError::Backend(format!("loader thread: {e}")))?;
        Ok(queue)
    }
}

fn load(source: &dyn DeviceSource, key: &str, queue: &DeviceQueue) {
    queue.begin_loading();
    match source.fetch(key) {
        Ok(devices) => {
            debug!(source = source.name(), key, devices = devices.len(), "device queue loaded");
            queue.load(devices);
        }
        Err(e) => {
            warn!(source = source.name(), key, error = %e, "device source failed");
            queue.fail(e.to_string());
        }
    }
}

impl fmt::Debug for QueueBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueBuilder")
            .field("source", &self.source.name())
            .field("key", &self.key)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DeviceQueueStatus;
    use crate::infra::source::MemorySource;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn test_key_defaults_from_config() {
        let cfg = QueueSourceConfig::File {
            path: PathBuf::from("/var/lib/push"),
            default: "all.txt".into(),
        };
        assert_eq!(QueueBuilder::from_config(&cfg, None).key(), "all.txt");
        assert_eq!(QueueBuilder::from_config(&cfg, Some("")).key(), "all.txt");
        assert_eq!(QueueBuilder::from_config(&cfg, Some("vip.txt")).key(), "vip.txt");
    }

    #[test]
    fn test_async_load_reaches_pending() {
        let source = Arc::new(MemorySource::new(vec!["a".into(), "b".into()]));
        let queue = QueueBuilder::new(source, "").async_to_device_queue(8).unwrap();
        assert_eq!(queue.wait_ready(Duration::from_secs(5)), DeviceQueueStatus::Pending);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_mysql_source_from_config() {
        let cfg = QueueSourceConfig::Mysql {
            dsn: "mysql://push:pw@db:3306/push".into(),
            sql: "SELECT token FROM devices".into(),
        };
        let builder = QueueBuilder::from_config(&cfg, None);
        assert_eq!(builder.source().name(), "mysql");
        assert_eq!(builder.key(), "SELECT token FROM devices");

        let injected = builder.with_source(Arc::new(MemorySource::new(vec!["x".into()])));
        assert_eq!(injected.source().name(), "memory");
        assert_eq!(injected.to_device_queue(4).status(), DeviceQueueStatus::Pending);
    }
}
