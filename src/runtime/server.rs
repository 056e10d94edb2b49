//! Process wiring: configuration, dispatch context, task queue and source.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use super::api::{submit_task, Health, QueueSnapshot, SubmitResponse, TaskSubmission};
use crate::builders::QueueBuilder;
use crate::config::ServiceConfig;
use crate::core::{AppResult, DispatchError, Env, ProviderFactory, TaskQueue};
use crate::infra::source::DeviceSource;

/// A configured dispatch service.
///
/// Signal handling and single-instance locking belong to the host process;
/// it calls [`Server::start`] and [`Server::stop`] around its own lifecycle.
#[derive(Debug)]
pub struct Server {
    config: ServiceConfig,
    queue: Arc<TaskQueue>,
    builder: QueueBuilder,
}

impl Server {
    /// Wire a server from validated configuration.
    ///
    /// # Errors
    ///
    /// Fails when the configuration does not validate or the outcome sinks
    /// cannot be opened.
    pub fn new(config: ServiceConfig, providers: impl ProviderFactory) -> AppResult<Self> {
        config
            .pool
            .validate()
            .map_err(DispatchError::InvalidConfig)
            .context("pool configuration")?;
        let env = Arc::new(Env::from_config(&config, providers));
        let queue = TaskQueue::new(Arc::clone(&env)).context("creating task queue")?;
        let builder = QueueBuilder::from_config(&config.queue, None);
        info!(
            service = %config.service,
            env = %env.uuid(),
            method = ?config.queue.method(),
            pool_size = config.pool.size,
            pool_capacity = config.pool.capacity,
            "server configured"
        );
        Ok(Self {
            config,
            queue: Arc::new(queue),
            builder,
        })
    }

    /// [`Server::new`] from a dotenv-style config file.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or does not validate.
    pub fn from_env_file(path: impl AsRef<Path>, providers: impl ProviderFactory) -> AppResult<Self> {
        let config = ServiceConfig::from_env_file(path)?;
        Self::new(config, providers)
    }

    /// Replace the configured device source, e.g. with a fixture or a cache.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn DeviceSource>) -> Self {
        self.builder = self.builder.with_source(source);
        self
    }

    /// Start dispatching.
    ///
    /// # Errors
    ///
    /// Fails if the dispatcher thread cannot be started.
    pub fn start(&self) -> AppResult<()> {
        self.queue.start().context("starting dispatcher")?;
        Ok(())
    }

    /// Stop dispatching and shut every pool down.
    pub fn stop(&self) {
        self.queue.stop();
    }

    /// Enqueue a push job.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::QueueFull`] under back-pressure.
    pub fn submit(&self, req: TaskSubmission) -> Result<SubmitResponse, DispatchError> {
        submit_task(&self.queue, &self.builder, req)
    }

    /// Queue and pool status.
    #[must_use]
    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot::capture(&self.queue)
    }

    /// Healthy until stopped.
    #[must_use]
    pub fn health(&self) -> Health {
        Health {
            ok: !self.queue.is_stopped(),
        }
    }

    /// Loaded configuration.
    #[must_use]
    pub const fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Underlying task queue.
    #[must_use]
    pub const fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }
}
