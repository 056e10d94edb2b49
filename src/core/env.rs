//! Dispatch context shared by the task queue and its pools.

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use super::error::DispatchError;
use super::outcome::{OutcomeKind, OutcomeSink, OutcomeTarget, PoolSinks};
use super::worker::{ProviderFactory, Worker};
use crate::config::{DispatcherConfig, PoolConfig, ServiceConfig};

/// Default bound for in-memory outcome sinks.
pub const DEFAULT_MEMORY_OUTCOMES: usize = 10_000;

/// Everything pools need from their surroundings: the worker factory, the pool
/// template, dispatcher pacing and where outcomes are written.
pub struct Env {
    uuid: Uuid,
    service: String,
    pool_config: PoolConfig,
    dispatcher: DispatcherConfig,
    providers: Arc<dyn ProviderFactory>,
    outcomes: OutcomeTarget,
}

impl Env {
    /// Context with default pacing and in-memory outcome sinks.
    pub fn new(
        service: impl Into<String>,
        pool_config: PoolConfig,
        providers: impl ProviderFactory,
    ) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            service: service.into(),
            pool_config,
            dispatcher: DispatcherConfig::default(),
            providers: Arc::new(providers),
            outcomes: OutcomeTarget::memory(DEFAULT_MEMORY_OUTCOMES),
        }
    }

    /// Context from a loaded service configuration.
    pub fn from_config(cfg: &ServiceConfig, providers: impl ProviderFactory) -> Self {
        let outcomes = cfg.log_path.as_ref().map_or_else(
            || OutcomeTarget::memory(DEFAULT_MEMORY_OUTCOMES),
            |dir| OutcomeTarget::Directory(dir.clone()),
        );
        Self::new(cfg.service.clone(), cfg.pool, providers)
            .with_dispatcher(cfg.dispatcher)
            .with_outcomes(outcomes)
    }

    /// Override dispatcher pacing.
    #[must_use]
    pub const fn with_dispatcher(mut self, dispatcher: DispatcherConfig) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Override the outcome target.
    #[must_use]
    pub fn with_outcomes(mut self, outcomes: OutcomeTarget) -> Self {
        self.outcomes = outcomes;
        self
    }

    /// Identity of this process instance.
    #[must_use]
    pub const fn uuid(&self) -> &Uuid {
        &self.uuid
    }

    /// Service name.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Process-wide pool template. Callers receive a copy.
    #[must_use]
    pub const fn pool_config(&self) -> PoolConfig {
        self.pool_config
    }

    /// Dispatcher pacing.
    #[must_use]
    pub const fn dispatcher(&self) -> DispatcherConfig {
        self.dispatcher
    }

    /// Outcome target.
    #[must_use]
    pub const fn outcomes(&self) -> &OutcomeTarget {
        &self.outcomes
    }

    /// Build a worker around a fresh provider.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::WorkerCreate`] when the provider or runtime
    /// cannot be built.
    pub fn create_worker(&self) -> Result<Worker, DispatchError> {
        let provider = self
            .providers
            .create()
            .map_err(|e| DispatchError::WorkerCreate(e.to_string()))?;
        Worker::new(provider)
    }

    /// Release a worker. Safe to call more than once.
    ///
    /// # Errors
    ///
    /// Currently infallible; kept fallible for providers with teardown I/O.
    pub fn destroy_worker(&self, worker: &Worker) -> Result<(), DispatchError> {
        match worker.destroy() {
            Ok(()) | Err(DispatchError::WorkerDestroyed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// `ok` and `fail` sinks for a pool.
    ///
    /// # Errors
    ///
    /// Propagates sink creation failures.
    pub fn pool_sinks(&self, pool_id: usize) -> Result<PoolSinks, DispatchError> {
        self.outcomes.open_pair(&format!("pool-{pool_id}"))
    }

    /// `fail` sink for task-level failures seen by the dispatcher.
    ///
    /// # Errors
    ///
    /// Propagates sink creation failures.
    pub fn dispatcher_fail_sink(&self) -> Result<Arc<dyn OutcomeSink>, DispatchError> {
        self.outcomes.open("dispatcher", OutcomeKind::Fail)
    }
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Env")
            .field("uuid", &self.uuid)
            .field("service", &self.service)
            .field("pool_config", &self.pool_config)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}
