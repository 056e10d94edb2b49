//! Configuration models for pools, the dispatcher, and the service.

pub mod pool;
pub mod service;

pub use pool::{DispatcherConfig, PoolConfig};
pub use service::{CertConfig, CertEnv, QueueMethod, QueueSourceConfig, ServiceConfig};
