//! # Push Dispatch
//!
//! A push-notification dispatch engine: producers submit push jobs (a device
//! list plus a message), a dispatcher routes each job to a capped set of
//! worker pools, and every pool fans the device list out to its workers,
//! which push to the APNs gateway through a pluggable provider.
//!
//! ## Core Problem Solved
//!
//! Pushing one message to a large device list is I/O bound and bursty:
//!
//! - **Bounded intake**: a fixed ring of waiting jobs refuses new work instead
//!   of growing without limit
//! - **Capped concurrency**: at most [`core::TASK_QUEUE_MAX_POOL`] pools run at
//!   once, each sized from the number of devices its job targets
//! - **Back-pressure inside a job**: device tokens stream through a bounded
//!   channel, so loading never outruns pushing
//!
//! ## Flow
//!
//! ```text
//! add(devices, message) -> ring -> dispatcher -> spare pool (sized) -> send
//!                                                   |
//!                        publisher --tokens--> DeviceQueue --> N workers --> PushProvider
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use push_dispatch::config::PoolConfig;
//! use push_dispatch::core::{ApnsMessage, DeviceQueue, Env, PushProvider, ProviderError, TaskQueue};
//!
//! let factory = || -> Result<Box<dyn PushProvider>, ProviderError> { Ok(Box::new(MyApnsClient::connect()?)) };
//! let env = Arc::new(Env::new("push", PoolConfig::default(), factory));
//! let queue = Arc::new(TaskQueue::new(env)?);
//! queue.start()?;
//!
//! let devices = Arc::new(DeviceQueue::from_devices(tokens, 500));
//! queue.add(devices, ApnsMessage::alert("Your order has shipped").with_badge(1))?;
//! // ...
//! queue.stop();
//! ```
//!
//! For a configured service with device sources see [`runtime::Server`].

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Device queues, workers, pools and the task ring.
pub mod core;
/// Configuration models for pools, the dispatcher and the service.
pub mod config;
/// Builders that turn configuration into runtime components.
pub mod builders;
/// Device list backends.
pub mod infra;
/// Service wiring and API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
