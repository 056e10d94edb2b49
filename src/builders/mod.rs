//! Builders that turn configuration into runtime components.

pub mod queue_builder;

pub use queue_builder::QueueBuilder;
