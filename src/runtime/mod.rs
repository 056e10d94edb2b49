//! Service wiring and the API surface.

pub mod api;
pub mod server;

pub use api::{submit_task, Health, QueueSnapshot, SubmitResponse, TaskSubmission};
pub use server::Server;
