//! Device list sources.
//!
//! A [`DeviceSource`] turns a key (a file name, an API path segment, a query)
//! into the list of device tokens a task should reach. Sources are blocking;
//! [`crate::builders::QueueBuilder`] runs them on a loader thread.

pub mod api;
pub mod file;
pub mod memory;
pub mod mysql;

pub use api::ApiSource;
pub use file::FileSource;
pub use memory::MemorySource;
pub use mysql::MysqlSource;

use crate::core::DispatchError;

/// Fetches the device tokens for a key.
pub trait DeviceSource: Send + Sync + 'static {
    /// Device tokens for `key`. An empty key selects the source's default.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::SourceUnavailable`] when the list cannot be read.
    fn fetch(&self, key: &str) -> Result<Vec<String>, DispatchError>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}
