//! Infrastructure adapters for device list backends.

pub mod source;

pub use source::{ApiSource, DeviceSource, FileSource, MemorySource, MysqlSource};
