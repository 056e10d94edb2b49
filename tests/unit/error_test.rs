//! Tests for error types

use push_dispatch::core::DispatchError;

#[test]
fn test_queue_full_error() {
    let err = DispatchError::QueueFull { limit: 100 };
    assert_eq!(format!("{}", err), "task queue is full, limit: 100");
}

#[test]
fn test_empty_error() {
    assert_eq!(DispatchError::Empty.to_string(), "task queue is empty");
}

#[test]
fn test_source_unavailable_error() {
    let err = DispatchError::SourceUnavailable("connection refused".to_string());
    assert_eq!(format!("{}", err), "device source unavailable: connection refused");
}

#[test]
fn test_invalid_config_error() {
    let err = DispatchError::InvalidConfig("config of service is empty".to_string());
    assert_eq!(format!("{}", err), "invalid configuration: config of service is empty");
}

#[test]
fn test_backend_error() {
    let err = DispatchError::Backend("connection failed".to_string());
    assert_eq!(format!("{}", err), "backend error: connection failed");
}

#[test]
fn test_error_into_anyhow() {
    let err: anyhow::Error = DispatchError::PoolBusy.into();
    assert_eq!(err.to_string(), "pool is busy");
    assert_eq!(err.downcast_ref::<DispatchError>(), Some(&DispatchError::PoolBusy));
}
