//! Tests for configuration validation

use push_dispatch::config::{DispatcherConfig, PoolConfig, QueueMethod, QueueSourceConfig, ServiceConfig};
use push_dispatch::core::DispatchError;
use std::time::Duration;

#[test]
fn test_pool_config_defaults_are_valid() {
    let cfg = PoolConfig::default();
    assert_eq!((cfg.size, cfg.capacity, cfg.mini_spare, cfg.max_spare), (5, 500, 2, 50));
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_pool_config_rejects_zero() {
    assert!(matches!(
        PoolConfig::new(0, 10, 1, 2),
        Err(DispatchError::InvalidConfig(_))
    ));
}

#[test]
fn test_pool_config_capacity_must_be_greatest() {
    assert!(PoolConfig::new(2, 10, 1, 10).is_err());
    assert!(PoolConfig::new(11, 10, 1, 2).is_err());
    assert!(PoolConfig::new(1, 10, 2, 5).is_err());
    assert!(PoolConfig::new(2, 10, 3, 2).is_err());
    assert!(PoolConfig::new(2, 10, 1, 9).is_ok());
}

#[test]
fn test_sizing_ladder() {
    let template = PoolConfig::default();
    let cases = [
        (0, 2),
        (10, 2),
        (11, 4),
        (100, 4),
        (101, 10),
        (1_000, 10),
        (1_001, 100),
        (10_000, 100),
        (10_001, 500),
    ];
    for (len, size) in cases {
        assert_eq!(template.sized_for(len).size, size, "queue length {len}");
    }
    assert_eq!(template, PoolConfig::default());
}

#[test]
fn test_sizing_clamped_to_capacity() {
    let cfg = PoolConfig::new(2, 60, 2, 10).unwrap();
    assert_eq!(cfg.sized_for(5_000).size, 60);
}

#[test]
fn test_sizing_is_idempotent() {
    let mut cfg = PoolConfig::default();
    cfg.set_size_by_queue_length(250);
    let once = cfg;
    cfg.set_size_by_queue_length(250);
    assert_eq!(cfg, once);
}

#[test]
fn test_dispatcher_backoff() {
    let cfg = DispatcherConfig::with_idle_backoff(Duration::from_millis(25));
    assert_eq!(cfg.idle_backoff(), Duration::from_millis(25));
    assert_eq!(DispatcherConfig::default().idle_backoff(), Duration::from_secs(1));
}

#[test]
fn test_service_config_from_env_file() {
    let path = std::env::temp_dir().join(format!("push-dispatch-{}.env", uuid::Uuid::new_v4()));
    std::fs::write(
        &path,
        "service=push\n\
         cert.env=production\n\
         cert.path=/etc/push/cert.p12\n\
         cert.password=secret\n\
         cert.topic=com.example.app\n\
         queue.method=api\n\
         queue.api.uri=http://127.0.0.1:8080/devices/\n\
         pool.size=3\n\
         pool.minispare=3\n",
    )
    .unwrap();

    let cfg = ServiceConfig::from_env_file(&path).unwrap();
    assert_eq!(cfg.queue.method(), QueueMethod::Api);
    assert!(matches!(cfg.queue, QueueSourceConfig::Api { ref uri, .. } if uri.ends_with("/devices/")));
    assert_eq!(cfg.pool.size, 3);
    assert_eq!(cfg.pool.mini_spare, 3);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_service_config_missing_file() {
    let err = ServiceConfig::from_env_file("/nonexistent/push.env").unwrap_err();
    assert!(err.to_string().contains("/nonexistent/push.env"));
}
