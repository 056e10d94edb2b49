//! Tests for builder modules

use push_dispatch::builders::QueueBuilder;
use push_dispatch::config::QueueSourceConfig;
use push_dispatch::core::DeviceQueueStatus;
use push_dispatch::infra::{DeviceSource, MemorySource};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_file_builder_loads_in_background() {
    let dir = std::env::temp_dir().join(format!("push-dispatch-builder-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("all.txt"), "t1\nt2\nt3\n").unwrap();

    let cfg = QueueSourceConfig::File {
        path: dir.clone(),
        default: "all.txt".into(),
    };
    let queue = QueueBuilder::from_config(&cfg, None)
        .async_to_device_queue(16)
        .unwrap();
    assert_eq!(queue.wait_ready(Duration::from_secs(5)), DeviceQueueStatus::Pending);
    assert_eq!(queue.len(), 3);
    assert_eq!(queue.capacity(), 16);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_failed_source_closes_queue() {
    let cfg = QueueSourceConfig::File {
        path: PathBuf::from("/nonexistent/push-dispatch"),
        default: String::new(),
    };
    let queue = QueueBuilder::from_config(&cfg, Some("missing.txt"))
        .async_to_device_queue(4)
        .unwrap();
    assert_eq!(queue.wait_ready(Duration::from_secs(5)), DeviceQueueStatus::Closed);
    assert!(queue.failure().unwrap().contains("missing.txt"));
}

#[test]
fn test_injected_source_replaces_configured() {
    let cfg = QueueSourceConfig::Api {
        uri: "http://127.0.0.1:9/".into(),
        default: "segment".into(),
    };
    let memory = Arc::new(MemorySource::default());
    memory.insert("segment", vec!["a".into(), "b".into()]);
    assert_eq!(memory.name(), "memory");

    let queue = QueueBuilder::from_config(&cfg, None)
        .with_source(memory)
        .to_device_queue(4);
    assert_eq!(queue.status(), DeviceQueueStatus::Pending);
    assert_eq!(queue.len(), 2);
}
