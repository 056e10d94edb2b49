//! Tests for the service wiring

use async_trait::async_trait;
use push_dispatch::config::ServiceConfig;
use push_dispatch::core::{ApnsMessage, OutcomeTarget, ProviderError, PushProvider, PushResponse};
use push_dispatch::infra::MemorySource;
use push_dispatch::runtime::{Server, TaskSubmission};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Accept;

#[async_trait]
impl PushProvider for Accept {
    async fn push(&self, _payload: &[u8], _device: &str) -> Result<PushResponse, ProviderError> {
        Ok(PushResponse::accepted(None))
    }
}

fn factory() -> Result<Box<dyn PushProvider>, ProviderError> {
    Ok(Box::new(Accept))
}

fn config() -> ServiceConfig {
    ServiceConfig::from_json_str(
        r#"{
            "service": "push",
            "cert": {"env": "sandbox", "path": "/c.p12", "password": "pw", "topic": "com.example"},
            "queue": {"method": "mysql", "mysql": {"dsn": "mysql://push:pw@db/push", "sql": "SELECT token FROM devices"}},
            "pool": {"size": 2, "capacity": 20, "minispare": 1, "maxspare": 4},
            "dispatcher": {"idle_backoff_ms": 10}
        }"#,
    )
    .unwrap()
}

fn delivered(server: &Server) -> usize {
    match server.queue().env().outcomes() {
        OutcomeTarget::Memory { ok, .. } => ok.len(),
        OutcomeTarget::Directory(_) => 0,
    }
}

fn wait_for(server: &Server, n: usize) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if delivered(server) >= n {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn test_server_submits_inline_and_sourced() {
    let source = Arc::new(MemorySource::new(vec!["s1".into(), "s2".into(), "s3".into()]));
    let server = Server::new(config(), factory).unwrap().with_source(source);
    server.start().unwrap();
    assert!(server.health().ok);

    let inline = TaskSubmission {
        key: None,
        devices: Some(vec!["a".into(), "b".into()]),
        message: ApnsMessage::alert("inline"),
    };
    assert_eq!(server.submit(inline).unwrap().depth, 1);
    assert!(wait_for(&server, 2));

    let sourced: TaskSubmission =
        serde_json::from_str(r#"{"message": {"aps": {"alert": "sourced"}}}"#).unwrap();
    server.submit(sourced).unwrap();
    assert!(wait_for(&server, 5));

    let snapshot = server.snapshot();
    assert!(!snapshot.pools.is_empty());
    server.stop();
    assert!(!server.health().ok);
    assert!(server.snapshot().stopped);
}

#[test]
fn test_server_rejects_invalid_config() {
    let mut cfg = config();
    cfg.pool.size = 0;
    assert!(Server::new(cfg, factory).is_err());
}
