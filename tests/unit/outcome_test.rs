//! Tests for outcome sinks

use push_dispatch::core::{OutcomeKind, OutcomeRecord, OutcomeTarget};

#[test]
fn test_directory_target_writes_per_scope_files() {
    let dir = std::env::temp_dir().join(format!("push-dispatch-target-{}", uuid::Uuid::new_v4()));
    let target = OutcomeTarget::Directory(dir.clone());

    let sinks = target.open_pair("pool-2").unwrap();
    sinks.record(OutcomeKind::Fail, &OutcomeRecord::task_failure("pool-2", 7, "rejected"));
    sinks.flush();

    let names: Vec<String> = std::fs::read_dir(&dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names.iter().any(|n| n.starts_with("pool-2_ok_")));
    let fail = names.iter().find(|n| n.starts_with("pool-2_fail_")).unwrap();
    let content = std::fs::read_to_string(dir.join(fail)).unwrap();
    let record: OutcomeRecord = serde_json::from_str(content.trim()).unwrap();
    assert_eq!(record.task_id, 7);
    assert_eq!(record.error.as_deref(), Some("rejected"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_kind_names() {
    assert_eq!(OutcomeKind::Ok.as_str(), "ok");
    assert_eq!(OutcomeKind::Fail.as_str(), "fail");
}
