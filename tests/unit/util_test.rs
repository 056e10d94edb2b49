//! Tests for utility functions

use push_dispatch::util::{init_tracing, now_ms, DEFAULT_LOG_FILTER};

#[test]
fn test_now_ms_advances() {
    let a = now_ms();
    std::thread::sleep(std::time::Duration::from_millis(2));
    assert!(now_ms() > a);
}

#[test]
fn test_init_tracing_is_repeatable() {
    init_tracing();
    init_tracing();
    assert!(DEFAULT_LOG_FILTER.starts_with("push_dispatch"));
}
