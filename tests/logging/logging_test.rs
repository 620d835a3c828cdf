//! Tests for `src/logging.rs`.

use wa_relay::logging::LoggingGuard;

#[test]
fn logging_guard_is_send() {
    fn assert_send<T: Send>() {}
    assert_send::<LoggingGuard>();
}

#[test]
fn init_production_creates_logs_dir_once() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let logs_dir = tmp.path().join("logs");
    assert!(!logs_dir.exists());

    let first = wa_relay::logging::init_production(&logs_dir, "info");
    assert!(first.is_ok());
    assert!(logs_dir.exists(), "logs directory should be created");

    // The global subscriber can only be installed once per process.
    let second = wa_relay::logging::init_production(&logs_dir, "info");
    assert!(second.is_err());

    // CLI init after production init is a no-op, not a panic.
    wa_relay::logging::init_cli("debug");
}
