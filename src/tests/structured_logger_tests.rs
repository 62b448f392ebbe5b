use super::*;
use crate::session::RequestStatus;
use tempfile::TempDir;

fn create_test_logger() -> (StructuredLogger, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let logger =
        StructuredLogger::new("test-session", temp_dir.path()).expect("Failed to create logger");
    (logger, temp_dir)
}

fn read_entries(temp_dir: &TempDir) -> Vec<LogEntry> {
    let content = std::fs::read_to_string(temp_dir.path().join("events.jsonl"))
        .expect("Failed to read log file");
    content
        .lines()
        .map(|line| serde_json::from_str(line).expect("Failed to parse log entry"))
        .collect()
}

#[test]
fn test_log_entries_are_valid_json() {
    let (logger, temp_dir) = create_test_logger();

    logger.log("TestComponent", serde_json::json!({"key": "value1"}));
    logger.log("TestComponent", serde_json::json!({"key": "value2"}));

    let entries = read_entries(&temp_dir);
    assert_eq!(entries.len(), 2);
    for entry in &entries {
        assert_eq!(entry.session_id, "test-session");
        assert_eq!(entry.component, "TestComponent");
        assert!(entry.ts.ends_with('Z'));
    }
    assert_eq!(entries[1].event["key"], "value2");
}

#[test]
fn test_sequence_numbers_monotonic() {
    let (logger, temp_dir) = create_test_logger();

    for i in 0..10 {
        logger.log("Test", serde_json::json!({"iteration": i}));
    }

    let mut prev_seq = 0u64;
    for entry in read_entries(&temp_dir) {
        assert!(
            entry.seq > prev_seq,
            "Sequence numbers should be monotonically increasing"
        );
        prev_seq = entry.seq;
    }
    assert_eq!(prev_seq, 10);
}

#[test]
fn test_log_status_and_violation() {
    let (logger, temp_dir) = create_test_logger();

    logger.log_status(&StatusEvent {
        generation: 3,
        identity: "doc:A".to_string(),
        status: RequestStatus::Opening,
    });
    logger.log_protocol_violation(
        &SurfaceId::Primary,
        &ProtocolViolation::UnknownCommand {
            command: "explode".to_string(),
        },
    );

    let entries = read_entries(&temp_dir);
    assert_eq!(entries[0].component, "Status");
    assert_eq!(entries[0].event["status"]["generation"], 3);
    assert_eq!(entries[0].event["status"]["status"], "opening");

    assert_eq!(entries[1].component, "Protocol");
    assert_eq!(entries[1].event["from"], "primary");
    assert!(entries[1].event["violation"]
        .as_str()
        .unwrap()
        .contains("explode"));
}

#[test]
fn test_disabled_logger_writes_nothing() {
    let logger = StructuredLogger::disabled();
    logger.log("Test", serde_json::json!({"msg": "dropped"}));
    assert!(logger.path().is_none());
    assert_eq!(logger.session_id(), "");
}

#[test]
fn test_logger_appends_across_instances() {
    let temp_dir = TempDir::new().unwrap();
    {
        let logger = StructuredLogger::new("first", temp_dir.path()).unwrap();
        logger.log("Test", serde_json::json!({"n": 1}));
    }
    {
        let logger = StructuredLogger::new("second", temp_dir.path()).unwrap();
        assert_eq!(
            logger.path(),
            Some(&temp_dir.path().join("events.jsonl"))
        );
        logger.log("Test", serde_json::json!({"n": 2}));
    }

    let entries = read_entries(&temp_dir);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].session_id, "first");
    assert_eq!(entries[1].session_id, "second");
}
