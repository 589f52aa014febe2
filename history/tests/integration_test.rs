/// ChatHistoryLogger の統合テスト
///
/// 実際のファイルに書き込み、JSON Lines として読み戻せることを検証する。
use history::{ChatHistoryLogger, HistoryError, Metadata, Role};
use serde_json::Value;
use std::fs;

fn session_metadata(session: &str) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("session_id".to_string(), Value::from(session));
    metadata
}

#[test]
fn test_exchange_writes_two_ordered_lines() {
    let tmp = tempfile::tempdir().unwrap();
    let logger = ChatHistoryLogger::new(tmp.path(), "session-1");
    let metadata = session_metadata("session-1");

    logger
        .log_exchange("Hello", "Hi there!", Some(&metadata))
        .unwrap();

    let raw = fs::read_to_string(logger.log_path()).unwrap();
    let lines: Vec<Value> = raw
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["role"], "user");
    assert_eq!(lines[0]["content"], "Hello");
    assert_eq!(lines[0]["metadata"]["session_id"], "session-1");
    assert_eq!(lines[1]["role"], "agent");
    assert_eq!(lines[1]["content"], "Hi there!");

    let history = logger.read_history().unwrap();
    assert!(history[0].timestamp <= history[1].timestamp);
}

#[test]
fn test_unicode_content_round_trips() {
    let tmp = tempfile::tempdir().unwrap();
    let logger = ChatHistoryLogger::new(tmp.path(), "unicode");
    let samples = [
        "日本語のテキスト",
        "emoji 🦀🚀 and combining e\u{301}",
        "quotes \" and backslash \\ and newline\nin content",
        "control \u{0007} and nul \u{0000}",
        "",
        "مرحبا بالعالم",
    ];

    for sample in samples {
        logger.log_message(Role::User, sample, None).unwrap();
    }

    let raw = fs::read_to_string(logger.log_path()).unwrap();
    assert!(raw.contains("日本語のテキスト"), "non-ASCII text should not be escaped");

    let contents: Vec<String> = logger
        .read_history()
        .unwrap()
        .into_iter()
        .map(|e| e.content)
        .collect();
    assert_eq!(contents, samples);
}

#[test]
fn test_history_preserves_write_order() {
    let tmp = tempfile::tempdir().unwrap();
    let logger = ChatHistoryLogger::new(tmp.path(), "order");

    for i in 0..5 {
        logger
            .log_exchange(&format!("question {}", i), &format!("answer {}", i), None)
            .unwrap();
    }

    let history = logger.read_history().unwrap();
    assert_eq!(history.len(), 10);
    for (i, pair) in history.chunks(2).enumerate() {
        assert_eq!(pair[0].role, Role::User);
        assert_eq!(pair[0].content, format!("question {}", i));
        assert_eq!(pair[1].role, Role::Agent);
        assert_eq!(pair[1].content, format!("answer {}", i));
    }
    assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

#[test]
fn test_sessions_never_share_a_file() {
    let tmp = tempfile::tempdir().unwrap();
    let first = ChatHistoryLogger::new(tmp.path(), "session-a");
    first.log_exchange("Hello", "Hi", None).unwrap();
    let before = fs::read_to_string(first.log_path()).unwrap();

    let second = ChatHistoryLogger::new(tmp.path(), "session-b");
    assert_ne!(first.log_path(), second.log_path());
    assert!(second.read_history().unwrap().is_empty());

    second.log_exchange("Another", "Reply", None).unwrap();

    assert_eq!(fs::read_to_string(first.log_path()).unwrap(), before);
    assert_eq!(first.read_history().unwrap().len(), 2);
    assert_eq!(second.read_history().unwrap().len(), 2);
}

#[test]
fn test_unwritable_directory_is_io_error() {
    let tmp = tempfile::tempdir().unwrap();
    // ディレクトリの代わりに通常ファイルを置いておく
    let blocker = tmp.path().join("logs");
    fs::write(&blocker, "not a directory").unwrap();
    let logger = ChatHistoryLogger::new(&blocker, "session");

    let result = logger.log_exchange("Hello", "Hi", None);

    assert!(matches!(result, Err(HistoryError::Io { .. })));
}
