use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::exchange::{Exchange, Metadata, Role};

/// ログファイル名の接頭辞
const LOG_FILE_PREFIX: &str = "chat_history";
const LOG_FILE_EXTENSION: &str = "log";

/// 履歴ロガーのエラー型
#[derive(thiserror::Error, Debug)]
pub enum HistoryError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize chat history entry: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Malformed chat history entry at {}:{line}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

impl HistoryError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        HistoryError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// セッション単位のチャット履歴ロガー
///
/// ファイルは最初の書き込み時に作成され、以降は追記のみ行う。
/// 書き込みのたびに開いて閉じるため、ファイルハンドルを保持しない。
#[derive(Debug, Clone)]
pub struct ChatHistoryLogger {
    log_dir: PathBuf,
    log_file: PathBuf,
    session_token: String,
}

impl ChatHistoryLogger {
    /// 新しいセッションのロガーを作成する
    ///
    /// この時点ではファイルもディレクトリも作成しない。
    ///
    /// # Arguments
    /// * `log_dir` - ログファイルを置くディレクトリ
    /// * `session_token` - ファイル名に埋め込むセッショントークン
    pub fn new(log_dir: impl Into<PathBuf>, session_token: impl Into<String>) -> Self {
        Self::created_at(log_dir, session_token, Utc::now())
    }

    /// 作成時刻を指定してロガーを作成する
    pub fn created_at(
        log_dir: impl Into<PathBuf>,
        session_token: impl Into<String>,
        created: DateTime<Utc>,
    ) -> Self {
        let log_dir = log_dir.into();
        let session_token = session_token.into();
        let log_file = log_dir.join(log_file_name(created, &session_token));
        Self {
            log_dir,
            log_file,
            session_token,
        }
    }

    /// 現在のログファイルのパス
    pub fn log_path(&self) -> &Path {
        &self.log_file
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn session_token(&self) -> &str {
        &self.session_token
    }

    /// 1件のメッセージを追記する
    pub fn log_message(
        &self,
        role: Role,
        content: &str,
        metadata: Option<&Metadata>,
    ) -> Result<Exchange, HistoryError> {
        let exchange = Exchange::now(role, content, metadata.cloned());
        self.append(&exchange)?;
        Ok(exchange)
    }

    /// ユーザーとエージェントのやり取りを2レコードとして追記する
    pub fn log_exchange(
        &self,
        user_message: &str,
        agent_response: &str,
        metadata: Option<&Metadata>,
    ) -> Result<(), HistoryError> {
        self.log_message(Role::User, user_message, metadata)?;
        self.log_message(Role::Agent, agent_response, metadata)?;
        Ok(())
    }

    /// このセッションで書き込まれた全レコードを書き込み順に読み込む
    ///
    /// ファイルがまだ存在しない場合は空を返す。
    pub fn read_history(&self) -> Result<Vec<Exchange>, HistoryError> {
        let file = match fs::File::open(&self.log_file) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(HistoryError::io(&self.log_file, e)),
        };

        let mut history = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| HistoryError::io(&self.log_file, e))?;
            if line.trim().is_empty() {
                continue;
            }
            let exchange = serde_json::from_str(&line).map_err(|source| HistoryError::Parse {
                path: self.log_file.clone(),
                line: index + 1,
                source,
            })?;
            history.push(exchange);
        }
        Ok(history)
    }

    fn append(&self, exchange: &Exchange) -> Result<(), HistoryError> {
        // serde_json は非ASCII文字をエスケープせず UTF-8 のまま書き出す
        let mut line = serde_json::to_string(exchange)?;
        line.push('\n');

        fs::create_dir_all(&self.log_dir).map_err(|e| HistoryError::io(&self.log_dir, e))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)
            .map_err(|e| HistoryError::io(&self.log_file, e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| HistoryError::io(&self.log_file, e))?;

        tracing::debug!(
            path = %self.log_file.display(),
            role = %exchange.role,
            "appended chat history entry"
        );
        Ok(())
    }
}

/// `chat_history_<YYYYmmdd_HHMMSS>_<session>.log`
///
/// 英数字・`-`・`_` 以外の文字は `_` に置き換え、ファイルが `log_dir` の外に出ないようにする。
fn log_file_name(created: DateTime<Utc>, session_token: &str) -> String {
    let timestamp = created.format("%Y%m%d_%H%M%S");
    let session_token: String = session_token
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if session_token.is_empty() {
        format!("{}_{}.{}", LOG_FILE_PREFIX, timestamp, LOG_FILE_EXTENSION)
    } else {
        format!(
            "{}_{}_{}.{}",
            LOG_FILE_PREFIX, timestamp, session_token, LOG_FILE_EXTENSION
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_log_file_name_is_deterministic() {
        let created = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let logger = ChatHistoryLogger::created_at("/tmp/logs", "test-session-123", created);

        assert_eq!(
            logger.log_path(),
            Path::new("/tmp/logs/chat_history_20240102_030405_test-session-123.log")
        );
        assert_eq!(logger.session_token(), "test-session-123");
    }

    #[test]
    fn test_session_token_cannot_escape_log_dir() {
        let created = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        for token in ["../../etc/passwd", "a/b", "..\\evil", "/abs"] {
            let logger = ChatHistoryLogger::created_at("/tmp/logs", token, created);

            assert_eq!(logger.log_path().parent(), Some(Path::new("/tmp/logs")));
            let name = logger.log_path().file_name().unwrap().to_str().unwrap();
            assert!(!name.contains('/') && !name.contains('\\') && !name.contains(".."));
            assert_eq!(logger.session_token(), token);
        }
    }

    #[test]
    fn test_traversal_token_writes_inside_log_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let log_dir = tmp.path().join("logs");
        let logger = ChatHistoryLogger::new(&log_dir, "../outside");

        logger.log_message(Role::User, "Hello", None).unwrap();

        assert_eq!(fs::read_dir(&log_dir).unwrap().count(), 1);
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_new_does_not_touch_filesystem() {
        let tmp = tempfile::tempdir().unwrap();
        let log_dir = tmp.path().join("not_yet");

        let logger = ChatHistoryLogger::new(&log_dir, "s");

        assert!(!log_dir.exists());
        assert!(logger.read_history().unwrap().is_empty());
    }

    #[test]
    fn test_first_write_creates_directory_and_file() {
        let tmp = tempfile::tempdir().unwrap();
        let log_dir = tmp.path().join("nested").join("logs");
        let logger = ChatHistoryLogger::new(&log_dir, "s");

        logger.log_message(Role::User, "Hello world", None).unwrap();

        assert!(logger.log_path().exists());
        assert_eq!(logger.log_path().parent(), Some(log_dir.as_path()));
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let logger = ChatHistoryLogger::new(tmp.path(), "s");
        logger.log_message(Role::User, "one", None).unwrap();
        let mut file = OpenOptions::new().append(true).open(logger.log_path()).unwrap();
        file.write_all(b"\n   \n").unwrap();
        logger.log_message(Role::Agent, "two", None).unwrap();

        let contents: Vec<String> = logger
            .read_history()
            .unwrap()
            .into_iter()
            .map(|e| e.content)
            .collect();

        assert_eq!(contents, vec!["one", "two"]);
    }

    #[test]
    fn test_malformed_line_reports_line_number() {
        let tmp = tempfile::tempdir().unwrap();
        let logger = ChatHistoryLogger::new(tmp.path(), "s");
        logger.log_message(Role::User, "ok", None).unwrap();
        let mut file = OpenOptions::new().append(true).open(logger.log_path()).unwrap();
        file.write_all(b"{not json\n").unwrap();

        match logger.read_history() {
            Err(HistoryError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected Parse error, got {:?}", other),
        }
    }
}
