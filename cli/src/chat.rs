use agent::{AgentClient, AgentRuntime, InvokeOptions, SessionToken};
use history::{ChatHistoryLogger, Metadata};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::io::{self, Write};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::config::LoopOptions;

// UI関連の設定
const USER_NAME: &str = "You";
const AGENT_NAME: &str = "Agent";
const LOADING_ANIMATION_INTERVAL: u64 = 200;
const LOADING_ANIMATION_CHARACTER: &str = ".";
// ローディングアニメーションをクリアするためのスペース文字列
const CLEAR_LINE_SPACES: &str = "                                     "; // 37 spaces
const RULE_WIDTH: usize = 70;

/// チャットループの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Active,
    Terminated,
}

/// 入力行の解釈結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command<'a> {
    Empty,
    Quit,
    NewSession,
    History,
    Message(&'a str),
}

impl<'a> Command<'a> {
    fn parse(line: &'a str) -> Self {
        let input = line.trim();
        if input.is_empty() {
            Command::Empty
        } else if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            Command::Quit
        } else if input.eq_ignore_ascii_case("new") {
            Command::NewSession
        } else if input.eq_ignore_ascii_case("history") {
            Command::History
        } else {
            Command::Message(input)
        }
    }
}

/// 1行ずつ入力を受け取るための抽象
///
/// 実行時は rustyline のエディタ、テストでは用意した入力列を使う。
pub trait LineReader {
    fn read_line(&mut self, prompt: &str) -> rustyline::Result<String>;
}

impl LineReader for DefaultEditor {
    fn read_line(&mut self, prompt: &str) -> rustyline::Result<String> {
        let line = self.readline(prompt)?;
        if !line.trim().is_empty() {
            let _ = self.add_history_entry(line.trim());
        }
        Ok(line)
    }
}

/// 対話型チャットループ
///
/// 入力の解釈、エージェント呼び出し、履歴の記録、表示を担当する。
/// 処理は常に1入力ずつ順番に行う。
pub struct ChatLoop<R, W> {
    agent: AgentClient<R>,
    options: LoopOptions,
    session: SessionToken,
    logger: ChatHistoryLogger,
    out: W,
}

impl<R: AgentRuntime, W: Write> ChatLoop<R, W> {
    pub fn new(agent: AgentClient<R>, options: LoopOptions, out: W) -> Self {
        let session = SessionToken::generate();
        let logger = ChatHistoryLogger::new(&options.history_dir, session.as_str());
        Self {
            agent,
            options,
            session,
            logger,
            out,
        }
    }

    pub fn session(&self) -> &SessionToken {
        &self.session
    }

    pub fn logger(&self) -> &ChatHistoryLogger {
        &self.logger
    }

    /// 入力が尽きるか終了コマンドを受け取るまでループする
    pub async fn run(&mut self, reader: &mut impl LineReader) -> anyhow::Result<()> {
        self.display_welcome()?;

        loop {
            match reader.read_line(&format!("{} > ", USER_NAME)) {
                Ok(line) => {
                    if self.handle_line(&line).await? == LoopState::Terminated {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    writeln!(self.out, "CTRL-C")?;
                    self.say_goodbye()?;
                    break;
                }
                Err(ReadlineError::Eof) => {
                    writeln!(self.out, "CTRL-D")?;
                    self.say_goodbye()?;
                    break;
                }
                Err(err) => {
                    tracing::error!("failed to read input: {:?}", err);
                    writeln!(self.out, "Error: {:?}", err)?;
                    break;
                }
            }
        }

        Ok(())
    }

    /// 1行分の入力を処理し、次の状態を返す
    pub async fn handle_line(&mut self, line: &str) -> io::Result<LoopState> {
        match Command::parse(line) {
            Command::Empty => {}
            Command::Quit => {
                self.say_goodbye()?;
                return Ok(LoopState::Terminated);
            }
            Command::NewSession => self.new_session()?,
            Command::History => self.display_history()?,
            Command::Message(input) => self.process_message(input).await?,
        }
        Ok(LoopState::Active)
    }

    pub fn display_welcome(&mut self) -> io::Result<()> {
        let rule = "=".repeat(RULE_WIDTH);
        writeln!(self.out, "{}", rule)?;
        writeln!(self.out, "AWS Bedrock Agent Chat")?;
        writeln!(self.out, "{}", rule)?;
        let identity = self.agent.identity();
        writeln!(
            self.out,
            "Agent: {} (alias {})",
            identity.agent_id, identity.alias_id
        )?;
        writeln!(self.out, "Session ID: {}", self.session)?;
        writeln!(self.out, "Log file: {}", self.logger.log_path().display())?;
        writeln!(self.out)?;
        writeln!(self.out, "Commands:")?;
        writeln!(self.out, "  - Type your message and press Enter to chat")?;
        writeln!(self.out, "  - Type 'quit' or 'exit' to end the session")?;
        writeln!(self.out, "  - Type 'new' to start a new session")?;
        writeln!(self.out, "  - Type 'history' to view chat history")?;
        writeln!(self.out, "{}", rule)?;
        writeln!(self.out)?;
        self.out.flush()
    }

    fn say_goodbye(&mut self) -> io::Result<()> {
        writeln!(self.out, "Goodbye! Chat history saved to {}", self.logger.log_path().display())?;
        self.out.flush()
    }

    /// 新しいセッションを開始する
    ///
    /// 以前のセッションのログファイルには触れない。
    fn new_session(&mut self) -> io::Result<()> {
        self.session = SessionToken::generate();
        self.logger = ChatHistoryLogger::new(&self.options.history_dir, self.session.as_str());
        tracing::info!(session_id = %self.session, "started new session");

        writeln!(self.out, "Started new session: {}", self.session)?;
        writeln!(self.out, "New log file: {}", self.logger.log_path().display())?;
        self.out.flush()
    }

    fn display_history(&mut self) -> io::Result<()> {
        let history = match self.logger.read_history() {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!("failed to read chat history: {}", e);
                writeln!(self.out, "[Error] Failed to read chat history: {}", e)?;
                return self.out.flush();
            }
        };

        if history.is_empty() {
            writeln!(self.out, "No chat history available.")?;
            return self.out.flush();
        }

        let rule = "-".repeat(RULE_WIDTH);
        writeln!(self.out, "{}", rule)?;
        writeln!(self.out, "Chat History")?;
        writeln!(self.out, "{}", rule)?;
        for entry in &history {
            writeln!(
                self.out,
                "[{}] {}:",
                entry.timestamp.to_rfc3339(),
                entry.role.as_str().to_uppercase()
            )?;
            writeln!(self.out, "  {}", entry.content)?;
            writeln!(self.out)?;
        }
        writeln!(self.out, "{}", rule)?;
        self.out.flush()
    }

    async fn process_message(&mut self, input: &str) -> io::Result<()> {
        // アシスタントの応答開始を表示
        write!(self.out, "{} > ", AGENT_NAME)?;
        self.out.flush()?;

        let loading_task = self.options.show_progress.then(|| {
            spawn_loading_animation(
                io::stdout(),
                Duration::from_millis(LOADING_ANIMATION_INTERVAL),
            )
        });

        let options = InvokeOptions {
            enable_trace: self.options.trace,
            end_session: false,
        };
        let result = self.agent.invoke_with(input, &self.session, options).await;

        if let Some(task) = loading_task {
            stop_loading_animation(task).await;
            clear_loading_animation();
        }

        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(code = ?e.code(), "agent invocation failed: {}", e);
                writeln!(self.out)?;
                writeln!(self.out, "[Error] Bedrock agent call failed: {}", e)?;
                return self.out.flush();
            }
        };

        writeln!(self.out, "{}", reply.completion)?;
        if let Some(trace) = &reply.trace {
            for event in trace {
                writeln!(self.out, "[trace] {}", event)?;
            }
        }

        let mut metadata = Metadata::new();
        metadata.insert(
            "session_id".to_string(),
            serde_json::Value::from(reply.session_id.as_str()),
        );
        if let Err(e) = self
            .logger
            .log_exchange(input, &reply.completion, Some(&metadata))
        {
            tracing::warn!("failed to write chat history: {}", e);
            writeln!(self.out, "[Warning] chat history was not saved: {}", e)?;
        }

        self.out.flush()
    }
}

/// ローディングアニメーションを開始する
fn spawn_loading_animation<W>(mut out: W, interval: Duration) -> JoinHandle<()>
where
    W: Write + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            sleep(interval).await;
            if write!(out, "{}", LOADING_ANIMATION_CHARACTER).is_err() || out.flush().is_err() {
                break;
            }
        }
    })
}

/// アニメーションを止め、タスクが終了するまで待つ
///
/// 終了を待たずにクリアすると、クリア後にドットが書き込まれることがある。
async fn stop_loading_animation(task: JoinHandle<()>) {
    task.abort();
    // 中断による JoinError は想定内
    let _ = task.await;
}

/// ローディングアニメーションをクリアしてカーソルを戻す
fn clear_loading_animation() {
    print!(
        "\r{} > {}\r{} > ",
        AGENT_NAME, CLEAR_LINE_SPACES, AGENT_NAME
    );
    let _ = io::stdout().flush();
}
