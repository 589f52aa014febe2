mod chat;
mod config;

use agent::{AgentClient, AgentIdentity};
use chat::ChatLoop;
use clap::{Parser, Subcommand};
use config::{ChatConfig, RunArgs};
use rustyline::DefaultEditor;
use tracing_subscriber::EnvFilter;

// CLIの引数構造体定義
#[derive(Parser)]
#[command(name = "agent-chat")]
#[command(about = "Interactive chat client for AWS Bedrock Agents", long_about = None)]
struct Cli {
    /// デバッグログを有効にする
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// チャットを開始します
    Run(RunArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env の値を環境変数のフォールバックとして読み込む
    let _ = dotenvy::dotenv();

    // 引数の解析
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match cli.command {
        Commands::Run(args) => {
            run_agent_cli(ChatConfig::from_args(args)).await?;
        }
    }

    Ok(())
}

/// 診断ログは標準エラーに出力し、チャットの表示と混ざらないようにする
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// CLI対話型チャットを実行する
///
/// 設定エラーはループに入る前に返し、プロセスは非ゼロで終了する。
async fn run_agent_cli(config: ChatConfig) -> anyhow::Result<()> {
    let identity = AgentIdentity::resolve(&config.identity)?;
    println!(
        "Initializing agent {} (alias {})",
        identity.agent_id, identity.alias_id
    );

    let agent = AgentClient::connect(identity, &config.aws).await;
    if let Some(region) = agent.runtime().region() {
        println!("Using region: {}", region);
    }

    let mut rl = DefaultEditor::new()?;
    let mut chat = ChatLoop::new(agent, config.loop_options(), std::io::stdout());
    chat.run(&mut rl).await?;

    tracing::info!(
        session_id = %chat.session(),
        log_file = %chat.logger().log_path().display(),
        "chat finished"
    );
    Ok(())
}
