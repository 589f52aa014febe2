//! 起動時の設定
//!
//! コマンドライン引数と環境変数（`.env` を含む）から `ChatConfig` を組み立て、
//! 以降はこの構造体だけをチャットループに渡す。
use agent::{AgentArn, AwsSettings, IdentityConfig, StaticCredentials};
use clap::Args;
use std::io::IsTerminal;
use std::path::PathBuf;

/// エイリアスが指定されていない場合に使うテスト用エイリアス
pub const DEFAULT_ALIAS_ID: &str = "TSTALIASID";
pub const DEFAULT_HISTORY_DIR: &str = "./logs";

/// `run` サブコマンドの引数
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// エージェントのARN（リージョンとIDをここから導出）
    #[arg(long, env = "BEDROCK_AGENT_ARN")]
    pub agent_arn: Option<String>,

    /// エージェントID
    #[arg(long, env = "BEDROCK_AGENT_ID")]
    pub agent_id: Option<String>,

    /// エージェントのエイリアスID (デフォルト: TSTALIASID)
    #[arg(long, env = "BEDROCK_AGENT_ALIAS_ID")]
    pub alias_id: Option<String>,

    /// リージョン (オプション: デフォルトはARNのリージョン、プロファイル設定、us-west-2の順)
    #[arg(long)]
    pub region: Option<String>,

    /// 使用するAWSプロファイル名
    #[arg(long, env = "AWS_PROFILE")]
    pub aws_profile: Option<String>,

    /// チャット履歴を保存するディレクトリ
    #[arg(long, env = "CHAT_HISTORY_DIR", default_value = DEFAULT_HISTORY_DIR)]
    pub history_dir: PathBuf,

    /// エージェントのトレースを有効にする
    #[arg(long)]
    pub trace: bool,

    /// 静的クレデンシャル（環境の認証情報を上書き）
    #[arg(long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    pub aws_access_key_id: Option<String>,

    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub aws_secret_access_key: Option<String>,

    #[arg(long, env = "AWS_SESSION_TOKEN", hide_env_values = true)]
    pub aws_session_token: Option<String>,
}

/// チャットループの動作設定
#[derive(Debug, Clone)]
pub struct LoopOptions {
    pub history_dir: PathBuf,
    pub trace: bool,
    /// 応答待ちの間ローディングアニメーションを表示するか
    pub show_progress: bool,
}

/// アプリケーション全体の設定
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub identity: IdentityConfig,
    pub aws: AwsSettings,
    pub history_dir: PathBuf,
    pub trace: bool,
    pub show_progress: bool,
}

impl ChatConfig {
    pub fn from_args(args: RunArgs) -> Self {
        // エイリアスARNが渡された場合はデフォルトのエイリアスを補わない
        let arn_has_alias = args
            .agent_arn
            .as_deref()
            .and_then(|arn| AgentArn::parse(arn).ok())
            .is_some_and(|arn| arn.alias_id.is_some());
        let alias_id = args
            .alias_id
            .filter(|alias| !alias.trim().is_empty())
            .or_else(|| (!arn_has_alias).then(|| DEFAULT_ALIAS_ID.to_string()));

        let credentials = match (args.aws_access_key_id, args.aws_secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => Some(StaticCredentials {
                access_key_id,
                secret_access_key,
                session_token: args.aws_session_token,
            }),
            _ => None,
        };

        Self {
            identity: IdentityConfig {
                agent_arn: args.agent_arn,
                agent_id: args.agent_id,
                alias_id,
                region: args.region,
            },
            aws: AwsSettings {
                profile: args.aws_profile,
                credentials,
            },
            history_dir: args.history_dir,
            trace: args.trace,
            show_progress: std::io::stdout().is_terminal(),
        }
    }

    pub fn loop_options(&self) -> LoopOptions {
        LoopOptions {
            history_dir: self.history_dir.clone(),
            trace: self.trace,
            show_progress: self.show_progress,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent::{AgentError, AgentIdentity};
    use clap::{CommandFactory, Parser};

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        run: RunArgs,
    }

    fn args() -> RunArgs {
        RunArgs {
            history_dir: PathBuf::from(DEFAULT_HISTORY_DIR),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_alias_is_applied_to_plain_agent_id() {
        let config = ChatConfig::from_args(RunArgs {
            agent_id: Some("AGENT".to_string()),
            ..args()
        });

        let identity = AgentIdentity::resolve(&config.identity).unwrap();
        assert_eq!(identity.alias_id, DEFAULT_ALIAS_ID);
    }

    #[test]
    fn test_alias_arn_is_not_overridden_by_default_alias() {
        let config = ChatConfig::from_args(RunArgs {
            agent_arn: Some("arn:aws:bedrock:us-west-2:123:agent-alias/AGENT/PROD".to_string()),
            ..args()
        });

        let identity = AgentIdentity::resolve(&config.identity).unwrap();
        assert_eq!(identity.alias_id, "PROD");
        assert_eq!(identity.region.as_deref(), Some("us-west-2"));
    }

    #[test]
    fn test_missing_identity_is_config_error() {
        let config = ChatConfig::from_args(args());

        let result = AgentIdentity::resolve(&config.identity);
        assert!(matches!(result, Err(AgentError::ConfigError(_))));
    }

    #[test]
    fn test_static_credentials_require_key_and_secret() {
        let partial = ChatConfig::from_args(RunArgs {
            aws_access_key_id: Some("AKIA".to_string()),
            ..args()
        });
        assert!(partial.aws.credentials.is_none());

        let full = ChatConfig::from_args(RunArgs {
            aws_access_key_id: Some("AKIA".to_string()),
            aws_secret_access_key: Some("secret".to_string()),
            aws_session_token: Some("token".to_string()),
            ..args()
        });
        let creds = full.aws.credentials.unwrap();
        assert_eq!(creds.access_key_id, "AKIA");
        assert_eq!(creds.session_token.as_deref(), Some("token"));
    }

    #[test]
    fn test_loop_options_follow_config() {
        let config = ChatConfig::from_args(RunArgs {
            history_dir: PathBuf::from("/var/chat"),
            trace: true,
            ..args()
        });

        let options = config.loop_options();
        assert_eq!(options.history_dir, PathBuf::from("/var/chat"));
        assert!(options.trace);
        assert_eq!(options.show_progress, config.show_progress);
    }

    #[test]
    fn test_aws_profile_flag_and_env_fallback() {
        let cli = TestCli::try_parse_from(["agent-chat", "--aws-profile", "dev"]).unwrap();
        let config = ChatConfig::from_args(cli.run);
        assert_eq!(config.aws.profile.as_deref(), Some("dev"));

        let command = TestCli::command();
        let profile = command
            .get_arguments()
            .find(|arg| arg.get_id() == "aws_profile")
            .unwrap();
        assert_eq!(
            profile.get_env().and_then(|env| env.to_str()),
            Some("AWS_PROFILE")
        );
    }
}
