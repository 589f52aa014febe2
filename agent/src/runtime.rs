use std::collections::VecDeque;

use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::{self, BehaviorVersion, SdkConfig};
use aws_sdk_bedrockagentruntime::Client;
use aws_sdk_bedrockagentruntime::config::Credentials;
use aws_sdk_bedrockagentruntime::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_bedrockagentruntime::operation::invoke_agent::InvokeAgentOutput;
use aws_sdk_bedrockagentruntime::types::ResponseStream;

use crate::agent::AgentError;

/// リージョンが何も指定されていない場合のフォールバック
pub const DEFAULT_REGION: &str = "us-west-2";

/// InvokeAgent に渡すリクエスト
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeRequest {
    pub agent_id: String,
    pub alias_id: String,
    pub session_id: String,
    pub input_text: String,
    pub enable_trace: bool,
    pub end_session: bool,
}

/// レスポンスストリーム上の1イベント
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    /// 応答テキストの断片（UTF-8 のバイト列。文字の途中で分割されることがある）
    Chunk(Vec<u8>),
    /// トレース有効時に届く診断情報
    Trace(String),
}

/// 断片化されたレスポンスを順に取り出すためのソース
#[async_trait]
pub trait FragmentSource: Send {
    /// 次のイベントを返す。ストリーム終端では `Ok(None)`
    async fn next_event(&mut self) -> Result<Option<AgentEvent>, AgentError>;
}

/// リモートエージェントが返す応答の形
///
/// 呼び出し元には公開せず、`AgentClient` の内部でひとつの文字列に畳み込む。
pub enum RemoteCompletion {
    Whole(String),
    Fragments(Box<dyn FragmentSource>),
}

impl RemoteCompletion {
    /// 手元のイベント列から断片化レスポンスを作る
    pub fn from_events(events: impl IntoIterator<Item = AgentEvent>) -> Self {
        Self::Fragments(Box::new(BufferedEvents(events.into_iter().collect())))
    }
}

impl std::fmt::Debug for RemoteCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Whole(text) => f.debug_tuple("Whole").field(text).finish(),
            Self::Fragments(_) => f.write_str("Fragments(..)"),
        }
    }
}

struct BufferedEvents(VecDeque<AgentEvent>);

#[async_trait]
impl FragmentSource for BufferedEvents {
    async fn next_event(&mut self) -> Result<Option<AgentEvent>, AgentError> {
        Ok(self.0.pop_front())
    }
}

/// リモートエージェント呼び出しの抽象
///
/// 認証情報やリージョンの解決はこのトレイトの実装側に閉じ込め、
/// テストではダブルに差し替える。
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn invoke(&self, request: InvokeRequest) -> Result<RemoteCompletion, AgentError>;
}

/// 環境の認証情報を上書きする静的クレデンシャル
#[derive(Clone)]
pub struct StaticCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"** redacted **")
            .field("session_token", &self.session_token.as_ref().map(|_| "** redacted **"))
            .finish()
    }
}

/// AWS SDK の設定読み込みに関するオプション
#[derive(Debug, Clone, Default)]
pub struct AwsSettings {
    /// 使用する AWS プロファイル名
    pub profile: Option<String>,
    pub credentials: Option<StaticCredentials>,
}

/// AWS Bedrock Agent Runtime を使った `AgentRuntime` 実装
#[derive(Debug, Clone)]
pub struct BedrockRuntime {
    client: Client,
}

impl BedrockRuntime {
    /// AWS 設定を読み込んでランタイムを作成する
    ///
    /// # Arguments
    /// * `settings` - プロファイルや静的クレデンシャル
    /// * `region` - リージョン（オプション）。指定しない場合はデフォルトプロバイダ、
    ///   それも無ければ `us-west-2` を使用
    pub async fn load(settings: &AwsSettings, region: Option<String>) -> Self {
        let region_provider = RegionProviderChain::first_try(region.map(aws_config::Region::new))
            .or_default_provider()
            .or_else(aws_config::Region::new(DEFAULT_REGION));

        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region_provider);
        if let Some(profile) = &settings.profile {
            loader = loader.profile_name(profile);
        }
        if let Some(creds) = &settings.credentials {
            loader = loader.credentials_provider(Credentials::new(
                creds.access_key_id.clone(),
                creds.secret_access_key.clone(),
                creds.session_token.clone(),
                None,
                "agent-chat-static",
            ));
        }

        let config = loader.load().await;
        Self::from_conf(&config)
    }

    /// 読み込み済みの SDK 設定からランタイムを作成する
    pub fn from_conf(config: &SdkConfig) -> Self {
        Self {
            client: Client::new(config),
        }
    }

    /// 解決されたリージョン
    pub fn region(&self) -> Option<String> {
        self.client.config().region().map(|r| r.to_string())
    }
}

#[async_trait]
impl AgentRuntime for BedrockRuntime {
    async fn invoke(&self, request: InvokeRequest) -> Result<RemoteCompletion, AgentError> {
        let output = self
            .client
            .invoke_agent()
            .agent_id(request.agent_id)
            .agent_alias_id(request.alias_id)
            .session_id(request.session_id)
            .input_text(request.input_text)
            .enable_trace(request.enable_trace)
            .end_session(request.end_session)
            .send()
            .await
            .map_err(remote_error)?;

        Ok(RemoteCompletion::Fragments(Box::new(BedrockEventStream {
            output,
        })))
    }
}

struct BedrockEventStream {
    output: InvokeAgentOutput,
}

#[async_trait]
impl FragmentSource for BedrockEventStream {
    async fn next_event(&mut self) -> Result<Option<AgentEvent>, AgentError> {
        loop {
            let Some(event) = self.output.completion.recv().await.map_err(remote_error)? else {
                return Ok(None);
            };
            if let Some(event) = stream_event(event) {
                return Ok(Some(event));
            }
        }
    }
}

/// ストリームイベントを `AgentEvent` に変換する。チャンクとトレース以外は読み飛ばす
fn stream_event(event: ResponseStream) -> Option<AgentEvent> {
    match event {
        ResponseStream::Chunk(part) => {
            let bytes = part.bytes.map(|b| b.into_inner()).unwrap_or_default();
            Some(AgentEvent::Chunk(bytes))
        }
        ResponseStream::Trace(part) => Some(AgentEvent::Trace(format!("{:?}", part))),
        other => {
            tracing::debug!("ignoring agent stream event: {:?}", other);
            None
        }
    }
}

/// SDK のエラーを利用者向けの短いメッセージに変換する
///
/// 生の HTTP レスポンスを含む詳細はデバッグログにだけ出す。
fn remote_error<E, R>(err: SdkError<E, R>) -> AgentError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    tracing::debug!("agent call failed: {}", DisplayErrorContext(&err));

    let service_error = err.as_service_error();
    let code = service_error.and_then(|e| e.code()).map(str::to_string);
    let message = service_error
        .and_then(|e| e.message())
        .map(str::to_string)
        .unwrap_or_else(|| err.to_string());
    AgentError::RemoteInvocation { code, message }
}
