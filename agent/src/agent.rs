use crate::identity::AgentIdentity;
use crate::runtime::{
    AgentEvent, AgentRuntime, AwsSettings, BedrockRuntime, InvokeRequest, RemoteCompletion,
};
use crate::session::SessionToken;

/// AgentClientのエラー型
#[derive(thiserror::Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Failed to invoke agent: {message}")]
    RemoteInvocation {
        /// AWS が返したエラーコード（例: `AccessDeniedException`）
        code: Option<String>,
        message: String,
    },

    #[error("Malformed agent response: {0}")]
    MalformedResponse(String),
}

impl AgentError {
    /// 起動時に致命的となる設定エラーかどうか
    pub fn is_config(&self) -> bool {
        matches!(self, AgentError::ConfigError(_))
    }

    /// リモート呼び出しのエラーコード
    pub fn code(&self) -> Option<&str> {
        match self {
            AgentError::RemoteInvocation { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

/// 呼び出しごとのオプション
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvokeOptions {
    /// トレース情報を収集するか
    pub enable_trace: bool,
    /// この呼び出しでリモートのセッションを終了するか
    pub end_session: bool,
}

/// エージェントの応答
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentReply {
    /// 連結済みの応答テキスト
    pub completion: String,
    pub session_id: String,
    /// トレースが有効な場合のみ Some
    pub trace: Option<Vec<String>>,
}

/// Agent クライアント構造体
///
/// Bedrock エージェントの呼び出しを担当する。保持する状態は
/// エージェントの識別情報とランタイムのみで、セッショントークンは呼び出し元が渡す。
pub struct AgentClient<R = BedrockRuntime> {
    identity: AgentIdentity,
    runtime: R,
}

impl AgentClient<BedrockRuntime> {
    /// AWS 設定を読み込み、Bedrock に接続する AgentClient を作成する
    ///
    /// # Arguments
    /// * `identity` - 解決済みのエージェント識別情報
    /// * `settings` - プロファイルなどの AWS 設定
    pub async fn connect(identity: AgentIdentity, settings: &AwsSettings) -> Self {
        let runtime = BedrockRuntime::load(settings, identity.region.clone()).await;
        Self::with_runtime(identity, runtime)
    }
}

impl<R: AgentRuntime> AgentClient<R> {
    /// 任意のランタイムで AgentClient を作成する
    pub fn with_runtime(identity: AgentIdentity, runtime: R) -> Self {
        Self { identity, runtime }
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// プロンプトを送信し、連結済みの応答テキストを返す
    pub async fn invoke(&self, prompt: &str, session: &SessionToken) -> Result<String, AgentError> {
        let reply = self
            .invoke_with(prompt, session, InvokeOptions::default())
            .await?;
        Ok(reply.completion)
    }

    /// オプション付きでプロンプトを送信する
    ///
    /// # Returns
    /// * `Ok(AgentReply)` - 応答テキスト全体（断片は全て連結済み）とトレース
    /// * `Err(AgentError)` - 呼び出し、またはストリームの読み取りに失敗した場合
    pub async fn invoke_with(
        &self,
        prompt: &str,
        session: &SessionToken,
        options: InvokeOptions,
    ) -> Result<AgentReply, AgentError> {
        let request = InvokeRequest {
            agent_id: self.identity.agent_id.clone(),
            alias_id: self.identity.alias_id.clone(),
            session_id: session.as_str().to_string(),
            input_text: prompt.to_string(),
            enable_trace: options.enable_trace,
            end_session: options.end_session,
        };

        tracing::debug!(
            agent_id = %request.agent_id,
            alias_id = %request.alias_id,
            session_id = %request.session_id,
            "invoking agent"
        );

        let mut trace = Vec::new();
        let completion = match self.runtime.invoke(request).await? {
            RemoteCompletion::Whole(text) => text,
            RemoteCompletion::Fragments(mut source) => {
                let mut bytes = Vec::new();
                let mut fragments = 0usize;
                while let Some(event) = source.next_event().await? {
                    match event {
                        AgentEvent::Chunk(chunk) => {
                            fragments += 1;
                            bytes.extend_from_slice(&chunk);
                        }
                        AgentEvent::Trace(data) => {
                            if options.enable_trace {
                                trace.push(data);
                            }
                        }
                    }
                }
                tracing::debug!(fragments, bytes = bytes.len(), "agent stream finished");
                // 文字の途中で分割された断片があるため、連結後にまとめてデコードする
                String::from_utf8(bytes).map_err(|e| {
                    AgentError::MalformedResponse(format!("completion is not valid UTF-8: {}", e))
                })?
            }
        };

        Ok(AgentReply {
            completion,
            session_id: session.as_str().to_string(),
            trace: options.enable_trace.then_some(trace),
        })
    }
}
