use std::fmt;
use std::str::FromStr;

use crate::agent::AgentError;

/// Bedrock エージェントARNのパース結果
///
/// 受け付ける形式:
/// * `arn:<partition>:bedrock:<region>:<account>:agent/<agentId>`
/// * `arn:<partition>:bedrock:<region>:<account>:agent-alias/<agentId>/<aliasId>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentArn {
    pub partition: String,
    pub region: String,
    pub account: String,
    pub agent_id: String,
    pub alias_id: Option<String>,
}

impl AgentArn {
    /// ARN文字列をパースする
    ///
    /// # Errors
    /// セグメント数が6でない場合、サービスが `bedrock` でない場合、
    /// リソース部分がエージェント/エイリアスでない場合は `AgentError::ConfigError`
    pub fn parse(arn: &str) -> Result<Self, AgentError> {
        let invalid = |reason: &str| {
            AgentError::ConfigError(format!("Invalid Bedrock agent ARN '{}': {}", arn, reason))
        };

        let parts: Vec<&str> = arn.trim().split(':').collect();
        if parts.len() != 6 {
            return Err(invalid(&format!(
                "expected 6 ':'-separated segments, found {}",
                parts.len()
            )));
        }
        if parts[0] != "arn" {
            return Err(invalid("must start with 'arn'"));
        }
        if parts[2] != "bedrock" {
            return Err(invalid("service must be 'bedrock'"));
        }
        if parts[1].is_empty() || parts[3].is_empty() || parts[4].is_empty() {
            return Err(invalid("partition, region and account must not be empty"));
        }

        let resource: Vec<&str> = parts[5].split('/').collect();
        let (agent_id, alias_id) = match resource.as_slice() {
            ["agent", id] if !id.is_empty() => (id.to_string(), None),
            ["agent-alias", id, alias] if !id.is_empty() && !alias.is_empty() => {
                (id.to_string(), Some(alias.to_string()))
            }
            _ => {
                return Err(invalid(
                    "resource must be 'agent/<id>' or 'agent-alias/<id>/<alias>'",
                ));
            }
        };

        Ok(Self {
            partition: parts[1].to_string(),
            region: parts[3].to_string(),
            account: parts[4].to_string(),
            agent_id,
            alias_id,
        })
    }
}

impl FromStr for AgentArn {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for AgentArn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "arn:{}:bedrock:{}:{}:",
            self.partition, self.region, self.account
        )?;
        match &self.alias_id {
            Some(alias) => write!(f, "agent-alias/{}/{}", self.agent_id, alias),
            None => write!(f, "agent/{}", self.agent_id),
        }
    }
}

/// エージェントの識別情報の入力
///
/// ARN と個別指定のどちらか（または両方）を受け取る。
/// 空文字列は未指定として扱う。
#[derive(Debug, Clone, Default)]
pub struct IdentityConfig {
    pub agent_arn: Option<String>,
    pub agent_id: Option<String>,
    pub alias_id: Option<String>,
    pub region: Option<String>,
}

/// 解決済みのエージェント識別情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIdentity {
    pub agent_id: String,
    pub alias_id: String,
    /// 明示指定またはARN由来のリージョン。None の場合はSDKのデフォルトチェーンに任せる
    pub region: Option<String>,
    pub account: Option<String>,
}

impl AgentIdentity {
    /// 個別指定のIDとエイリアスから識別情報を作成する
    pub fn new(agent_id: impl Into<String>, alias_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            alias_id: alias_id.into(),
            region: None,
            account: None,
        }
    }

    /// 設定値から識別情報を解決する
    ///
    /// # Errors
    /// * どちらの形式でもエージェントIDが得られない場合
    /// * ARN が不正な場合
    /// * ARN と個別指定の値が食い違う場合
    pub fn resolve(config: &IdentityConfig) -> Result<Self, AgentError> {
        let agent_id = non_empty(&config.agent_id);
        let alias_id = non_empty(&config.alias_id);
        let region = non_empty(&config.region);

        let arn = non_empty(&config.agent_arn)
            .map(AgentArn::parse)
            .transpose()?;

        let Some(arn) = arn else {
            let agent_id = agent_id.ok_or_else(|| {
                AgentError::ConfigError(
                    "an agent ARN or an agent id must be provided".to_string(),
                )
            })?;
            let alias_id = alias_id.ok_or_else(|| {
                AgentError::ConfigError("an agent alias id must be provided".to_string())
            })?;
            return Ok(Self {
                agent_id: agent_id.to_string(),
                alias_id: alias_id.to_string(),
                region: region.map(str::to_string),
                account: None,
            });
        };

        ensure_consistent("agent id", agent_id, Some(arn.agent_id.as_str()))?;
        ensure_consistent("region", region, Some(arn.region.as_str()))?;
        if arn.alias_id.is_some() {
            ensure_consistent("alias id", alias_id, arn.alias_id.as_deref())?;
        }

        let alias_id = arn
            .alias_id
            .clone()
            .or_else(|| alias_id.map(str::to_string))
            .ok_or_else(|| {
                AgentError::ConfigError("an agent alias id must be provided".to_string())
            })?;

        Ok(Self {
            agent_id: arn.agent_id,
            alias_id,
            region: Some(arn.region),
            account: Some(arn.account),
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn ensure_consistent(
    field: &str,
    explicit: Option<&str>,
    from_arn: Option<&str>,
) -> Result<(), AgentError> {
    match (explicit, from_arn) {
        (Some(explicit), Some(from_arn)) if explicit != from_arn => {
            Err(AgentError::ConfigError(format!(
                "{} '{}' does not match the agent ARN ('{}')",
                field, explicit, from_arn
            )))
        }
        _ => Ok(()),
    }
}
