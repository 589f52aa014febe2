//! チャット履歴ファイルの1レコード
//!
//! JSON Lines の1行が1つの `Exchange` に対応する。
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// レコードに付与する任意のメタデータ
pub type Metadata = Map<String, Value>;

/// 発言者
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Agent => "agent",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 1ターン分の発言
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    /// 書き込み時点の UTC 時刻（RFC 3339）
    pub timestamp: DateTime<Utc>,
    pub role: Role,
    pub content: String,
    /// メタデータが無い場合は `null` として書き出す
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

impl Exchange {
    /// 現在時刻のレコードを作成する
    pub fn now(role: Role, content: impl Into<String>, metadata: Option<Metadata>) -> Self {
        Self {
            timestamp: Utc::now(),
            role,
            content: content.into(),
            metadata,
        }
    }
}
