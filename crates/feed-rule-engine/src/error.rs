//! 规则引擎错误类型

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("规则未找到: scope={scope_id}, rule={rule_id}")]
    RuleNotFound { scope_id: i64, rule_id: i64 },

    #[error("规则集未加载: {0}")]
    ScopeNotLoaded(i64),

    #[error("规则未分组: {0}")]
    RuleNotGrouped(i64),

    #[error("规则不能与自身合并: {0}")]
    SelfMerge(i64),

    #[error("分组 ID 已耗尽: 上限 {max}")]
    GroupIdsExhausted { max: i64 },

    #[error("无效的持久化记录: {0}")]
    InvalidRecord(String),

    #[error("消息解析失败: {0}")]
    MessageParse(String),

    #[error("存储错误: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("JSON 序列化错误: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RuleError>;
