//! Feed 规则引擎
//!
//! 决定一封邮件或一条推文是否进入某个 feed，支持：
//! - 十种字符串匹配类型（包含、前缀、后缀、相等、正则及其取反）
//! - 按消息类型映射的匹配字段与 OTHER 字段白名单
//! - ANY / ALL 分组及合并、拆分、切换的变更协议
//! - 规则集内存存储与可替换的持久化仓储

pub mod error;
pub mod evaluator;
pub mod executor;
pub mod fields;
pub mod matcher;
pub mod message;
pub mod models;
pub mod operators;
pub mod repository;
pub mod scope;
pub mod service;
pub mod store;

pub use error::{Result, RuleError};
pub use executor::{FeedMatch, GroupEvaluator};
pub use fields::{Mail, MailField, MatchField, MessageKind, Twitter, TwitterField};
pub use message::{FieldValue, Message};
pub use models::{
    GroupId, Rule, RuleDraft, RuleId, RuleRecord, RuleUpdate, RuleWire, ScopeId, ValidationResult,
};
pub use operators::{GroupOperation, MatchType};
pub use repository::{MIGRATOR, MemoryRuleRepository, PgRuleRepository, RuleRepository, RuleWrite};
pub use scope::{FeedRules, MutationOutcome, RuleChange, RuleScope};
pub use service::{FeedRuleService, GroupSettings};
pub use store::RuleStore;
