//! 规则数据模型
//!
//! `Rule` 是单个匹配条件；分组操作不保存在规则上，而是由所属规则集的分组索引提供。

use crate::error::{Result, RuleError};
use crate::evaluator::RuleEvaluator;
use crate::executor::GroupEvaluator;
use crate::fields::{MatchField, MessageKind};
use crate::matcher::{CompiledMatcher, MatcherCache};
use crate::message::Message;
use crate::operators::{GroupOperation, MatchType};
use crate::scope::RuleScope;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub type RuleId = i64;
pub type ScopeId = i64;
pub type GroupId = i64;

/// 单条规则
#[derive(Debug, Clone)]
pub struct Rule<K: MessageKind> {
    pub id: RuleId,
    pub scope_id: ScopeId,
    pub group: Option<GroupId>,
    pub match_field: K::Field,
    pub other_field_name: Option<String>,
    pub match_type: MatchType,
    pub match_value: String,
    pub match_case: bool,
    pub is_valid: bool,
    pub check_error: Option<String>,
    pub position: i32,
    matcher: MatcherCache,
}

/// 校验结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub check_error: Option<String>,
}

/// 新建规则的输入
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(bound = "", default)]
pub struct RuleDraft<K: MessageKind> {
    pub match_field: K::Field,
    pub other_field_name: Option<String>,
    pub match_type: MatchType,
    pub match_value: String,
    pub match_case: bool,
}

/// 规则更新，None 表示保持不变
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(bound = "", default)]
pub struct RuleUpdate<K: MessageKind> {
    pub match_field: Option<K::Field>,
    /// 空字符串表示清除
    pub other_field_name: Option<String>,
    pub match_type: Option<MatchType>,
    pub match_value: Option<String>,
    pub match_case: Option<bool>,
}

/// 对外暴露的规则表示，不包含编译后的匹配器和所属规则集
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct RuleWire<K: MessageKind> {
    pub id: RuleId,
    #[serde(default)]
    pub group: Option<GroupId>,
    #[serde(default)]
    pub group_operation: GroupOperation,
    #[serde(default)]
    pub position: i32,
    #[serde(default)]
    pub match_field: K::Field,
    #[serde(default)]
    pub other_field_name: Option<String>,
    #[serde(default)]
    pub match_type: MatchType,
    #[serde(default)]
    pub match_value: String,
    #[serde(default)]
    pub match_case: bool,
    #[serde(default = "default_true")]
    pub is_valid: bool,
    #[serde(default)]
    pub check_error: Option<String>,
}

fn default_true() -> bool {
    true
}

/// 持久化的扁平行，分组操作冗余保存在每一行上
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RuleRecord {
    pub id: RuleId,
    pub scope_id: ScopeId,
    pub group_id: Option<GroupId>,
    pub group_operation: String,
    pub match_field: String,
    pub other_field_name: Option<String>,
    pub match_type: String,
    pub match_value: String,
    pub match_case: bool,
    pub is_valid: bool,
    pub check_error: Option<String>,
    pub position: i32,
}

/// 规范化 OTHER 字段名：去除首尾空白与结尾的冒号
pub fn normalize_field_name(name: &str) -> String {
    let trimmed = name.trim();
    trimmed
        .strip_suffix(':')
        .unwrap_or(trimmed)
        .trim_end()
        .to_string()
}

impl<K: MessageKind> Rule<K> {
    /// 创建未分组的规则并立即校验
    pub fn new(id: RuleId, scope_id: ScopeId, draft: RuleDraft<K>) -> Self {
        let mut rule = Self {
            id,
            scope_id,
            group: None,
            match_field: draft.match_field,
            other_field_name: draft.other_field_name,
            match_type: draft.match_type,
            match_value: draft.match_value,
            match_case: draft.match_case,
            is_valid: true,
            check_error: None,
            position: 0,
            matcher: MatcherCache::default(),
        };
        rule.validate();
        rule
    }

    /// 从持久化行恢复规则，同时返回行上冗余的分组操作
    pub fn from_record(record: RuleRecord) -> Result<(Self, GroupOperation)> {
        let match_field = K::Field::parse(&record.match_field).ok_or_else(|| {
            RuleError::InvalidRecord(format!(
                "规则 {} 的匹配字段无效: {}",
                record.id, record.match_field
            ))
        })?;
        let match_type = record
            .match_type
            .parse::<MatchType>()
            .map_err(|e| RuleError::InvalidRecord(format!("规则 {}: {}", record.id, e)))?;
        let operation = record
            .group_operation
            .parse::<GroupOperation>()
            .map_err(|e| RuleError::InvalidRecord(format!("规则 {}: {}", record.id, e)))?;

        let rule = Self {
            id: record.id,
            scope_id: record.scope_id,
            group: record.group_id,
            match_field,
            other_field_name: record.other_field_name,
            match_type,
            match_value: record.match_value,
            match_case: record.match_case,
            is_valid: record.is_valid,
            check_error: record.check_error,
            position: record.position,
            matcher: MatcherCache::default(),
        };
        Ok((rule, operation))
    }

    /// 转换为持久化行
    pub fn to_record(&self, group_operation: GroupOperation) -> RuleRecord {
        RuleRecord {
            id: self.id,
            scope_id: self.scope_id,
            group_id: self.group,
            group_operation: group_operation.as_str().to_string(),
            match_field: self.match_field.as_str().to_string(),
            other_field_name: self.other_field_name.clone(),
            match_type: self.match_type.as_str().to_string(),
            match_value: self.match_value.clone(),
            match_case: self.match_case,
            is_valid: self.is_valid,
            check_error: self.check_error.clone(),
            position: self.position,
        }
    }

    /// 按顺序检查的具体字段名
    pub fn field_names(&self) -> Vec<&str> {
        if self.match_field.is_other() {
            self.other_field_name
                .as_deref()
                .map(|name| {
                    let trimmed = name.trim();
                    trimmed.strip_suffix(':').unwrap_or(trimmed).trim_end()
                })
                .filter(|name| !name.is_empty())
                .into_iter()
                .collect()
        } else {
            self.match_field.field_names().to_vec()
        }
    }

    /// 获取（必要时重新编译）匹配器
    pub fn matcher(&self) -> Arc<CompiledMatcher> {
        self.matcher
            .get_or_compile(self.match_type, &self.match_value, self.match_case)
    }

    /// 不考虑分组，单独评估本规则；无效规则永不匹配
    pub fn matches_individual(&self, message: &Message) -> bool {
        if !self.is_valid {
            return false;
        }
        RuleEvaluator::matches_individual(self.field_names(), &self.matcher(), message)
    }

    /// 评估消息；已分组的规则返回整个分组的结果
    pub fn matches<S: RuleScope<K> + ?Sized>(&self, scope: &S, message: &Message) -> bool {
        match self.group {
            Some(group) => GroupEvaluator::evaluate(
                scope.group_members(group),
                scope.group_operation(group),
                message,
            ),
            None => self.matches_individual(message),
        }
    }

    /// 校验规则并更新 `is_valid` / `check_error`
    ///
    /// OTHER 字段名会被改写为规范化后的名称。持久化由调用方决定。
    pub fn validate(&mut self) -> ValidationResult {
        let mut check_error = None;

        if self.match_field.is_other() {
            let name = self
                .other_field_name
                .as_deref()
                .map(normalize_field_name)
                .unwrap_or_default();

            if name.is_empty() || !K::is_known_field(&name) {
                check_error = Some(K::unknown_field_error(&name));
            }
            self.other_field_name = if name.is_empty() { None } else { Some(name) };
        }

        if self.match_type.is_regex()
            && let Err(e) = regex::Regex::new(&self.match_value)
        {
            check_error = Some(format!(
                "Invalid regular expression “{}”: {}",
                self.match_value, e
            ));
        }

        self.is_valid = check_error.is_none();
        self.check_error = check_error;

        ValidationResult {
            is_valid: self.is_valid,
            check_error: self.check_error.clone(),
        }
    }

    /// 应用更新；任一被跟踪字段变化时重新校验，返回是否有变化
    pub fn apply_update(&mut self, update: RuleUpdate<K>) -> bool {
        let mut tracked_changed = false;
        let mut changed = false;

        if let Some(field) = update.match_field
            && field != self.match_field
        {
            self.match_field = field;
            tracked_changed = true;
        }
        if let Some(name) = update.other_field_name {
            let name = if name.trim().is_empty() { None } else { Some(name) };
            if name != self.other_field_name {
                self.other_field_name = name;
                tracked_changed = true;
            }
        }
        if let Some(match_type) = update.match_type
            && match_type != self.match_type
        {
            self.match_type = match_type;
            tracked_changed = true;
        }
        if let Some(value) = update.match_value
            && value != self.match_value
        {
            self.match_value = value;
            tracked_changed = true;
        }
        if let Some(case) = update.match_case
            && case != self.match_case
        {
            self.match_case = case;
            changed = true;
        }

        if tracked_changed {
            self.validate();
        }
        changed || tracked_changed
    }

    /// 对外表示，分组操作取自规则集的分组索引
    pub fn to_wire<S: RuleScope<K> + ?Sized>(&self, scope: &S) -> RuleWire<K> {
        let group_operation = self
            .group
            .map(|group| scope.group_operation(group))
            .unwrap_or_default();

        RuleWire {
            id: self.id,
            group: self.group,
            group_operation,
            position: self.position,
            match_field: self.match_field,
            other_field_name: self.other_field_name.clone(),
            match_type: self.match_type,
            match_value: self.match_value.clone(),
            match_case: self.match_case,
            is_valid: self.is_valid,
            check_error: self.check_error.clone(),
        }
    }
}

impl<K: MessageKind> RuleWire<K> {
    /// 转换为持久化行
    pub fn into_record(self, scope_id: ScopeId) -> RuleRecord {
        RuleRecord {
            id: self.id,
            scope_id,
            group_id: self.group,
            group_operation: self.group_operation.as_str().to_string(),
            match_field: self.match_field.as_str().to_string(),
            other_field_name: self.other_field_name,
            match_type: self.match_type.as_str().to_string(),
            match_value: self.match_value,
            match_case: self.match_case,
            is_valid: self.is_valid,
            check_error: self.check_error,
            position: self.position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{Mail, MailField, Twitter, TwitterField};
    use crate::scope::FeedRules;

    fn draft(field: MailField, match_type: MatchType, value: &str) -> RuleDraft<Mail> {
        RuleDraft {
            match_field: field,
            match_type,
            match_value: value.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_new_rule_defaults() {
        let rule = Rule::<Mail>::new(1, 10, RuleDraft::default());
        assert_eq!(rule.group, None);
        assert_eq!(rule.match_field, MailField::Subject);
        assert_eq!(rule.match_type, MatchType::Contains);
        assert!(!rule.match_case);
        assert!(rule.is_valid);
        assert!(rule.check_error.is_none());
    }

    #[test]
    fn test_other_field_is_normalized() {
        let mut d = draft(MailField::Other, MatchType::Contains, "x");
        d.other_field_name = Some("  X-Mailing-List: ".to_string());
        let rule = Rule::<Mail>::new(1, 10, d);

        assert!(rule.is_valid);
        assert_eq!(rule.other_field_name.as_deref(), Some("X-Mailing-List"));
        assert_eq!(rule.field_names(), vec!["X-Mailing-List"]);
    }

    #[test]
    fn test_unknown_other_field_is_invalid() {
        let mut d = draft(MailField::Other, MatchType::Contains, "x");
        d.other_field_name = Some("X-Made-Up".to_string());
        let rule = Rule::<Mail>::new(1, 10, d);

        assert!(!rule.is_valid);
        let error = rule.check_error.unwrap();
        assert!(error.contains("Unrecognized header name “X-Made-Up”"));

        let mut d = draft(MailField::Other, MatchType::Contains, "x");
        d.other_field_name = None;
        assert!(!Rule::<Mail>::new(2, 10, d).is_valid);
    }

    #[test]
    fn test_invalid_rule_never_matches() {
        let message = Message::new().with("Subject", "hello");
        for match_type in [
            MatchType::NContains,
            MatchType::NStarts,
            MatchType::NEnds,
            MatchType::NEquals,
            MatchType::Equals,
        ] {
            let mut d = draft(MailField::Other, match_type, "spam");
            d.other_field_name = Some("X-Made-Up".to_string());
            if match_type == MatchType::Equals {
                d.match_value = String::new();
            }
            let rule = Rule::<Mail>::new(1, 10, d);
            assert!(!rule.is_valid);
            assert!(!rule.matches_individual(&message), "{}", match_type);
        }
    }

    #[test]
    fn test_invalid_regex_sets_check_error() {
        let rule = Rule::<Mail>::new(1, 10, draft(MailField::Subject, MatchType::ReMatch, "(oops"));
        assert!(!rule.is_valid);
        assert!(
            rule.check_error
                .as_deref()
                .unwrap()
                .starts_with("Invalid regular expression “(oops”:")
        );

        // 非正则类型不编译模式
        let rule = Rule::<Mail>::new(2, 10, draft(MailField::Subject, MatchType::Contains, "(oops"));
        assert!(rule.is_valid);
    }

    #[test]
    fn test_update_revalidates_and_clears_error() {
        let mut rule =
            Rule::<Mail>::new(1, 10, draft(MailField::Subject, MatchType::ReMatch, "(oops"));
        assert!(!rule.is_valid);

        let changed = rule.apply_update(RuleUpdate {
            match_value: Some("(fixed)".to_string()),
            ..Default::default()
        });
        assert!(changed);
        assert!(rule.is_valid);
        assert!(rule.check_error.is_none());

        assert!(!rule.apply_update(RuleUpdate::default()));
    }

    #[test]
    fn test_update_recompiles_matcher() {
        let mut rule = Rule::<Mail>::new(1, 10, draft(MailField::Subject, MatchType::Contains, "rust"));
        let message = Message::new().with("Subject", "Rust weekly");
        assert!(rule.matches_individual(&message));

        rule.apply_update(RuleUpdate {
            match_case: Some(true),
            ..Default::default()
        });
        assert!(!rule.matches_individual(&message));
    }

    #[test]
    fn test_twitter_other_field_whitelist() {
        let rule = Rule::<Twitter>::new(
            1,
            10,
            RuleDraft {
                match_field: TwitterField::Other,
                other_field_name: Some("user_location:".to_string()),
                ..Default::default()
            },
        );
        assert!(rule.is_valid);
        assert_eq!(rule.other_field_name.as_deref(), Some("user_location"));
    }

    #[test]
    fn test_record_round_trip_rejects_bad_values() {
        let rule = Rule::<Mail>::new(7, 10, draft(MailField::List, MatchType::NEnds, ".org>"));
        let mut record = rule.to_record(GroupOperation::All);
        assert_eq!(record.match_type, "nends");
        assert_eq!(record.group_operation, "all");

        let (restored, op) = Rule::<Mail>::from_record(record.clone()).unwrap();
        assert_eq!(restored.match_field, MailField::List);
        assert_eq!(op, GroupOperation::All);

        record.match_field = "body".to_string();
        assert!(matches!(
            Rule::<Mail>::from_record(record),
            Err(RuleError::InvalidRecord(_))
        ));
    }

    #[test]
    fn test_to_wire_reads_group_index() {
        let mut scope = FeedRules::<Mail>::new(10);
        let (a, _) = scope.add_rule(RuleDraft::default()).unwrap();
        let (b, _) = scope.add_rule(RuleDraft::default()).unwrap();
        let mut rng = rand::rng();
        scope.merge(a, b, &mut rng, 30).unwrap();
        scope.switch(a).unwrap();

        let rule = scope.rule(b).unwrap();
        let wire = rule.to_wire(&scope);
        assert_eq!(wire.group_operation, GroupOperation::All);
        assert_eq!(wire.group, rule.group);

        let json = serde_json::to_value(&wire).unwrap();
        assert!(json.get("scope_id").is_none());
        assert!(json.get("matcher").is_none());
    }
}
