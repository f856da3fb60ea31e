//! 分组执行器
//!
//! 对同组规则做短路求值：ANY 遇到首个命中即返回 true，ALL 遇到首个未命中即返回 false。

use crate::fields::MessageKind;
use crate::message::Message;
use crate::models::{Rule, RuleId};
use crate::operators::GroupOperation;
use serde::Serialize;

/// 分组评估器
pub struct GroupEvaluator;

impl GroupEvaluator {
    /// 评估一组规则
    ///
    /// 成员应已按 (position, id) 排序。空成员集合：ANY 为 false，ALL 为 true。
    pub fn evaluate<'a, K, I>(members: I, operation: GroupOperation, message: &Message) -> bool
    where
        K: MessageKind,
        I: IntoIterator<Item = &'a Rule<K>>,
    {
        let mut members = members.into_iter();
        match operation {
            GroupOperation::Any => members.any(|rule| rule.matches_individual(message)),
            GroupOperation::All => members.all(|rule| rule.matches_individual(message)),
        }
    }
}

/// feed 级匹配结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeedMatch {
    pub matched: bool,
    /// ANY：命中单元内的规则；ALL：全部有效规则，未命中时为空
    pub matched_rules: Vec<RuleId>,
}

impl FeedMatch {
    pub fn no_match() -> Self {
        Self::default()
    }

    pub fn matched(rules: Vec<RuleId>) -> Self {
        Self {
            matched: true,
            matched_rules: rules,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{Mail, MailField};
    use crate::models::RuleDraft;
    use crate::operators::MatchType;

    fn rule(id: RuleId, field: MailField, match_type: MatchType, value: &str) -> Rule<Mail> {
        Rule::new(
            id,
            1,
            RuleDraft {
                match_field: field,
                match_type,
                match_value: value.to_string(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_any_and_all() {
        let rules = vec![
            rule(1, MailField::Subject, MatchType::Contains, "release"),
            rule(2, MailField::From, MatchType::Ends, "@example.com"),
        ];
        let message = Message::new()
            .with("Subject", "Release 2.0")
            .with("From", "bot@example.org");

        assert!(GroupEvaluator::evaluate(&rules, GroupOperation::Any, &message));
        assert!(!GroupEvaluator::evaluate(&rules, GroupOperation::All, &message));

        let message = message.with("From", "bot@example.com");
        assert!(GroupEvaluator::evaluate(&rules, GroupOperation::All, &message));
    }

    #[test]
    fn test_empty_members() {
        let rules: Vec<Rule<Mail>> = Vec::new();
        let message = Message::new();
        assert!(!GroupEvaluator::evaluate(&rules, GroupOperation::Any, &message));
        assert!(GroupEvaluator::evaluate(&rules, GroupOperation::All, &message));
    }
}
