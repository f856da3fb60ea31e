//! 单条规则评估器
//!
//! 按字段名顺序读取消息字段，将每个候选值交给匹配器，首个命中即返回。

use crate::matcher::CompiledMatcher;
use crate::message::{FieldValue, Message};

/// 规则评估器
pub struct RuleEvaluator;

impl RuleEvaluator {
    /// 评估单条规则（不考虑分组）
    ///
    /// # Arguments
    /// * `field_names` - 按顺序检查的具体字段名
    /// * `matcher` - 编译后的匹配器
    /// * `message` - 待匹配的消息
    pub fn matches_individual<'a, I>(field_names: I, matcher: &CompiledMatcher, message: &Message) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        field_names
            .into_iter()
            .any(|name| Self::matches_field(message.get(name), matcher))
    }

    /// 评估单个字段，缺失字段视为空字符串
    fn matches_field(value: Option<&FieldValue>, matcher: &CompiledMatcher) -> bool {
        match value {
            None => matcher.matches(""),
            Some(value) => value
                .candidates()
                .iter()
                .any(|candidate| matcher.matches(candidate)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::MatchType;

    fn matcher(match_type: MatchType, value: &str) -> CompiledMatcher {
        CompiledMatcher::compile(match_type, value, false)
    }

    #[test]
    fn test_first_matching_field_wins() {
        let message = Message::new()
            .with("Sender", "list-bounces@example.org")
            .with("Reply-To", "owner@example.org");

        let names = ["From", "Sender", "Reply-To"];
        assert!(RuleEvaluator::matches_individual(
            names,
            &matcher(MatchType::Starts, "owner@"),
            &message
        ));
        assert!(!RuleEvaluator::matches_individual(
            names,
            &matcher(MatchType::Starts, "nobody@"),
            &message
        ));
    }

    #[test]
    fn test_absent_field_reads_as_empty() {
        let message = Message::new();
        assert!(RuleEvaluator::matches_individual(
            ["Subject"],
            &matcher(MatchType::NContains, "spam"),
            &message
        ));
        assert!(RuleEvaluator::matches_individual(
            ["Subject"],
            &matcher(MatchType::Equals, ""),
            &message
        ));
        assert!(!RuleEvaluator::matches_individual(
            ["Subject"],
            &matcher(MatchType::Contains, "x"),
            &message
        ));
    }

    #[test]
    fn test_display_name_and_address_joined() {
        let message = Message::new().with(
            "From",
            vec!["Alice".to_string(), "<alice@example.com>".to_string()],
        );
        assert!(RuleEvaluator::matches_individual(
            ["From"],
            &matcher(MatchType::Equals, "alice <alice@example.com>"),
            &message
        ));
    }

    #[test]
    fn test_multi_values_each_tested() {
        let message = Message::new().with(
            "To",
            vec!["a@example.com".to_string(), "b@example.org".to_string()],
        );
        assert!(RuleEvaluator::matches_individual(
            ["To"],
            &matcher(MatchType::Ends, "@example.org"),
            &message
        ));
    }

    #[test]
    fn test_empty_list_has_no_candidates() {
        let message = Message::new().with("To", Vec::<String>::new());
        // 空列表不产生候选值，取反类型也不会命中
        assert!(!RuleEvaluator::matches_individual(
            ["To"],
            &matcher(MatchType::NContains, "x"),
            &message
        ));
    }
}
