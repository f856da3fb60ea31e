//! 匹配器编译与缓存
//!
//! 将 (match_type, match_value, match_case) 编译为可重复使用的匹配器。
//! 大小写不敏感时模式在编译期统一转为小写，字段值在每次比较时转为小写；
//! 正则同样遵循该规则，不使用正则自身的忽略大小写标志。

use crate::operators::MatchType;
use parking_lot::RwLock;
use regex::Regex;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// 编译后的匹配模式
#[derive(Debug)]
enum Pattern {
    Literal(String),
    Regex(Regex),
    /// 正则编译失败，RE_MATCH 与 NRE_MATCH 都不匹配
    Broken,
}

/// 编译后的匹配器
#[derive(Debug)]
pub struct CompiledMatcher {
    match_type: MatchType,
    match_value: String,
    match_case: bool,
    pattern: Pattern,
}

impl CompiledMatcher {
    /// 编译匹配器
    pub fn compile(match_type: MatchType, match_value: &str, match_case: bool) -> Self {
        let normalized = normalize(match_value, match_case);

        let pattern = if match_type.is_regex() {
            compile_anchored(&normalized)
                .map(Pattern::Regex)
                .unwrap_or(Pattern::Broken)
        } else {
            Pattern::Literal(normalized.into_owned())
        };

        Self {
            match_type,
            match_value: match_value.to_string(),
            match_case,
            pattern,
        }
    }

    /// 缓存键是否与给定参数一致
    pub fn is_compiled_for(&self, match_type: MatchType, match_value: &str, match_case: bool) -> bool {
        self.match_type == match_type
            && self.match_case == match_case
            && self.match_value == match_value
    }

    /// 正则是否编译失败
    pub fn is_broken(&self) -> bool {
        matches!(self.pattern, Pattern::Broken)
    }

    /// 对单个候选值求值
    pub fn matches(&self, value: &str) -> bool {
        let value = normalize(value, self.match_case);

        let positive = match &self.pattern {
            Pattern::Broken => return false,
            Pattern::Regex(re) => re.is_match(&value),
            Pattern::Literal(pattern) => match self.match_type {
                MatchType::Contains | MatchType::NContains => value.contains(pattern.as_str()),
                MatchType::Starts | MatchType::NStarts => value.starts_with(pattern.as_str()),
                MatchType::Ends | MatchType::NEnds => value.ends_with(pattern.as_str()),
                MatchType::Equals | MatchType::NEquals => *value == **pattern,
                MatchType::ReMatch | MatchType::NReMatch => return false,
            },
        };

        positive != self.match_type.is_negated()
    }
}

/// 大小写归一化
fn normalize(value: &str, match_case: bool) -> Cow<'_, str> {
    if match_case {
        Cow::Borrowed(value)
    } else {
        Cow::Owned(value.to_lowercase())
    }
}

/// 编译锚定在值开头的正则
///
/// 先单独校验原始模式，避免 `a)|(b` 这类模式借助外层分组通过编译。
fn compile_anchored(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(pattern)?;
    Regex::new(&format!(r"\A(?:{})", pattern))
}

/// 每条规则私有的匹配器缓存
///
/// 参数变化后下一次匹配时重新编译。并发首次使用可能重复编译，结果一致。
#[derive(Default)]
pub struct MatcherCache {
    inner: RwLock<Option<Arc<CompiledMatcher>>>,
}

impl MatcherCache {
    pub fn get_or_compile(
        &self,
        match_type: MatchType,
        match_value: &str,
        match_case: bool,
    ) -> Arc<CompiledMatcher> {
        if let Some(cached) = self.inner.read().as_ref()
            && cached.is_compiled_for(match_type, match_value, match_case)
        {
            return Arc::clone(cached);
        }

        let compiled = Arc::new(CompiledMatcher::compile(match_type, match_value, match_case));
        *self.inner.write() = Some(Arc::clone(&compiled));
        compiled
    }

    /// 丢弃缓存的匹配器
    pub fn invalidate(&self) {
        *self.inner.write() = None;
    }
}

impl Clone for MatcherCache {
    fn clone(&self) -> Self {
        Self {
            inner: RwLock::new(self.inner.read().clone()),
        }
    }
}

impl fmt::Debug for MatcherCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cached = self.inner.read().is_some();
        f.debug_struct("MatcherCache").field("cached", &cached).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(match_type: MatchType, pattern: &str, case: bool, value: &str) -> bool {
        CompiledMatcher::compile(match_type, pattern, case).matches(value)
    }

    #[test]
    fn test_substring_and_negation() {
        assert!(check(MatchType::Contains, "news", false, "Daily NEWS letter"));
        assert!(!check(MatchType::NContains, "news", false, "Daily NEWS letter"));
        assert!(!check(MatchType::Contains, "news", true, "Daily NEWS letter"));
        assert!(check(MatchType::NContains, "news", true, "Daily NEWS letter"));
    }

    #[test]
    fn test_prefix_suffix_equality() {
        assert!(check(MatchType::Starts, "[list]", false, "[LIST] hello"));
        assert!(!check(MatchType::NStarts, "[list]", false, "[LIST] hello"));
        assert!(check(MatchType::Ends, "@example.com", false, "bob@Example.com"));
        assert!(check(MatchType::NEnds, "@example.org", false, "bob@example.com"));
        assert!(check(MatchType::Equals, "Hello", false, "hello"));
        assert!(!check(MatchType::Equals, "Hello", true, "hello"));
        assert!(check(MatchType::NEquals, "Hello", true, "hello"));
    }

    #[test]
    fn test_regex_is_anchored_at_start() {
        assert!(check(MatchType::ReMatch, "foo", false, "foobar"));
        assert!(!check(MatchType::ReMatch, "bar", false, "foobar"));
        assert!(check(MatchType::ReMatch, ".*bar", false, "foobar"));
        // 交替分支同样锚定
        assert!(!check(MatchType::ReMatch, "x|bar", false, "foobar"));
    }

    #[test]
    fn test_regex_negation_is_exact() {
        for value in ["foobar", "FOOBAR", "barfoo", ""] {
            let positive = check(MatchType::ReMatch, "foo", false, value);
            let negative = check(MatchType::NReMatch, "foo", false, value);
            assert_ne!(positive, negative, "value: {}", value);
        }
    }

    #[test]
    fn test_regex_case_folding_lowercases_pattern() {
        assert!(check(MatchType::ReMatch, "FOO", false, "foo"));
        assert!(check(MatchType::ReMatch, "foo", false, "FOO"));
        assert!(!check(MatchType::ReMatch, "FOO", true, "foo"));
    }

    #[test]
    fn test_broken_regex_never_matches() {
        let matcher = CompiledMatcher::compile(MatchType::ReMatch, "(unclosed", false);
        assert!(matcher.is_broken());
        assert!(!matcher.matches("(unclosed"));

        let matcher = CompiledMatcher::compile(MatchType::NReMatch, "(unclosed", false);
        assert!(!matcher.matches("anything"));

        // 借助外层分组才能通过编译的模式也视为无效
        assert!(CompiledMatcher::compile(MatchType::ReMatch, "a)|(b", false).is_broken());
    }

    #[test]
    fn test_cache_recompiles_on_change() {
        let cache = MatcherCache::default();
        let first = cache.get_or_compile(MatchType::Contains, "a", false);
        let second = cache.get_or_compile(MatchType::Contains, "a", false);
        assert!(Arc::ptr_eq(&first, &second));

        let third = cache.get_or_compile(MatchType::Contains, "a", true);
        assert!(!Arc::ptr_eq(&first, &third));

        let fourth = cache.get_or_compile(MatchType::Equals, "a", true);
        assert!(!third.matches("ab"));
        assert!(!fourth.matches("ab"));
        assert!(fourth.matches("a"));

        cache.invalidate();
        let fifth = cache.get_or_compile(MatchType::Equals, "a", true);
        assert!(!Arc::ptr_eq(&fourth, &fifth));
    }
}
