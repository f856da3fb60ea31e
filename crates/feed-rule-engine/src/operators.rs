//! 规则操作符定义

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 匹配类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    // 子串
    #[default]
    Contains,
    #[serde(rename = "ncontains")]
    NContains,

    // 前缀 / 后缀
    Starts,
    #[serde(rename = "nstarts")]
    NStarts,
    Ends,
    #[serde(rename = "nends")]
    NEnds,

    // 完全相等
    Equals,
    #[serde(rename = "nequals")]
    NEquals,

    // 正则（从值的开头匹配）
    ReMatch,
    #[serde(rename = "nre_match")]
    NReMatch,
}

impl MatchType {
    pub const ALL: [MatchType; 10] = [
        Self::Contains,
        Self::NContains,
        Self::Starts,
        Self::NStarts,
        Self::Ends,
        Self::NEnds,
        Self::Equals,
        Self::NEquals,
        Self::ReMatch,
        Self::NReMatch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contains => "contains",
            Self::NContains => "ncontains",
            Self::Starts => "starts",
            Self::NStarts => "nstarts",
            Self::Ends => "ends",
            Self::NEnds => "nends",
            Self::Equals => "equals",
            Self::NEquals => "nequals",
            Self::ReMatch => "re_match",
            Self::NReMatch => "nre_match",
        }
    }

    /// 是否需要编译正则
    pub fn is_regex(&self) -> bool {
        matches!(self, Self::ReMatch | Self::NReMatch)
    }

    /// 是否为取反类型
    pub fn is_negated(&self) -> bool {
        matches!(
            self,
            Self::NContains | Self::NStarts | Self::NEnds | Self::NEquals | Self::NReMatch
        )
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("未知的匹配类型: {}", s))
    }
}

/// 分组逻辑操作
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupOperation {
    #[default]
    Any,
    All,
}

impl GroupOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::All => "all",
        }
    }

    /// 切换到下一个操作：ANY -> ALL -> ANY
    pub fn next(self) -> Self {
        match self {
            Self::Any => Self::All,
            Self::All => Self::Any,
        }
    }
}

impl fmt::Display for GroupOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "ANY"),
            Self::All => write!(f, "ALL"),
        }
    }
}

impl FromStr for GroupOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "any" => Ok(Self::Any),
            "all" => Ok(Self::All),
            _ => Err(format!("未知的分组操作: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_type_serde_names() {
        assert_eq!(
            serde_json::to_string(&MatchType::NContains).unwrap(),
            "\"ncontains\""
        );
        assert_eq!(
            serde_json::to_string(&MatchType::ReMatch).unwrap(),
            "\"re_match\""
        );
        let parsed: MatchType = serde_json::from_str("\"nre_match\"").unwrap();
        assert_eq!(parsed, MatchType::NReMatch);
    }

    #[test]
    fn test_match_type_from_str() {
        for t in MatchType::ALL {
            assert_eq!(t.as_str().parse::<MatchType>().unwrap(), t);
        }
        assert_eq!("CONTAINS".parse::<MatchType>().unwrap(), MatchType::Contains);
        assert!("like".parse::<MatchType>().is_err());
    }

    #[test]
    fn test_group_operation_cycle() {
        assert_eq!(GroupOperation::default(), GroupOperation::Any);
        assert_eq!(GroupOperation::Any.next(), GroupOperation::All);
        assert_eq!(GroupOperation::All.next(), GroupOperation::Any);
        assert_eq!(GroupOperation::All.to_string(), "ALL");
        assert_eq!("ANY".parse::<GroupOperation>().unwrap(), GroupOperation::Any);
    }
}
