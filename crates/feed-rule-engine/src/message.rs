//! 消息模型与适配器
//!
//! 消息是字段名到字段值的映射，字段名大小写不敏感。
//! 提供从 JSON、RFC 822 原始邮件和 Twitter API 推文构建消息的适配器。

use crate::error::{Result, RuleError};
use crate::fields::*;
use mail_parser::{Addr, Address, HeaderValue, MessageParser};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::collections::HashMap;

/// 字段值
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Scalar(String),
    Multi(Vec<String>),
    PairList(Vec<(String, String)>),
}

impl FieldValue {
    /// 依次参与匹配的候选字符串
    ///
    /// 恰好两个元素且第二个以 `<` 开头时视为「显示名 + 地址」，合并为一个候选。
    pub fn candidates(&self) -> Vec<Cow<'_, str>> {
        match self {
            Self::Scalar(value) => vec![Cow::Borrowed(value.as_str())],
            Self::Multi(values) => {
                if let [name, address] = values.as_slice()
                    && address.starts_with('<')
                {
                    vec![Cow::Owned(format!("{} {}", name, address))]
                } else {
                    values.iter().map(|v| Cow::Borrowed(v.as_str())).collect()
                }
            }
            Self::PairList(pairs) => pairs
                .iter()
                .map(|(a, b)| Cow::Owned(format!("{} {}", a, b)))
                .collect(),
        }
    }

    /// 从 JSON 值转换，不支持的结构返回 None
    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::Scalar(s.clone())),
            Value::Number(n) => Some(Self::Scalar(n.to_string())),
            Value::Bool(b) => Some(Self::Scalar(b.to_string())),
            Value::Array(items) => {
                if items.iter().all(Value::is_string) {
                    Some(Self::Multi(
                        items
                            .iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect(),
                    ))
                } else {
                    items
                        .iter()
                        .map(|item| match item.as_array().map(Vec::as_slice) {
                            Some([Value::String(a), Value::String(b)]) => {
                                Some((a.clone(), b.clone()))
                            }
                            _ => None,
                        })
                        .collect::<Option<Vec<_>>>()
                        .map(Self::PairList)
                }
            }
            Value::Null | Value::Object(_) => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Scalar(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Scalar(value)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(values: Vec<String>) -> Self {
        Self::Multi(values)
    }
}

impl From<Vec<(String, String)>> for FieldValue {
    fn from(pairs: Vec<(String, String)>) -> Self {
        Self::PairList(pairs)
    }
}

/// 待匹配的消息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    fields: HashMap<String, FieldValue>,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置字段，同名字段（大小写不敏感）被覆盖
    pub fn insert(&mut self, name: &str, value: impl Into<FieldValue>) {
        self.fields.insert(name.to_lowercase(), value.into());
    }

    /// 链式设置字段
    pub fn with(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// 仅在字段不存在时设置
    fn insert_first(&mut self, name: &str, value: FieldValue) {
        self.fields.entry(name.to_lowercase()).or_insert(value);
    }

    /// 按名称读取字段（大小写不敏感）
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(&name.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// 从 JSON 对象构建消息
    ///
    /// 值可以是字符串、字符串数组，或由两元素字符串数组组成的数组；null 被忽略。
    pub fn from_json(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| RuleError::MessageParse("消息必须是 JSON 对象".to_string()))?;

        let mut message = Self::new();
        for (name, raw) in object {
            if raw.is_null() {
                continue;
            }
            let value = FieldValue::from_json(raw).ok_or_else(|| {
                RuleError::MessageParse(format!("字段 '{}' 的值类型不受支持", name))
            })?;
            message.insert(name, value);
        }
        Ok(message)
    }

    /// 从 RFC 822 原始邮件构建消息，同名邮件头仅保留第一次出现的值
    pub fn from_rfc822(raw: &[u8]) -> Result<Self> {
        let parsed = MessageParser::default()
            .parse(raw)
            .ok_or_else(|| RuleError::MessageParse("无法解析邮件".to_string()))?;

        let mut message = Self::new();
        for header in parsed.headers() {
            if let Some(value) = header_value(header.value()) {
                message.insert_first(header.name(), value);
            }
        }
        Ok(message)
    }

    /// 从 Twitter API 推文载荷构建消息
    pub fn from_tweet(tweet: &Value) -> Result<Self> {
        if !tweet.is_object() {
            return Err(RuleError::MessageParse("推文必须是 JSON 对象".to_string()));
        }

        let mut message = Self::new();
        let mut put = |name: &str, value: Option<&str>| {
            if let Some(value) = value {
                message.insert(name, value);
            }
        };

        put(TWEET_TEXT, str_at(tweet, &["text"]));
        put(TWEET_FULL_TEXT, str_at(tweet, &["full_text"]));
        put(TWEET_LANG, str_at(tweet, &["lang"]));
        put(TWEET_SOURCE, str_at(tweet, &["source"]));
        put(TWEET_CREATED_AT, str_at(tweet, &["created_at"]));
        put(TWEET_SCREEN_NAME, str_at(tweet, &["user", "screen_name"]));
        put(TWEET_USER_NAME, str_at(tweet, &["user", "name"]));
        put(TWEET_USER_DESCRIPTION, str_at(tweet, &["user", "description"]));
        put(TWEET_USER_LOCATION, str_at(tweet, &["user", "location"]));
        put(
            TWEET_IN_REPLY_TO,
            str_at(tweet, &["in_reply_to_screen_name"]),
        );
        put(TWEET_PLACE, str_at(tweet, &["place", "full_name"]));
        put(TWEET_QUOTED_TEXT, status_text(tweet, "quoted_status"));
        put(TWEET_RETWEETED_TEXT, status_text(tweet, "retweeted_status"));

        let entities = &tweet["entities"];
        let lists = [
            (TWEET_HASHTAGS, "hashtags", "text"),
            (TWEET_MENTIONS, "user_mentions", "screen_name"),
            (TWEET_URLS, "urls", "url"),
            (TWEET_EXPANDED_URLS, "urls", "expanded_url"),
        ];
        for (field, entity, key) in lists {
            let values: Vec<String> = entities[entity]
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| item[key].as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            if !values.is_empty() {
                message.insert(field, values);
            }
        }

        Ok(message)
    }
}

/// 按路径读取字符串
fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(value, |current, key| current.get(key))
        .and_then(Value::as_str)
}

/// 引用或转推的正文，优先 full_text
fn status_text<'a>(tweet: &'a Value, key: &str) -> Option<&'a str> {
    str_at(tweet, &[key, "full_text"]).or_else(|| str_at(tweet, &[key, "text"]))
}

/// 将邮件头转换为字段值，Received 与空值被跳过
fn header_value(value: &HeaderValue<'_>) -> Option<FieldValue> {
    match value {
        HeaderValue::Address(address) => address_value(address),
        HeaderValue::Text(text) => Some(FieldValue::Scalar(text.to_string())),
        HeaderValue::TextList(texts) => Some(FieldValue::Multi(
            texts.iter().map(|t| t.to_string()).collect(),
        )),
        HeaderValue::DateTime(datetime) => Some(FieldValue::Scalar(datetime.to_rfc822())),
        HeaderValue::ContentType(ctype) => Some(FieldValue::Scalar(match ctype.subtype() {
            Some(subtype) => format!("{}/{}", ctype.ctype(), subtype),
            None => ctype.ctype().to_string(),
        })),
        _ => None,
    }
}

/// 地址头转换
///
/// - 单个带显示名的邮箱：`Multi([name, "<addr>"])`
/// - 多个邮箱且都有显示名：`PairList`
/// - 其余情况：每个邮箱一个候选
fn address_value(address: &Address<'_>) -> Option<FieldValue> {
    let addrs: Vec<&Addr<'_>> = match address {
        Address::List(list) => list.iter().collect(),
        Address::Group(groups) => groups.iter().flat_map(|g| g.addresses.iter()).collect(),
    };

    let named = |addr: &Addr<'_>| -> Option<(String, String)> {
        match (addr.name.as_deref(), addr.address.as_deref()) {
            (Some(name), Some(email)) if !name.is_empty() => {
                Some((name.to_string(), format!("<{}>", email)))
            }
            _ => None,
        }
    };

    match addrs.as_slice() {
        [] => None,
        [single] => Some(match named(single) {
            Some((name, email)) => FieldValue::Multi(vec![name, email]),
            None => FieldValue::Scalar(display_addr(single)),
        }),
        many => {
            let pairs: Option<Vec<_>> = many.iter().map(|addr| named(addr)).collect();
            Some(match pairs {
                Some(pairs) => FieldValue::PairList(pairs),
                None => FieldValue::Multi(many.iter().map(|addr| display_addr(addr)).collect()),
            })
        }
    }
}

fn display_addr(addr: &Addr<'_>) -> String {
    match (addr.name.as_deref(), addr.address.as_deref()) {
        (Some(name), Some(email)) if !name.is_empty() => format!("{} <{}>", name, email),
        (_, Some(email)) => email.to_string(),
        (Some(name), None) => name.to_string(),
        (None, None) => String::new(),
    }
}
