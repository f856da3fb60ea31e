//! 消息类型与匹配字段
//!
//! 每种消息类型提供自己的匹配字段枚举、字段到具体字段名的映射，
//! 以及 OTHER 字段可用名称的白名单。

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::hash::Hash;

/// 匹配字段
pub trait MatchField:
    Copy + Debug + Default + PartialEq + Eq + Hash + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// 全部取值
    const ALL: &'static [Self];

    fn as_str(&self) -> &'static str;

    /// 是否为用户自定义字段
    fn is_other(&self) -> bool;

    /// 按顺序检查的具体字段名，OTHER 返回空切片
    fn field_names(&self) -> &'static [&'static str];

    fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.as_str().eq_ignore_ascii_case(value))
    }
}

/// 消息类型
pub trait MessageKind:
    Copy + Debug + Default + PartialEq + Eq + Send + Sync + 'static
{
    type Field: MatchField;

    /// 用于指标标签与持久化的类型名
    const NAME: &'static str;

    /// OTHER 字段允许使用的名称
    fn valid_other_fields() -> &'static [&'static str];

    /// 字段名是否在白名单中（大小写不敏感）
    fn is_known_field(name: &str) -> bool {
        Self::valid_other_fields()
            .iter()
            .any(|known| known.eq_ignore_ascii_case(name))
    }

    /// OTHER 字段名无法识别时的提示
    fn unknown_field_error(name: &str) -> String;
}

// ==================== 邮件 ====================

const MAIL_SUBJECT: &[&str] = &["Subject"];

const MAIL_FROM: &[&str] = &[
    "From",
    "Sender",
    "X-Envelope-From",
    "X-Sender",
    "X-X-Sender",
    "Reply-To",
    "Mail-Reply-To",
    "Mail-Followup-To",
    "Resent-From",
];

const MAIL_TO: &[&str] = &[
    "To",
    "Cc",
    "Bcc",
    "Delivered-To",
    "X-Loop",
    "Resent-To",
    "Resent-Cc",
    "Resent-Bcc",
];

const MAIL_LIST: &[&str] = &["Mailing-List", "List-ID", "X-Mailing-List", "List-URL"];

const MAIL_COMMON: &[&str] = &[
    "Subject",
    "From",
    "Sender",
    "X-Envelope-From",
    "X-Sender",
    "X-X-Sender",
    "Reply-To",
    "Mail-Reply-To",
    "Mail-Followup-To",
    "Resent-From",
    "To",
    "Cc",
    "Bcc",
    "Delivered-To",
    "X-Loop",
    "Resent-To",
    "Resent-Cc",
    "Resent-Bcc",
];

/// 可识别的 SMTP / RFC 邮件头
pub const MAIL_VALID_HEADERS: &[&str] = &[
    "DL-Expansion-History",
    "Path",
    "Received",
    "Return-Path",
    "NNTP-Posting-Host",
    "Also-Control",
    "Alternate-Recipient",
    "Content-Disposition",
    "Message-Context",
    "Control",
    "Disclose-Recipients",
    "MIME-Version",
    "Apparently-To",
    "Approved",
    "Approved-By",
    "bcc",
    "cc",
    "Distribution",
    "Fax",
    "Telefax",
    "For-Approval",
    "For-Comment",
    "For-Handling",
    "Newsgroups",
    "Originator",
    "Originator-Info",
    "Phone",
    "Sender",
    "To",
    "X-Envelope-From",
    "X-Envelope-To",
    "Envelope-To",
    "X-Face",
    "X-RCPT-TO",
    "X-Sender",
    "X-X-Sender",
    "Posted-To",
    "X-Admin",
    "Content-Return",
    "Disposition-Notification-Options",
    "Disposition-Notification-To",
    "Errors-To",
    "Return-Receipt-To",
    "Read-Receipt-To",
    "X-Confirm-reading-to",
    "Return-Receipt-Requested",
    "Registered-Mail-Reply-Requested-By",
    "Followup-To",
    "Generate-Delivery-Report",
    "Original-Recipient",
    "Prevent-NonDelivery-Report",
    "Reply-To",
    "Mail-Followup-To",
    "Mail-Reply-To",
    "Abuse-Reports-To",
    "X-Complaints-To",
    "X-Report-Abuse-To",
    "Mail-Copies-To",
    "X400-Content-Return",
    "Article-Names",
    "Article-Updates",
    "Content-Alias",
    "Content-Base",
    "Content-ID",
    "Content-Location",
    "Delivered-To",
    "X-Loop",
    "In-Reply-To",
    "Message-ID",
    "Obsoletes",
    "References",
    "Replaces",
    "See-Also",
    "Supersedes",
    "Translated-By",
    "Translation-Of",
    "X-UIDL",
    "X-URI",
    "X-URL",
    "X-IMAP",
    "Comments",
    "Content-Description",
    "Content-Identifier",
    "Keywords",
    "Organisation",
    "Organization",
    "Subject",
    "Summary",
    "Date",
    "Delivery-Date",
    "Expires",
    "Expiry-Date",
    "Reply-By",
    "X-OriginalArrivalTime",
    "Importance",
    "Incomplete-Copy",
    "PICS-Label",
    "Precedence",
    "Priority",
    "Sensitivity",
    "X-MSMail-Priority",
    "X-Priority",
    "Content-Language",
    "Language",
    "Content-Length",
    "Lines",
    "Content-Alternative",
    "Content-Conversion",
    "Conversion",
    "Conversion-With-Loss",
    "Content-Class",
    "Content-Features",
    "Content-SGML-Entity",
    "Content-Transfer-Encoding",
    "Content-Type",
    "Encoding",
    "Message-Type",
    "X-MIME-Autoconverted",
    "Resent-Reply-To",
    "Resent-From",
    "Resent-Sender",
    "Resent-Date",
    "Resent-To",
    "Resent-Cc",
    "Resent-Bcc",
    "Resent-Message-ID",
    "Content-MD5",
    "Xref",
    "Cancel-Lock",
    "Cancel-Key",
    "List-Archive",
    "List-Digest",
    "List-Help",
    "List-ID",
    "Mailing-List",
    "X-Mailing-List",
    "List-Owner",
    "List-Post",
    "List-Software",
    "List-Subscribe",
    "List-Unsubscribe",
    "List-URL",
    "X-Listserver",
    "X-List-Host",
    "Autoforwarded",
    "Discarded-X400-IPMS-Extensions",
    "Discarded-X400-MTS-Extensions",
    "Fcc",
    "Speech-Act",
    "Status",
    "X-No-Archive",
];

/// 邮件匹配字段
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailField {
    #[default]
    Subject,
    From,
    To,
    Common,
    List,
    Other,
}

impl MatchField for MailField {
    const ALL: &'static [Self] = &[
        Self::Subject,
        Self::From,
        Self::To,
        Self::Common,
        Self::List,
        Self::Other,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            Self::Subject => "subject",
            Self::From => "from",
            Self::To => "to",
            Self::Common => "common",
            Self::List => "list",
            Self::Other => "other",
        }
    }

    fn is_other(&self) -> bool {
        matches!(self, Self::Other)
    }

    fn field_names(&self) -> &'static [&'static str] {
        match self {
            Self::Subject => MAIL_SUBJECT,
            Self::From => MAIL_FROM,
            Self::To => MAIL_TO,
            Self::Common => MAIL_COMMON,
            Self::List => MAIL_LIST,
            Self::Other => &[],
        }
    }
}

/// 邮件消息类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Mail;

impl MessageKind for Mail {
    type Field = MailField;
    const NAME: &'static str = "mail";

    fn valid_other_fields() -> &'static [&'static str] {
        MAIL_VALID_HEADERS
    }

    fn unknown_field_error(name: &str) -> String {
        format!(
            "Unrecognized header name “{}”. Please look at http://bit.ly/smtp-headers \
             to find a list of valid headers. Perhaps just a typo?",
            name
        )
    }
}

// ==================== Twitter ====================

pub const TWEET_TEXT: &str = "text";
pub const TWEET_FULL_TEXT: &str = "full_text";
pub const TWEET_LANG: &str = "lang";
pub const TWEET_SOURCE: &str = "source";
pub const TWEET_CREATED_AT: &str = "created_at";
pub const TWEET_SCREEN_NAME: &str = "screen_name";
pub const TWEET_USER_NAME: &str = "user_name";
pub const TWEET_USER_DESCRIPTION: &str = "user_description";
pub const TWEET_USER_LOCATION: &str = "user_location";
pub const TWEET_HASHTAGS: &str = "hashtags";
pub const TWEET_MENTIONS: &str = "mentions";
pub const TWEET_URLS: &str = "urls";
pub const TWEET_EXPANDED_URLS: &str = "expanded_urls";
pub const TWEET_IN_REPLY_TO: &str = "in_reply_to_screen_name";
pub const TWEET_QUOTED_TEXT: &str = "quoted_text";
pub const TWEET_RETWEETED_TEXT: &str = "retweeted_text";
pub const TWEET_PLACE: &str = "place";

/// 推文适配器输出的全部字段名
pub const TWEET_FIELDS: &[&str] = &[
    TWEET_TEXT,
    TWEET_FULL_TEXT,
    TWEET_LANG,
    TWEET_SOURCE,
    TWEET_CREATED_AT,
    TWEET_SCREEN_NAME,
    TWEET_USER_NAME,
    TWEET_USER_DESCRIPTION,
    TWEET_USER_LOCATION,
    TWEET_HASHTAGS,
    TWEET_MENTIONS,
    TWEET_URLS,
    TWEET_EXPANDED_URLS,
    TWEET_IN_REPLY_TO,
    TWEET_QUOTED_TEXT,
    TWEET_RETWEETED_TEXT,
    TWEET_PLACE,
];

const TWITTER_TEXT: &[&str] = &[TWEET_TEXT, TWEET_FULL_TEXT];
const TWITTER_AUTHOR: &[&str] = &[TWEET_SCREEN_NAME, TWEET_USER_NAME];
const TWITTER_MENTIONS: &[&str] = &[TWEET_MENTIONS];
const TWITTER_HASHTAGS: &[&str] = &[TWEET_HASHTAGS];
const TWITTER_URLS: &[&str] = &[TWEET_URLS, TWEET_EXPANDED_URLS];
const TWITTER_COMMON: &[&str] = &[
    TWEET_TEXT,
    TWEET_FULL_TEXT,
    TWEET_SCREEN_NAME,
    TWEET_USER_NAME,
    TWEET_MENTIONS,
    TWEET_HASHTAGS,
];

/// 推文匹配字段
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TwitterField {
    #[default]
    Text,
    Author,
    Mentions,
    Hashtags,
    Urls,
    Common,
    Other,
}

impl MatchField for TwitterField {
    const ALL: &'static [Self] = &[
        Self::Text,
        Self::Author,
        Self::Mentions,
        Self::Hashtags,
        Self::Urls,
        Self::Common,
        Self::Other,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Author => "author",
            Self::Mentions => "mentions",
            Self::Hashtags => "hashtags",
            Self::Urls => "urls",
            Self::Common => "common",
            Self::Other => "other",
        }
    }

    fn is_other(&self) -> bool {
        matches!(self, Self::Other)
    }

    fn field_names(&self) -> &'static [&'static str] {
        match self {
            Self::Text => TWITTER_TEXT,
            Self::Author => TWITTER_AUTHOR,
            Self::Mentions => TWITTER_MENTIONS,
            Self::Hashtags => TWITTER_HASHTAGS,
            Self::Urls => TWITTER_URLS,
            Self::Common => TWITTER_COMMON,
            Self::Other => &[],
        }
    }
}

/// 推文消息类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Twitter;

impl MessageKind for Twitter {
    type Field = TwitterField;
    const NAME: &'static str = "twitter";

    fn valid_other_fields() -> &'static [&'static str] {
        TWEET_FIELDS
    }

    fn unknown_field_error(name: &str) -> String {
        format!(
            "Unrecognized field name “{}”. Valid fields are: {}. Perhaps just a typo?",
            name,
            TWEET_FIELDS.join(", ")
        )
    }
}
