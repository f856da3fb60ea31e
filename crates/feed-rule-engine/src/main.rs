//! Feed 规则命令行工具
//!
//! 对规则文件或数据库中的规则集评估消息、校验规则文件、执行数据库迁移。

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use feed_rules::{
    FeedRuleService, GroupOperation, GroupSettings, MIGRATOR, Mail, MemoryRuleRepository,
    Message, MessageKind, PgRuleRepository, RuleRepository, RuleWire, RuleWrite, ScopeId,
    Twitter,
};
use feedrules_shared::config::AppConfig;
use feedrules_shared::database::Database;
use feedrules_shared::observability;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "feed-rules", version, about = "Feed 规则引擎命令行工具")]
struct Cli {
    /// 命令结束后输出 Prometheus 指标快照
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 对规则文件评估一条消息
    Evaluate {
        #[arg(long, value_enum, default_value_t = Kind::Mail)]
        kind: Kind,

        #[command(flatten)]
        source: RulesSource,

        #[command(flatten)]
        input: MessageInput,
    },
    /// 校验规则文件中的每条规则
    Validate {
        #[arg(long, value_enum, default_value_t = Kind::Mail)]
        kind: Kind,

        #[arg(long)]
        rules: PathBuf,
    },
    /// 执行 PostgreSQL 迁移
    Migrate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Kind {
    Mail,
    Twitter,
}

/// 规则来源：规则文件或数据库中的规则集
#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
struct RulesSource {
    /// 规则文件（JSON）
    #[arg(long)]
    rules: Option<PathBuf>,

    /// 从 PostgreSQL 加载的规则集 ID
    #[arg(long)]
    scope: Option<ScopeId>,
}

/// 消息来源，三选一
#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
struct MessageInput {
    /// JSON 对象形式的消息
    #[arg(long)]
    message: Option<PathBuf>,

    /// RFC 822 原始邮件
    #[arg(long)]
    eml: Option<PathBuf>,

    /// Twitter API 推文载荷
    #[arg(long)]
    tweet: Option<PathBuf>,
}

/// 规则文件
#[derive(Debug, Deserialize)]
#[serde(bound = "")]
struct RulesFile<K: MessageKind> {
    #[serde(default = "default_scope_id")]
    scope_id: ScopeId,
    #[serde(default)]
    rules_operation: GroupOperation,
    #[serde(default)]
    rules: Vec<RuleWire<K>>,
}

fn default_scope_id() -> ScopeId {
    1
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = AppConfig::load("feed-rules").unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });
    let _guard = observability::init(&config.observability, &config.service_name)?;

    let code = match cli.command {
        Command::Evaluate {
            kind,
            source,
            input,
        } => {
            let message_source = read_input(&input)?;
            let output = match kind {
                Kind::Mail => evaluate::<Mail>(&source, &config, &message_source).await?,
                Kind::Twitter => evaluate::<Twitter>(&source, &config, &message_source).await?,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
            ExitCode::SUCCESS
        }
        Command::Validate { kind, rules } => {
            let all_valid = match kind {
                Kind::Mail => validate::<Mail>(&rules)?,
                Kind::Twitter => validate::<Twitter>(&rules)?,
            };
            if all_valid {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Command::Migrate => {
            let db = Database::connect(&config.database).await?;
            db.run_migrations(&MIGRATOR)
                .await
                .context("数据库迁移失败")?;
            db.close().await;
            ExitCode::SUCCESS
        }
    };

    if cli.metrics {
        match observability::metrics::render() {
            Some(snapshot) => print!("{}", snapshot),
            None => warn!("Metrics recorder is disabled, no snapshot available"),
        }
    }

    Ok(code)
}

/// 已读取的消息来源
enum MessageSource {
    Json(serde_json::Value),
    Rfc822(Vec<u8>),
    Tweet(serde_json::Value),
}

fn read_input(input: &MessageInput) -> Result<MessageSource> {
    if let Some(path) = &input.message {
        return Ok(MessageSource::Json(read_json(path)?));
    }
    if let Some(path) = &input.eml {
        let raw = std::fs::read(path).with_context(|| format!("无法读取 {}", path.display()))?;
        return Ok(MessageSource::Rfc822(raw));
    }
    if let Some(path) = &input.tweet {
        return Ok(MessageSource::Tweet(read_json(path)?));
    }
    anyhow::bail!("必须指定 --message、--eml 或 --tweet 之一")
}

fn read_json(path: &Path) -> Result<serde_json::Value> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("无法读取 {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("无法解析 {}", path.display()))
}

fn read_rules<K: MessageKind>(path: &Path) -> Result<RulesFile<K>> {
    let value = read_json(path)?;
    serde_json::from_value(value).with_context(|| format!("规则文件格式错误: {}", path.display()))
}

/// 打开规则来源：规则文件载入内存仓储，规则集 ID 使用 PostgreSQL 仓储
async fn open_repository<K: MessageKind>(
    source: &RulesSource,
    config: &AppConfig,
) -> Result<(Arc<dyn RuleRepository>, ScopeId, Option<Database>)> {
    if let Some(scope_id) = source.scope {
        let db = Database::connect(&config.database).await?;
        let repository = PgRuleRepository::new(db.pool().clone());
        return Ok((Arc::new(repository), scope_id, Some(db)));
    }

    let path = source
        .rules
        .as_deref()
        .context("必须指定 --rules 或 --scope 之一")?;
    let file = read_rules::<K>(path)?;
    let scope_id = file.scope_id;

    let repository = MemoryRuleRepository::new();
    repository.seed(
        K::NAME,
        file.rules
            .into_iter()
            .map(|wire| wire.into_record(scope_id))
            .collect(),
    );
    repository
        .apply_changes(
            K::NAME,
            scope_id,
            &[RuleWrite::RulesOperation(file.rules_operation)],
        )
        .await?;

    Ok((Arc::new(repository), scope_id, None))
}

/// 加载规则集并评估消息
async fn evaluate<K: MessageKind>(
    source: &RulesSource,
    config: &AppConfig,
    message_source: &MessageSource,
) -> Result<serde_json::Value> {
    let (repository, scope_id, db) = open_repository::<K>(source, config).await?;

    let service = FeedRuleService::<K>::new(repository, GroupSettings::from(&config.rules));
    let count = service.load_scope(scope_id).await?;
    info!(scope_id, rules = count, "规则集已加载");

    let message = match message_source {
        MessageSource::Json(value) => Message::from_json(value)?,
        MessageSource::Rfc822(raw) => Message::from_rfc822(raw)?,
        MessageSource::Tweet(value) => Message::from_tweet(value)?,
    };

    let results: BTreeMap<_, _> = service.evaluate(scope_id, &message).await?.into_iter().collect();
    let feed_match = service.match_message(scope_id, &message).await?;

    if let Some(db) = db {
        db.close().await;
    }

    Ok(json!({
        "scope_id": scope_id,
        "kind": K::NAME,
        "rules": results,
        "feed_match": feed_match,
    }))
}

/// 重新校验规则文件中的每条规则，全部有效时返回 true
fn validate<K: MessageKind>(path: &Path) -> Result<bool> {
    let file = read_rules::<K>(path)?;
    let scope_id = file.scope_id;

    let mut all_valid = true;
    for wire in file.rules {
        let (mut rule, _) = feed_rules::Rule::<K>::from_record(wire.into_record(scope_id))?;
        let result = rule.validate();
        all_valid &= result.is_valid;
        println!(
            "{}",
            json!({
                "id": rule.id,
                "is_valid": result.is_valid,
                "check_error": result.check_error,
            })
        );
    }
    Ok(all_valid)
}
