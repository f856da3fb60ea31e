//! 规则仓储
//!
//! 定义持久化接口，服务层依赖抽象而非具体实现，支持 mock 测试。
//! 提供 PostgreSQL 与内存两种实现。

use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::PgPool;
use sqlx::migrate::Migrator;
use std::collections::BTreeMap;
use tracing::{debug, instrument};

use crate::error::{Result, RuleError};
use crate::models::{GroupId, RuleId, RuleRecord, ScopeId};
use crate::operators::GroupOperation;

/// 单条待写入的变化，由服务层根据 [`RuleChange`](crate::scope::RuleChange) 解析得到
#[derive(Debug, Clone, PartialEq)]
pub enum RuleWrite {
    /// 新增或覆盖规则行
    Save(RuleRecord),
    Delete(RuleId),
    /// 批量更新同组所有行上的分组操作
    GroupOperation {
        group: GroupId,
        operation: GroupOperation,
    },
    RulesOperation(GroupOperation),
}

/// 规则仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RuleRepository: Send + Sync {
    /// 读取规则集的全部规则行
    async fn load_scope(&self, kind: &str, scope_id: ScopeId) -> Result<Vec<RuleRecord>>;

    /// 读取 feed 级组合方式，未设置时返回 None
    async fn load_rules_operation(
        &self,
        kind: &str,
        scope_id: ScopeId,
    ) -> Result<Option<GroupOperation>>;

    /// 原子地应用一次变更的全部写入：要么全部生效，要么全部不生效
    async fn apply_changes(
        &self,
        kind: &str,
        scope_id: ScopeId,
        writes: &[RuleWrite],
    ) -> Result<()>;
}

/// 规则行必须属于正在写入的规则集
fn check_scope(scope_id: ScopeId, writes: &[RuleWrite]) -> Result<()> {
    for write in writes {
        if let RuleWrite::Save(record) = write
            && record.scope_id != scope_id
        {
            return Err(RuleError::InvalidRecord(format!(
                "规则 {} 属于规则集 {}，而不是 {}",
                record.id, record.scope_id, scope_id
            )));
        }
    }
    Ok(())
}

/// 嵌入的数据库迁移
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

// ==================== PostgreSQL ====================

/// PostgreSQL 规则仓储
pub struct PgRuleRepository {
    pool: PgPool,
}

impl PgRuleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RuleRepository for PgRuleRepository {
    async fn load_scope(&self, kind: &str, scope_id: ScopeId) -> Result<Vec<RuleRecord>> {
        let records = sqlx::query_as::<_, RuleRecord>(
            r#"
            SELECT id, scope_id, group_id, group_operation, match_field, other_field_name,
                   match_type, match_value, match_case, is_valid, check_error, position
            FROM feed_rules
            WHERE kind = $1 AND scope_id = $2
            ORDER BY group_id ASC NULLS LAST, position ASC, id ASC
            "#,
        )
        .bind(kind)
        .bind(scope_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn load_rules_operation(
        &self,
        kind: &str,
        scope_id: ScopeId,
    ) -> Result<Option<GroupOperation>> {
        let operation: Option<String> = sqlx::query_scalar(
            r#"
            SELECT rules_operation
            FROM feed_scopes
            WHERE kind = $1 AND scope_id = $2
            "#,
        )
        .bind(kind)
        .bind(scope_id)
        .fetch_optional(&self.pool)
        .await?;

        operation
            .map(|op| {
                op.parse::<GroupOperation>()
                    .map_err(|e| RuleError::InvalidRecord(format!("规则集 {}: {}", scope_id, e)))
            })
            .transpose()
    }

    #[instrument(skip(self, writes), fields(writes = writes.len()))]
    async fn apply_changes(
        &self,
        kind: &str,
        scope_id: ScopeId,
        writes: &[RuleWrite],
    ) -> Result<()> {
        check_scope(scope_id, writes)?;
        if writes.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        // 锁住规则集行，跨进程串行化同一规则集的写入
        sqlx::query(
            r#"
            INSERT INTO feed_scopes (kind, scope_id)
            VALUES ($1, $2)
            ON CONFLICT (kind, scope_id) DO UPDATE SET updated_at = NOW()
            "#,
        )
        .bind(kind)
        .bind(scope_id)
        .execute(&mut *tx)
        .await?;

        for write in writes {
            match write {
                RuleWrite::Save(record) => {
                    sqlx::query(
                        r#"
                        INSERT INTO feed_rules (kind, scope_id, id, group_id, group_operation,
                                                match_field, other_field_name, match_type,
                                                match_value, match_case, is_valid, check_error,
                                                position)
                        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                        ON CONFLICT (kind, scope_id, id) DO UPDATE SET
                            group_id = EXCLUDED.group_id,
                            group_operation = EXCLUDED.group_operation,
                            match_field = EXCLUDED.match_field,
                            other_field_name = EXCLUDED.other_field_name,
                            match_type = EXCLUDED.match_type,
                            match_value = EXCLUDED.match_value,
                            match_case = EXCLUDED.match_case,
                            is_valid = EXCLUDED.is_valid,
                            check_error = EXCLUDED.check_error,
                            position = EXCLUDED.position,
                            updated_at = NOW()
                        "#,
                    )
                    .bind(kind)
                    .bind(record.scope_id)
                    .bind(record.id)
                    .bind(record.group_id)
                    .bind(&record.group_operation)
                    .bind(&record.match_field)
                    .bind(&record.other_field_name)
                    .bind(&record.match_type)
                    .bind(&record.match_value)
                    .bind(record.match_case)
                    .bind(record.is_valid)
                    .bind(&record.check_error)
                    .bind(record.position)
                    .execute(&mut *tx)
                    .await?;
                }
                RuleWrite::Delete(rule_id) => {
                    sqlx::query(
                        "DELETE FROM feed_rules WHERE kind = $1 AND scope_id = $2 AND id = $3",
                    )
                    .bind(kind)
                    .bind(scope_id)
                    .bind(*rule_id)
                    .execute(&mut *tx)
                    .await?;
                }
                RuleWrite::GroupOperation { group, operation } => {
                    sqlx::query(
                        r#"
                        UPDATE feed_rules
                        SET group_operation = $4, updated_at = NOW()
                        WHERE kind = $1 AND scope_id = $2 AND group_id = $3
                        "#,
                    )
                    .bind(kind)
                    .bind(scope_id)
                    .bind(*group)
                    .bind(operation.as_str())
                    .execute(&mut *tx)
                    .await?;
                }
                RuleWrite::RulesOperation(operation) => {
                    sqlx::query(
                        r#"
                        UPDATE feed_scopes
                        SET rules_operation = $3, updated_at = NOW()
                        WHERE kind = $1 AND scope_id = $2
                        "#,
                    )
                    .bind(kind)
                    .bind(scope_id)
                    .bind(operation.as_str())
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        tx.commit().await?;
        debug!("规则变更已提交");
        Ok(())
    }
}

// ==================== 内存实现 ====================

type ScopeKey = (String, ScopeId);

/// 内存规则仓储，用于 CLI 与测试
#[derive(Default)]
pub struct MemoryRuleRepository {
    rules: DashMap<ScopeKey, BTreeMap<RuleId, RuleRecord>>,
    operations: DashMap<ScopeKey, GroupOperation>,
}

impl MemoryRuleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置规则行
    pub fn seed(&self, kind: &str, records: Vec<RuleRecord>) {
        for record in records {
            self.rules
                .entry((kind.to_string(), record.scope_id))
                .or_default()
                .insert(record.id, record);
        }
    }

    /// 读取单条规则行
    pub fn get(&self, kind: &str, scope_id: ScopeId, rule_id: RuleId) -> Option<RuleRecord> {
        self.rules
            .get(&(kind.to_string(), scope_id))
            .and_then(|rules| rules.get(&rule_id).cloned())
    }
}

#[async_trait]
impl RuleRepository for MemoryRuleRepository {
    async fn load_scope(&self, kind: &str, scope_id: ScopeId) -> Result<Vec<RuleRecord>> {
        Ok(self
            .rules
            .get(&(kind.to_string(), scope_id))
            .map(|rules| rules.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn load_rules_operation(
        &self,
        kind: &str,
        scope_id: ScopeId,
    ) -> Result<Option<GroupOperation>> {
        Ok(self
            .operations
            .get(&(kind.to_string(), scope_id))
            .map(|op| *op))
    }

    async fn apply_changes(
        &self,
        kind: &str,
        scope_id: ScopeId,
        writes: &[RuleWrite],
    ) -> Result<()> {
        check_scope(scope_id, writes)?;

        let key = (kind.to_string(), scope_id);
        let mut current = self.rules.entry(key.clone()).or_default();

        // 在副本上应用，全部成功后再替换
        let mut staged = current.clone();
        let mut rules_operation = None;
        for write in writes {
            match write {
                RuleWrite::Save(record) => {
                    staged.insert(record.id, record.clone());
                }
                RuleWrite::Delete(rule_id) => {
                    staged.remove(rule_id);
                }
                RuleWrite::GroupOperation { group, operation } => {
                    for record in staged.values_mut().filter(|r| r.group_id == Some(*group)) {
                        record.group_operation = operation.as_str().to_string();
                    }
                }
                RuleWrite::RulesOperation(operation) => rules_operation = Some(*operation),
            }
        }

        *current = staged;
        if let Some(operation) = rules_operation {
            self.operations.insert(key, operation);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    fn record(id: RuleId, group: Option<GroupId>) -> RuleRecord {
        RuleRecord {
            id,
            scope_id: 1,
            group_id: group,
            group_operation: "any".to_string(),
            match_field: "subject".to_string(),
            other_field_name: None,
            match_type: "contains".to_string(),
            match_value: "x".to_string(),
            match_case: false,
            is_valid: true,
            check_error: None,
            position: 0,
        }
    }

    #[tokio::test]
    async fn test_memory_save_load_delete() {
        let repo = MemoryRuleRepository::new();
        assert_ok!(
            repo.apply_changes(
                "mail",
                1,
                &[RuleWrite::Save(record(1, None)), RuleWrite::Save(record(2, Some(4)))],
            )
            .await
        );
        assert_ok!(
            repo.apply_changes("twitter", 1, &[RuleWrite::Save(record(3, None))])
                .await
        );

        assert_eq!(repo.load_scope("mail", 1).await.unwrap().len(), 2);
        assert_eq!(repo.load_scope("twitter", 1).await.unwrap().len(), 1);

        assert_ok!(repo.apply_changes("mail", 1, &[RuleWrite::Delete(1)]).await);
        let rows = repo.load_scope("mail", 1).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, 2);
    }

    #[tokio::test]
    async fn test_memory_bulk_group_operation() {
        let repo = MemoryRuleRepository::new();
        repo.seed("mail", vec![record(1, Some(4)), record(2, Some(4)), record(3, None)]);

        let writes = [RuleWrite::GroupOperation {
            group: 4,
            operation: GroupOperation::All,
        }];
        assert_ok!(repo.apply_changes("mail", 1, &writes).await);

        assert_eq!(repo.get("mail", 1, 1).unwrap().group_operation, "all");
        assert_eq!(repo.get("mail", 1, 2).unwrap().group_operation, "all");
        assert_eq!(repo.get("mail", 1, 3).unwrap().group_operation, "any");
    }

    #[tokio::test]
    async fn test_memory_rules_operation() {
        let repo = MemoryRuleRepository::new();
        assert_eq!(repo.load_rules_operation("mail", 1).await.unwrap(), None);

        let writes = [RuleWrite::RulesOperation(GroupOperation::All)];
        assert_ok!(repo.apply_changes("mail", 1, &writes).await);
        assert_eq!(
            repo.load_rules_operation("mail", 1).await.unwrap(),
            Some(GroupOperation::All)
        );
    }

    #[tokio::test]
    async fn test_memory_rejected_batch_writes_nothing() {
        let repo = MemoryRuleRepository::new();
        repo.seed("mail", vec![record(1, None)]);

        let mut foreign = record(2, Some(7));
        foreign.scope_id = 2;
        let grouped = record(1, Some(7));

        // 第二条写入属于其他规则集，整批被拒绝
        let writes = [
            RuleWrite::Save(grouped),
            RuleWrite::Save(foreign),
            RuleWrite::RulesOperation(GroupOperation::All),
        ];
        let result = repo.apply_changes("mail", 1, &writes).await;
        assert!(matches!(result, Err(RuleError::InvalidRecord(_))));

        assert_eq!(repo.get("mail", 1, 1).unwrap().group_id, None);
        assert_eq!(repo.load_scope("mail", 1).await.unwrap().len(), 1);
        assert_eq!(repo.load_rules_operation("mail", 1).await.unwrap(), None);
    }
}
