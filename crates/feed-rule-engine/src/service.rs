//! 规则服务
//!
//! 组合规则集存储与仓储。评估持有读锁同步执行；变更持有写锁，
//! 在规则集副本上应用变更，持久化成功后才替换内存中的规则集。

use crate::error::{Result, RuleError};
use crate::executor::FeedMatch;
use crate::fields::MessageKind;
use crate::message::Message;
use crate::models::{RuleDraft, RuleId, RuleUpdate, RuleWire, ScopeId};
use crate::operators::GroupOperation;
use crate::repository::{RuleRepository, RuleWrite};
use crate::scope::{FeedRules, MutationOutcome, RuleChange};
use crate::store::{RuleStore, ScopeHandle};
use feedrules_shared::config::RulesConfig;
use feedrules_shared::observability::metrics;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// 分组 ID 分配设置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupSettings {
    /// 分组 ID 取值上限（含）
    pub group_id_max: i64,
}

impl Default for GroupSettings {
    fn default() -> Self {
        Self::from(&RulesConfig::default())
    }
}

impl From<&RulesConfig> for GroupSettings {
    fn from(config: &RulesConfig) -> Self {
        Self {
            group_id_max: config.group_id_max(),
        }
    }
}

/// feed 规则服务
pub struct FeedRuleService<K: MessageKind> {
    store: RuleStore<K>,
    repository: Arc<dyn RuleRepository>,
    settings: GroupSettings,
}

impl<K: MessageKind> Clone for FeedRuleService<K> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            repository: Arc::clone(&self.repository),
            settings: self.settings,
        }
    }
}

impl<K: MessageKind> FeedRuleService<K> {
    pub fn new(repository: Arc<dyn RuleRepository>, settings: GroupSettings) -> Self {
        Self {
            store: RuleStore::new(),
            repository,
            settings,
        }
    }

    pub fn store(&self) -> &RuleStore<K> {
        &self.store
    }

    pub fn settings(&self) -> GroupSettings {
        self.settings
    }

    fn handle(&self, scope_id: ScopeId) -> Result<ScopeHandle<K>> {
        self.store
            .get(scope_id)
            .ok_or(RuleError::ScopeNotLoaded(scope_id))
    }

    /// 从仓储加载规则集并重建分组索引，修复结果会被写回
    #[instrument(skip(self), fields(kind = K::NAME))]
    pub async fn load_scope(&self, scope_id: ScopeId) -> Result<usize> {
        let records = self.repository.load_scope(K::NAME, scope_id).await?;
        let rules_operation = self
            .repository
            .load_rules_operation(K::NAME, scope_id)
            .await?
            .unwrap_or_default();

        let (rules, repairs) = FeedRules::<K>::from_records(scope_id, rules_operation, records)?;
        if !repairs.is_empty() {
            warn!(changes = repairs.changes.len(), "规则集加载时修复了分组数据");
            self.persist(&rules, &repairs).await?;
        }

        let count = rules.len();
        self.store.insert(rules);
        Ok(count)
    }

    /// 卸载规则集
    pub fn unload_scope(&self, scope_id: ScopeId) -> bool {
        self.store.remove(scope_id)
    }

    // ==================== 评估 ====================

    /// 评估规则集内每条规则
    #[instrument(skip(self, message), fields(kind = K::NAME))]
    pub async fn evaluate(&self, scope_id: ScopeId, message: &Message) -> Result<HashMap<RuleId, bool>> {
        let handle = self.handle(scope_id)?;
        let rules = handle.read().await;
        Ok(rules.evaluate(message))
    }

    /// 判断消息是否进入 feed
    #[instrument(skip(self, message), fields(kind = K::NAME))]
    pub async fn match_message(&self, scope_id: ScopeId, message: &Message) -> Result<FeedMatch> {
        let handle = self.handle(scope_id)?;
        let rules = handle.read().await;

        let start = Instant::now();
        let result = rules.match_message(message);
        metrics::record_rule_evaluation(K::NAME, result.matched, start.elapsed().as_secs_f64());

        debug!(matched = result.matched, matched_rules = ?result.matched_rules, "feed 匹配完成");
        Ok(result)
    }

    /// 单条规则（或其所在分组）是否匹配
    pub async fn rule_matches(
        &self,
        scope_id: ScopeId,
        rule_id: RuleId,
        message: &Message,
    ) -> Result<bool> {
        let handle = self.handle(scope_id)?;
        let rules = handle.read().await;
        Ok(rules.rule(rule_id)?.matches(&*rules, message))
    }

    /// 列出规则集内全部规则
    pub async fn list_rules(&self, scope_id: ScopeId) -> Result<Vec<RuleWire<K>>> {
        let handle = self.handle(scope_id)?;
        let rules = handle.read().await;
        Ok(rules.rules().iter().map(|rule| rule.to_wire(&*rules)).collect())
    }

    // ==================== 变更 ====================

    #[instrument(skip(self, draft), fields(kind = K::NAME))]
    pub async fn add_rule(&self, scope_id: ScopeId, draft: RuleDraft<K>) -> Result<RuleWire<K>> {
        self.mutate(scope_id, "add", |rules| {
            let (id, outcome) = rules.add_rule(draft)?;
            let wire = rules.rule(id)?.to_wire(&*rules);
            Ok((wire, outcome))
        })
        .await
    }

    #[instrument(skip(self, update), fields(kind = K::NAME))]
    pub async fn update_rule(
        &self,
        scope_id: ScopeId,
        rule_id: RuleId,
        update: RuleUpdate<K>,
    ) -> Result<RuleWire<K>> {
        self.mutate(scope_id, "update", |rules| {
            let outcome = rules.update_rule(rule_id, update)?;
            let wire = rules.rule(rule_id)?.to_wire(&*rules);
            Ok((wire, outcome))
        })
        .await
    }

    #[instrument(skip(self), fields(kind = K::NAME))]
    pub async fn delete_rule(&self, scope_id: ScopeId, rule_id: RuleId) -> Result<MutationOutcome> {
        self.mutate(scope_id, "delete", |rules| {
            let outcome = rules.delete_rule(rule_id)?;
            Ok((outcome.clone(), outcome))
        })
        .await
    }

    #[instrument(skip(self), fields(kind = K::NAME))]
    pub async fn merge(
        &self,
        scope_id: ScopeId,
        rule_id: RuleId,
        other: RuleId,
    ) -> Result<MutationOutcome> {
        let group_id_max = self.settings.group_id_max;
        self.mutate(scope_id, "merge", |rules| {
            let outcome = rules.merge(rule_id, other, &mut rand::rng(), group_id_max)?;
            Ok((outcome.clone(), outcome))
        })
        .await
    }

    #[instrument(skip(self), fields(kind = K::NAME))]
    pub async fn split(&self, scope_id: ScopeId, rule_id: RuleId) -> Result<MutationOutcome> {
        self.mutate(scope_id, "split", |rules| {
            let outcome = rules.split(rule_id)?;
            Ok((outcome.clone(), outcome))
        })
        .await
    }

    #[instrument(skip(self), fields(kind = K::NAME))]
    pub async fn switch(&self, scope_id: ScopeId, rule_id: RuleId) -> Result<MutationOutcome> {
        self.mutate(scope_id, "switch", |rules| {
            let outcome = rules.switch(rule_id)?;
            Ok((outcome.clone(), outcome))
        })
        .await
    }

    #[instrument(skip(self), fields(kind = K::NAME))]
    pub async fn move_rule(
        &self,
        scope_id: ScopeId,
        rule_id: RuleId,
        position: i32,
    ) -> Result<MutationOutcome> {
        self.mutate(scope_id, "move", |rules| {
            let outcome = rules.move_rule(rule_id, position)?;
            Ok((outcome.clone(), outcome))
        })
        .await
    }

    #[instrument(skip(self), fields(kind = K::NAME))]
    pub async fn set_rules_operation(
        &self,
        scope_id: ScopeId,
        operation: GroupOperation,
    ) -> Result<MutationOutcome> {
        self.mutate(scope_id, "rules_operation", |rules| {
            let outcome = rules.set_rules_operation(operation);
            Ok((outcome.clone(), outcome))
        })
        .await
    }

    /// 在写锁内对副本应用变更，持久化成功后发布
    async fn mutate<T, F>(&self, scope_id: ScopeId, operation: &'static str, apply: F) -> Result<T>
    where
        F: FnOnce(&mut FeedRules<K>) -> Result<(T, MutationOutcome)>,
    {
        let handle = self.handle(scope_id)?;
        let mut current = handle.write().await;

        let mut draft = current.clone();
        let result = match apply(&mut draft) {
            Ok((value, outcome)) => match self.persist(&draft, &outcome).await {
                Ok(()) => {
                    *current = draft;
                    info!(operation, changes = outcome.changes.len(), "规则集已更新");
                    Ok(value)
                }
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            warn!(operation, error = %e, "规则变更失败");
        }
        metrics::record_rule_mutation(K::NAME, operation, result.is_ok());
        result
    }

    /// 将变化作为一个事务写入仓储
    async fn persist(&self, rules: &FeedRules<K>, outcome: &MutationOutcome) -> Result<()> {
        if outcome.is_empty() {
            return Ok(());
        }

        let writes = outcome
            .changes
            .iter()
            .map(|change| {
                Ok(match *change {
                    RuleChange::Saved(id) => RuleWrite::Save(rules.record(id)?),
                    RuleChange::Deleted(id) => RuleWrite::Delete(id),
                    RuleChange::GroupOperation { group, operation } => {
                        RuleWrite::GroupOperation { group, operation }
                    }
                    RuleChange::RulesOperation(operation) => RuleWrite::RulesOperation(operation),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        self.repository
            .apply_changes(K::NAME, rules.scope_id(), &writes)
            .await
    }
}
