//! 规则集与分组变更协议
//!
//! `FeedRules` 持有一个 feed 的全部规则以及分组索引（分组 ID -> 分组操作），
//! 分组操作只在索引中保存一份。所有变更都维持以下约束：
//! - 分组至少有两个成员，只剩一个成员时分组被解散
//! - 同组成员看到同一个分组操作
//! - 分组 ID 在规则集内唯一
//!
//! 每个变更返回 [`MutationOutcome`]，列出需要持久化的变化。

use crate::error::{Result, RuleError};
use crate::executor::{FeedMatch, GroupEvaluator};
use crate::fields::MessageKind;
use crate::message::Message;
use crate::models::{GroupId, Rule, RuleDraft, RuleId, RuleRecord, RuleUpdate, ScopeId};
use crate::operators::GroupOperation;
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// 随机分配分组 ID 的最大尝试次数，之后线性扫描空闲 ID
const GROUP_ID_ATTEMPTS: usize = 64;

/// 规则所在的作用域
pub trait RuleScope<K: MessageKind> {
    fn scope_id(&self) -> ScopeId;

    /// 同组成员，按 (position, id) 排序
    fn group_members(&self, group: GroupId) -> Vec<&Rule<K>>;

    /// 分组操作，未知分组返回默认值
    fn group_operation(&self, group: GroupId) -> GroupOperation;
}

/// 单个变化
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleChange {
    /// 规则被新增或修改
    Saved(RuleId),
    /// 规则被删除
    Deleted(RuleId),
    /// 分组操作变化，需要批量更新同组的所有行
    GroupOperation {
        group: GroupId,
        operation: GroupOperation,
    },
    /// feed 级规则组合方式变化
    RulesOperation(GroupOperation),
}

/// 一次变更产生的全部变化
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationOutcome {
    pub changes: Vec<RuleChange>,
}

impl MutationOutcome {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    fn push(&mut self, change: RuleChange) {
        if !self.changes.contains(&change) {
            self.changes.push(change);
        }
    }

    fn saved(&mut self, id: RuleId) {
        self.push(RuleChange::Saved(id));
    }

    /// 被保存的规则 ID
    pub fn saved_ids(&self) -> Vec<RuleId> {
        self.changes
            .iter()
            .filter_map(|change| match change {
                RuleChange::Saved(id) => Some(*id),
                _ => None,
            })
            .collect()
    }
}

/// 一个 feed 的规则集
#[derive(Debug, Clone)]
pub struct FeedRules<K: MessageKind> {
    scope_id: ScopeId,
    rules_operation: GroupOperation,
    rules: Vec<Rule<K>>,
    groups: BTreeMap<GroupId, GroupOperation>,
}

impl<K: MessageKind> RuleScope<K> for FeedRules<K> {
    fn scope_id(&self) -> ScopeId {
        self.scope_id
    }

    fn group_members(&self, group: GroupId) -> Vec<&Rule<K>> {
        self.collection(Some(group))
            .into_iter()
            .map(|idx| &self.rules[idx])
            .collect()
    }

    fn group_operation(&self, group: GroupId) -> GroupOperation {
        self.groups.get(&group).copied().unwrap_or_default()
    }
}

impl<K: MessageKind> FeedRules<K> {
    pub fn new(scope_id: ScopeId) -> Self {
        Self {
            scope_id,
            rules_operation: GroupOperation::default(),
            rules: Vec::new(),
            groups: BTreeMap::new(),
        }
    }

    /// 从持久化行重建规则集
    ///
    /// 同组行的分组操作不一致时以 position 最小的行为准；只有一个成员的分组被解散。
    /// 修复产生的变化通过返回的 [`MutationOutcome`] 交给调用方持久化。
    pub fn from_records(
        scope_id: ScopeId,
        rules_operation: GroupOperation,
        records: Vec<RuleRecord>,
    ) -> Result<(Self, MutationOutcome)> {
        let mut scope = Self::new(scope_id);
        scope.rules_operation = rules_operation;

        let mut row_operations: Vec<(RuleId, GroupOperation)> = Vec::with_capacity(records.len());
        for record in records {
            if record.scope_id != scope_id {
                return Err(RuleError::InvalidRecord(format!(
                    "规则 {} 属于规则集 {}，而不是 {}",
                    record.id, record.scope_id, scope_id
                )));
            }
            if scope.rules.iter().any(|r| r.id == record.id) {
                return Err(RuleError::InvalidRecord(format!("规则 ID 重复: {}", record.id)));
            }
            let (rule, operation) = Rule::<K>::from_record(record)?;
            row_operations.push((rule.id, operation));
            scope.rules.push(rule);
        }

        // 持久化的校验结果不可信，重新校验，结果变化的行需要写回
        let mut outcome = MutationOutcome::default();
        for rule in &mut scope.rules {
            let stored = (
                rule.is_valid,
                rule.check_error.clone(),
                rule.other_field_name.clone(),
            );
            rule.validate();
            if (rule.is_valid, &rule.check_error, &rule.other_field_name)
                != (stored.0, &stored.1, &stored.2)
            {
                warn!(scope_id, rule_id = rule.id, is_valid = rule.is_valid, "规则校验结果已修正");
                outcome.saved(rule.id);
            }
        }
        let row_operation = |id: RuleId| {
            row_operations
                .iter()
                .find(|(rule_id, _)| *rule_id == id)
                .map(|(_, op)| *op)
                .unwrap_or_default()
        };

        let group_ids: Vec<GroupId> = {
            let mut ids: Vec<GroupId> = scope.rules.iter().filter_map(|r| r.group).collect();
            ids.sort_unstable();
            ids.dedup();
            ids
        };

        for group in group_ids {
            let members = scope.collection(Some(group));
            let first = scope.rules[members[0]].id;
            let operation = row_operation(first);

            let disagreeing: Vec<RuleId> = members
                .iter()
                .map(|&idx| scope.rules[idx].id)
                .filter(|&id| row_operation(id) != operation)
                .collect();
            if !disagreeing.is_empty() {
                warn!(
                    scope_id,
                    group,
                    operation = %operation,
                    ?disagreeing,
                    "分组操作不一致，以首个成员为准"
                );
                outcome.push(RuleChange::GroupOperation { group, operation });
            }

            scope.groups.insert(group, operation);
        }

        let groups: Vec<GroupId> = scope.groups.keys().copied().collect();
        for group in groups {
            if scope.collection(Some(group)).len() < 2 {
                warn!(scope_id, group, "分组只有一个成员，已解散");
                scope.dissolve_if_undersized(group, &mut outcome);
            }
        }

        Ok((scope, outcome))
    }

    /// 生成指定规则的持久化行
    pub fn record(&self, id: RuleId) -> Result<RuleRecord> {
        let rule = self.rule(id)?;
        let operation = rule
            .group
            .map(|group| self.group_operation(group))
            .unwrap_or_default();
        Ok(rule.to_record(operation))
    }

    pub fn scope_id(&self) -> ScopeId {
        self.scope_id
    }

    pub fn rules_operation(&self) -> GroupOperation {
        self.rules_operation
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// 分组索引
    pub fn groups(&self) -> &BTreeMap<GroupId, GroupOperation> {
        &self.groups
    }

    pub fn rule(&self, id: RuleId) -> Result<&Rule<K>> {
        self.index_of(id).map(|idx| &self.rules[idx])
    }

    /// 全部规则，按分组（未分组在后）和 position 排序
    pub fn rules(&self) -> Vec<&Rule<K>> {
        let mut rules: Vec<&Rule<K>> = self.rules.iter().collect();
        rules.sort_by_key(|r| sort_key(r));
        rules
    }

    // ==================== 评估 ====================

    /// 评估每条规则，每个分组只评估一次
    pub fn evaluate(&self, message: &Message) -> HashMap<RuleId, bool> {
        let mut group_results: HashMap<GroupId, bool> = HashMap::new();
        let mut results = HashMap::with_capacity(self.rules.len());

        for rule in &self.rules {
            let matched = match rule.group {
                Some(group) => *group_results.entry(group).or_insert_with(|| {
                    GroupEvaluator::evaluate(
                        self.group_members(group),
                        self.group_operation(group),
                        message,
                    )
                }),
                None => rule.matches_individual(message),
            };
            results.insert(rule.id, matched);
        }

        results
    }

    /// 判断消息是否进入 feed
    ///
    /// 只考虑有效规则。未分组规则与整个分组各自作为一个单元，
    /// 按 rules_operation 组合：ANY 首个命中单元胜出，ALL 要求所有单元命中。
    pub fn match_message(&self, message: &Message) -> FeedMatch {
        let valid: Vec<&Rule<K>> = self.rules().into_iter().filter(|r| r.is_valid).collect();
        if valid.is_empty() {
            return FeedMatch::no_match();
        }

        let mut seen_groups: Vec<GroupId> = Vec::new();
        let mut any_matched = false;

        for rule in &valid {
            let unit: Vec<RuleId> = match rule.group {
                Some(group) => {
                    if seen_groups.contains(&group) {
                        continue;
                    }
                    seen_groups.push(group);
                    valid
                        .iter()
                        .filter(|r| r.group == Some(group))
                        .map(|r| r.id)
                        .collect()
                }
                None => vec![rule.id],
            };

            let matched = rule.matches(self, message);
            match (self.rules_operation, matched) {
                (GroupOperation::Any, true) => return FeedMatch::matched(unit),
                (GroupOperation::All, false) => return FeedMatch::no_match(),
                (GroupOperation::All, true) => any_matched = true,
                (GroupOperation::Any, false) => {}
            }
        }

        if self.rules_operation == GroupOperation::All && any_matched {
            FeedMatch::matched(valid.iter().map(|r| r.id).collect())
        } else {
            FeedMatch::no_match()
        }
    }

    // ==================== 变更 ====================

    /// 新增规则，追加到未分组集合末尾
    pub fn add_rule(&mut self, draft: RuleDraft<K>) -> Result<(RuleId, MutationOutcome)> {
        let id = self.rules.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        let mut rule = Rule::new(id, self.scope_id, draft);
        rule.position = self.next_position(None);
        self.rules.push(rule);

        let mut outcome = MutationOutcome::default();
        outcome.saved(id);
        Ok((id, outcome))
    }

    /// 更新规则字段，被跟踪字段变化时重新校验
    pub fn update_rule(&mut self, id: RuleId, update: RuleUpdate<K>) -> Result<MutationOutcome> {
        let idx = self.index_of(id)?;
        let mut outcome = MutationOutcome::default();
        if self.rules[idx].apply_update(update) {
            outcome.saved(id);
        }
        Ok(outcome)
    }

    /// 删除规则；分组只剩一个成员时解散
    pub fn delete_rule(&mut self, id: RuleId) -> Result<MutationOutcome> {
        let idx = self.index_of(id)?;
        let removed = self.rules.remove(idx);

        let mut outcome = MutationOutcome::default();
        outcome.push(RuleChange::Deleted(id));
        self.renumber(removed.group, &mut outcome);
        if let Some(group) = removed.group {
            self.dissolve_if_undersized(group, &mut outcome);
        }
        Ok(outcome)
    }

    /// 将 `id` 合并到 `other` 所在的分组；`other` 未分组时新建分组
    pub fn merge<R: Rng>(
        &mut self,
        id: RuleId,
        other: RuleId,
        rng: &mut R,
        group_id_max: i64,
    ) -> Result<MutationOutcome> {
        if id == other {
            return Err(RuleError::SelfMerge(id));
        }
        let idx = self.index_of(id)?;
        let other_idx = self.index_of(other)?;

        let previous = self.rules[idx].group;
        let other_group = self.rules[other_idx].group;

        let mut outcome = MutationOutcome::default();
        if other_group.is_some() && previous == other_group {
            return Ok(outcome);
        }

        let target = match other_group {
            Some(group) => group,
            None => {
                let group = self.allocate_group_id(rng, group_id_max)?;
                self.groups.insert(group, GroupOperation::default());
                self.move_to_collection(other_idx, Some(group), &mut outcome);
                group
            }
        };

        self.move_to_collection(idx, Some(target), &mut outcome);
        if let Some(previous) = previous {
            self.dissolve_if_undersized(previous, &mut outcome);
        }
        Ok(outcome)
    }

    /// 将规则移出分组；分组只剩一个成员时一并解散
    pub fn split(&mut self, id: RuleId) -> Result<MutationOutcome> {
        let idx = self.index_of(id)?;
        let mut outcome = MutationOutcome::default();

        if let Some(group) = self.rules[idx].group {
            self.move_to_collection(idx, None, &mut outcome);
            self.dissolve_if_undersized(group, &mut outcome);
        }
        Ok(outcome)
    }

    /// 切换分组操作 ANY <-> ALL
    pub fn switch(&mut self, id: RuleId) -> Result<MutationOutcome> {
        let group = self.rule(id)?.group.ok_or(RuleError::RuleNotGrouped(id))?;
        let operation = self.group_operation(group).next();
        self.groups.insert(group, operation);

        let mut outcome = MutationOutcome::default();
        outcome.push(RuleChange::GroupOperation { group, operation });
        Ok(outcome)
    }

    /// 调整规则在 (scope, group) 集合中的位置，越界时截断
    pub fn move_rule(&mut self, id: RuleId, position: i32) -> Result<MutationOutcome> {
        let idx = self.index_of(id)?;
        let group = self.rules[idx].group;

        let mut order = self.collection(group);
        order.retain(|&i| i != idx);
        let target = usize::try_from(position).unwrap_or(0).min(order.len());
        order.insert(target, idx);

        let mut outcome = MutationOutcome::default();
        self.assign_positions(&order, &mut outcome);
        Ok(outcome)
    }

    /// 设置 feed 级组合方式
    pub fn set_rules_operation(&mut self, operation: GroupOperation) -> MutationOutcome {
        let mut outcome = MutationOutcome::default();
        if self.rules_operation != operation {
            self.rules_operation = operation;
            outcome.push(RuleChange::RulesOperation(operation));
        }
        outcome
    }

    // ==================== 内部辅助 ====================

    fn index_of(&self, id: RuleId) -> Result<usize> {
        self.rules
            .iter()
            .position(|r| r.id == id)
            .ok_or(RuleError::RuleNotFound {
                scope_id: self.scope_id,
                rule_id: id,
            })
    }

    /// 集合内规则的下标，按 (position, id) 排序
    fn collection(&self, group: Option<GroupId>) -> Vec<usize> {
        let mut indices: Vec<usize> = self
            .rules
            .iter()
            .enumerate()
            .filter(|(_, r)| r.group == group)
            .map(|(idx, _)| idx)
            .collect();
        indices.sort_by_key(|&idx| (self.rules[idx].position, self.rules[idx].id));
        indices
    }

    fn next_position(&self, group: Option<GroupId>) -> i32 {
        self.rules
            .iter()
            .filter(|r| r.group == group)
            .map(|r| r.position + 1)
            .max()
            .unwrap_or(0)
    }

    /// 将规则移到新集合末尾，并重新编号新旧两个集合
    fn move_to_collection(
        &mut self,
        idx: usize,
        group: Option<GroupId>,
        outcome: &mut MutationOutcome,
    ) {
        let previous = self.rules[idx].group;
        let position = self.next_position(group);

        let rule = &mut self.rules[idx];
        rule.group = group;
        rule.position = position;
        outcome.saved(rule.id);

        self.renumber(previous, outcome);
        self.renumber(group, outcome);
    }

    /// 分组成员少于两个时解散，剩余成员移回未分组集合
    fn dissolve_if_undersized(&mut self, group: GroupId, outcome: &mut MutationOutcome) {
        let members = self.collection(Some(group));
        if members.len() >= 2 {
            return;
        }
        for idx in members {
            self.move_to_collection(idx, None, outcome);
        }
        self.groups.remove(&group);
    }

    /// 将集合的 position 压缩为 0..n
    fn renumber(&mut self, group: Option<GroupId>, outcome: &mut MutationOutcome) {
        let order = self.collection(group);
        self.assign_positions(&order, outcome);
    }

    fn assign_positions(&mut self, order: &[usize], outcome: &mut MutationOutcome) {
        for (position, &idx) in order.iter().enumerate() {
            let position = i32::try_from(position).unwrap_or(i32::MAX);
            let rule = &mut self.rules[idx];
            if rule.position != position {
                rule.position = position;
                outcome.saved(rule.id);
            }
        }
    }

    /// 在 1..=max 中随机选取未使用的分组 ID
    fn allocate_group_id<R: Rng>(&self, rng: &mut R, max: i64) -> Result<GroupId> {
        let max = max.max(1);
        let used = |id: GroupId| {
            self.groups.contains_key(&id) || self.rules.iter().any(|r| r.group == Some(id))
        };

        if i64::try_from(self.groups.len()).unwrap_or(i64::MAX) >= max {
            return Err(RuleError::GroupIdsExhausted { max });
        }

        for _ in 0..GROUP_ID_ATTEMPTS {
            let candidate = rng.random_range(1..=max);
            if !used(candidate) {
                return Ok(candidate);
            }
        }

        (1..=max)
            .find(|&id| !used(id))
            .ok_or(RuleError::GroupIdsExhausted { max })
    }
}

/// 排序键：分组升序（未分组在后），再按 position、id
fn sort_key<K: MessageKind>(rule: &Rule<K>) -> (bool, GroupId, i32, RuleId) {
    (
        rule.group.is_none(),
        rule.group.unwrap_or_default(),
        rule.position,
        rule.id,
    )
}
