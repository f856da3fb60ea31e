//! 规则集存储
//!
//! 使用 DashMap 缓存已加载的规则集。每个规则集由一把异步读写锁保护：
//! 评估持有读锁，变更持有写锁，从而按规则集串行化变更。

use crate::fields::MessageKind;
use crate::models::ScopeId;
use crate::scope::FeedRules;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

pub type ScopeHandle<K> = Arc<RwLock<FeedRules<K>>>;

/// 规则集存储
pub struct RuleStore<K: MessageKind> {
    scopes: Arc<DashMap<ScopeId, ScopeHandle<K>>>,
}

impl<K: MessageKind> Clone for RuleStore<K> {
    fn clone(&self) -> Self {
        Self {
            scopes: Arc::clone(&self.scopes),
        }
    }
}

impl<K: MessageKind> Default for RuleStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: MessageKind> RuleStore<K> {
    /// 创建新的规则集存储
    pub fn new() -> Self {
        Self {
            scopes: Arc::new(DashMap::new()),
        }
    }

    /// 获取当前存储的规则集数量
    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    /// 检查存储是否为空
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// 加载（或替换）规则集
    #[instrument(skip(self, rules), fields(scope_id = rules.scope_id(), rule_count = rules.len()))]
    pub fn insert(&self, rules: FeedRules<K>) -> ScopeHandle<K> {
        let scope_id = rules.scope_id();
        let handle = Arc::new(RwLock::new(rules));
        self.scopes.insert(scope_id, Arc::clone(&handle));
        info!("规则集已加载: {}", scope_id);
        handle
    }

    /// 获取规则集句柄
    pub fn get(&self, scope_id: ScopeId) -> Option<ScopeHandle<K>> {
        self.scopes.get(&scope_id).map(|entry| Arc::clone(entry.value()))
    }

    /// 移除规则集
    #[instrument(skip(self))]
    pub fn remove(&self, scope_id: ScopeId) -> bool {
        let removed = self.scopes.remove(&scope_id).is_some();
        if removed {
            info!("规则集已移除: {}", scope_id);
        } else {
            debug!("移除不存在的规则集: {}", scope_id);
        }
        removed
    }

    /// 已加载的规则集 ID
    pub fn scope_ids(&self) -> Vec<ScopeId> {
        let mut ids: Vec<ScopeId> = self.scopes.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// 清空存储
    pub fn clear(&self) {
        self.scopes.clear();
        info!("规则集存储已清空");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::Mail;
    use crate::models::RuleDraft;

    #[tokio::test]
    async fn test_insert_get_remove() {
        let store = RuleStore::<Mail>::new();
        assert!(store.is_empty());

        let mut rules = FeedRules::new(42);
        rules.add_rule(RuleDraft::default()).unwrap();
        store.insert(rules);
        store.insert(FeedRules::new(7));

        assert_eq!(store.len(), 2);
        assert_eq!(store.scope_ids(), vec![7, 42]);

        let handle = store.get(42).unwrap();
        assert_eq!(handle.read().await.len(), 1);

        assert!(store.remove(42));
        assert!(!store.remove(42));
        assert!(store.get(42).is_none());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let store = RuleStore::<Mail>::new();
        let other = store.clone();
        store.insert(FeedRules::new(1));
        assert!(other.get(1).is_some());

        other.clear();
        assert!(store.is_empty());
    }
}
