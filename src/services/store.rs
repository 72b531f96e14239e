//! 聚类存储
//!
//! 引擎独占的内存存储。聚类集合以不可变快照的形式整体替换，
//! 读者拿到的要么是上一次完整提交，要么是新的完整提交。
//! 分类表跨运行保留，与快照在同一次提交中更新。
//!
//! 锁顺序固定为：先分类表，后快照。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use crate::models::{ClusterRelationship, MemoryCategory, MemoryCluster};

/// 一次提交的不可变聚类集合
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    /// 提交序号，从 0（空存储）开始
    pub generation: u64,
    /// 产生该快照的运行 ID
    pub run_id: Option<String>,
    /// 叶子聚类
    pub clusters: Vec<MemoryCluster>,
    /// 拆分留下的父聚类
    pub parents: Vec<MemoryCluster>,
    /// 条目 ID -> 叶子聚类 ID
    pub assignments: HashMap<String, String>,
    /// 提交时间
    pub committed_at: Option<DateTime<Utc>>,
}

impl ClusterSnapshot {
    fn new(
        generation: u64,
        run_id: &str,
        clusters: Vec<MemoryCluster>,
        parents: Vec<MemoryCluster>,
    ) -> Self {
        let assignments = clusters
            .iter()
            .flat_map(|c| c.member_ids.iter().map(|m| (m.clone(), c.id.clone())))
            .collect();
        Self {
            generation,
            run_id: Some(run_id.to_string()),
            clusters,
            parents,
            assignments,
            committed_at: Some(Utc::now()),
        }
    }

    /// 条目所属的叶子聚类
    pub fn cluster_for_item(&self, item_id: &str) -> Option<&MemoryCluster> {
        let cluster_id = self.assignments.get(item_id)?;
        self.cluster(cluster_id)
    }

    /// 按 ID 查找聚类（叶子或父聚类）
    pub fn cluster(&self, cluster_id: &str) -> Option<&MemoryCluster> {
        self.clusters
            .iter()
            .chain(self.parents.iter())
            .find(|c| c.id == cluster_id)
    }

    /// 聚类的全部关系，包括同一父聚类下的兄弟
    pub fn relationships(&self, cluster_id: &str) -> Vec<ClusterRelationship> {
        let Some(cluster) = self.cluster(cluster_id) else {
            return Vec::new();
        };
        let mut relations = cluster.relationships();
        if let Some(parent) = cluster.parent_id.as_deref().and_then(|p| self.cluster(p)) {
            relations.extend(
                parent
                    .child_ids
                    .iter()
                    .filter(|id| id.as_str() != cluster_id)
                    .map(|id| ClusterRelationship::Sibling(id.clone())),
            );
        }
        relations
    }
}

/// 引擎持有的聚类存储
#[derive(Debug, Default)]
pub struct ClusterStore {
    categories: RwLock<Vec<MemoryCategory>>,
    snapshot: RwLock<Arc<ClusterSnapshot>>,
}

impl ClusterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前快照
    pub fn snapshot(&self) -> Arc<ClusterSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// 当前提交序号
    pub fn generation(&self) -> u64 {
        self.snapshot.read().generation
    }

    pub fn cluster_for_item(&self, item_id: &str) -> Option<String> {
        self.snapshot.read().assignments.get(item_id).cloned()
    }

    pub fn cluster(&self, cluster_id: &str) -> Option<MemoryCluster> {
        self.snapshot.read().cluster(cluster_id).cloned()
    }

    /// 叶子聚类
    pub fn clusters(&self) -> Vec<MemoryCluster> {
        self.snapshot.read().clusters.clone()
    }

    pub fn categories(&self) -> Vec<MemoryCategory> {
        self.categories.read().clone()
    }

    pub fn category(&self, category_id: &str) -> Option<MemoryCategory> {
        self.categories
            .read()
            .iter()
            .find(|c| c.id == category_id)
            .cloned()
    }

    /// 聚类当前所属的分类
    pub fn category_for_cluster(&self, cluster_id: &str) -> Option<MemoryCategory> {
        let categories = self.categories.read();
        let snapshot = self.snapshot.read();
        let category_id = snapshot.cluster(cluster_id)?.category_id.as_deref()?;
        categories.iter().find(|c| c.id == category_id).cloned()
    }

    /// 在分类表读锁下执行只读操作
    pub fn read_categories<R>(&self, f: impl FnOnce(&[MemoryCategory]) -> R) -> R {
        f(&self.categories.read())
    }

    /// 修改分类表。调用方须持有引擎的运行锁。
    pub(crate) fn update_categories<R>(&self, f: impl FnOnce(&mut Vec<MemoryCategory>) -> R) -> R {
        f(&mut self.categories.write())
    }

    /// 原子提交新的分类表和聚类集合，返回新的提交序号。调用方须持有引擎的运行锁。
    pub(crate) fn commit(
        &self,
        run_id: &str,
        categories: Vec<MemoryCategory>,
        clusters: Vec<MemoryCluster>,
        parents: Vec<MemoryCluster>,
    ) -> u64 {
        let mut category_table = self.categories.write();
        let mut snapshot = self.snapshot.write();
        let generation = snapshot.generation + 1;
        *snapshot = Arc::new(ClusterSnapshot::new(generation, run_id, clusters, parents));
        *category_table = categories;
        debug!(generation, run_id, "Cluster store committed");
        generation
    }
}
