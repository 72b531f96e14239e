//! 记忆聚类数据模型
//!
//! 每次聚类运行都会重新创建，下一次成功运行时整体替换。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// 聚类之间的关系
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "cluster_id", rename_all = "snake_case")]
pub enum ClusterRelationship {
    /// 父聚类（拆分前的原聚类）
    Parent(String),
    /// 子聚类（拆分产物）
    Child(String),
    /// 同一父聚类下的兄弟聚类
    Sibling(String),
    /// 合并来源
    MergedFrom(String),
}

/// 记忆聚类
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryCluster {
    /// 聚类唯一标识
    pub id: String,

    /// 显示名称
    pub name: String,

    /// 质心向量
    pub centroid: Vec<f32>,

    /// 成员条目 ID
    pub member_ids: BTreeSet<String>,

    /// 权重 = 成员数 / 语料大小
    pub weight: f32,

    /// 凝聚度 (0.0-1.0)
    pub coherence: f32,

    /// 稳定性 (0.0-1.0)
    pub stability: f32,

    /// 所属分类
    pub category_id: Option<String>,

    /// 父聚类
    pub parent_id: Option<String>,

    /// 子聚类
    pub child_ids: BTreeSet<String>,

    /// 合并来源聚类
    #[serde(default)]
    pub merged_from: Vec<String>,

    /// 创建时间
    pub created_at: DateTime<Utc>,

    /// 更新时间
    pub updated_at: DateTime<Utc>,
}

impl MemoryCluster {
    /// 创建新聚类
    pub fn new(
        centroid: Vec<f32>,
        member_ids: BTreeSet<String>,
        corpus_size: usize,
        coherence: f32,
        stability: f32,
    ) -> Self {
        let now = Utc::now();
        let id = uuid::Uuid::new_v4().to_string();
        let weight = if corpus_size == 0 {
            0.0
        } else {
            member_ids.len() as f32 / corpus_size as f32
        };
        Self {
            name: format!("cluster-{}", &id[..8]),
            id,
            centroid,
            member_ids,
            weight: weight.clamp(0.0, 1.0),
            coherence: coherence.clamp(0.0, 1.0),
            stability: stability.clamp(0.0, 1.0),
            category_id: None,
            parent_id: None,
            child_ids: BTreeSet::new(),
            merged_from: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// 成员数量
    pub fn size(&self) -> usize {
        self.member_ids.len()
    }

    /// 是否为叶子聚类
    pub fn is_leaf(&self) -> bool {
        self.child_ids.is_empty()
    }

    /// 是否包含某个条目
    pub fn contains(&self, item_id: &str) -> bool {
        self.member_ids.contains(item_id)
    }

    /// 设置分类
    pub fn assign_category(&mut self, category_id: &str) {
        self.category_id = Some(category_id.to_string());
        self.updated_at = Utc::now();
    }

    /// 添加子聚类
    pub fn add_child(&mut self, child_id: &str) {
        self.child_ids.insert(child_id.to_string());
        self.updated_at = Utc::now();
    }

    /// 列出该聚类自身记录的关系（兄弟关系需要整个快照，见 `ClusterSnapshot::relationships`）
    pub fn relationships(&self) -> Vec<ClusterRelationship> {
        let mut relations = Vec::new();
        if let Some(parent) = &self.parent_id {
            relations.push(ClusterRelationship::Parent(parent.clone()));
        }
        relations.extend(
            self.child_ids
                .iter()
                .map(|id| ClusterRelationship::Child(id.clone())),
        );
        relations.extend(
            self.merged_from
                .iter()
                .map(|id| ClusterRelationship::MergedFrom(id.clone())),
        );
        relations
    }
}
