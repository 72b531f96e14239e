//! 记忆分类数据模型
//!
//! 分类跨运行长期存在，只做增量修改。关联聚类集合只会增长，
//! 或通过显式调用剪枝。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// 分类规则（封闭的规则种类，每种带各自的参数）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CategoryRule {
    /// 关键词重合：聚类关键词覆盖规则关键词的比例
    Keyword { keywords: Vec<String>, weight: f32 },

    /// 正则匹配：成员内容匹配的比例
    Pattern { pattern: String, weight: f32 },

    /// 语义相似：聚类质心与参考向量的相似度
    Semantic {
        reference: Vec<f32>,
        min_similarity: f32,
        weight: f32,
    },

    /// 内容长度：成员内容字符数落在区间内的比例
    Length {
        min_chars: usize,
        max_chars: usize,
        weight: f32,
    },

    /// 词频：某个词在成员内容中出现的次数
    Frequency {
        term: String,
        min_occurrences: usize,
        weight: f32,
    },
}

impl CategoryRule {
    /// 规则权重
    pub fn weight(&self) -> f32 {
        match self {
            CategoryRule::Keyword { weight, .. }
            | CategoryRule::Pattern { weight, .. }
            | CategoryRule::Semantic { weight, .. }
            | CategoryRule::Length { weight, .. }
            | CategoryRule::Frequency { weight, .. } => weight.max(0.0),
        }
    }

    /// 规则种类名称
    pub fn kind(&self) -> &'static str {
        match self {
            CategoryRule::Keyword { .. } => "keyword",
            CategoryRule::Pattern { .. } => "pattern",
            CategoryRule::Semantic { .. } => "semantic",
            CategoryRule::Length { .. } => "length",
            CategoryRule::Frequency { .. } => "frequency",
        }
    }
}

/// 分类运行统计
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryStats {
    /// 累计映射的条目数
    pub total_items: usize,
    /// 分类内平均相似度
    pub avg_similarity: f32,
    /// 最后更新时间
    pub last_updated: DateTime<Utc>,
}

impl Default for CategoryStats {
    fn default() -> Self {
        Self {
            total_items: 0,
            avg_similarity: 0.0,
            last_updated: Utc::now(),
        }
    }
}

/// 记忆分类
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryCategory {
    /// 分类唯一标识
    #[serde(default = "new_category_id")]
    pub id: String,

    /// 分类名称
    pub name: String,

    /// 分类描述
    #[serde(default)]
    pub description: String,

    /// 关键词
    #[serde(default)]
    pub keywords: Vec<String>,

    /// 正则模式
    #[serde(default)]
    pub patterns: Vec<String>,

    /// 置信度 (0.0-1.0)
    pub confidence: f32,

    /// 分类规则
    #[serde(default)]
    pub rules: Vec<CategoryRule>,

    /// 关联的聚类 ID
    #[serde(default)]
    pub cluster_ids: BTreeSet<String>,

    /// 运行统计
    #[serde(default)]
    pub stats: CategoryStats,

    /// 创建时间
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn new_category_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl MemoryCategory {
    /// 创建新分类
    pub fn new(name: &str, description: &str, confidence: f32) -> Self {
        Self {
            id: new_category_id(),
            name: name.to_string(),
            description: description.to_string(),
            keywords: Vec::new(),
            patterns: Vec::new(),
            confidence: confidence.clamp(0.0, 1.0),
            rules: Vec::new(),
            cluster_ids: BTreeSet::new(),
            stats: CategoryStats::default(),
            created_at: Utc::now(),
        }
    }

    /// 添加关键词规则，关键词同时记入关键词列表
    pub fn with_keyword_rule(mut self, keywords: &[&str], weight: f32) -> Self {
        let keywords: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
        for keyword in &keywords {
            if !self.keywords.contains(keyword) {
                self.keywords.push(keyword.clone());
            }
        }
        self.rules.push(CategoryRule::Keyword { keywords, weight });
        self
    }

    /// 添加正则规则，模式同时记入模式列表
    pub fn with_pattern_rule(mut self, pattern: &str, weight: f32) -> Self {
        self.patterns.push(pattern.to_string());
        self.rules.push(CategoryRule::Pattern {
            pattern: pattern.to_string(),
            weight,
        });
        self
    }

    /// 添加任意规则
    pub fn with_rule(mut self, rule: CategoryRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// 吸收一个聚类，增量更新统计（从不重置）
    pub fn absorb_cluster(&mut self, cluster_id: &str, member_count: usize, similarity: f32) {
        if !self.cluster_ids.insert(cluster_id.to_string()) {
            return;
        }
        let previous = self.stats.total_items;
        let total = previous + member_count;
        if total > 0 {
            self.stats.avg_similarity = (self.stats.avg_similarity * previous as f32
                + similarity.clamp(0.0, 1.0) * member_count as f32)
                / total as f32;
        }
        self.stats.total_items = total;
        self.stats.last_updated = Utc::now();
    }

    /// 显式剪除关联聚类，返回实际移除的数量
    pub fn prune_clusters(&mut self, cluster_ids: &[String]) -> usize {
        let before = self.cluster_ids.len();
        for id in cluster_ids {
            self.cluster_ids.remove(id);
        }
        let removed = before - self.cluster_ids.len();
        if removed > 0 {
            self.stats.last_updated = Utc::now();
        }
        removed
    }
}
