//! 记忆条目数据模型
//!
//! 聚类引擎的外部输入。条目由调用方持有，引擎只读取。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 待聚类的记忆条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    /// 条目唯一标识
    pub id: String,

    /// 文本内容
    pub content: String,

    /// 向量表示（由外部嵌入服务提供）
    pub embedding: Vec<f32>,

    /// 自由格式元数据
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,

    /// 创建时间
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// 重要性评分 (0.0-1.0)
    #[serde(default = "default_importance")]
    pub importance: f32,

    /// 标签
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_importance() -> f32 {
    0.5
}

impl MemoryItem {
    /// 创建新条目
    pub fn new(id: &str, content: &str, embedding: Vec<f32>) -> Self {
        Self {
            id: id.to_string(),
            content: content.to_string(),
            embedding,
            metadata: HashMap::new(),
            created_at: Utc::now(),
            importance: default_importance(),
            tags: Vec::new(),
        }
    }

    /// 设置重要性
    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = importance.clamp(0.0, 1.0);
        self
    }

    /// 设置标签
    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        for tag in tags {
            self.add_tag(tag);
        }
        self
    }

    /// 添加元数据
    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// 添加标签
    pub fn add_tag(&mut self, tag: &str) {
        let tag = tag.to_lowercase();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }

    /// 向量维度
    pub fn dimension(&self) -> usize {
        self.embedding.len()
    }
}
