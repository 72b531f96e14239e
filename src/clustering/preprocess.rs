//! 输入校验与向量归一化

use std::collections::HashSet;

use tracing::{debug, warn};

use super::math;
use crate::config::ClusteringConfig;
use crate::error::{ClusterError, Result};
use crate::models::MemoryItem;

/// 预处理后保留的条目及其（归一化后的）向量
///
/// `source_indices[i]` 是第 `i` 行在调用方条目切片中的下标。
#[derive(Debug, Clone)]
pub struct PreparedCorpus {
    pub ids: Vec<String>,
    pub vectors: Vec<Vec<f32>>,
    pub source_indices: Vec<usize>,
    pub dimension: usize,
    pub filtered: usize,
}

impl PreparedCorpus {
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

/// 预处理器
pub struct Preprocessor<'a> {
    config: &'a ClusteringConfig,
}

impl<'a> Preprocessor<'a> {
    pub fn new(config: &'a ClusteringConfig) -> Self {
        Self { config }
    }

    /// 过滤、校验并归一化 `items`
    ///
    /// 未配置维度且维度不一致，或过滤后为空时返回验证错误，此时尚未做任何修改。
    /// 零向量只在需要归一化时被丢弃。
    pub fn prepare(&self, items: &[MemoryItem]) -> Result<PreparedCorpus> {
        let expected = match self.config.dimension {
            Some(dim) => dim,
            None => self.infer_dimension(items)?,
        };

        let mut corpus = PreparedCorpus {
            ids: Vec::with_capacity(items.len()),
            vectors: Vec::with_capacity(items.len()),
            source_indices: Vec::with_capacity(items.len()),
            dimension: expected,
            filtered: 0,
        };

        let mut seen = HashSet::with_capacity(items.len());
        for (idx, item) in items.iter().enumerate() {
            if !seen.insert(item.id.as_str()) {
                warn!(item_id = %item.id, "Dropping duplicate item id");
                corpus.filtered += 1;
                continue;
            }
            match self.accept(item, expected) {
                Some(vector) => {
                    corpus.ids.push(item.id.clone());
                    corpus.vectors.push(vector);
                    corpus.source_indices.push(idx);
                }
                None => corpus.filtered += 1,
            }
        }

        if corpus.is_empty() {
            return Err(ClusterError::validation(
                "preprocess",
                format!(
                    "corpus is empty after filtering ({} of {} items removed)",
                    corpus.filtered,
                    items.len()
                ),
            ));
        }

        debug!(
            retained = corpus.len(),
            filtered = corpus.filtered,
            dimension = expected,
            "Corpus prepared"
        );
        Ok(corpus)
    }

    /// 取第一个条目的维度，任何不一致都是验证错误
    fn infer_dimension(&self, items: &[MemoryItem]) -> Result<usize> {
        let Some(first) = items.first() else {
            return Err(ClusterError::validation("preprocess", "no items supplied"));
        };
        let dim = first.embedding.len();
        if let Some(bad) = items.iter().find(|item| item.embedding.len() != dim) {
            return Err(ClusterError::validation(
                "preprocess",
                format!(
                    "inconsistent vector dimensionality: item '{}' has {} components, expected {}",
                    bad.id,
                    bad.embedding.len(),
                    dim
                ),
            ));
        }
        Ok(dim)
    }

    fn accept(&self, item: &MemoryItem, expected: usize) -> Option<Vec<f32>> {
        if item.content.trim().is_empty() {
            debug!(item_id = %item.id, "Dropping item with empty content");
            return None;
        }
        if item.importance <= self.config.min_importance {
            debug!(
                item_id = %item.id,
                importance = item.importance,
                "Dropping low-importance item"
            );
            return None;
        }
        if item.embedding.len() != expected || expected == 0 {
            warn!(
                item_id = %item.id,
                found = item.embedding.len(),
                expected,
                "Dropping item with wrong vector length"
            );
            return None;
        }
        if item.embedding.iter().any(|x| !x.is_finite()) {
            warn!(item_id = %item.id, "Dropping item with non-finite vector component");
            return None;
        }

        if !self.config.normalize_vectors {
            return Some(item.embedding.clone());
        }
        let normalized = math::normalize(&item.embedding);
        if normalized.is_none() {
            debug!(item_id = %item.id, "Dropping zero vector");
        }
        normalized
    }
}
