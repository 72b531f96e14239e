//! 聚类结果数据模型

use serde::{Deserialize, Serialize};

use crate::config::ClusteringAlgorithm;
use crate::models::category::MemoryCategory;
use crate::models::cluster::MemoryCluster;

/// 聚类质量指标
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct QualityMetrics {
    /// 轮廓系数 (-1..1，越高越好)
    pub silhouette: f32,
    /// Davies-Bouldin 指数（越低越好）
    pub davies_bouldin: f32,
    /// 方差比指数（Calinski-Harabasz，越高越好）
    pub variance_ratio: f32,
    /// 综合质量 (0..1)
    pub overall: f32,
}

/// 单次算法尝试
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptSummary {
    /// 使用的算法
    pub algorithm: ClusteringAlgorithm,
    /// 产生的聚类数
    pub cluster_count: usize,
    /// 未归类条目数
    pub unclustered_count: usize,
    /// 质量指标
    pub quality: QualityMetrics,
}

/// 聚合统计
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClusteringStatistics {
    /// 预处理后的条目数
    pub total_memories: usize,
    /// 被预处理过滤的条目数
    pub filtered_memories: usize,
    /// 聚类数
    pub cluster_count: usize,
    /// 分类数
    pub category_count: usize,
    /// 未归类条目数
    pub unclustered_count: usize,
    /// 平均聚类大小
    pub avg_cluster_size: f32,
    /// 平均凝聚度
    pub avg_coherence: f32,
    /// 平均稳定性
    pub avg_stability: f32,
    /// 处理耗时（毫秒）
    pub processing_time_ms: u64,
}

/// 合并建议
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeCandidate {
    pub cluster_a: String,
    pub cluster_b: String,
    pub similarity: f32,
}

/// 拆分建议
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitCandidate {
    pub cluster_id: String,
    pub size: usize,
    pub coherence: f32,
    pub stability: f32,
    pub reason: String,
}

/// 重新分类建议
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecategorizationCandidate {
    pub cluster_id: String,
    pub current_category: Option<String>,
    pub reason: String,
}

/// 优化建议
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OptimizationRecommendations {
    pub merge_candidates: Vec<MergeCandidate>,
    pub split_candidates: Vec<SplitCandidate>,
    pub recategorizations: Vec<RecategorizationCandidate>,
}

impl OptimizationRecommendations {
    /// 建议总数
    pub fn len(&self) -> usize {
        self.merge_candidates.len() + self.split_candidates.len() + self.recategorizations.len()
    }

    /// 是否没有任何建议
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 一次完整聚类运行的结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringResult {
    /// 运行 ID
    pub run_id: String,
    /// 最终采用的算法
    pub algorithm: ClusteringAlgorithm,
    /// 叶子聚类
    pub clusters: Vec<MemoryCluster>,
    /// 拆分产生的父聚类（仅用于层次结构）
    pub parent_clusters: Vec<MemoryCluster>,
    /// 分类表（含本次新建的分类）
    pub categories: Vec<MemoryCategory>,
    /// 未归类条目 ID（噪声或被丢弃的小聚类成员）
    pub unclustered: Vec<String>,
    /// 聚合统计
    pub statistics: ClusteringStatistics,
    /// 质量指标
    pub quality: QualityMetrics,
    /// 是否达到质量阈值
    pub meets_quality_threshold: bool,
    /// 算法尝试记录
    pub attempts: Vec<AttemptSummary>,
    /// 优化建议
    pub recommendations: OptimizationRecommendations,
}

impl ClusteringResult {
    /// 生成一行摘要（用于日志和事件）
    pub fn summary(&self) -> String {
        format!(
            "{} clusters, {} categories, {} unclustered of {} memories via {} (quality {:.3}{})",
            self.statistics.cluster_count,
            self.statistics.category_count,
            self.statistics.unclustered_count,
            self.statistics.total_memories,
            self.algorithm,
            self.quality.overall,
            if self.meets_quality_threshold {
                ""
            } else {
                ", below threshold"
            }
        )
    }
}
