//! 自适应算法选择
//!
//! 先跑 K-means。只要最佳综合得分低于阈值且尝试次数未用完，就按最近一次尝试的指标选择下一个聚类器：
//!
//! - silhouette < 0.5 -> 层次聚类
//! - 否则 Davies-Bouldin > 2.0 -> DBSCAN（每次重试 eps 增加基准值的一半）
//! - 否则停止
//!
//! 保留目前最好的划分，结果不会倒退。尝试次数用完不算错误，返回最佳划分及其未达标的得分。
//! 指定具体算法（包括 `spectral`）时只运行该聚类器一次。

use tracing::{debug, info, warn};

use super::{
    CancellationFlag, Clusterer, DbscanClusterer, HierarchicalClusterer, KMeansClusterer,
    Partition, QualityEvaluator, SpectralClusterer,
};
use crate::config::{ClusteringAlgorithm, ClusteringConfig};
use crate::error::Result;
use crate::models::{AttemptSummary, QualityMetrics};

pub const SILHOUETTE_FLOOR: f32 = 0.5;
pub const DAVIES_BOULDIN_CEILING: f32 = 2.0;

/// 算法选择结果
#[derive(Debug, Clone)]
pub struct Selection {
    pub partition: Partition,
    pub quality: QualityMetrics,
    pub attempts: Vec<AttemptSummary>,
    pub meets_threshold: bool,
}

pub struct AlgorithmSelector<'a> {
    config: &'a ClusteringConfig,
    evaluator: QualityEvaluator,
}

impl<'a> AlgorithmSelector<'a> {
    pub fn new(config: &'a ClusteringConfig) -> Self {
        Self {
            config,
            evaluator: QualityEvaluator::new(),
        }
    }

    pub fn select(&self, data: &[Vec<f32>], cancel: &CancellationFlag) -> Result<Selection> {
        match self.config.algorithm {
            ClusteringAlgorithm::Kmeans => {
                self.single(&KMeansClusterer::from_config(self.config), data, cancel)
            }
            ClusteringAlgorithm::Hierarchical => {
                self.single(&HierarchicalClusterer::from_config(self.config), data, cancel)
            }
            ClusteringAlgorithm::Dbscan => {
                self.single(&DbscanClusterer::from_config(self.config), data, cancel)
            }
            ClusteringAlgorithm::Spectral => {
                self.single(&SpectralClusterer::from_config(self.config), data, cancel)
            }
            ClusteringAlgorithm::Adaptive => self.adaptive(data, cancel),
        }
    }

    fn attempt(
        &self,
        clusterer: &dyn Clusterer,
        data: &[Vec<f32>],
        cancel: &CancellationFlag,
    ) -> Result<(Partition, QualityMetrics, AttemptSummary)> {
        let partition = clusterer.cluster(data, cancel)?;
        let quality = self.evaluator.evaluate(data, &partition.groups);
        let summary = AttemptSummary {
            algorithm: partition.algorithm,
            cluster_count: partition.groups.len(),
            unclustered_count: partition.unclustered.len(),
            quality,
        };
        debug!(
            algorithm = %partition.algorithm,
            clusters = summary.cluster_count,
            silhouette = quality.silhouette,
            davies_bouldin = quality.davies_bouldin,
            overall = quality.overall,
            "Clustering attempt evaluated"
        );
        Ok((partition, quality, summary))
    }

    fn single(
        &self,
        clusterer: &dyn Clusterer,
        data: &[Vec<f32>],
        cancel: &CancellationFlag,
    ) -> Result<Selection> {
        let (partition, quality, summary) = self.attempt(clusterer, data, cancel)?;
        Ok(Selection {
            partition,
            meets_threshold: quality.overall >= self.config.quality_threshold,
            quality,
            attempts: vec![summary],
        })
    }

    fn adaptive(&self, data: &[Vec<f32>], cancel: &CancellationFlag) -> Result<Selection> {
        let threshold = self.config.quality_threshold;
        let max_attempts = self.config.max_attempts.max(1);

        let (first, first_quality, summary) =
            self.attempt(&KMeansClusterer::from_config(self.config), data, cancel)?;
        let mut attempts = vec![summary];
        let mut best = (first, first_quality);
        let mut latest = first_quality;
        let mut hierarchical_tried = false;
        let mut dbscan_runs = 0usize;

        while best.1.overall < threshold && attempts.len() < max_attempts {
            cancel.check("adaptive selection")?;

            let next: Box<dyn Clusterer> = if latest.silhouette < SILHOUETTE_FLOOR {
                // 层次聚类是确定性的，重复运行结果相同
                if hierarchical_tried {
                    break;
                }
                hierarchical_tried = true;
                Box::new(HierarchicalClusterer::from_config(self.config))
            } else if latest.davies_bouldin > DAVIES_BOULDIN_CEILING {
                let base = DbscanClusterer::from_config(self.config);
                let eps = base.eps() * (1.0 + 0.5 * dbscan_runs as f32);
                dbscan_runs += 1;
                Box::new(base.with_eps(eps))
            } else {
                break;
            };

            let (partition, quality, summary) = self.attempt(next.as_ref(), data, cancel)?;
            attempts.push(summary);
            latest = quality;
            if quality.overall > best.1.overall {
                best = (partition, quality);
            }
        }

        let (partition, quality) = best;
        let meets_threshold = quality.overall >= threshold;
        if meets_threshold {
            info!(
                algorithm = %partition.algorithm,
                attempts = attempts.len(),
                overall = quality.overall,
                "Adaptive selection reached quality threshold"
            );
        } else {
            warn!(
                algorithm = %partition.algorithm,
                attempts = attempts.len(),
                overall = quality.overall,
                threshold,
                "Adaptive selection returned best partition below quality threshold"
            );
        }

        Ok(Selection {
            partition,
            quality,
            attempts,
            meets_threshold,
        })
    }
}
