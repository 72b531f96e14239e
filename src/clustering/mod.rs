//! 聚类算法模块
//!
//! 预处理、距离/质心工具、四种聚类器（K-means、层次聚类、DBSCAN、谱聚类）、
//! 质量评估、自适应算法选择和合并/拆分优化。
//!
//! 所有计算均为同步的 CPU 计算，不涉及网络或磁盘 IO。

pub mod dbscan;
pub mod hierarchical;
pub mod kmeans;
pub mod math;
pub mod optimizer;
pub mod preprocess;
pub mod quality;
pub mod selector;
pub mod spectral;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::ClusteringAlgorithm;
use crate::error::{ClusterError, Result};

pub use dbscan::DbscanClusterer;
pub use hierarchical::HierarchicalClusterer;
pub use kmeans::{KMeansClusterer, KMeansFit};
pub use optimizer::{OptimizationReport, OptimizedClusters, Optimizer};
pub use preprocess::{PreparedCorpus, Preprocessor};
pub use quality::QualityEvaluator;
pub use selector::{AlgorithmSelector, Selection};
pub use spectral::SpectralClusterer;

/// 一个候选聚类（成员为语料行号）
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    /// 成员行号（升序）
    pub members: Vec<usize>,
    /// 质心
    pub centroid: Vec<f32>,
    /// 凝聚度
    pub coherence: f32,
    /// 稳定性
    pub stability: f32,
}

impl Group {
    pub fn size(&self) -> usize {
        self.members.len()
    }
}

/// 聚类器输出的候选划分
#[derive(Debug, Clone)]
pub struct Partition {
    /// 产生该划分的算法
    pub algorithm: ClusteringAlgorithm,
    /// 保留下来的聚类
    pub groups: Vec<Group>,
    /// 未归类行号（噪声或被丢弃的小聚类成员）
    pub unclustered: Vec<usize>,
}

impl Partition {
    pub fn empty(algorithm: ClusteringAlgorithm) -> Self {
        Self {
            algorithm,
            groups: Vec::new(),
            unclustered: Vec::new(),
        }
    }

    /// 每个行号对应的聚类下标，未归类为 `None`
    pub fn labels(&self, n: usize) -> Vec<Option<usize>> {
        let mut labels = vec![None; n];
        for (cluster, group) in self.groups.iter().enumerate() {
            for &idx in &group.members {
                labels[idx] = Some(cluster);
            }
        }
        labels
    }
}

/// 聚类器接口
pub trait Clusterer {
    /// 算法标识
    fn algorithm(&self) -> ClusteringAlgorithm;

    /// 对 `data` 进行聚类。在迭代之间检查 `cancel`。
    fn cluster(&self, data: &[Vec<f32>], cancel: &CancellationFlag) -> Result<Partition>;
}

/// 协作式取消信号
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// 请求取消
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// 已取消时返回 `Cancelled` 错误
    pub fn check(&self, operation: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(ClusterError::Cancelled(operation.to_string()));
        }
        Ok(())
    }
}

/// 把按聚类下标分好的成员表拆成保留的聚类和未归类行号
pub(crate) fn split_by_min_size(
    buckets: Vec<Vec<usize>>,
    min_size: usize,
) -> (Vec<Vec<usize>>, Vec<usize>) {
    let mut kept = Vec::new();
    let mut dropped = Vec::new();
    for members in buckets {
        if members.is_empty() {
            continue;
        }
        if members.len() >= min_size {
            kept.push(members);
        } else {
            dropped.extend(members);
        }
    }
    dropped.sort_unstable();
    (kept, dropped)
}
