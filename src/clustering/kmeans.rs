//! K-means 聚类
//!
//! 基于欧氏距离的 Lloyd 算法：
//!
//! 1. 用种子随机数均匀抽取 k 个不同条目作为初始质心
//! 2. **分配**：每个条目归入最近的质心（距离相同取下标最小者）
//! 3. **更新**：质心取成员均值；没有成员的质心保持原位
//! 4. 重复直到所有质心移动都小于 epsilon，或达到迭代上限
//!
//! 每次分配后的簇内平方和单调不增，记录在 [`KMeansFit::inertia_history`]。

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::debug;

use super::math::{self, squared_distance};
use super::{CancellationFlag, Clusterer, Group, Partition, split_by_min_size};
use crate::config::{ClusteringAlgorithm, ClusteringConfig};
use crate::error::{ClusterError, Result};

/// K-means 聚类器
#[derive(Debug, Clone)]
pub struct KMeansClusterer {
    /// 固定的 k；为 `None` 时按语料规模推导
    k: Option<usize>,
    max_clusters: usize,
    min_cluster_size: usize,
    max_iterations: usize,
    epsilon: f32,
    seed: Option<u64>,
}

/// 一次拟合的原始输出（尚未丢弃小聚类）
#[derive(Debug, Clone)]
pub struct KMeansFit {
    pub labels: Vec<usize>,
    pub centroids: Vec<Vec<f32>>,
    pub inertia_history: Vec<f32>,
    pub iterations: usize,
    pub converged: bool,
    /// 每个质心在最后一次迭代中标签未变的成员比例
    pub stability: Vec<f32>,
}

impl KMeansClusterer {
    pub fn from_config(config: &ClusteringConfig) -> Self {
        Self {
            k: None,
            max_clusters: config.max_clusters,
            min_cluster_size: config.min_cluster_size,
            max_iterations: config.max_iterations,
            epsilon: config.convergence_epsilon,
            seed: config.seed,
        }
    }

    /// 固定聚类数
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_min_cluster_size(mut self, min_cluster_size: usize) -> Self {
        self.min_cluster_size = min_cluster_size;
        self
    }

    /// `min(max_clusters, max(2, floor(sqrt(n / 2))))`, never more than n.
    pub fn choose_k(&self, n: usize) -> usize {
        let k = self.k.unwrap_or_else(|| {
            let heuristic = ((n as f64 / 2.0).sqrt().floor() as usize).max(2);
            heuristic.min(self.max_clusters)
        });
        k.min(n).max(1)
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        }
    }

    /// 执行 Lloyd 迭代，不做过滤
    pub fn fit(&self, data: &[Vec<f32>], cancel: &CancellationFlag) -> Result<KMeansFit> {
        let n = data.len();
        if n == 0 {
            return Err(ClusterError::validation("kmeans", "no vectors to cluster"));
        }
        let dim = data[0].len();
        if let Some(bad) = data.iter().find(|v| v.len() != dim) {
            return Err(ClusterError::DimensionMismatch {
                expected: dim,
                found: bad.len(),
            });
        }

        let k = self.choose_k(n);
        let mut rng = self.rng();
        let mut initial = rand::seq::index::sample(&mut rng, n, k).into_vec();
        initial.sort_unstable();
        let mut centroids: Vec<Vec<f32>> = initial.iter().map(|&i| data[i].clone()).collect();

        let mut labels = vec![usize::MAX; n];
        let mut previous = labels.clone();
        let mut inertia_history = Vec::new();
        let mut iterations = 0;
        let mut converged = false;

        for _ in 0..self.max_iterations.max(1) {
            cancel.check("kmeans")?;

            previous.clone_from(&labels);
            labels = assign(data, &centroids);
            inertia_history.push(inertia(data, &labels, &centroids));

            let updated = update(data, &labels, &centroids);
            let done = math::has_converged(&centroids, &updated, self.epsilon);
            centroids = updated;
            iterations += 1;

            if done {
                converged = true;
                break;
            }
        }

        let mut unchanged = vec![0usize; k];
        let mut sizes = vec![0usize; k];
        for (label, prev) in labels.iter().zip(previous.iter()) {
            sizes[*label] += 1;
            if label == prev {
                unchanged[*label] += 1;
            }
        }
        let stability = sizes
            .iter()
            .zip(unchanged.iter())
            .map(|(&size, &same)| if size == 0 { 0.0 } else { same as f32 / size as f32 })
            .collect();

        debug!(k, iterations, converged, "K-means finished");

        Ok(KMeansFit {
            labels,
            centroids,
            inertia_history,
            iterations,
            converged,
            stability,
        })
    }
}

/// 每行最近的质心，距离相同取下标最小者
fn assign(data: &[Vec<f32>], centroids: &[Vec<f32>]) -> Vec<usize> {
    data.iter()
        .map(|point| {
            let mut best = 0;
            let mut best_dist = f32::INFINITY;
            for (c, centroid) in centroids.iter().enumerate() {
                let d = squared_distance(point, centroid);
                if d < best_dist {
                    best = c;
                    best_dist = d;
                }
            }
            best
        })
        .collect()
}

/// 成员均值；空质心保持原位
fn update(data: &[Vec<f32>], labels: &[usize], centroids: &[Vec<f32>]) -> Vec<Vec<f32>> {
    let dim = centroids.first().map_or(0, |c| c.len());
    let mut sums = vec![vec![0.0f32; dim]; centroids.len()];
    let mut counts = vec![0usize; centroids.len()];
    for (point, &label) in data.iter().zip(labels.iter()) {
        counts[label] += 1;
        for (s, v) in sums[label].iter_mut().zip(point.iter()) {
            *s += v;
        }
    }
    sums.into_iter()
        .zip(counts.iter())
        .zip(centroids.iter())
        .map(|((mut sum, &count), old)| {
            if count == 0 {
                old.clone()
            } else {
                sum.iter_mut().for_each(|s| *s /= count as f32);
                sum
            }
        })
        .collect()
}

fn inertia(data: &[Vec<f32>], labels: &[usize], centroids: &[Vec<f32>]) -> f32 {
    data.iter()
        .zip(labels.iter())
        .map(|(point, &label)| squared_distance(point, &centroids[label]))
        .sum()
}

impl Clusterer for KMeansClusterer {
    fn algorithm(&self) -> ClusteringAlgorithm {
        ClusteringAlgorithm::Kmeans
    }

    fn cluster(&self, data: &[Vec<f32>], cancel: &CancellationFlag) -> Result<Partition> {
        let fit = self.fit(data, cancel)?;

        let mut buckets = vec![Vec::new(); fit.centroids.len()];
        for (idx, &label) in fit.labels.iter().enumerate() {
            buckets[label].push(idx);
        }
        let (kept, unclustered) = split_by_min_size(buckets, self.min_cluster_size);
        let groups = kept
            .into_iter()
            .map(|members| {
                let label = fit.labels[members[0]];
                let centroid = fit.centroids[label].clone();
                Group {
                    coherence: math::coherence(data, &members, &centroid),
                    stability: fit.stability[label],
                    centroid,
                    members,
                }
            })
            .collect();

        Ok(Partition {
            algorithm: ClusteringAlgorithm::Kmeans,
            groups,
            unclustered,
        })
    }
}
