//! 谱聚类（Ng-Jordan-Weiss）
//!
//! ```text
//! 1. 亲和矩阵 A_ij = exp(-||x_i - x_j||² / 2σ²)，对角线为 0
//! 2. M = D^{-1/2} A D^{-1/2}，其最大特征向量即 L_sym = I - M 的最小特征向量
//! 3. 对 M + I 做子空间迭代，得到前 k 个特征向量 U (n × k)
//! 4. U 的每一行归一化为单位向量，再用 K-means 分组
//! ```
//!
//! σ 未配置时取成对距离的中位数。亲和矩阵是稠密的 `n x n`，
//! 只有显式选择 `spectral` 时才会用到，自适应选择不会走到这里。

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::math::{self, distance};
use super::{CancellationFlag, Clusterer, Group, KMeansClusterer, Partition, split_by_min_size};
use crate::config::{ClusteringAlgorithm, ClusteringConfig};
use crate::error::{ClusterError, Result};

/// 子空间迭代上限
const MAX_SUBSPACE_ITERATIONS: usize = 300;
/// Rayleigh 商之和的相对变化小于该值即视为收敛
const SUBSPACE_TOLERANCE: f64 = 1e-9;

/// 谱聚类器
#[derive(Debug, Clone)]
pub struct SpectralClusterer {
    kmeans: KMeansClusterer,
    sigma: Option<f32>,
    min_cluster_size: usize,
    seed: Option<u64>,
}

impl SpectralClusterer {
    pub fn from_config(config: &ClusteringConfig) -> Self {
        Self {
            kmeans: KMeansClusterer::from_config(config),
            sigma: config.spectral_sigma,
            min_cluster_size: config.min_cluster_size,
            seed: config.seed,
        }
    }

    /// 固定聚类数
    pub fn with_k(mut self, k: usize) -> Self {
        self.kmeans = self.kmeans.with_k(k);
        self
    }

    pub fn with_sigma(mut self, sigma: f32) -> Self {
        self.sigma = Some(sigma);
        self
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        }
    }

    /// 归一化亲和矩阵 `D^{-1/2} A D^{-1/2}`
    fn normalized_affinity(
        &self,
        data: &[Vec<f32>],
        cancel: &CancellationFlag,
    ) -> Result<Vec<Vec<f64>>> {
        let n = data.len();
        let sigma = match self.sigma {
            Some(s) => f64::from(s),
            None => median_distance(data),
        };
        let sigma = if sigma > 0.0 && sigma.is_finite() { sigma } else { 1.0 };
        let scale = 2.0 * sigma * sigma;

        let mut affinity = vec![vec![0.0f64; n]; n];
        for i in 0..n {
            cancel.check("spectral")?;
            for j in (i + 1)..n {
                let d = f64::from(distance(&data[i], &data[j]));
                let a = (-d * d / scale).exp();
                affinity[i][j] = a;
                affinity[j][i] = a;
            }
        }

        let inv_sqrt_degree: Vec<f64> = affinity
            .iter()
            .map(|row| {
                let degree: f64 = row.iter().sum();
                if degree > 0.0 { 1.0 / degree.sqrt() } else { 0.0 }
            })
            .collect();
        for (i, row) in affinity.iter_mut().enumerate() {
            for (j, a) in row.iter_mut().enumerate() {
                *a *= inv_sqrt_degree[i] * inv_sqrt_degree[j];
            }
        }

        debug!(n, sigma, "Spectral affinity built");
        Ok(affinity)
    }

    /// `M + I` 的前 k 个特征向量，按列存放（k 列，每列长度 n）
    fn top_eigenvectors(
        &self,
        matrix: &[Vec<f64>],
        k: usize,
        cancel: &CancellationFlag,
    ) -> Result<Vec<Vec<f64>>> {
        let n = matrix.len();
        let mut rng = self.rng();
        let mut basis: Vec<Vec<f64>> = (0..k)
            .map(|_| (0..n).map(|_| rng.gen_range(-0.5..0.5)).collect())
            .collect();
        orthonormalize(&mut basis, &mut rng);

        let mut previous_trace = f64::NEG_INFINITY;
        let mut iterations = 0;
        for _ in 0..MAX_SUBSPACE_ITERATIONS {
            cancel.check("spectral")?;
            iterations += 1;

            let mut next: Vec<Vec<f64>> = basis
                .iter()
                .map(|column| shifted_product(matrix, column))
                .collect();
            let trace: f64 = basis
                .iter()
                .zip(next.iter())
                .map(|(u, w)| dot(u, w))
                .sum();
            orthonormalize(&mut next, &mut rng);
            basis = next;

            if (trace - previous_trace).abs() <= SUBSPACE_TOLERANCE * trace.abs().max(1.0) {
                break;
            }
            previous_trace = trace;
        }

        debug!(k, iterations, "Spectral embedding converged");
        Ok(basis)
    }
}

impl Clusterer for SpectralClusterer {
    fn algorithm(&self) -> ClusteringAlgorithm {
        ClusteringAlgorithm::Spectral
    }

    fn cluster(&self, data: &[Vec<f32>], cancel: &CancellationFlag) -> Result<Partition> {
        let n = data.len();
        if n == 0 {
            return Ok(Partition::empty(ClusteringAlgorithm::Spectral));
        }
        let dim = data[0].len();
        if let Some(bad) = data.iter().find(|v| v.len() != dim) {
            return Err(ClusterError::DimensionMismatch {
                expected: dim,
                found: bad.len(),
            });
        }

        let k = self.kmeans.choose_k(n);
        let matrix = self.normalized_affinity(data, cancel)?;
        let basis = self.top_eigenvectors(&matrix, k, cancel)?;

        // 第 i 行是条目 i 的谱嵌入
        let embedding: Vec<Vec<f32>> = (0..n)
            .map(|i| {
                let row: Vec<f32> = basis.iter().map(|column| column[i] as f32).collect();
                math::normalize(&row).unwrap_or(row)
            })
            .collect();
        let fit = self
            .kmeans
            .clone()
            .with_k(k)
            .with_min_cluster_size(1)
            .fit(&embedding, cancel)?;

        let mut buckets = vec![Vec::new(); fit.centroids.len()];
        for (idx, &label) in fit.labels.iter().enumerate() {
            buckets[label].push(idx);
        }
        let (kept, unclustered) = split_by_min_size(buckets, self.min_cluster_size);
        let groups: Vec<Group> = kept
            .into_iter()
            .map(|members| {
                let label = fit.labels[members[0]];
                let centroid = math::centroid_of(data, &members);
                Group {
                    coherence: math::coherence(data, &members, &centroid),
                    stability: fit.stability[label],
                    centroid,
                    members,
                }
            })
            .collect();

        debug!(
            k,
            clusters = groups.len(),
            unclustered = unclustered.len(),
            "Spectral clustering finished"
        );

        Ok(Partition {
            algorithm: ClusteringAlgorithm::Spectral,
            groups,
            unclustered,
        })
    }
}

/// `(M + I) v`
fn shifted_product(matrix: &[Vec<f64>], v: &[f64]) -> Vec<f64> {
    matrix
        .iter()
        .zip(v.iter())
        .map(|(row, &vi)| vi + dot(row, v))
        .collect()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// 修正 Gram-Schmidt；退化的列用随机向量替换后重新正交化
fn orthonormalize(columns: &mut [Vec<f64>], rng: &mut StdRng) {
    for c in 0..columns.len() {
        for _ in 0..2 {
            let (done, rest) = columns.split_at_mut(c);
            let column = &mut rest[0];
            for previous in done.iter() {
                let projection = dot(column, previous);
                for (x, p) in column.iter_mut().zip(previous.iter()) {
                    *x -= projection * p;
                }
            }
            let norm = column.iter().map(|x| x * x).sum::<f64>().sqrt();
            if norm > 1e-10 {
                column.iter_mut().for_each(|x| *x /= norm);
                break;
            }
            column
                .iter_mut()
                .for_each(|x| *x = rng.gen_range(-0.5..0.5));
        }
    }
}

/// 成对欧氏距离的中位数
fn median_distance(data: &[Vec<f32>]) -> f64 {
    let n = data.len();
    let mut distances: Vec<f32> = Vec::with_capacity(n * n.saturating_sub(1) / 2);
    for i in 0..data.len() {
        for j in (i + 1)..data.len() {
            distances.push(distance(&data[i], &data[j]));
        }
    }
    if distances.is_empty() {
        return 0.0;
    }
    let mid = distances.len() / 2;
    let (_, median, _) = distances.select_nth_unstable_by(mid, f32::total_cmp);
    f64::from(*median)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clusterer(min_cluster_size: usize) -> SpectralClusterer {
        SpectralClusterer::from_config(&ClusteringConfig {
            algorithm: ClusteringAlgorithm::Spectral,
            min_cluster_size,
            seed: Some(5),
            ..ClusteringConfig::default()
        })
    }

    fn memberships(partition: &Partition) -> Vec<Vec<usize>> {
        let mut groups: Vec<Vec<usize>> =
            partition.groups.iter().map(|g| g.members.clone()).collect();
        groups.sort();
        groups
    }

    #[test]
    fn test_separates_two_blobs() {
        let mut data: Vec<Vec<f32>> = (0..6).map(|i| vec![0.05 * i as f32, 0.0]).collect();
        data.extend((0..6).map(|i| vec![10.0 + 0.05 * i as f32, 0.0]));

        let partition = clusterer(3)
            .with_k(2)
            .cluster(&data, &CancellationFlag::new())
            .unwrap();
        assert_eq!(partition.algorithm, ClusteringAlgorithm::Spectral);
        assert_eq!(
            memberships(&partition),
            vec![(0..6).collect::<Vec<_>>(), (6..12).collect::<Vec<_>>()]
        );
        assert!(partition.unclustered.is_empty());
    }

    #[test]
    fn test_ring_around_core() {
        // 外圈 16 个点围绕中心 6 个点：凸划分会把圆环切开
        let mut data: Vec<Vec<f32>> = (0..16)
            .map(|i| {
                let angle = i as f32 * std::f32::consts::TAU / 16.0;
                vec![5.0 * angle.cos(), 5.0 * angle.sin()]
            })
            .collect();
        data.extend((0..6).map(|i| vec![0.05 * i as f32, 0.05]));

        let partition = clusterer(3)
            .with_k(2)
            .with_sigma(1.0)
            .cluster(&data, &CancellationFlag::new())
            .unwrap();
        assert_eq!(
            memberships(&partition),
            vec![(0..16).collect::<Vec<_>>(), (16..22).collect::<Vec<_>>()]
        );
    }

    #[test]
    fn test_undersized_groups_unclustered() {
        let mut data: Vec<Vec<f32>> = (0..6).map(|i| vec![0.05 * i as f32]).collect();
        data.push(vec![30.0]);

        let partition = clusterer(2)
            .with_k(2)
            .with_sigma(1.0)
            .cluster(&data, &CancellationFlag::new())
            .unwrap();
        assert_eq!(memberships(&partition), vec![(0..6).collect::<Vec<_>>()]);
        assert_eq!(partition.unclustered, vec![6]);
    }

    #[test]
    fn test_median_distance() {
        let data = vec![vec![0.0], vec![1.0], vec![3.0]];
        // 距离 1, 2, 3
        assert_eq!(median_distance(&data), 2.0);
        assert_eq!(median_distance(&data[..1]), 0.0);
    }

    #[test]
    fn test_cancelled() {
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let err = clusterer(2)
            .cluster(&[vec![0.0], vec![1.0]], &cancel)
            .unwrap_err();
        assert_eq!(err.code(), "CANCELLED");
    }
}
