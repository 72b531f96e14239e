//! DBSCAN：基于密度的聚类，带噪声识别
//!
//! - **eps**：邻域半径（欧氏距离）
//! - **minPts**：成为核心点所需的邻居数（不含自身），取 `min_cluster_size`
//!
//! 邻居不足的未访问点先记为噪声，之后仍可能作为边界点加入聚类。
//! 核心点开启一个新聚类并按广度优先扩展，核心邻居的邻域继续入队。
//! 噪声不会出现在任何成员集合里。

use std::collections::VecDeque;

use tracing::debug;

use super::math::{self, distance};
use super::{CancellationFlag, Clusterer, Group, Partition, split_by_min_size};
use crate::config::{ClusteringAlgorithm, ClusteringConfig};
use crate::error::{ClusterError, Result};

/// DBSCAN 聚类器
#[derive(Debug, Clone)]
pub struct DbscanClusterer {
    eps: f32,
    min_pts: usize,
    min_cluster_size: usize,
}

impl DbscanClusterer {
    pub fn from_config(config: &ClusteringConfig) -> Self {
        Self {
            eps: config.dbscan_eps,
            min_pts: config.min_cluster_size,
            min_cluster_size: config.min_cluster_size,
        }
    }

    /// 覆盖邻域半径（自适应选择逐次放宽时使用）
    pub fn with_eps(mut self, eps: f32) -> Self {
        self.eps = eps;
        self
    }

    pub fn eps(&self) -> f32 {
        self.eps
    }

    /// `point` 的 eps 邻域，不含自身
    fn region_query(&self, data: &[Vec<f32>], point: usize) -> Vec<usize> {
        data.iter()
            .enumerate()
            .filter(|(idx, other)| *idx != point && distance(&data[point], other) <= self.eps)
            .map(|(idx, _)| idx)
            .collect()
    }
}

impl Clusterer for DbscanClusterer {
    fn algorithm(&self) -> ClusteringAlgorithm {
        ClusteringAlgorithm::Dbscan
    }

    fn cluster(&self, data: &[Vec<f32>], cancel: &CancellationFlag) -> Result<Partition> {
        if self.eps <= 0.0 || !self.eps.is_finite() {
            return Err(ClusterError::validation("dbscan", "eps must be positive"));
        }
        let n = data.len();
        let mut labels: Vec<Option<usize>> = vec![None; n];
        let mut visited = vec![false; n];
        let mut core = vec![false; n];
        let mut cluster_count = 0;

        for point in 0..n {
            if visited[point] {
                continue;
            }
            cancel.check("dbscan")?;
            visited[point] = true;

            let neighbors = self.region_query(data, point);
            if neighbors.len() < self.min_pts {
                continue;
            }

            let cluster = cluster_count;
            cluster_count += 1;
            core[point] = true;
            labels[point] = Some(cluster);

            let mut queue: VecDeque<usize> = neighbors.into();
            while let Some(q) = queue.pop_front() {
                if labels[q].is_none() {
                    labels[q] = Some(cluster);
                }
                if visited[q] {
                    continue;
                }
                visited[q] = true;

                let q_neighbors = self.region_query(data, q);
                if q_neighbors.len() >= self.min_pts {
                    core[q] = true;
                    queue.extend(
                        q_neighbors
                            .into_iter()
                            .filter(|&r| !visited[r] || labels[r].is_none()),
                    );
                }
            }
        }

        let mut buckets = vec![Vec::new(); cluster_count];
        let mut noise = Vec::new();
        for (idx, label) in labels.iter().enumerate() {
            match label {
                Some(c) => buckets[*c].push(idx),
                None => noise.push(idx),
            }
        }

        let (kept, dropped) = split_by_min_size(buckets, self.min_cluster_size);
        let groups: Vec<Group> = kept
            .into_iter()
            .map(|members| {
                let centroid = math::centroid_of(data, &members);
                let core_count = members.iter().filter(|&&i| core[i]).count();
                Group {
                    coherence: math::coherence(data, &members, &centroid),
                    stability: core_count as f32 / members.len() as f32,
                    centroid,
                    members,
                }
            })
            .collect();

        let mut unclustered = noise;
        unclustered.extend(dropped);
        unclustered.sort_unstable();

        debug!(
            eps = self.eps,
            clusters = groups.len(),
            noise = unclustered.len(),
            "DBSCAN finished"
        );

        Ok(Partition {
            algorithm: ClusteringAlgorithm::Dbscan,
            groups,
            unclustered,
        })
    }
}
