//! 凝聚式（自底向上）层次聚类
//!
//! 每个条目先自成一类，反复合并质心欧氏距离最近的一对，直到剩下目标数量：
//!
//! ```text
//! target = max(1, min(max_clusters, floor(n / min_cluster_size)))
//! ```
//!
//! 合并时质心取两者平均，权重相加，凝聚度取平均，稳定性取较小值。
//! 距离完全相同时，先比较两个下标之和，再比较较小的下标。
//!
//! 不缓存 `n x n` 距离矩阵：每个节点只记住下标比它大的最近伙伴，
//! 合并后只刷新伙伴失效的节点，内存为 O(n)。

use tracing::debug;

use super::math::distance;
use super::{CancellationFlag, Clusterer, Group, Partition};
use crate::config::{ClusteringAlgorithm, ClusteringConfig};
use crate::error::Result;

/// 层次聚类器
#[derive(Debug, Clone)]
pub struct HierarchicalClusterer {
    max_clusters: usize,
    min_cluster_size: usize,
}

#[derive(Debug, Clone)]
struct Node {
    members: Vec<usize>,
    centroid: Vec<f32>,
    weight: f32,
    coherence: f32,
    stability: f32,
}

/// 节点 `i` 的最近伙伴：`(距离, 下标)`，下标大于 `i`
type Partner = Option<(f32, usize)>;

impl HierarchicalClusterer {
    pub fn from_config(config: &ClusteringConfig) -> Self {
        Self {
            max_clusters: config.max_clusters,
            min_cluster_size: config.min_cluster_size,
        }
    }

    /// 停止合并时剩余的聚类数
    pub fn target_count(&self, n: usize) -> usize {
        let by_size = n / self.min_cluster_size.max(1);
        self.max_clusters.min(by_size).max(1)
    }

    /// 在下标大于 `i` 的活跃节点中找最近的一个，距离相同取下标最小者
    fn nearest_partner(nodes: &[Option<Node>], i: usize) -> Partner {
        let centroid = &nodes[i].as_ref()?.centroid;
        let mut best: Partner = None;
        for (j, node) in nodes.iter().enumerate().skip(i + 1) {
            let Some(node) = node else {
                continue;
            };
            let d = distance(centroid, &node.centroid);
            if best.is_none_or(|(bd, _)| d < bd) {
                best = Some((d, j));
            }
        }
        best
    }

    /// 全局最近的一对 `(i, j)`，`i < j`
    fn closest_pair(partners: &[Partner]) -> Option<(usize, usize)> {
        let mut best: Option<(f32, usize, usize)> = None;
        for (i, partner) in partners.iter().enumerate() {
            let Some((d, j)) = *partner else {
                continue;
            };
            let better = match best {
                None => true,
                Some((bd, bi, bj)) => d < bd || (d == bd && (i + j, i) < (bi + bj, bi)),
            };
            if better {
                best = Some((d, i, j));
            }
        }
        best.map(|(_, i, j)| (i, j))
    }

    /// 合并 `(i, j)` 之后刷新伙伴表
    fn refresh_partners(nodes: &[Option<Node>], partners: &mut [Partner], i: usize, j: usize) {
        partners[j] = None;
        for k in 0..nodes.len() {
            let Some(node) = &nodes[k] else {
                continue;
            };
            let stale = match partners[k] {
                Some((_, p)) => p == i || p == j,
                None => true,
            };
            if k == i || stale {
                partners[k] = Self::nearest_partner(nodes, k);
            } else if k < i {
                // 只有到 i 的距离变了
                if let (Some((bd, bp)), Some(merged)) = (partners[k], &nodes[i]) {
                    let d = distance(&node.centroid, &merged.centroid);
                    if d < bd || (d == bd && i < bp) {
                        partners[k] = Some((d, i));
                    }
                }
            }
        }
    }
}

impl Clusterer for HierarchicalClusterer {
    fn algorithm(&self) -> ClusteringAlgorithm {
        ClusteringAlgorithm::Hierarchical
    }

    fn cluster(&self, data: &[Vec<f32>], cancel: &CancellationFlag) -> Result<Partition> {
        let n = data.len();
        if n == 0 {
            return Ok(Partition::empty(ClusteringAlgorithm::Hierarchical));
        }

        let mut nodes: Vec<Option<Node>> = data
            .iter()
            .enumerate()
            .map(|(idx, v)| {
                Some(Node {
                    members: vec![idx],
                    centroid: v.clone(),
                    weight: 1.0 / n as f32,
                    coherence: 1.0,
                    stability: 1.0,
                })
            })
            .collect();
        let mut partners: Vec<Partner> = (0..n)
            .map(|i| Self::nearest_partner(&nodes, i))
            .collect();

        let target = self.target_count(n);
        let mut count = n;
        while count > target {
            cancel.check("hierarchical")?;
            let Some((i, j)) = Self::closest_pair(&partners) else {
                break;
            };

            let (Some(left), Some(right)) = (nodes[i].take(), nodes[j].take()) else {
                break;
            };
            let centroid: Vec<f32> = left
                .centroid
                .iter()
                .zip(right.centroid.iter())
                .map(|(a, b)| (a + b) / 2.0)
                .collect();
            let mut members = left.members;
            members.extend(right.members);
            members.sort_unstable();

            nodes[i] = Some(Node {
                members,
                centroid,
                weight: left.weight + right.weight,
                coherence: (left.coherence + right.coherence) / 2.0,
                stability: left.stability.min(right.stability),
            });
            count -= 1;
            Self::refresh_partners(&nodes, &mut partners, i, j);
        }

        let mut groups = Vec::new();
        let mut unclustered = Vec::new();
        for node in nodes.into_iter().flatten() {
            if node.members.len() >= self.min_cluster_size {
                groups.push(Group {
                    members: node.members,
                    centroid: node.centroid,
                    coherence: node.coherence.clamp(0.0, 1.0),
                    stability: node.stability.clamp(0.0, 1.0),
                });
            } else {
                unclustered.extend(node.members);
            }
        }
        unclustered.sort_unstable();

        debug!(
            target,
            clusters = groups.len(),
            unclustered = unclustered.len(),
            "Hierarchical clustering finished"
        );

        Ok(Partition {
            algorithm: ClusteringAlgorithm::Hierarchical,
            groups,
            unclustered,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clusterer(max_clusters: usize, min_cluster_size: usize) -> HierarchicalClusterer {
        HierarchicalClusterer::from_config(&ClusteringConfig {
            max_clusters,
            min_cluster_size,
            ..ClusteringConfig::default()
        })
    }

    #[test]
    fn test_target_count() {
        assert_eq!(clusterer(50, 3).target_count(12), 4);
        assert_eq!(clusterer(2, 3).target_count(12), 2);
        assert_eq!(clusterer(50, 5).target_count(3), 1);
    }

    #[test]
    fn test_merges_nearest_first() {
        let data = vec![
            vec![0.0, 0.0],
            vec![0.1, 0.0],
            vec![0.2, 0.0],
            vec![5.0, 0.0],
            vec![5.1, 0.0],
            vec![5.2, 0.0],
        ];
        let partition = clusterer(2, 3).cluster(&data, &CancellationFlag::new()).unwrap();
        assert_eq!(partition.groups.len(), 2);
        let mut memberships: Vec<Vec<usize>> =
            partition.groups.iter().map(|g| g.members.clone()).collect();
        memberships.sort();
        assert_eq!(memberships, vec![vec![0, 1, 2], vec![3, 4, 5]]);
    }

    #[test]
    fn test_tie_break_lowest_combined_index() {
        // 0-1 与 2-3 距离相同，0-1 的下标和更小
        let partners = vec![Some((1.0, 1)), Some((9.0, 2)), Some((1.0, 3)), None];
        assert_eq!(HierarchicalClusterer::closest_pair(&partners), Some((0, 1)));

        let partners = vec![None, Some((2.0, 4)), Some((2.0, 3)), None, None];
        assert_eq!(HierarchicalClusterer::closest_pair(&partners), Some((1, 4)));
    }

    #[test]
    fn test_equidistant_points_merge_in_index_order() {
        let data: Vec<Vec<f32>> = (0..6).map(|i| vec![i as f32]).collect();
        let partition = clusterer(3, 1).cluster(&data, &CancellationFlag::new()).unwrap();
        let memberships: Vec<Vec<usize>> =
            partition.groups.iter().map(|g| g.members.clone()).collect();
        assert_eq!(memberships, vec![vec![0, 1], vec![2, 3], vec![4, 5]]);
    }

    #[test]
    fn test_large_corpus_uses_linear_memory() {
        let data: Vec<Vec<f32>> = (0..600)
            .map(|i| vec![(i % 3) as f32 * 10.0 + (i as f32) * 1e-3, 1.0])
            .collect();
        let partition = clusterer(3, 50).cluster(&data, &CancellationFlag::new()).unwrap();
        assert_eq!(partition.groups.len(), 3);
        assert!(partition.groups.iter().all(|g| g.size() == 200));
    }

    #[test]
    fn test_undersized_filtered() {
        let data = vec![vec![0.0], vec![0.1], vec![0.2], vec![0.3], vec![9.0]];
        let partition = clusterer(2, 2).cluster(&data, &CancellationFlag::new()).unwrap();
        assert!(partition.groups.iter().all(|g| g.size() >= 2));
        assert_eq!(partition.unclustered, vec![4]);
    }

    #[test]
    fn test_stability_and_coherence_ranges() {
        let data: Vec<Vec<f32>> = (0..10).map(|i| vec![i as f32, 1.0]).collect();
        let partition = clusterer(3, 2).cluster(&data, &CancellationFlag::new()).unwrap();
        for group in &partition.groups {
            assert!((0.0..=1.0).contains(&group.coherence));
            assert!((0.0..=1.0).contains(&group.stability));
        }
    }
}
