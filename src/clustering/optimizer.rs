//! 划分后处理：先合并一轮，再拆分一轮
//!
//! 每次调用各执行至多一次，拆分结果不会再送回合并，因此调用总会结束。

use std::collections::HashMap;

use chrono::Utc;
use tracing::{debug, info};

use super::math::cosine_similarity;
use super::{CancellationFlag, Clusterer, KMeansClusterer, PreparedCorpus};
use crate::config::ClusteringConfig;
use crate::error::Result;
use crate::models::{MemoryCluster, MergeCandidate, SplitCandidate};

/// 优化器做了哪些改动
#[derive(Debug, Clone, Default)]
pub struct OptimizationReport {
    /// `(kept, absorbed)` cluster id pairs.
    pub merged: Vec<(String, String)>,
    /// 被拆分的聚类 ID
    pub split: Vec<String>,
}

/// 叶子聚类，以及拆分留下的父聚类
#[derive(Debug, Clone)]
pub struct OptimizedClusters {
    pub leaves: Vec<MemoryCluster>,
    pub parents: Vec<MemoryCluster>,
    pub report: OptimizationReport,
}

pub struct Optimizer<'a> {
    config: &'a ClusteringConfig,
}

impl<'a> Optimizer<'a> {
    pub fn new(config: &'a ClusteringConfig) -> Self {
        Self { config }
    }

    /// 先合并再拆分，各执行一次
    pub fn optimize(
        &self,
        clusters: Vec<MemoryCluster>,
        corpus: &PreparedCorpus,
        cancel: &CancellationFlag,
    ) -> Result<OptimizedClusters> {
        let (merged, merged_pairs) = self.merge_pass(clusters);
        cancel.check("optimizer")?;
        let (leaves, parents, split) = self.split_pass(merged, corpus, cancel)?;

        if !merged_pairs.is_empty() || !split.is_empty() {
            info!(
                merged = merged_pairs.len(),
                split = split.len(),
                "Cluster optimization applied"
            );
        }

        Ok(OptimizedClusters {
            leaves,
            parents,
            report: OptimizationReport {
                merged: merged_pairs,
                split,
            },
        })
    }

    /// 合并质心相似度超过 `merge_similar_threshold` 的聚类对
    pub fn merge_pass(
        &self,
        clusters: Vec<MemoryCluster>,
    ) -> (Vec<MemoryCluster>, Vec<(String, String)>) {
        let threshold = self.config.merge_similar_threshold;
        let mut slots: Vec<Option<MemoryCluster>> = clusters.into_iter().map(Some).collect();
        let mut merged_pairs = Vec::new();

        for i in 0..slots.len() {
            for j in (i + 1)..slots.len() {
                let similarity = match (&slots[i], &slots[j]) {
                    (Some(a), Some(b)) => cosine_similarity(&a.centroid, &b.centroid),
                    _ => continue,
                };
                if similarity <= threshold {
                    continue;
                }
                let Some(absorbed) = slots[j].take() else {
                    continue;
                };
                if let Some(kept) = slots[i].as_mut() {
                    debug!(
                        kept = %kept.id,
                        absorbed = %absorbed.id,
                        similarity,
                        "Merging clusters"
                    );
                    merged_pairs.push((kept.id.clone(), absorbed.id.clone()));
                    merge_into(kept, absorbed);
                }
            }
        }

        (slots.into_iter().flatten().collect(), merged_pairs)
    }

    /// 用 2-means 拆分成员数超过 `split_large_threshold` 的聚类
    ///
    /// 若某个子聚类会小于 `min_cluster_size`，放弃拆分并保留原聚类。
    pub fn split_pass(
        &self,
        clusters: Vec<MemoryCluster>,
        corpus: &PreparedCorpus,
        cancel: &CancellationFlag,
    ) -> Result<(Vec<MemoryCluster>, Vec<MemoryCluster>, Vec<String>)> {
        let rows: HashMap<&str, usize> = corpus
            .ids
            .iter()
            .enumerate()
            .map(|(row, id)| (id.as_str(), row))
            .collect();
        let splitter = KMeansClusterer::from_config(self.config)
            .with_k(2)
            .with_min_cluster_size(self.config.min_cluster_size);

        let mut leaves = Vec::with_capacity(clusters.len());
        let mut parents = Vec::new();
        let mut split_ids = Vec::new();

        for mut cluster in clusters {
            if cluster.size() <= self.config.split_large_threshold {
                leaves.push(cluster);
                continue;
            }

            let ids: Vec<String> = cluster.member_ids.iter().cloned().collect();
            let sub_data: Vec<Vec<f32>> = ids
                .iter()
                .filter_map(|id| rows.get(id.as_str()).map(|&row| corpus.vectors[row].clone()))
                .collect();
            if sub_data.len() != ids.len() {
                leaves.push(cluster);
                continue;
            }

            let partition = splitter.cluster(&sub_data, cancel)?;
            if partition.groups.len() != 2 || !partition.unclustered.is_empty() {
                debug!(cluster = %cluster.id, "Split abandoned: children too small");
                leaves.push(cluster);
                continue;
            }

            for group in partition.groups {
                let member_ids = group.members.iter().map(|&i| ids[i].clone()).collect();
                let mut child = MemoryCluster::new(
                    group.centroid,
                    member_ids,
                    corpus.len(),
                    group.coherence,
                    cluster.stability,
                );
                if self.config.enable_hierarchical {
                    child.parent_id = Some(cluster.id.clone());
                    cluster.add_child(&child.id);
                }
                leaves.push(child);
            }

            debug!(cluster = %cluster.id, size = cluster.size(), "Cluster split in two");
            split_ids.push(cluster.id.clone());
            if self.config.enable_hierarchical {
                parents.push(cluster);
            }
        }

        Ok((leaves, parents, split_ids))
    }

    /// 相似但未被合并的聚类对
    pub fn merge_candidates(&self, clusters: &[MemoryCluster]) -> Vec<MergeCandidate> {
        let mut candidates = Vec::new();
        for (i, a) in clusters.iter().enumerate() {
            for b in &clusters[i + 1..] {
                let similarity = cosine_similarity(&a.centroid, &b.centroid);
                if similarity >= self.config.similarity_threshold {
                    candidates.push(MergeCandidate {
                        cluster_a: a.id.clone(),
                        cluster_b: b.id.clone(),
                        similarity,
                    });
                }
            }
        }
        candidates.sort_by(|x, y| y.similarity.total_cmp(&x.similarity));
        candidates
    }

    /// 凝聚度低、不稳定或过大的聚类
    pub fn split_candidates(&self, clusters: &[MemoryCluster]) -> Vec<SplitCandidate> {
        clusters
            .iter()
            .filter_map(|cluster| {
                let mut reasons = Vec::new();
                if cluster.coherence < self.config.coherence_threshold {
                    reasons.push("low coherence");
                }
                if cluster.stability < self.config.stability_threshold {
                    reasons.push("low stability");
                }
                if cluster.size() > self.config.split_large_threshold {
                    reasons.push("oversized");
                }
                (!reasons.is_empty()).then(|| SplitCandidate {
                    cluster_id: cluster.id.clone(),
                    size: cluster.size(),
                    coherence: cluster.coherence,
                    stability: cluster.stability,
                    reason: reasons.join(", "),
                })
            })
            .collect()
    }
}

fn merge_into(kept: &mut MemoryCluster, absorbed: MemoryCluster) {
    kept.centroid = kept
        .centroid
        .iter()
        .zip(absorbed.centroid.iter())
        .map(|(a, b)| (a + b) / 2.0)
        .collect();
    kept.member_ids.extend(absorbed.member_ids);
    kept.weight = (kept.weight + absorbed.weight).min(1.0);
    kept.coherence = (kept.coherence + absorbed.coherence) / 2.0;
    kept.stability = kept.stability.min(absorbed.stability);
    kept.merged_from.push(absorbed.id);
    kept.merged_from.extend(absorbed.merged_from);
    kept.updated_at = Utc::now();
}
