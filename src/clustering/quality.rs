//! 聚类质量指标
//!
//! | 指标 | 范围 | 越好 |
//! |--------|-------|------|
//! | silhouette | [-1, 1] | high |
//! | Davies-Bouldin | [0, ∞) | low |
//! | variance ratio (Calinski-Harabasz) | [0, ∞) | high |
//!
//! 三个指标都只基于已归类的行计算，质心由成员重新计算，未归类的行不参与。
//! 综合得分落在 [0, 1]：
//!
//! ```text
//! overall = 0.4 * (silhouette + 1) / 2
//!         + 0.3 * 1 / (1 + davies_bouldin)
//!         + 0.3 * vr / (1 + vr)
//! ```
//!
//! 少于两个聚类时没有可度量的分离度，所有指标均为 0。

use super::Group;
use super::math::{centroid_of, distance, squared_distance};
use crate::models::QualityMetrics;

pub const SILHOUETTE_WEIGHT: f32 = 0.4;
pub const DAVIES_BOULDIN_WEIGHT: f32 = 0.3;
pub const VARIANCE_RATIO_WEIGHT: f32 = 0.3;

/// 两个聚类质心重合时使用的分离比
const COINCIDENT_CENTROID_RATIO: f32 = 1.0e6;

#[derive(Debug, Clone, Copy, Default)]
pub struct QualityEvaluator;

impl QualityEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(&self, data: &[Vec<f32>], groups: &[Group]) -> QualityMetrics {
        let groups: Vec<&Group> = groups.iter().filter(|g| !g.members.is_empty()).collect();
        if groups.len() < 2 {
            return QualityMetrics::default();
        }

        let centroids: Vec<Vec<f32>> = groups
            .iter()
            .map(|g| centroid_of(data, &g.members))
            .collect();

        let silhouette = silhouette(data, &groups);
        let davies_bouldin = davies_bouldin(data, &groups, &centroids);
        let variance_ratio = variance_ratio(data, &groups, &centroids);

        QualityMetrics {
            silhouette,
            davies_bouldin,
            variance_ratio,
            overall: overall_score(silhouette, davies_bouldin, variance_ratio),
        }
    }
}

pub fn overall_score(silhouette: f32, davies_bouldin: f32, variance_ratio: f32) -> f32 {
    let s = ((silhouette + 1.0) / 2.0).clamp(0.0, 1.0);
    let db = 1.0 / (1.0 + davies_bouldin.max(0.0));
    let vr = if variance_ratio.is_infinite() {
        1.0
    } else {
        let vr = variance_ratio.max(0.0);
        vr / (1.0 + vr)
    };
    (SILHOUETTE_WEIGHT * s + DAVIES_BOULDIN_WEIGHT * db + VARIANCE_RATIO_WEIGHT * vr)
        .clamp(0.0, 1.0)
}

/// 已归类行上 `(b - a) / max(a, b)` 的均值，单成员聚类记 0
fn silhouette(data: &[Vec<f32>], groups: &[&Group]) -> f32 {
    let mut total = 0.0f32;
    let mut count = 0usize;

    for (own, group) in groups.iter().enumerate() {
        for &i in &group.members {
            count += 1;
            if group.members.len() < 2 {
                continue;
            }
            let a = group
                .members
                .iter()
                .filter(|&&j| j != i)
                .map(|&j| distance(&data[i], &data[j]))
                .sum::<f32>()
                / (group.members.len() - 1) as f32;

            let b = groups
                .iter()
                .enumerate()
                .filter(|(other, _)| *other != own)
                .map(|(_, other)| {
                    other
                        .members
                        .iter()
                        .map(|&j| distance(&data[i], &data[j]))
                        .sum::<f32>()
                        / other.members.len() as f32
                })
                .fold(f32::INFINITY, f32::min);

            let denom = a.max(b);
            if denom > 0.0 && denom.is_finite() {
                total += (b - a) / denom;
            }
        }
    }

    if count == 0 {
        0.0
    } else {
        (total / count as f32).clamp(-1.0, 1.0)
    }
}

/// 各聚类最差 `(S_i + S_j) / M_ij` 的均值，`S` 为成员到质心的平均距离，
/// `M` 为质心间距
fn davies_bouldin(data: &[Vec<f32>], groups: &[&Group], centroids: &[Vec<f32>]) -> f32 {
    let scatter: Vec<f32> = groups
        .iter()
        .zip(centroids.iter())
        .map(|(g, c)| {
            g.members.iter().map(|&i| distance(&data[i], c)).sum::<f32>() / g.members.len() as f32
        })
        .collect();

    let k = groups.len();
    let mut total = 0.0f32;
    for i in 0..k {
        let mut worst = 0.0f32;
        for j in 0..k {
            if i == j {
                continue;
            }
            let separation = distance(&centroids[i], &centroids[j]);
            let spread = scatter[i] + scatter[j];
            let ratio = if separation > f32::EPSILON {
                spread / separation
            } else if spread > 0.0 {
                COINCIDENT_CENTROID_RATIO
            } else {
                0.0
            };
            worst = worst.max(ratio);
        }
        total += worst;
    }
    total / k as f32
}

/// `(B / (k - 1)) / (W / (n - k))` over clustered rows.
fn variance_ratio(data: &[Vec<f32>], groups: &[&Group], centroids: &[Vec<f32>]) -> f32 {
    let members: Vec<usize> = groups.iter().flat_map(|g| g.members.iter().copied()).collect();
    let n = members.len();
    let k = groups.len();
    if n <= k {
        return 0.0;
    }
    let overall = centroid_of(data, &members);

    let between: f32 = groups
        .iter()
        .zip(centroids.iter())
        .map(|(g, c)| g.members.len() as f32 * squared_distance(c, &overall))
        .sum();
    let within: f32 = groups
        .iter()
        .zip(centroids.iter())
        .map(|(g, c)| {
            g.members
                .iter()
                .map(|&i| squared_distance(&data[i], c))
                .sum::<f32>()
        })
        .sum();

    if within <= f32::EPSILON {
        return if between > 0.0 { f32::INFINITY } else { 0.0 };
    }
    (between / (k - 1) as f32) / (within / (n - k) as f32)
}
