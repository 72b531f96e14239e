//! 各聚类器共用的距离与质心工具

use crate::error::{ClusterError, Result};

/// 默认质心收敛阈值
pub const DEFAULT_CONVERGENCE_EPSILON: f32 = 0.001;

/// 两个等长向量的欧氏距离
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(ClusterError::DimensionMismatch {
            expected: a.len(),
            found: b.len(),
        });
    }
    Ok(squared_distance(a, b).sqrt())
}

/// 欧氏距离的平方，调用方保证长度一致
#[inline]
pub(crate) fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

#[inline]
pub(crate) fn distance(a: &[f32], b: &[f32]) -> f32 {
    squared_distance(a, b).sqrt()
}

/// 非空向量集合的逐坐标均值
pub fn centroid(vectors: &[&[f32]]) -> Result<Vec<f32>> {
    let first = vectors
        .first()
        .ok_or_else(|| ClusterError::validation("centroid", "cannot average an empty set"))?;
    let dim = first.len();
    let mut sum = vec![0.0f32; dim];
    for vector in vectors {
        if vector.len() != dim {
            return Err(ClusterError::DimensionMismatch {
                expected: dim,
                found: vector.len(),
            });
        }
        for (s, v) in sum.iter_mut().zip(vector.iter()) {
            *s += v;
        }
    }
    let n = vectors.len() as f32;
    sum.iter_mut().for_each(|s| *s /= n);
    Ok(sum)
}

/// 两个及以上向量的平均（合并聚类时使用）
pub fn average_vectors(vectors: &[&[f32]]) -> Result<Vec<f32>> {
    if vectors.len() < 2 {
        return Err(ClusterError::validation(
            "average_vectors",
            format!("need at least two vectors, got {}", vectors.len()),
        ));
    }
    centroid(vectors)
}

/// `members` 选中的行的均值，`members` 不能为空
pub(crate) fn centroid_of(data: &[Vec<f32>], members: &[usize]) -> Vec<f32> {
    let dim = data.get(members[0]).map_or(0, |v| v.len());
    let mut sum = vec![0.0f32; dim];
    for &idx in members {
        for (s, v) in sum.iter_mut().zip(data[idx].iter()) {
            *s += v;
        }
    }
    let n = members.len() as f32;
    sum.iter_mut().for_each(|s| *s /= n);
    sum
}

/// 每对新旧质心的移动都小于 `epsilon` 时返回 true
pub fn has_converged(old: &[Vec<f32>], new: &[Vec<f32>], epsilon: f32) -> bool {
    old.len() == new.len()
        && old
            .iter()
            .zip(new.iter())
            .all(|(a, b)| a.len() == b.len() && distance(a, b) < epsilon)
}

/// L2 范数
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// 缩放为单位向量，零向量或非有限值返回 `None`
pub fn normalize(v: &[f32]) -> Option<Vec<f32>> {
    let norm = l2_norm(v);
    if norm == 0.0 || !norm.is_finite() {
        return None;
    }
    Some(v.iter().map(|x| x / norm).collect())
}

/// 余弦相似度，截断到 [0, 1]，零向量记 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

/// 成员与质心的平均相似度（凝聚度）
pub(crate) fn coherence(data: &[Vec<f32>], members: &[usize], centroid: &[f32]) -> f32 {
    if members.is_empty() {
        return 0.0;
    }
    let total: f32 = members
        .iter()
        .map(|&idx| cosine_similarity(&data[idx], centroid))
        .sum();
    (total / members.len() as f32).clamp(0.0, 1.0)
}
