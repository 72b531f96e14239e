//! End-to-end clustering scenarios and partition properties.

use std::collections::{BTreeSet, HashSet};

use memweave::clustering::math::{l2_norm, normalize};
use memweave::clustering::{
    CancellationFlag, Clusterer, DbscanClusterer, KMeansClusterer, QualityEvaluator,
};
use memweave::config::{AppConfig, ClusteringAlgorithm, ClusteringConfig};
use memweave::models::{ClusteringResult, MemoryCategory, MemoryItem};
use memweave::services::ClusteringEngine;
use rstest::rstest;

fn two_blobs() -> Vec<Vec<f32>> {
    let base = [
        [0.0, 0.0],
        [0.3, 0.0],
        [0.0, 0.3],
        [0.3, 0.3],
        [0.15, 0.15],
        [0.15, 0.3],
    ];
    let mut data: Vec<Vec<f32>> = base.iter().map(|p| p.to_vec()).collect();
    data.extend(base.iter().map(|p| vec![p[0] + 10.0, p[1]]));
    data
}

fn noisy(n: usize) -> Vec<Vec<f32>> {
    (0..n)
        .map(|i| {
            let t = i as f32 * 0.73;
            vec![t.sin() + 1.5, (t * 1.3).cos() + 1.5, (t * 0.4).sin() + 1.5]
        })
        .collect()
}

fn to_items(data: &[Vec<f32>], content: impl Fn(usize) -> String) -> Vec<MemoryItem> {
    data.iter()
        .enumerate()
        .map(|(i, v)| MemoryItem::new(&format!("item-{i:02}"), &content(i), v.clone()))
        .collect()
}

fn engine(clustering: ClusteringConfig) -> ClusteringEngine {
    let config = AppConfig {
        clustering,
        ..AppConfig::development()
    };
    ClusteringEngine::new(&config).unwrap()
}

fn partition(result: &ClusteringResult) -> BTreeSet<BTreeSet<String>> {
    result
        .clusters
        .iter()
        .map(|c| c.member_ids.clone())
        .collect()
}

#[test]
fn scenario_a_kmeans_separates_two_blobs() {
    let data = two_blobs();
    let config = ClusteringConfig {
        min_cluster_size: 3,
        seed: Some(7),
        ..ClusteringConfig::default()
    };
    let partition = KMeansClusterer::from_config(&config)
        .with_k(2)
        .cluster(&data, &CancellationFlag::new())
        .unwrap();

    assert_eq!(partition.groups.len(), 2);
    assert!(partition.groups.iter().all(|g| g.size() == 6));
    assert!(partition.unclustered.is_empty());

    let quality = QualityEvaluator::new().evaluate(&data, &partition.groups);
    assert!(quality.overall >= 0.9, "{quality:?}");
}

#[test]
fn scenario_a_through_engine() {
    let engine = engine(ClusteringConfig {
        algorithm: ClusteringAlgorithm::Kmeans,
        normalize_vectors: false,
        seed: Some(7),
        ..ClusteringConfig::default()
    });
    let result = engine
        .run(&to_items(&two_blobs(), |i| format!("note {i}")))
        .unwrap();

    assert_eq!(result.clusters.len(), 2);
    assert!(result.clusters.iter().all(|c| c.size() == 6));
    assert!(result.quality.overall >= 0.9);
    assert!(result.meets_quality_threshold);
    assert_eq!(result.statistics.total_memories, 12);
    assert!((result.statistics.avg_cluster_size - 6.0).abs() < 1e-6);
}

#[test]
fn scenario_b_corpus_smaller_than_min_cluster_size() {
    let engine = engine(ClusteringConfig {
        min_cluster_size: 5,
        seed: Some(1),
        ..ClusteringConfig::default()
    });
    let data = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]];
    let result = engine.run(&to_items(&data, |_| "tiny".into())).unwrap();

    assert!(result.clusters.is_empty());
    assert_eq!(result.unclustered.len(), 3);
    assert_eq!(result.statistics.unclustered_count, 3);
    assert!(!result.meets_quality_threshold);
}

#[test]
fn scenario_c_dbscan_reports_outliers_as_noise() {
    let mut data: Vec<Vec<f32>> = (0..10).map(|i| vec![0.05 * i as f32, 0.0]).collect();
    data.push(vec![5.0, 5.0]);
    data.push(vec![-5.0, -5.0]);
    let config = ClusteringConfig {
        dbscan_eps: 0.2,
        min_cluster_size: 3,
        ..ClusteringConfig::default()
    };

    let partition = DbscanClusterer::from_config(&config)
        .cluster(&data, &CancellationFlag::new())
        .unwrap();
    assert_eq!(partition.groups.len(), 1);
    assert_eq!(partition.groups[0].members, (0..10).collect::<Vec<_>>());
    assert_eq!(partition.unclustered, vec![10, 11]);

    let engine = engine(ClusteringConfig {
        algorithm: ClusteringAlgorithm::Dbscan,
        normalize_vectors: false,
        ..config
    });
    let result = engine.run(&to_items(&data, |_| "point".into())).unwrap();
    assert_eq!(result.clusters.len(), 1);
    assert_eq!(result.clusters[0].size(), 10);
    assert_eq!(result.unclustered, vec!["item-10", "item-11"]);
}

#[test]
fn default_pipeline_groups_by_direction_not_magnitude() {
    let mut data = Vec::new();
    for i in 0..6 {
        let magnitude = 1.0 + 3.0 * i as f32;
        let tilt = 0.02 * i as f32;
        data.push(vec![magnitude, magnitude * tilt]);
        data.push(vec![magnitude * tilt, magnitude]);
    }
    let mut items = to_items(&data, |i| format!("entry {i}"));
    items.push(MemoryItem::new("zero", "no signal", vec![0.0, 0.0]));

    let engine = engine(ClusteringConfig {
        seed: Some(11),
        ..ClusteringConfig::default()
    });
    let result = engine.run(&items).unwrap();

    assert_eq!(result.statistics.filtered_memories, 1);
    assert_eq!(result.statistics.total_memories, 12);
    let even: BTreeSet<String> = (0..12)
        .step_by(2)
        .map(|i| format!("item-{i:02}"))
        .collect();
    let odd: BTreeSet<String> = (1..12)
        .step_by(2)
        .map(|i| format!("item-{i:02}"))
        .collect();
    assert_eq!(partition(&result), BTreeSet::from([even, odd]));
    for cluster in &result.clusters {
        assert!(l2_norm(&cluster.centroid) > 0.99);
    }
    assert!(!result.unclustered.contains(&"zero".to_string()));
}

#[test]
fn configured_dimension_filters_instead_of_failing() {
    let mut items = to_items(&two_blobs(), |i| format!("note {i}"));
    items.push(MemoryItem::new("wide", "three components", vec![1.0, 2.0, 3.0]));

    let strict = engine(ClusteringConfig {
        algorithm: ClusteringAlgorithm::Kmeans,
        normalize_vectors: false,
        seed: Some(7),
        ..ClusteringConfig::default()
    });
    let err = strict.run(&items).unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
    assert_eq!(strict.snapshot().generation, 0);

    let lenient = engine(ClusteringConfig {
        algorithm: ClusteringAlgorithm::Kmeans,
        normalize_vectors: false,
        dimension: Some(2),
        seed: Some(7),
        ..ClusteringConfig::default()
    });
    let result = lenient.run(&items).unwrap();
    assert_eq!(result.statistics.filtered_memories, 1);
    assert_eq!(result.clusters.len(), 2);
    assert!(result.clusters.iter().all(|c| c.size() == 6));
    assert!(result.clusters.iter().all(|c| !c.member_ids.contains("wide")));
    assert!(!result.unclustered.contains(&"wide".to_string()));
    assert_eq!(lenient.store().cluster_for_item("wide"), None);
}

#[rstest]
#[case(ClusteringAlgorithm::Adaptive)]
#[case(ClusteringAlgorithm::Kmeans)]
#[case(ClusteringAlgorithm::Hierarchical)]
#[case(ClusteringAlgorithm::Spectral)]
fn scenario_d_fixed_seed_is_deterministic(#[case] algorithm: ClusteringAlgorithm) {
    let config = ClusteringConfig {
        algorithm,
        seed: Some(1234),
        ..ClusteringConfig::default()
    };
    let items = to_items(&noisy(40), |i| format!("memory {i}"));

    let first = engine(config.clone()).run(&items).unwrap();
    let second = engine(config).run(&items).unwrap();
    assert_eq!(partition(&first), partition(&second));
    assert_eq!(first.unclustered, second.unclustered);
    assert_eq!(first.quality, second.quality);
}

#[test]
fn scenario_e_matching_cluster_is_absorbed() {
    let mut data = Vec::new();
    for i in 0..4 {
        let d = 0.01 * i as f32;
        data.push(vec![1.0, d]);
        data.push(vec![d, 1.0]);
    }
    let items = to_items(&data, |i| {
        if i % 2 == 0 {
            "rust cargo borrow".to_string()
        } else {
            "garden tomato soil".to_string()
        }
    });
    let engine = engine(ClusteringConfig {
        algorithm: ClusteringAlgorithm::Kmeans,
        min_cluster_size: 2,
        seed: Some(3),
        ..ClusteringConfig::default()
    });
    let rust = engine.register_category(
        MemoryCategory::new("rust", "Rust tooling", 0.9)
            .with_keyword_rule(&["rust", "cargo", "borrow"], 1.0),
    );
    let garden = engine.register_category(
        MemoryCategory::new("garden", "Gardening", 0.9)
            .with_keyword_rule(&["garden", "tomato", "soil"], 1.0),
    );

    let result = engine.run(&items).unwrap();
    assert_eq!(result.categories.len(), 2);
    assert_eq!(engine.store().category(&rust).unwrap().cluster_ids.len(), 1);

    engine.run(&items).unwrap();
    let rust_category = engine.store().category(&rust).unwrap();
    assert_eq!(rust_category.cluster_ids.len(), 2);
    assert_eq!(rust_category.stats.total_items, 8);
    assert_eq!(engine.store().category(&garden).unwrap().cluster_ids.len(), 2);
    assert_eq!(engine.store().categories().len(), 2);
}

#[rstest]
fn partitions_respect_size_and_membership(
    #[values(
        ClusteringAlgorithm::Kmeans,
        ClusteringAlgorithm::Hierarchical,
        ClusteringAlgorithm::Dbscan,
        ClusteringAlgorithm::Spectral,
        ClusteringAlgorithm::Adaptive
    )]
    algorithm: ClusteringAlgorithm,
    #[values(2, 3, 5)] min_cluster_size: usize,
) {
    let engine = engine(ClusteringConfig {
        algorithm,
        min_cluster_size,
        seed: Some(99),
        ..ClusteringConfig::default()
    });
    let result = engine
        .run(&to_items(&noisy(30), |i| format!("entry {i}")))
        .unwrap();

    let mut seen = HashSet::new();
    let mut total = 0;
    for cluster in &result.clusters {
        assert!(cluster.size() >= min_cluster_size);
        for member in &cluster.member_ids {
            assert!(seen.insert(member.clone()), "{member} in two clusters");
        }
        total += cluster.size();
        assert!((0.0..=1.0).contains(&cluster.weight));
        assert!((0.0..=1.0).contains(&cluster.coherence));
        assert!((0.0..=1.0).contains(&cluster.stability));
        assert_eq!(cluster.centroid.len(), 3);
    }
    assert!(total <= result.statistics.total_memories);
    assert_eq!(total + result.unclustered.len(), result.statistics.total_memories);
    assert!(result.attempts.len() <= 10);
}

#[test]
fn normalizing_unit_vector_is_noop() {
    for v in noisy(10) {
        let once = normalize(&v).unwrap();
        let twice = normalize(&once).unwrap();
        assert!((l2_norm(&once) - 1.0).abs() < 1e-5);
        for (a, b) in once.iter().zip(twice.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }
}

#[test]
fn kmeans_inertia_is_non_increasing() {
    let config = ClusteringConfig {
        seed: Some(5),
        ..ClusteringConfig::default()
    };
    let fit = KMeansClusterer::from_config(&config)
        .with_k(4)
        .fit(&noisy(60), &CancellationFlag::new())
        .unwrap();
    assert!(!fit.inertia_history.is_empty());
    for window in fit.inertia_history.windows(2) {
        assert!(window[1] <= window[0] + 1e-4, "{:?}", fit.inertia_history);
    }
}

#[test]
fn merge_reduces_count_and_centroid_lies_between() {
    let mut data = Vec::new();
    for i in 0..3 {
        data.push(vec![1.0, 0.0 + 0.001 * i as f32, 0.0]);
        data.push(vec![1.0, 0.2 + 0.001 * i as f32, 0.0]);
    }
    for i in 0..3 {
        data.push(vec![0.0, 0.001 * i as f32, 1.0]);
    }
    let config = ClusteringConfig {
        algorithm: ClusteringAlgorithm::Hierarchical,
        max_clusters: 3,
        min_cluster_size: 3,
        merge_similar_threshold: 0.95,
        normalize_vectors: false,
        ..ClusteringConfig::default()
    };

    let without = engine(ClusteringConfig {
        enable_dynamic_evolution: false,
        ..config.clone()
    })
    .run(&to_items(&data, |_| "x-ray".into()))
    .unwrap();
    let with = engine(config)
        .run(&to_items(&data, |_| "x-ray".into()))
        .unwrap();

    assert_eq!(without.clusters.len(), 3);
    assert_eq!(with.clusters.len(), 2);

    let merged = with
        .clusters
        .iter()
        .find(|c| !c.merged_from.is_empty())
        .unwrap();
    let originals: Vec<_> = without
        .clusters
        .iter()
        .filter(|c| c.member_ids.is_subset(&merged.member_ids))
        .collect();
    assert_eq!(originals.len(), 2);
    for dim in 0..3 {
        let lo = originals[0].centroid[dim].min(originals[1].centroid[dim]);
        let hi = originals[0].centroid[dim].max(originals[1].centroid[dim]);
        assert!(merged.centroid[dim] >= lo - 1e-6 && merged.centroid[dim] <= hi + 1e-6);
    }
}

#[test]
fn large_cluster_is_split_with_parent_link() {
    let mut data = Vec::new();
    for i in 0..6 {
        let d = 0.01 * i as f32;
        data.push(vec![1.0, d]);
        data.push(vec![0.8, 0.6 + d]);
    }
    let engine = engine(ClusteringConfig {
        algorithm: ClusteringAlgorithm::Hierarchical,
        max_clusters: 1,
        min_cluster_size: 3,
        split_large_threshold: 8,
        seed: Some(2),
        ..ClusteringConfig::default()
    });
    let result = engine.run(&to_items(&data, |_| "split".into())).unwrap();

    assert_eq!(result.clusters.len(), 2);
    assert_eq!(result.parent_clusters.len(), 1);
    let parent = &result.parent_clusters[0];
    assert_eq!(parent.size(), 12);
    for child in &result.clusters {
        assert_eq!(child.parent_id.as_deref(), Some(parent.id.as_str()));
        assert!(parent.child_ids.contains(&child.id));
    }
}
