//! 聚类引擎
//!
//! 唯一的写入口：完整的聚类流程（预处理、算法选择、优化、自动分类、提交）。
//! 运行锁保证同一时刻只有一次运行：
//!
//! - `run` / `run_with_cancel` 在已有运行时返回 `RunInProgress`
//! - `try_rebalance` 在已有运行时跳过本轮（返回 `None`）
//! - 分类表的显式修改（注册、剪枝）在锁上排队
//!
//! 取消或失败的运行不会修改存储。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::clustering::{
    AlgorithmSelector, CancellationFlag, Group, Optimizer, PreparedCorpus, Preprocessor,
    QualityEvaluator, Selection,
};
use crate::config::{AppConfig, CategorizationConfig, ClusteringConfig, ConfigLoader};
use crate::error::{ClusterError, ErrorReport, Result};
use crate::models::{
    ClusteringResult, ClusteringStatistics, MemoryCategory, MemoryCluster, MemoryItem,
    OptimizationRecommendations,
};
use crate::observability::ClusteringMetrics;
use crate::services::categorizer::{AutoCategorizer, CategoryDecision, CategoryMatch};
use crate::services::events::{ClusteringEvent, ClusteringEventListener};
use crate::services::store::{ClusterSnapshot, ClusterStore};

/// 聚类引擎
pub struct ClusteringEngine {
    clustering: ClusteringConfig,
    categorization: CategorizationConfig,
    store: ClusterStore,
    listeners: RwLock<Vec<Arc<dyn ClusteringEventListener>>>,
    run_lock: Mutex<()>,
    metrics: ClusteringMetrics,
}

impl ClusteringEngine {
    /// 校验配置并创建引擎
    pub fn new(config: &AppConfig) -> Result<Self> {
        ConfigLoader::validate(config)?;
        Ok(Self {
            clustering: config.clustering.clone(),
            categorization: config.categorization.clone(),
            store: ClusterStore::new(),
            listeners: RwLock::new(Vec::new()),
            run_lock: Mutex::new(()),
            metrics: ClusteringMetrics::default(),
        })
    }

    /// 注册事件监听器
    pub fn add_listener(&self, listener: Arc<dyn ClusteringEventListener>) {
        self.listeners.write().push(listener);
    }

    pub fn config(&self) -> &ClusteringConfig {
        &self.clustering
    }

    pub fn store(&self) -> &ClusterStore {
        &self.store
    }

    pub fn snapshot(&self) -> Arc<ClusterSnapshot> {
        self.store.snapshot()
    }

    pub fn metrics(&self) -> &ClusteringMetrics {
        &self.metrics
    }

    /// 当前是否有运行在进行
    pub fn is_running(&self) -> bool {
        self.run_lock.is_locked()
    }

    /// 执行一次完整聚类
    pub fn run(&self, items: &[MemoryItem]) -> Result<ClusteringResult> {
        self.run_with_cancel(items, &CancellationFlag::new())
    }

    /// 执行一次完整聚类，在迭代之间检查 `cancel`
    pub fn run_with_cancel(
        &self,
        items: &[MemoryItem],
        cancel: &CancellationFlag,
    ) -> Result<ClusteringResult> {
        let Some(_guard) = self.run_lock.try_lock() else {
            self.metrics.record_rejected();
            warn!(item_count = items.len(), "Clustering run rejected: another run is active");
            return Err(ClusterError::RunInProgress);
        };
        self.execute(items, cancel)
    }

    /// 周期性重平衡：已有运行时跳过本轮
    pub fn try_rebalance(
        &self,
        items: &[MemoryItem],
        cancel: &CancellationFlag,
    ) -> Option<Result<ClusteringResult>> {
        let Some(_guard) = self.run_lock.try_lock() else {
            self.metrics.record_skipped_rebalance();
            debug!("Rebalance skipped: a clustering run is active");
            return None;
        };
        Some(self.execute(items, cancel))
    }

    /// 注册分类，返回分类 ID
    pub fn register_category(&self, category: MemoryCategory) -> String {
        let _guard = self.run_lock.lock();
        let id = category.id.clone();
        info!(category = %category.name, %id, "Category registered");
        self.store.update_categories(|categories| categories.push(category));
        id
    }

    /// 从分类中剪除关联聚类，返回实际移除的数量
    pub fn prune_category_clusters(
        &self,
        category_id: &str,
        cluster_ids: &[String],
    ) -> Result<usize> {
        let _guard = self.run_lock.lock();
        self.store.update_categories(|categories| {
            let category = categories
                .iter_mut()
                .find(|c| c.id == category_id)
                .ok_or_else(|| {
                    ClusterError::validation(
                        "prune_category_clusters",
                        format!("category '{category_id}' not found"),
                    )
                })?;
            let removed = category.prune_clusters(cluster_ids);
            debug!(%category_id, removed, "Category clusters pruned");
            Ok(removed)
        })
    }

    /// 只读地把一个聚类与分类表比对，不修改存储
    pub fn categorize_cluster(
        &self,
        cluster: &MemoryCluster,
        members: &[MemoryItem],
    ) -> Option<CategoryMatch> {
        let members: Vec<&MemoryItem> = members.iter().collect();
        let categorizer = AutoCategorizer::new(&self.categorization);
        self.store
            .read_categories(|categories| categorizer.match_cluster(categories, cluster, &members))
    }

    fn emit(&self, event: ClusteringEvent) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_event(&event);
        }
    }

    fn execute(&self, items: &[MemoryItem], cancel: &CancellationFlag) -> Result<ClusteringResult> {
        let started = Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        info!(
            %run_id,
            item_count = items.len(),
            algorithm = %self.clustering.algorithm,
            "Clustering run started"
        );
        self.emit(ClusteringEvent::ClusteringStarted {
            run_id: run_id.clone(),
            item_count: items.len(),
            algorithm: self.clustering.algorithm,
        });

        match self.pipeline(&run_id, items, cancel, started) {
            Ok(result) => {
                let elapsed = result.statistics.processing_time_ms;
                self.metrics.record_run(
                    result.statistics.total_memories,
                    result.clusters.len(),
                    elapsed,
                    result.quality.overall,
                );
                info!(%run_id, elapsed_ms = elapsed, "{}", result.summary());
                self.emit(ClusteringEvent::ClusteringCompleted {
                    run_id,
                    result_summary: result.summary(),
                    processing_time_ms: elapsed,
                });
                Ok(result)
            }
            Err(e) => {
                self.metrics.record_failure(&e);
                warn!(%run_id, code = e.code(), error = %e, "Clustering run failed");
                self.emit(ClusteringEvent::Error {
                    run_id,
                    report: ErrorReport::from(&e).with_operation("clustering_run"),
                });
                Err(e)
            }
        }
    }

    fn pipeline(
        &self,
        run_id: &str,
        items: &[MemoryItem],
        cancel: &CancellationFlag,
        started: Instant,
    ) -> Result<ClusteringResult> {
        let config = &self.clustering;
        let corpus = Preprocessor::new(config).prepare(items)?;
        cancel.check("preprocess")?;

        let Selection {
            partition,
            quality,
            attempts,
            ..
        } = AlgorithmSelector::new(config).select(&corpus.vectors, cancel)?;

        let clusters: Vec<MemoryCluster> = partition
            .groups
            .iter()
            .map(|group| to_cluster(group, &corpus))
            .collect();
        let unclustered: Vec<String> = partition
            .unclustered
            .iter()
            .map(|&row| corpus.ids[row].clone())
            .collect();

        let optimizer = Optimizer::new(config);
        let (mut leaves, parents, quality) = if config.enable_dynamic_evolution {
            let optimized = optimizer.optimize(clusters, &corpus, cancel)?;
            let changed =
                !optimized.report.merged.is_empty() || !optimized.report.split.is_empty();
            let quality = if changed {
                QualityEvaluator::new()
                    .evaluate(&corpus.vectors, &to_groups(&optimized.leaves, &corpus))
            } else {
                quality
            };
            (optimized.leaves, optimized.parents, quality)
        } else {
            (clusters, Vec::new(), quality)
        };
        cancel.check("optimize")?;

        let items_by_id: HashMap<&str, &MemoryItem> = corpus
            .source_indices
            .iter()
            .map(|&idx| (items[idx].id.as_str(), &items[idx]))
            .collect();
        let categorizer = AutoCategorizer::new(&self.categorization);
        let mut categories = self.store.categories();
        let mut decisions = Vec::with_capacity(leaves.len());
        for leaf in leaves.iter_mut() {
            let members: Vec<&MemoryItem> = leaf
                .member_ids
                .iter()
                .filter_map(|id| items_by_id.get(id.as_str()).copied())
                .collect();
            decisions.push(categorizer.categorize(&mut categories, leaf, &members));
        }
        let created = decisions
            .iter()
            .filter(|d| matches!(d, CategoryDecision::Created { .. }))
            .count();
        debug!(
            clusters = leaves.len(),
            created_categories = created,
            "Categorization finished"
        );
        cancel.check("categorize")?;

        let recommendations = OptimizationRecommendations {
            merge_candidates: optimizer.merge_candidates(&leaves),
            split_candidates: optimizer.split_candidates(&leaves),
            recategorizations: categorizer.recategorization_candidates(&decisions),
        };
        let meets_quality_threshold = quality.overall >= config.quality_threshold;
        let statistics = statistics(&corpus, &leaves, &categories, unclustered.len(), started);

        self.store
            .commit(run_id, categories.clone(), leaves.clone(), parents.clone());

        Ok(ClusteringResult {
            run_id: run_id.to_string(),
            algorithm: partition.algorithm,
            clusters: leaves,
            parent_clusters: parents,
            categories,
            unclustered,
            statistics,
            quality,
            meets_quality_threshold,
            attempts,
            recommendations,
        })
    }
}

fn to_cluster(group: &Group, corpus: &PreparedCorpus) -> MemoryCluster {
    let member_ids = group.members.iter().map(|&row| corpus.ids[row].clone()).collect();
    MemoryCluster::new(
        group.centroid.clone(),
        member_ids,
        corpus.len(),
        group.coherence,
        group.stability,
    )
}

fn to_groups(clusters: &[MemoryCluster], corpus: &PreparedCorpus) -> Vec<Group> {
    let rows: HashMap<&str, usize> = corpus
        .ids
        .iter()
        .enumerate()
        .map(|(row, id)| (id.as_str(), row))
        .collect();
    clusters
        .iter()
        .map(|cluster| {
            let mut members: Vec<usize> = cluster
                .member_ids
                .iter()
                .filter_map(|id| rows.get(id.as_str()).copied())
                .collect();
            members.sort_unstable();
            Group {
                members,
                centroid: cluster.centroid.clone(),
                coherence: cluster.coherence,
                stability: cluster.stability,
            }
        })
        .collect()
}

fn statistics(
    corpus: &PreparedCorpus,
    clusters: &[MemoryCluster],
    categories: &[MemoryCategory],
    unclustered: usize,
    started: Instant,
) -> ClusteringStatistics {
    let count = clusters.len();
    let mean = |f: fn(&MemoryCluster) -> f32| {
        if count == 0 {
            0.0
        } else {
            clusters.iter().map(f).sum::<f32>() / count as f32
        }
    };
    ClusteringStatistics {
        total_memories: corpus.len(),
        filtered_memories: corpus.filtered,
        cluster_count: count,
        category_count: categories.len(),
        unclustered_count: unclustered,
        avg_cluster_size: mean(|c| c.size() as f32),
        avg_coherence: mean(|c| c.coherence),
        avg_stability: mean(|c| c.stability),
        processing_time_ms: started.elapsed().as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;

    fn config() -> AppConfig {
        let mut config = AppConfig::development();
        config.clustering.algorithm = crate::config::ClusteringAlgorithm::Kmeans;
        config.clustering.min_cluster_size = 2;
        config
    }

    fn items() -> Vec<MemoryItem> {
        let mut items = Vec::new();
        for i in 0..4 {
            let d = 0.01 * i as f32;
            items.push(MemoryItem::new(
                &format!("rust-{i}"),
                "rust cargo borrow checker",
                vec![1.0, d],
            ));
            items.push(MemoryItem::new(
                &format!("garden-{i}"),
                "garden tomato soil",
                vec![d, 1.0],
            ));
        }
        items
    }

    #[test]
    fn test_run_commits_and_categorizes() {
        let engine = ClusteringEngine::new(&config()).unwrap();
        let result = engine.run(&items()).unwrap();

        assert_eq!(result.clusters.len(), 2);
        assert_eq!(engine.store().generation(), 1);
        assert_eq!(result.statistics.total_memories, 8);
        assert_eq!(result.statistics.category_count, 2);
        assert!(result.clusters.iter().all(|c| c.category_id.is_some()));

        let cluster_id = engine.store().cluster_for_item("rust-0").unwrap();
        assert_eq!(engine.store().cluster_for_item("rust-3"), Some(cluster_id.clone()));
        assert_ne!(engine.store().cluster_for_item("garden-0"), Some(cluster_id));
        assert_eq!(engine.metrics().runs_total.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_validation_error_leaves_store_untouched() {
        let engine = ClusteringEngine::new(&config()).unwrap();
        engine.run(&items()).unwrap();
        let before = engine.snapshot();

        let bad = vec![
            MemoryItem::new("a", "x", vec![1.0, 0.0]),
            MemoryItem::new("b", "y", vec![1.0]),
        ];
        let err = engine.run(&bad).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(Arc::ptr_eq(&before, &engine.snapshot()));
    }

    #[test]
    fn test_cancelled_run_leaves_store_untouched() {
        let engine = ClusteringEngine::new(&config()).unwrap();
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let err = engine.run_with_cancel(&items(), &cancel).unwrap_err();
        assert_eq!(err.code(), "CANCELLED");
        assert_eq!(engine.store().generation(), 0);
        assert_eq!(
            engine.metrics().runs_cancelled.load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }

    struct ReentrantListener {
        engine: OnceLock<Arc<ClusteringEngine>>,
        outcomes: Mutex<Vec<String>>,
    }

    impl ClusteringEventListener for ReentrantListener {
        fn on_event(&self, event: &ClusteringEvent) {
            if !matches!(event, ClusteringEvent::ClusteringStarted { .. }) {
                return;
            }
            let Some(engine) = self.engine.get() else {
                return;
            };
            let nested = engine.run(&items());
            let rebalance = engine.try_rebalance(&items(), &CancellationFlag::new());
            let mut outcomes = self.outcomes.lock();
            outcomes.push(
                nested
                    .map(|_| "ok".to_string())
                    .unwrap_or_else(|e| e.code().to_string()),
            );
            outcomes.push(if rebalance.is_none() { "skipped" } else { "ran" }.to_string());
        }
    }

    #[test]
    fn test_concurrent_run_rejected_and_rebalance_skipped() {
        let engine = Arc::new(ClusteringEngine::new(&config()).unwrap());
        let listener = Arc::new(ReentrantListener {
            engine: OnceLock::new(),
            outcomes: Mutex::new(Vec::new()),
        });
        let _ = listener.engine.set(Arc::clone(&engine));
        engine.add_listener(listener.clone());

        engine.run(&items()).unwrap();
        assert_eq!(*listener.outcomes.lock(), vec!["RUN_IN_PROGRESS", "skipped"]);
        assert_eq!(engine.store().generation(), 1);
        assert_eq!(
            engine.metrics().rebalances_skipped.load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }

    #[test]
    fn test_register_and_prune_category() {
        let engine = ClusteringEngine::new(&config()).unwrap();
        let id = engine.register_category(
            MemoryCategory::new("rust", "", 0.9)
                .with_keyword_rule(&["rust", "cargo", "borrow"], 1.0),
        );
        let result = engine.run(&items()).unwrap();
        let rust_cluster = result
            .clusters
            .iter()
            .find(|c| c.contains("rust-0"))
            .unwrap();
        assert_eq!(rust_cluster.category_id.as_deref(), Some(id.as_str()));

        let removed = engine
            .prune_category_clusters(&id, &[rust_cluster.id.clone()])
            .unwrap();
        assert_eq!(removed, 1);
        assert!(engine.store().category(&id).unwrap().cluster_ids.is_empty());

        let err = engine.prune_category_clusters("missing", &[]).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_categorize_cluster_read_only() {
        let engine = ClusteringEngine::new(&config()).unwrap();
        let id = engine.register_category(
            MemoryCategory::new("garden", "", 0.9).with_keyword_rule(&["garden", "tomato"], 1.0),
        );
        let members: Vec<MemoryItem> = items()
            .into_iter()
            .filter(|i| i.id.starts_with("garden"))
            .collect();
        let ids = members.iter().map(|i| i.id.clone()).collect();
        let cluster = MemoryCluster::new(vec![0.0, 1.0], ids, members.len(), 1.0, 1.0);

        let found = engine.categorize_cluster(&cluster, &members).unwrap();
        assert_eq!(found.category_id, id);
        assert!(engine.store().category(&id).unwrap().cluster_ids.is_empty());
        assert_eq!(engine.store().generation(), 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = config();
        config.clustering.max_clusters = 0;
        assert!(ClusteringEngine::new(&config).is_err());
    }
}
