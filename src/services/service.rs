//! 异步聚类服务
//!
//! 聚类计算是同步的 CPU 计算，这里通过 `spawn_blocking` 放到阻塞线程池执行，
//! 避免占用异步运行时的工作线程。

use std::sync::Arc;

use async_trait::async_trait;

use crate::clustering::CancellationFlag;
use crate::config::AppConfig;
use crate::error::{ClusterError, Result};
use crate::models::{ClusteringResult, MemoryCategory, MemoryItem};
use crate::observability::ClusteringMetrics;
use crate::services::engine::ClusteringEngine;
use crate::services::events::ClusteringEventListener;
use crate::services::store::ClusterSnapshot;

/// 聚类服务 trait
#[async_trait]
pub trait ClusteringService: Send + Sync {
    /// 执行一次完整聚类
    async fn run(&self, items: Vec<MemoryItem>) -> Result<ClusteringResult>;

    /// 执行一次可取消的完整聚类
    async fn run_with_cancel(
        &self,
        items: Vec<MemoryItem>,
        cancel: CancellationFlag,
    ) -> Result<ClusteringResult>;

    /// 重平衡，已有运行时返回 `None`
    async fn try_rebalance(&self, items: Vec<MemoryItem>) -> Option<Result<ClusteringResult>>;

    /// 注册分类
    async fn register_category(&self, category: MemoryCategory) -> Result<String>;

    /// 当前聚类快照
    fn snapshot(&self) -> Arc<ClusterSnapshot>;

    /// 当前分类表
    fn categories(&self) -> Vec<MemoryCategory>;

    /// 运行指标
    fn metrics(&self) -> ClusteringMetrics;
}

/// 基于 `ClusteringEngine` 的服务实现
#[derive(Clone)]
pub struct EngineClusteringService {
    engine: Arc<ClusteringEngine>,
}

impl EngineClusteringService {
    pub fn new(engine: Arc<ClusteringEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<ClusteringEngine> {
        &self.engine
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&ClusteringEngine) -> T + Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || f(&engine))
            .await
            .map_err(|e| ClusterError::Internal(format!("clustering task failed: {e}")))
    }
}

#[async_trait]
impl ClusteringService for EngineClusteringService {
    async fn run(&self, items: Vec<MemoryItem>) -> Result<ClusteringResult> {
        self.blocking(move |engine| engine.run(&items)).await?
    }

    async fn run_with_cancel(
        &self,
        items: Vec<MemoryItem>,
        cancel: CancellationFlag,
    ) -> Result<ClusteringResult> {
        self.blocking(move |engine| engine.run_with_cancel(&items, &cancel))
            .await?
    }

    async fn try_rebalance(&self, items: Vec<MemoryItem>) -> Option<Result<ClusteringResult>> {
        match self
            .blocking(move |engine| engine.try_rebalance(&items, &CancellationFlag::new()))
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => Some(Err(e)),
        }
    }

    async fn register_category(&self, category: MemoryCategory) -> Result<String> {
        self.blocking(move |engine| engine.register_category(category))
            .await
    }

    fn snapshot(&self) -> Arc<ClusterSnapshot> {
        self.engine.snapshot()
    }

    fn categories(&self) -> Vec<MemoryCategory> {
        self.engine.store().categories()
    }

    fn metrics(&self) -> ClusteringMetrics {
        self.engine.metrics().clone()
    }
}

/// 创建聚类服务
pub fn create_clustering_service(config: &AppConfig) -> Result<Arc<dyn ClusteringService>> {
    Ok(Arc::new(EngineClusteringService::new(Arc::new(
        ClusteringEngine::new(config)?,
    ))))
}

/// 创建聚类服务并注册监听器
pub fn create_clustering_service_with_listeners(
    config: &AppConfig,
    listeners: Vec<Arc<dyn ClusteringEventListener>>,
) -> Result<Arc<dyn ClusteringService>> {
    let engine = ClusteringEngine::new(config)?;
    for listener in listeners {
        engine.add_listener(listener);
    }
    Ok(Arc::new(EngineClusteringService::new(Arc::new(engine))))
}
