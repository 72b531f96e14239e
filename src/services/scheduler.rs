//! 周期性重平衡
//!
//! 每隔 `rebalance_interval` 从条目来源加载全部条目并尝试重平衡；
//! 如果手动运行正在进行，本轮直接跳过，不排队。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::models::MemoryItem;
use crate::services::service::ClusteringService;

/// 条目来源（嵌入向量由外部提供）
#[async_trait]
pub trait ItemSource: Send + Sync {
    async fn load_items(&self) -> Result<Vec<MemoryItem>>;
}

/// 一轮重平衡的结果
#[derive(Debug, Clone, PartialEq)]
pub enum RebalanceOutcome {
    /// 完成，附带新的提交序号
    Completed { generation: u64, clusters: usize },
    /// 已有运行，跳过本轮
    Skipped,
    /// 加载或聚类失败
    Failed(String),
}

/// 重平衡调度器
pub struct RebalanceScheduler {
    service: Arc<dyn ClusteringService>,
    source: Arc<dyn ItemSource>,
    interval: Duration,
}

impl RebalanceScheduler {
    pub fn new(
        service: Arc<dyn ClusteringService>,
        source: Arc<dyn ItemSource>,
        interval: Duration,
    ) -> Self {
        Self {
            service,
            source,
            interval,
        }
    }

    /// 执行一轮重平衡
    pub async fn tick(&self) -> RebalanceOutcome {
        let items = match self.source.load_items().await {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "Rebalance skipped: failed to load items");
                return RebalanceOutcome::Failed(e.to_string());
            }
        };

        match self.service.try_rebalance(items).await {
            None => RebalanceOutcome::Skipped,
            Some(Ok(result)) => {
                let generation = self.service.snapshot().generation;
                debug!(generation, "Rebalance completed");
                RebalanceOutcome::Completed {
                    generation,
                    clusters: result.clusters.len(),
                }
            }
            Some(Err(e)) => {
                warn!(error = %e, "Rebalance failed");
                RebalanceOutcome::Failed(e.to_string())
            }
        }
    }

    /// 在后台循环运行，直到 `shutdown` 变为 `true`
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // 第一次 tick 立即完成，跳过它以免启动时立刻重平衡
            ticker.tick().await;
            info!(interval_secs = self.interval.as_secs(), "Rebalance scheduler started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let outcome = self.tick().await;
                        debug!(?outcome, "Rebalance tick");
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Rebalance scheduler stopped");
                            break;
                        }
                    }
                }
            }
        })
    }
}
