//! 生命周期事件
//!
//! 监听器显式注册到引擎上，事件在运行线程上同步派发。

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::config::ClusteringAlgorithm;
use crate::error::ErrorReport;

/// 聚类生命周期事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClusteringEvent {
    /// 运行开始
    ClusteringStarted {
        run_id: String,
        item_count: usize,
        algorithm: ClusteringAlgorithm,
    },
    /// 运行完成
    ClusteringCompleted {
        run_id: String,
        result_summary: String,
        processing_time_ms: u64,
    },
    /// 运行失败
    Error { run_id: String, report: ErrorReport },
}

/// 事件监听器
pub trait ClusteringEventListener: Send + Sync {
    fn on_event(&self, event: &ClusteringEvent);
}

impl<F> ClusteringEventListener for F
where
    F: Fn(&ClusteringEvent) + Send + Sync,
{
    fn on_event(&self, event: &ClusteringEvent) {
        self(event)
    }
}

/// 把事件写入日志的监听器
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventListener;

impl ClusteringEventListener for TracingEventListener {
    fn on_event(&self, event: &ClusteringEvent) {
        match event {
            ClusteringEvent::ClusteringStarted {
                run_id,
                item_count,
                algorithm,
            } => info!(%run_id, item_count, %algorithm, "clustering_started"),
            ClusteringEvent::ClusteringCompleted {
                run_id,
                result_summary,
                processing_time_ms,
            } => info!(%run_id, processing_time_ms, "clustering_completed: {}", result_summary),
            ClusteringEvent::Error { run_id, report } => error!(
                %run_id,
                code = %report.code,
                operation = report.operation.as_deref().unwrap_or("unknown"),
                "clustering error: {}",
                report.message
            ),
        }
    }
}
