//! 可观测性模块
//!
//! 提供聚类运行指标（Prometheus 文本格式）和结构化日志初始化。

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::config::LoggingConfig;
use crate::error::{ClusterError, Result};

// ===== Clustering Metrics =====

/// 聚类运行指标
#[derive(Clone, Default)]
pub struct ClusteringMetrics {
    pub runs_total: Arc<AtomicU64>,
    pub runs_failed: Arc<AtomicU64>,
    pub runs_cancelled: Arc<AtomicU64>,
    pub runs_rejected: Arc<AtomicU64>,
    pub rebalances_skipped: Arc<AtomicU64>,
    pub items_processed: Arc<AtomicU64>,
    pub clusters_committed: Arc<AtomicU64>,
    pub run_duration_ms_sum: Arc<AtomicU64>,
    /// 最近一次运行的综合质量（f32 位模式）
    last_quality_bits: Arc<AtomicU32>,
}

impl ClusteringMetrics {
    /// 记录一次成功运行
    pub fn record_run(&self, items: usize, clusters: usize, duration_ms: u64, quality: f32) {
        self.runs_total.fetch_add(1, Ordering::SeqCst);
        self.items_processed.fetch_add(items as u64, Ordering::SeqCst);
        self.clusters_committed
            .fetch_add(clusters as u64, Ordering::SeqCst);
        self.run_duration_ms_sum
            .fetch_add(duration_ms, Ordering::SeqCst);
        self.last_quality_bits
            .store(quality.to_bits(), Ordering::SeqCst);
    }

    /// 记录失败运行
    pub fn record_failure(&self, error: &ClusterError) {
        match error {
            ClusterError::Cancelled(_) => self.runs_cancelled.fetch_add(1, Ordering::SeqCst),
            _ => self.runs_failed.fetch_add(1, Ordering::SeqCst),
        };
    }

    /// 记录被运行锁拒绝的调用
    pub fn record_rejected(&self) {
        self.runs_rejected.fetch_add(1, Ordering::SeqCst);
    }

    /// 记录跳过的重平衡
    pub fn record_skipped_rebalance(&self) {
        self.rebalances_skipped.fetch_add(1, Ordering::SeqCst);
    }

    pub fn last_quality(&self) -> f32 {
        f32::from_bits(self.last_quality_bits.load(Ordering::SeqCst))
    }

    /// 生成 Prometheus 格式指标
    pub fn gather(&self) -> String {
        format!(
            r#"# HELP clustering_runs_total Completed clustering runs
# TYPE clustering_runs_total counter
clustering_runs_total {}
# HELP clustering_runs_failed_total Failed clustering runs
# TYPE clustering_runs_failed_total counter
clustering_runs_failed_total {}
# HELP clustering_runs_cancelled_total Cancelled clustering runs
# TYPE clustering_runs_cancelled_total counter
clustering_runs_cancelled_total {}
# HELP clustering_runs_rejected_total Runs rejected while another run was active
# TYPE clustering_runs_rejected_total counter
clustering_runs_rejected_total {}
# HELP clustering_rebalances_skipped_total Rebalance cycles skipped during an active run
# TYPE clustering_rebalances_skipped_total counter
clustering_rebalances_skipped_total {}
# HELP clustering_items_processed_total Items that survived preprocessing
# TYPE clustering_items_processed_total counter
clustering_items_processed_total {}
# HELP clustering_clusters_committed_total Leaf clusters committed to the store
# TYPE clustering_clusters_committed_total counter
clustering_clusters_committed_total {}
# HELP clustering_run_duration_seconds Clustering run duration in seconds
# TYPE clustering_run_duration_seconds summary
clustering_run_duration_seconds_sum {}
clustering_run_duration_seconds_count {}
# HELP clustering_quality_overall Overall quality of the last run
# TYPE clustering_quality_overall gauge
clustering_quality_overall {}
"#,
            self.runs_total.load(Ordering::SeqCst),
            self.runs_failed.load(Ordering::SeqCst),
            self.runs_cancelled.load(Ordering::SeqCst),
            self.runs_rejected.load(Ordering::SeqCst),
            self.rebalances_skipped.load(Ordering::SeqCst),
            self.items_processed.load(Ordering::SeqCst),
            self.clusters_committed.load(Ordering::SeqCst),
            self.run_duration_ms_sum.load(Ordering::SeqCst) as f64 / 1000.0,
            self.runs_total.load(Ordering::SeqCst),
            self.last_quality(),
        )
    }
}

// ===== Structured Logging =====

/// 初始化结构化日志
///
/// `RUST_LOG` 优先于配置的级别。配置了 `log_dir` 时日志写入按天滚动的文件，
/// 返回的 guard 必须在进程退出前一直持有，否则缓冲的日志会丢失。
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let level = if config.level.is_empty() {
        "info"
    } else {
        config.level.as_str()
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (writer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "memweave.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(writer)
        .with_target(true)
        .with_line_number(true);

    let installed = if config.structured {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed
        .map_err(|e| ClusterError::Internal(format!("failed to set tracing subscriber: {e}")))?;

    Ok(guard)
}
