use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 聚类算法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClusteringAlgorithm {
    /// K-means
    Kmeans,
    /// 层次聚类（凝聚式）
    Hierarchical,
    /// 基于密度的 DBSCAN
    Dbscan,
    /// 谱聚类（Ng-Jordan-Weiss）
    Spectral,
    /// 根据质量指标自适应选择
    #[default]
    Adaptive,
}

impl std::fmt::Display for ClusteringAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusteringAlgorithm::Kmeans => write!(f, "kmeans"),
            ClusteringAlgorithm::Hierarchical => write!(f, "hierarchical"),
            ClusteringAlgorithm::Dbscan => write!(f, "dbscan"),
            ClusteringAlgorithm::Spectral => write!(f, "spectral"),
            ClusteringAlgorithm::Adaptive => write!(f, "adaptive"),
        }
    }
}

/// 聚类配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    /// 聚类算法
    pub algorithm: ClusteringAlgorithm,
    /// 最大聚类数
    pub max_clusters: usize,
    /// 最小聚类大小（小于该值的聚类被丢弃）
    pub min_cluster_size: usize,
    /// 相似度阈值（合并建议下限）
    pub similarity_threshold: f32,
    /// 凝聚度阈值
    pub coherence_threshold: f32,
    /// 稳定性阈值
    pub stability_threshold: f32,
    /// 是否保留层次结构（拆分时记录父子关系）
    pub enable_hierarchical: bool,
    /// 是否启用合并/拆分优化
    pub enable_dynamic_evolution: bool,
    /// 重平衡间隔（秒），配置键为 `rebalance_interval`
    #[serde(rename = "rebalance_interval")]
    pub rebalance_interval_secs: u64,
    /// 质心相似度超过该值的聚类被合并
    pub merge_similar_threshold: f32,
    /// 成员数超过该值的聚类被拆分
    pub split_large_threshold: usize,
    /// DBSCAN 邻域半径
    pub dbscan_eps: f32,
    /// 谱聚类高斯核宽度（未设置时取成对距离中位数）
    pub spectral_sigma: Option<f32>,
    /// 重要性下限（小于等于该值的条目被过滤）
    pub min_importance: f32,
    /// 期望向量维度（未设置时取第一个条目的维度）
    pub dimension: Option<usize>,
    /// 是否归一化为单位向量
    pub normalize_vectors: bool,
    /// 随机种子
    pub seed: Option<u64>,
    /// K-means 最大迭代次数
    pub max_iterations: usize,
    /// 质心收敛阈值
    pub convergence_epsilon: f32,
    /// 自适应选择的目标质量
    pub quality_threshold: f32,
    /// 自适应选择的最大尝试次数
    pub max_attempts: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            algorithm: ClusteringAlgorithm::Adaptive,
            max_clusters: 50,
            min_cluster_size: 3,
            similarity_threshold: 0.75,
            coherence_threshold: 0.6,
            stability_threshold: 0.7,
            enable_hierarchical: true,
            enable_dynamic_evolution: true,
            rebalance_interval_secs: 3600,
            merge_similar_threshold: 0.9,
            split_large_threshold: 100,
            dbscan_eps: 0.5,
            spectral_sigma: None,
            min_importance: 0.0,
            dimension: None,
            normalize_vectors: true,
            seed: None,
            max_iterations: 100,
            convergence_epsilon: 0.001,
            quality_threshold: 0.7,
            max_attempts: 10,
        }
    }
}

impl ClusteringConfig {
    /// 重平衡间隔
    pub fn rebalance_interval(&self) -> Duration {
        Duration::from_secs(self.rebalance_interval_secs)
    }
}

/// 自动分类配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CategorizationConfig {
    /// 匹配已有分类所需的最低置信度
    pub confidence_threshold: f32,
    /// 新建分类的默认置信度
    pub default_confidence: f32,
    /// 每个聚类提取的关键词数
    pub max_keywords: usize,
}

impl Default for CategorizationConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.6,
            default_confidence: 0.5,
            max_keywords: 10,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: String,
    /// 结构化（JSON）日志格式
    pub structured: bool,
    /// 日志文件目录（按天滚动）
    pub log_dir: Option<PathBuf>,
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// 聚类配置
    pub clustering: ClusteringConfig,
    /// 自动分类配置
    pub categorization: CategorizationConfig,
    /// 日志配置
    pub logging: LoggingConfig,
    /// 应用名称
    pub app_name: String,
    /// 环境
    pub environment: String,
}

impl AppConfig {
    /// 创建开发环境配置
    pub fn development() -> Self {
        Self {
            clustering: ClusteringConfig {
                seed: Some(42),
                ..ClusteringConfig::default()
            },
            categorization: CategorizationConfig::default(),
            logging: LoggingConfig {
                level: "debug".into(),
                structured: false,
                log_dir: None,
            },
            app_name: "memweave".into(),
            environment: "development".into(),
        }
    }

    /// 创建生产环境配置
    pub fn production() -> Self {
        let mut config = Self::development();
        config.environment = "production".into();
        config.clustering.seed = None;
        config.logging.level = "info".into();
        config.logging.structured = true;
        config.logging.log_dir = Some(PathBuf::from("./logs"));
        config
    }
}
