use crate::config::config::{AppConfig, ClusteringConfig};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml, Yaml},
};
use std::path::{Path, PathBuf};

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 从默认路径加载配置
    ///
    /// 搜索路径：
    /// 1. ./config.toml
    /// 2. ./config.yaml
    /// 3. 环境变量（MEMWEAVE_ 前缀，双下划线分隔层级）
    pub fn load() -> Result<AppConfig, figment::Error> {
        Figment::from(Serialized::defaults(AppConfig::development()))
            .merge(Toml::file(default_config_path()))
            .merge(Yaml::file("config.yaml"))
            .merge(Env::prefixed("MEMWEAVE_").split("__"))
            .extract()
    }

    /// 从指定路径加载配置，`.yaml`/`.yml` 按 YAML 解析，其余按 TOML 解析
    pub fn load_from(path: PathBuf) -> Result<AppConfig, figment::Error> {
        let figment = Figment::from(Serialized::defaults(AppConfig::development()));
        let figment = if is_yaml(&path) {
            figment.merge(Yaml::file(path))
        } else {
            figment.merge(Toml::file(path))
        };

        figment
            .merge(Env::prefixed("MEMWEAVE_").split("__"))
            .extract()
    }

    /// 验证配置
    pub fn validate(config: &AppConfig) -> Result<(), ConfigValidationError> {
        Self::validate_clustering(&config.clustering)?;

        let categorization = &config.categorization;
        if !(0.0..=1.0).contains(&categorization.confidence_threshold) {
            return Err(ConfigValidationError::OutOfRange(
                "categorization.confidence_threshold",
            ));
        }
        if !(0.0..=1.0).contains(&categorization.default_confidence) {
            return Err(ConfigValidationError::OutOfRange(
                "categorization.default_confidence",
            ));
        }

        Ok(())
    }

    /// 验证聚类配置
    pub fn validate_clustering(config: &ClusteringConfig) -> Result<(), ConfigValidationError> {
        if config.max_clusters == 0 {
            return Err(ConfigValidationError::InvalidMaxClusters);
        }

        if config.min_cluster_size == 0 {
            return Err(ConfigValidationError::InvalidMinClusterSize);
        }

        if config.dbscan_eps <= 0.0 {
            return Err(ConfigValidationError::InvalidEps);
        }

        if config.spectral_sigma.is_some_and(|sigma| sigma <= 0.0 || !sigma.is_finite()) {
            return Err(ConfigValidationError::InvalidSigma);
        }

        if config.dimension == Some(0) {
            return Err(ConfigValidationError::InvalidDimension);
        }

        let unit_fields = [
            ("clustering.similarity_threshold", config.similarity_threshold),
            ("clustering.coherence_threshold", config.coherence_threshold),
            ("clustering.stability_threshold", config.stability_threshold),
            ("clustering.merge_similar_threshold", config.merge_similar_threshold),
            ("clustering.quality_threshold", config.quality_threshold),
        ];
        for (name, value) in unit_fields {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigValidationError::OutOfRange(name));
            }
        }

        Ok(())
    }
}

/// 配置验证错误
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ConfigValidationError {
    #[error("max_clusters 无效，必须大于 0")]
    InvalidMaxClusters,

    #[error("min_cluster_size 无效，必须大于 0")]
    InvalidMinClusterSize,

    #[error("dbscan_eps 无效，必须大于 0")]
    InvalidEps,

    #[error("spectral_sigma 无效，必须大于 0")]
    InvalidSigma,

    #[error("向量维度无效，必须大于 0")]
    InvalidDimension,

    #[error("{0} 必须在 [0, 1] 范围内")]
    OutOfRange(&'static str),
}

impl From<ConfigValidationError> for crate::error::ClusterError {
    fn from(e: ConfigValidationError) -> Self {
        crate::error::ClusterError::Config(e.to_string())
    }
}

/// 获取默认配置文件路径
pub fn default_config_path() -> PathBuf {
    PathBuf::from("config.toml")
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml" | "yml")
    )
}
