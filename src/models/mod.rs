//! 核心数据模型模块
//!
//! 定义聚类引擎的数据结构：MemoryItem, MemoryCluster, MemoryCategory, ClusteringResult

pub mod category;
pub mod cluster;
pub mod item;
pub mod result;

pub use category::*;
pub use cluster::*;
pub use item::*;
pub use result::*;
