//! memweave - 记忆聚类与自动分类引擎
//!
//! 把带嵌入向量的记忆条目聚成语义一致的聚类，并把每个聚类映射到分类体系上。
//! 嵌入向量由外部提供，引擎只消费向量，不做持久化。

pub mod clustering;
pub mod config;
pub mod error;
pub mod models;
pub mod observability;
pub mod services;
