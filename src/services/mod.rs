//! 服务模块

pub mod categorizer;
pub mod engine;
pub mod events;
pub mod scheduler;
pub mod service;
pub mod store;

pub use categorizer::{AutoCategorizer, CategoryDecision, CategoryMatch, MatchOutcome};
pub use engine::ClusteringEngine;
pub use events::{ClusteringEvent, ClusteringEventListener, TracingEventListener};
pub use scheduler::{ItemSource, RebalanceOutcome, RebalanceScheduler};
pub use service::{
    ClusteringService, EngineClusteringService, create_clustering_service,
    create_clustering_service_with_listeners,
};
pub use store::{ClusterSnapshot, ClusterStore};
