pub mod cluster;
pub mod config;
pub mod resolver;
pub mod slug;

pub use cluster::{ClusterBuilder, ClusterStats};
pub use config::GroupingConfig;
pub use resolver::{Resolution, ResolveStats, Resolver};
pub use slug::Slugger;
