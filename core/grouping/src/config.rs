use anyhow::{bail, Result};

/// Thresholds of the resolution and clustering passes.
///
/// Both work on cosine distance where `similarity = 1 - distance`.
#[derive(Debug, Clone)]
pub struct GroupingConfig {
    /// A candidate problem reuses the nearest existing problem within this distance
    pub problem_distance_threshold: f32,
    /// Neighbors join a cluster only when strictly more similar than this
    pub cluster_similarity_threshold: f32,
    /// Neighbors requested per cluster seed
    pub cluster_neighbor_limit: usize,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            problem_distance_threshold: 0.2,
            cluster_similarity_threshold: 0.6,
            cluster_neighbor_limit: 100,
        }
    }
}

impl GroupingConfig {
    /// Create config from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("PROBLEM_DISTANCE_THRESHOLD") {
            config.problem_distance_threshold = value.parse()?;
        }
        if let Ok(value) = std::env::var("CLUSTER_SIMILARITY_THRESHOLD") {
            config.cluster_similarity_threshold = value.parse()?;
        }
        if let Ok(value) = std::env::var("CLUSTER_NEIGHBOR_LIMIT") {
            config.cluster_neighbor_limit = value.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.problem_distance_threshold) {
            bail!(
                "problem distance threshold must be within [0, 2], got {}",
                self.problem_distance_threshold
            );
        }
        if !(-1.0..=1.0).contains(&self.cluster_similarity_threshold) {
            bail!(
                "cluster similarity threshold must be within [-1, 1], got {}",
                self.cluster_similarity_threshold
            );
        }
        if self.cluster_neighbor_limit == 0 {
            bail!("cluster neighbor limit must be positive");
        }
        Ok(())
    }
}
