/// Cluster builder
///
/// Batch pass over ungrouped source items. Items are visited in storage
/// order; each unclustered item seeds a cluster and pulls in its direct
/// neighbors above the similarity threshold. Expansion is single hop, so a
/// neighbor's neighbors are not followed. Every cluster becomes one Idea.

use anyhow::Result;
use chrono::Utc;
use idea_graph_indexing::VectorIndex;
use idea_graph_ingestion::Database;
use idea_graph_schemas::{generate_idea_id, split_list, Idea, SourceItem, SourceItemId};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::config::GroupingConfig;
use crate::slug::Slugger;

/// Fallback title length (in chars) for seeds without a title
const TITLE_FALLBACK_CHARS: usize = 80;

/// Summary of one clustering pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClusterStats {
    pub ungrouped: usize,
    pub missing_embeddings: usize,
    pub clusters: usize,
    pub ideas_created: usize,
    pub items_grouped: usize,
    pub failed: usize,
}

pub struct ClusterBuilder {
    slugger: Slugger,
    similarity_threshold: f32,
    neighbor_limit: usize,
}

impl ClusterBuilder {
    pub fn new(config: &GroupingConfig) -> Result<Self> {
        Ok(Self {
            slugger: Slugger::new()?,
            similarity_threshold: config.cluster_similarity_threshold,
            neighbor_limit: config.cluster_neighbor_limit,
        })
    }

    /// Group `items` into clusters, seed first in each.
    ///
    /// Neighbors outside `items` are ignored. Items without an embedding are
    /// left out entirely. The clustered set lives only for this call.
    pub fn form_clusters(
        &self,
        items: &[SourceItem],
        embeddings: &HashMap<SourceItemId, Vec<f32>>,
        index: &dyn VectorIndex,
    ) -> Vec<Vec<SourceItemId>> {
        let working_set: HashSet<SourceItemId> = items.iter().map(|item| item.id).collect();
        let mut clustered: HashSet<SourceItemId> = HashSet::with_capacity(items.len());
        let mut clusters = Vec::new();

        for item in items {
            if clustered.contains(&item.id) {
                continue;
            }

            let Some(embedding) = embeddings.get(&item.id) else {
                warn!("Source item {} has no embedding, leaving it ungrouped", item.id);
                continue;
            };

            let neighbors = match index.query(embedding, self.neighbor_limit, None) {
                Ok(neighbors) => neighbors,
                Err(e) => {
                    warn!("Neighbor query failed for source item {}: {:#}", item.id, e);
                    continue;
                }
            };

            clustered.insert(item.id);
            let mut members = vec![item.id];

            for neighbor in neighbors {
                let id = SourceItemId(neighbor.id);
                if neighbor.similarity() > self.similarity_threshold
                    && working_set.contains(&id)
                    && !clustered.contains(&id)
                {
                    clustered.insert(id);
                    members.push(id);
                }
            }

            debug!("Cluster seeded by {} has {} members", item.id, members.len());
            clusters.push(members);
        }

        clusters
    }

    /// Fold cluster members (seed first) into one new Idea
    pub fn aggregate(&self, members: &[&SourceItem]) -> Option<Idea> {
        let seed = members.first()?;

        let title = if seed.title.trim().is_empty() {
            seed.content.chars().take(TITLE_FALLBACK_CHARS).collect::<String>()
        } else {
            seed.title.clone()
        };

        // Integer mean, truncated
        let score = members.iter().map(|m| m.score).sum::<i64>() / members.len() as i64;

        let categories: BTreeSet<String> = members
            .iter()
            .flat_map(|m| split_list(&m.categories))
            .collect();

        let references: BTreeSet<String> = members
            .iter()
            .map(|m| m.url.trim())
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .collect();

        let now = Utc::now().to_rfc3339();
        Some(Idea {
            id: generate_idea_id(),
            slug: self.slugger.slug(&title),
            title: title.trim().to_string(),
            description: seed.content.clone(),
            features: Vec::new(),
            categories: categories.into_iter().collect(),
            references: references.into_iter().collect(),
            score,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Cluster everything ungrouped and materialize one Idea per cluster.
    /// A failing cluster is logged and left ungrouped for the next pass.
    pub fn run(&self, db: &Database) -> Result<ClusterStats> {
        let items = db.get_ungrouped_source_items()?;
        let mut stats = ClusterStats {
            ungrouped: items.len(),
            ..Default::default()
        };

        if items.is_empty() {
            info!("No ungrouped source items to cluster");
            return Ok(stats);
        }

        info!("Clustering {} ungrouped source items", items.len());

        let ids: Vec<SourceItemId> = items.iter().map(|item| item.id).collect();
        let embeddings = db.get_source_item_embeddings(&ids)?;
        stats.missing_embeddings = items.len() - embeddings.len();

        let clusters = self.form_clusters(&items, &embeddings, &db.source_item_index());
        stats.clusters = clusters.len();

        let by_id: HashMap<SourceItemId, &SourceItem> =
            items.iter().map(|item| (item.id, item)).collect();

        for cluster in &clusters {
            let members: Vec<&SourceItem> =
                cluster.iter().filter_map(|id| by_id.get(id).copied()).collect();

            let Some(idea) = self.aggregate(&members) else {
                continue;
            };

            if let Err(e) = db.create_entity(&idea, None) {
                warn!("Failed to create idea for cluster of {} items: {:#}", cluster.len(), e);
                stats.failed += 1;
                continue;
            }
            stats.ideas_created += 1;

            match db.set_idea_link(cluster, &idea.id) {
                Ok(linked) => stats.items_grouped += linked,
                Err(e) => {
                    warn!("Failed to link cluster members to idea {}: {:#}", idea.id, e);
                    stats.failed += 1;
                }
            }

            info!(
                "Created idea {} '{}' from {} source items (score {})",
                idea.id,
                idea.title,
                cluster.len(),
                idea.score
            );
        }

        info!(
            "Cluster pass finished: {} clusters, {} ideas, {} items grouped, {} failed",
            stats.clusters, stats.ideas_created, stats.items_grouped, stats.failed
        );
        Ok(stats)
    }
}
