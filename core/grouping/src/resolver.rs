/// Resolution engine
///
/// Maps the candidates of one analyzed source item onto canonical entities:
/// problems are deduplicated by embedding distance, ideas and products are
/// created fresh for every item. Each candidate is resolved independently so
/// one failing oracle call does not take its siblings down.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use idea_graph_indexing::EmbeddingEngine;
use idea_graph_ingestion::{Database, ItemResolver};
use idea_graph_schemas::{
    generate_idea_id, generate_problem_id, generate_product_id, ExtractionResult, Idea,
    IdeaCandidate, IdeaId, LinkKind, Problem, ProblemCandidate, ProblemId, Product,
    ProductCandidate, ProductId, SourceItem,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::GroupingConfig;
use crate::slug::Slugger;

/// What one item resolved to
#[derive(Debug, Clone, Default, Serialize)]
pub struct Resolution {
    pub problem_id: Option<ProblemId>,
    /// True when `problem_id` is an existing problem
    pub problem_reused: bool,
    pub idea_id: Option<IdeaId>,
    pub product_ids: Vec<ProductId>,
    pub links: usize,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.problem_id.is_none() && self.idea_id.is_none() && self.product_ids.is_empty()
    }
}

/// Summary of a replay pass over ungrouped items
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolveStats {
    pub items: usize,
    pub resolved: usize,
    pub unparseable: usize,
    pub failed: usize,
    pub problems_created: usize,
    pub problems_reused: usize,
    pub ideas_created: usize,
    pub products_created: usize,
}

pub struct Resolver {
    embedder: Arc<dyn EmbeddingEngine>,
    slugger: Slugger,
    problem_distance_threshold: f32,
}

impl Resolver {
    pub fn new(embedder: Arc<dyn EmbeddingEngine>, config: &GroupingConfig) -> Result<Self> {
        Ok(Self {
            embedder,
            slugger: Slugger::new()?,
            problem_distance_threshold: config.problem_distance_threshold,
        })
    }

    /// Resolve every candidate of one item, then write back-links and the
    /// links between whatever was resolved.
    ///
    /// Fails only when candidates were attempted and none resolved; the item
    /// then stays ungrouped for the next pass.
    pub async fn resolve_item(
        &self,
        db: &Database,
        item: &SourceItem,
        analysis: &ExtractionResult,
    ) -> Result<Resolution> {
        let mut resolution = Resolution::default();
        let mut first_error: Option<anyhow::Error> = None;

        if analysis.problem.score > 0 {
            match self.resolve_problem(db, &analysis.problem).await {
                Ok((id, reused)) => {
                    resolution.problem_id = Some(id);
                    resolution.problem_reused = reused;
                }
                Err(e) => {
                    warn!("Failed to resolve problem for source item {}: {:#}", item.id, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        if analysis.idea.score > 0 {
            match self.create_idea(db, item, &analysis.idea) {
                Ok(id) => resolution.idea_id = Some(id),
                Err(e) => {
                    warn!("Failed to create idea for source item {}: {:#}", item.id, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        for candidate in &analysis.products {
            if candidate.name.trim().is_empty() {
                debug!("Skipping nameless product on source item {}", item.id);
                continue;
            }
            match self.create_product(db, candidate) {
                Ok(id) => resolution.product_ids.push(id),
                Err(e) => {
                    warn!("Failed to create product for source item {}: {:#}", item.id, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        if resolution.is_empty() {
            return match first_error {
                Some(e) => Err(e.context(format!("source item {} left unresolved", item.id))),
                None => Ok(resolution),
            };
        }

        self.write_back_links(db, item, &resolution)?;
        resolution.links = self.write_links(db, &resolution)?;

        debug!(
            "Resolved source item {}: problem={:?} idea={:?} products={}",
            item.id,
            resolution.problem_id,
            resolution.idea_id,
            resolution.product_ids.len()
        );
        Ok(resolution)
    }

    /// Reuse the nearest problem within the threshold, or create one
    /// together with its categories and embedding.
    async fn resolve_problem(
        &self,
        db: &Database,
        candidate: &ProblemCandidate,
    ) -> Result<(ProblemId, bool)> {
        let embedding = self
            .embedder
            .embed(&candidate.title)
            .await
            .with_context(|| format!("failed to embed problem '{}'", candidate.title))?;

        // A failed lookup falls through to creation
        let nearest = match db.find_similar_problems(&embedding, 1, self.problem_distance_threshold)
        {
            Ok(mut similar) if !similar.is_empty() => Some(similar.remove(0)),
            Ok(_) => None,
            Err(e) => {
                warn!("Similar problem lookup failed for '{}': {:#}", candidate.title, e);
                None
            }
        };

        if let Some((existing, distance)) = nearest {
            info!(
                "Reusing problem {} for '{}' (distance {:.3}, existing '{}')",
                existing.id, candidate.title, distance, existing.title
            );
            return Ok((existing.id, true));
        }

        let now = Utc::now().to_rfc3339();
        let problem = Problem {
            id: generate_problem_id(),
            slug: self.slugger.slug(&candidate.title),
            title: candidate.title.clone(),
            description: candidate.description.clone(),
            pain_points: candidate.pain_points.clone(),
            categories: candidate.categories.clone(),
            score: candidate.score,
            created_at: now.clone(),
            updated_at: now,
        };

        db.create_entity(&problem, Some(&embedding))?;
        info!("Created new problem {}: '{}'", problem.id, problem.title);

        Ok((problem.id, false))
    }

    fn create_idea(
        &self,
        db: &Database,
        item: &SourceItem,
        candidate: &IdeaCandidate,
    ) -> Result<IdeaId> {
        let now = Utc::now().to_rfc3339();
        let references = if item.url.is_empty() {
            Vec::new()
        } else {
            vec![item.url.clone()]
        };

        let idea = Idea {
            id: generate_idea_id(),
            slug: self.slugger.slug(&candidate.title),
            title: candidate.title.clone(),
            description: candidate.description.clone(),
            features: candidate.features.clone(),
            categories: candidate.categories.clone(),
            references,
            score: candidate.score,
            created_at: now.clone(),
            updated_at: now,
        };

        db.create_entity(&idea, None)?;
        info!("Created new idea {}: '{}'", idea.id, idea.title);

        Ok(idea.id)
    }

    fn create_product(&self, db: &Database, candidate: &ProductCandidate) -> Result<ProductId> {
        let now = Utc::now().to_rfc3339();
        let product = Product {
            id: generate_product_id(),
            slug: self.slugger.slug(&candidate.name),
            name: candidate.name.clone(),
            description: candidate.description.clone(),
            url: candidate.url.clone(),
            categories: candidate.categories.clone(),
            score: 0,
            created_at: now.clone(),
            updated_at: now,
        };

        db.create_entity(&product, None)?;
        info!("Created new product {}: '{}'", product.id, product.name);

        Ok(product.id)
    }

    fn write_back_links(
        &self,
        db: &Database,
        item: &SourceItem,
        resolution: &Resolution,
    ) -> Result<()> {
        let ids = [item.id];

        if let Some(problem_id) = &resolution.problem_id {
            db.set_problem_link(&ids, problem_id)?;
        }
        if let Some(idea_id) = &resolution.idea_id {
            db.set_idea_link(&ids, idea_id)?;
        }
        // One back-link column; the first product wins
        if let Some(product_id) = resolution.product_ids.first() {
            db.set_product_link(&ids, product_id)?;
        }

        Ok(())
    }

    /// Link every pair whose two endpoints were resolved
    fn write_links(&self, db: &Database, resolution: &Resolution) -> Result<usize> {
        let problem = resolution.problem_id.as_ref().map(|id| id.0.as_str());
        let idea = resolution.idea_id.as_ref().map(|id| id.0.as_str());
        let mut links = 0;

        if let (Some(problem), Some(idea)) = (problem, idea) {
            links += db.create_link(LinkKind::ProblemIdea, problem, idea)? as usize;
        }

        for product in &resolution.product_ids {
            if let Some(problem) = problem {
                links += db.create_link(LinkKind::ProblemProduct, problem, &product.0)? as usize;
            }
            if let Some(idea) = idea {
                links += db.create_link(LinkKind::IdeaProduct, idea, &product.0)? as usize;
            }
        }

        Ok(links)
    }

    /// Replay the stored analysis of every ungrouped item through
    /// `resolve_item`. Unparseable blobs are skipped for this pass.
    pub async fn resolve_ungrouped(&self, db: &Database) -> Result<ResolveStats> {
        let items = db.get_ungrouped_source_items()?;
        let mut stats = ResolveStats {
            items: items.len(),
            ..Default::default()
        };

        if items.is_empty() {
            info!("No ungrouped source items to resolve");
            return Ok(stats);
        }

        info!("Resolving {} ungrouped source items", items.len());

        for item in &items {
            let analysis: ExtractionResult = match serde_json::from_str(&item.analysis_result) {
                Ok(analysis) => analysis,
                Err(e) => {
                    warn!(
                        "Could not parse analysis result of source item {}: {}",
                        item.id, e
                    );
                    stats.unparseable += 1;
                    continue;
                }
            };

            match self.resolve_item(db, item, &analysis).await {
                Ok(resolution) if resolution.is_empty() => {}
                Ok(resolution) => {
                    stats.resolved += 1;
                    if resolution.problem_id.is_some() {
                        if resolution.problem_reused {
                            stats.problems_reused += 1;
                        } else {
                            stats.problems_created += 1;
                        }
                    }
                    stats.ideas_created += resolution.idea_id.is_some() as usize;
                    stats.products_created += resolution.product_ids.len();
                }
                Err(e) => {
                    warn!("{:#}", e);
                    stats.failed += 1;
                }
            }
        }

        info!(
            "Resolve finished: {} resolved, {} failed, {} unparseable",
            stats.resolved, stats.failed, stats.unparseable
        );
        Ok(stats)
    }
}

#[async_trait(?Send)]
impl ItemResolver for Resolver {
    async fn resolve(
        &self,
        db: &Database,
        item: &SourceItem,
        analysis: &ExtractionResult,
    ) -> Result<()> {
        let resolution = self.resolve_item(db, item, analysis).await?;
        if resolution.is_empty() {
            return Err(anyhow!("source item {} yielded nothing to resolve", item.id));
        }
        Ok(())
    }
}
