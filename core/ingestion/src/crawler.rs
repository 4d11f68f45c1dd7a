use anyhow::{Context, Result};
use async_trait::async_trait;
use idea_graph_indexing::EmbeddingEngine;
use idea_graph_schemas::{item_text, join_list, ExtractionResult, NewSourceItem, SourceItem};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::CrawlerConfig;
use crate::extractor::{classify, is_sharing_post, Classification};
use crate::llm_extractor::Analyzer;
use crate::reddit::{FeedSource, Post, SOURCE_NAME};
use crate::Database;

/// Hook run on every freshly stored source item. Implemented by the
/// resolution engine; kept as a trait so ingestion does not depend on it.
#[async_trait(?Send)]
pub trait ItemResolver {
    async fn resolve(
        &self,
        db: &Database,
        item: &SourceItem,
        analysis: &ExtractionResult,
    ) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Existing,
    Meta,
    Empty,
    Stored,
    /// Stored and accepted by the resolver hook
    Resolved,
    Failed,
}

/// Summary of one crawl run
#[derive(Debug, Clone, Default, Serialize)]
pub struct CrawlStats {
    pub topics: usize,
    pub topic_errors: usize,
    pub fetched: usize,
    pub skipped_existing: usize,
    pub meta: usize,
    pub empty: usize,
    pub stored: usize,
    pub resolved: usize,
    pub failed: usize,
}

/// Sequential crawl: gate → analyze → classify → embed → store → resolve,
/// one item at a time. Per-item failures are logged and skipped.
pub struct Crawler {
    db: Database,
    feed: Box<dyn FeedSource>,
    analyzer: Box<dyn Analyzer>,
    embedder: Arc<dyn EmbeddingEngine>,
    resolver: Option<Box<dyn ItemResolver>>,
    config: CrawlerConfig,
}

impl Crawler {
    pub fn new(
        db: Database,
        feed: Box<dyn FeedSource>,
        analyzer: Box<dyn Analyzer>,
        embedder: Arc<dyn EmbeddingEngine>,
        config: CrawlerConfig,
    ) -> Self {
        Self {
            db,
            feed,
            analyzer,
            embedder,
            resolver: None,
            config,
        }
    }

    pub fn with_resolver(mut self, resolver: Box<dyn ItemResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Crawl every configured topic, pausing between topics
    pub async fn crawl_all(&self) -> CrawlStats {
        let mut stats = CrawlStats::default();

        for (i, topic) in self.config.topics.iter().enumerate() {
            if i > 0 && self.config.topic_delay_secs > 0 {
                debug!("Sleeping {}s before r/{}", self.config.topic_delay_secs, topic);
                tokio::time::sleep(Duration::from_secs(self.config.topic_delay_secs)).await;
            }

            if let Err(e) = self.crawl_topic(topic, &mut stats).await {
                error!("Error when crawling r/{}: {:#}", topic, e);
                stats.topic_errors += 1;
            }
        }

        info!(
            "Crawl finished: {} fetched, {} stored, {} resolved, {} skipped, {} meta, {} empty, {} failed",
            stats.fetched,
            stats.stored,
            stats.resolved,
            stats.skipped_existing,
            stats.meta,
            stats.empty,
            stats.failed
        );
        stats
    }

    /// Fetch and process one topic. Only the listing fetch can fail the topic.
    pub async fn crawl_topic(&self, topic: &str, stats: &mut CrawlStats) -> Result<()> {
        info!("Crawling r/{} for problems, ideas, and products", topic);
        stats.topics += 1;

        let posts = self
            .feed
            .fetch_posts(topic, self.config.post_limit)
            .await
            .with_context(|| format!("failed to fetch posts from r/{}", topic))?;
        stats.fetched += posts.len();

        for post in &posts {
            let outcome = self.process_item(post, stats).await;

            if outcome == ItemOutcome::Meta && self.config.expand_meta_comments {
                self.expand_comments(topic, post, stats).await;
            }
        }

        Ok(())
    }

    /// Treat each comment of a meta-post as its own item
    async fn expand_comments(&self, topic: &str, post: &Post, stats: &mut CrawlStats) {
        let comments = match self.feed.fetch_comments(topic, &post.id).await {
            Ok(comments) => comments,
            Err(e) => {
                warn!("Failed to fetch comments of {}: {:#}", post.id, e);
                stats.failed += 1;
                return;
            }
        };

        info!("Expanding {} comments of meta-post {}", comments.len(), post.id);
        stats.fetched += comments.len();

        for comment in &comments {
            self.process_item(comment, stats).await;
        }
    }

    async fn process_item(&self, post: &Post, stats: &mut CrawlStats) -> ItemOutcome {
        let outcome = match self.try_process_item(post).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Skipping {}: {:#}", post.id, e);
                ItemOutcome::Failed
            }
        };

        match outcome {
            ItemOutcome::Existing => stats.skipped_existing += 1,
            ItemOutcome::Meta => stats.meta += 1,
            ItemOutcome::Empty => stats.empty += 1,
            ItemOutcome::Stored => stats.stored += 1,
            ItemOutcome::Resolved => {
                stats.stored += 1;
                stats.resolved += 1;
            }
            ItemOutcome::Failed => stats.failed += 1,
        }

        outcome
    }

    async fn try_process_item(&self, post: &Post) -> Result<ItemOutcome> {
        // A failed existence check skips the item rather than risking a re-analysis
        if self
            .db
            .source_item_exists(SOURCE_NAME, &post.id)
            .context("existence check failed")?
        {
            debug!("Source item already existed, ignoring: {}", post.id);
            return Ok(ItemOutcome::Existing);
        }

        if is_sharing_post(&post.title, &self.config.sharing_keywords) {
            info!("Post matches a sharing keyword, treating as meta: {}", post.title);
            return Ok(ItemOutcome::Meta);
        }

        let text = item_text(&post.title, &post.content);
        let analysis = self.analyzer.extract(&text).await.context("analysis failed")?;

        match classify(&analysis) {
            Classification::Meta => {
                info!("Post is meta, ignoring: {}", post.id);
                return Ok(ItemOutcome::Meta);
            }
            Classification::Empty => {
                debug!("Empty analysis, ignoring: {}", post.id);
                return Ok(ItemOutcome::Empty);
            }
            Classification::Usable => {}
        }

        let embedding = self.embedder.embed(&text).await.context("embedding failed")?;

        let item = NewSourceItem {
            source: SOURCE_NAME.to_string(),
            source_item_id: post.id.clone(),
            title: post.title.clone(),
            content: post.content.clone(),
            author: post.author.clone(),
            url: post.url.clone(),
            score: post.score,
            analysis_result: serde_json::to_string(&analysis)?,
            categories: join_list(&analysis.categories()),
            source_created_at: post.created_at.clone(),
        };

        let Some(id) = self.db.insert_source_item(&item, &embedding)? else {
            return Ok(ItemOutcome::Existing);
        };
        info!("Stored source item {} ({})", id, post.id);

        if let Some(resolver) = &self.resolver {
            let stored = self
                .db
                .get_source_item(id)?
                .context("stored source item disappeared")?;

            // The item stays ungrouped on failure and is retried by a later pass
            match resolver.resolve(&self.db, &stored, &analysis).await {
                Ok(()) => return Ok(ItemOutcome::Resolved),
                Err(e) => warn!("Resolution of source item {} failed: {:#}", id, e),
            }
        }

        Ok(ItemOutcome::Stored)
    }
}
