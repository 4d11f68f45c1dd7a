use anyhow::{bail, Result};
use idea_graph_indexing::EmbeddingConfig;
use idea_graph_schemas::split_list;

use crate::llm_extractor::LLMConfig;

/// Feed crawling knobs
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    pub topics: Vec<String>,
    pub post_limit: usize,
    /// Pause between topics, to stay within the feed's usage policy
    pub topic_delay_secs: u64,
    pub sharing_keywords: Vec<String>,
    /// Process the comments of a meta-post as their own items
    pub expand_meta_comments: bool,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            topics: [
                "SideProject",
                "Entrepreneur",
                "startups",
                "Business_Ideas",
                "roastmystartup",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            post_limit: 25,
            topic_delay_secs: 20,
            sharing_keywords: [
                "share what you're building",
                "share what you are building",
                "show off your project",
                "what are you working on",
                "showcase",
                "share your startup",
                "show your side project",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            expand_meta_comments: true,
        }
    }
}

impl CrawlerConfig {
    /// Create config from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(topics) = std::env::var("CRAWLER_TOPICS") {
            config.topics = split_list(&topics);
        }
        if let Ok(limit) = std::env::var("CRAWLER_POST_LIMIT") {
            config.post_limit = limit.parse()?;
        }
        if let Ok(delay) = std::env::var("CRAWLER_TOPIC_DELAY_SECS") {
            config.topic_delay_secs = delay.parse()?;
        }
        if let Ok(keywords) = std::env::var("CRAWLER_SHARING_KEYWORDS") {
            config.sharing_keywords = split_list(&keywords);
        }
        if let Ok(expand) = std::env::var("CRAWLER_EXPAND_META_COMMENTS") {
            config.expand_meta_comments = parse_flag(&expand);
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.topics.is_empty() {
            bail!("at least one crawler topic is required");
        }
        if self.post_limit == 0 {
            bail!("crawler post limit must be positive");
        }
        Ok(())
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "yes")
}

/// Everything a full run needs, loaded once at startup
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: String,
    pub llm: LLMConfig,
    pub embedding: EmbeddingConfig,
    pub crawler: CrawlerConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            db_path: std::env::var("IDEA_GRAPH_DB").unwrap_or_else(|_| "ideas.db".to_string()),
            llm: LLMConfig::from_env()?,
            embedding: EmbeddingConfig::from_env(),
            crawler: CrawlerConfig::from_env()?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.db_path.trim().is_empty() {
            bail!("database path is required");
        }
        self.llm.validate()?;
        self.crawler.validate()
    }
}
