pub mod config;
pub mod crawler;
pub mod database;
pub mod extractor;
pub mod llm_extractor;
pub mod reddit;

pub use config::{AppConfig, CrawlerConfig};
pub use crawler::{CrawlStats, Crawler, ItemResolver};
pub use database::{CanonicalEntity, Database, StoreStats, VEC_PROBLEMS, VEC_SOURCE_ITEMS};
pub use extractor::{classify, is_sharing_post, Classification};
pub use llm_extractor::{AnalysisClient, Analyzer, LLMConfig};
pub use reddit::{FeedSource, Post, RedditClient, SOURCE_NAME};
