/// Feed fetcher over Reddit's public JSON listings

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub const SOURCE_NAME: &str = "reddit";

const USER_AGENT: &str = "linux:idea-graph-crawler:v0.1.0";

/// One post or comment. Comments carry an empty title.
#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub id: String,
    pub title: String,
    pub content: String,
    pub author: String,
    pub url: String,
    pub score: i64,
    pub created_at: String, // RFC3339
}

#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_posts(&self, topic: &str, limit: usize) -> Result<Vec<Post>>;
    async fn fetch_comments(&self, topic: &str, post_id: &str) -> Result<Vec<Post>>;
}

pub struct RedditClient {
    base_url: String,
    client: Client,
}

impl RedditClient {
    pub fn new() -> Result<Self> {
        Self::with_base_url("https://www.reddit.com")
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(20))
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build Reddit HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn get(&self, url: &str) -> Result<String> {
        debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", url))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status.as_u16() >= 400 {
            bail!("reddit error {}: {}", status.as_u16(), body);
        }

        Ok(body)
    }
}

#[async_trait]
impl FeedSource for RedditClient {
    async fn fetch_posts(&self, topic: &str, limit: usize) -> Result<Vec<Post>> {
        let url = format!("{}/r/{}/new.json?limit={}", self.base_url, topic, limit);
        let body = self.get(&url).await?;
        parse_listing(&body)
    }

    async fn fetch_comments(&self, topic: &str, post_id: &str) -> Result<Vec<Post>> {
        let url = format!("{}/r/{}/comments/{}.json", self.base_url, topic, post_id);
        let body = self.get(&url).await?;
        parse_comments(&body)
    }
}

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: RawPost,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPost {
    id: String,
    title: String,
    selftext: String,
    body: String,
    author: String,
    permalink: String,
    score: i64,
    created_utc: f64,
}

impl RawPost {
    fn into_post(self, title: String, content: String) -> Post {
        Post {
            id: self.id,
            title,
            content,
            author: self.author,
            url: format!("https://reddit.com{}", self.permalink),
            score: self.score,
            created_at: unix_to_rfc3339(self.created_utc),
        }
    }
}

fn unix_to_rfc3339(secs: f64) -> String {
    DateTime::<Utc>::from_timestamp(secs as i64, 0)
        .unwrap_or_default()
        .to_rfc3339()
}

fn parse_listing(body: &str) -> Result<Vec<Post>> {
    let listing: Listing = serde_json::from_str(body).context("Failed to parse Reddit listing")?;

    Ok(listing
        .data
        .children
        .into_iter()
        .map(|child| {
            let raw = child.data;
            let title = raw.title.clone();
            let content = raw.selftext.clone();
            raw.into_post(title, content)
        })
        .collect())
}

/// The comments endpoint returns `[post listing, comment listing]`
fn parse_comments(body: &str) -> Result<Vec<Post>> {
    let listings: Vec<Listing> =
        serde_json::from_str(body).context("Failed to parse Reddit comments")?;

    let Some(comments) = listings.into_iter().nth(1) else {
        return Ok(Vec::new());
    };

    Ok(comments
        .data
        .children
        .into_iter()
        .map(|child| child.data)
        .filter(|raw| !matches!(raw.body.as_str(), "" | "[deleted]" | "[removed]"))
        .map(|raw| {
            let content = raw.body.clone();
            raw.into_post(String::new(), content)
        })
        .collect())
}
