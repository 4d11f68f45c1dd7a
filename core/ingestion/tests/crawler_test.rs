use anyhow::{anyhow, Result};
use async_trait::async_trait;
use idea_graph_indexing::EmbeddingEngine;
use idea_graph_ingestion::{
    Analyzer, CrawlStats, Crawler, CrawlerConfig, Database, FeedSource, ItemResolver, Post,
};
use idea_graph_schemas::{
    EntityKind, ExtractionResult, IdeaCandidate, ProblemCandidate, SourceItem,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::NamedTempFile;

struct FakeFeed {
    posts: HashMap<String, Vec<Post>>,
    comments: HashMap<String, Vec<Post>>,
}

#[async_trait]
impl FeedSource for FakeFeed {
    async fn fetch_posts(&self, topic: &str, _limit: usize) -> Result<Vec<Post>> {
        self.posts
            .get(topic)
            .cloned()
            .ok_or_else(|| anyhow!("reddit error 404: unknown topic {}", topic))
    }

    async fn fetch_comments(&self, _topic: &str, post_id: &str) -> Result<Vec<Post>> {
        Ok(self.comments.get(post_id).cloned().unwrap_or_default())
    }
}

/// Answers by exact text; unknown text behaves like an unreachable oracle
struct FakeAnalyzer {
    results: HashMap<String, ExtractionResult>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Analyzer for FakeAnalyzer {
    async fn extract(&self, text: &str) -> Result<ExtractionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.results
            .get(text)
            .cloned()
            .ok_or_else(|| anyhow!("Mistral API error (status 503)"))
    }
}

struct FakeEmbedder;

#[async_trait]
impl EmbeddingEngine for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(vec![1.0, text.len() as f32])
    }
}

struct CountingResolver {
    seen: Arc<AtomicUsize>,
}

#[async_trait(?Send)]
impl ItemResolver for CountingResolver {
    async fn resolve(
        &self,
        _db: &Database,
        item: &SourceItem,
        _analysis: &ExtractionResult,
    ) -> Result<()> {
        assert!(item.is_ungrouped());
        self.seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn post(id: &str, title: &str, content: &str) -> Post {
    Post {
        id: id.to_string(),
        title: title.to_string(),
        content: content.to_string(),
        author: "someone".to_string(),
        url: format!("https://reddit.com/r/test/{}", id),
        score: 10,
        created_at: "2024-01-01T00:00:00+00:00".to_string(),
    }
}

fn usable(problem_score: i64, idea_score: i64) -> ExtractionResult {
    ExtractionResult {
        is_meta: false,
        problem: ProblemCandidate {
            title: "Problem".to_string(),
            score: problem_score,
            categories: vec!["saas".to_string()],
            ..Default::default()
        },
        idea: IdeaCandidate {
            title: "Idea".to_string(),
            score: idea_score,
            categories: vec!["ai-ml".to_string(), "saas".to_string()],
            ..Default::default()
        },
        products: vec![],
    }
}

fn config(topics: &[&str]) -> CrawlerConfig {
    CrawlerConfig {
        topics: topics.iter().map(|t| t.to_string()).collect(),
        topic_delay_secs: 0,
        ..CrawlerConfig::default()
    }
}

fn crawler(
    db: Database,
    feed: FakeFeed,
    results: HashMap<String, ExtractionResult>,
    calls: Arc<AtomicUsize>,
    config: CrawlerConfig,
) -> Crawler {
    Crawler::new(
        db,
        Box::new(feed),
        Box::new(FakeAnalyzer { results, calls }),
        Arc::new(FakeEmbedder),
        config,
    )
}

#[tokio::test]
async fn test_recrawl_is_a_no_op() -> Result<()> {
    let temp = NamedTempFile::new()?;
    let calls = Arc::new(AtomicUsize::new(0));

    let feed = FakeFeed {
        posts: HashMap::from([(
            "SideProject".to_string(),
            vec![post("p1", "Invoices", "Freelancers lose invoices")],
        )]),
        comments: HashMap::new(),
    };
    let results = HashMap::from([(
        "Invoices\nFreelancers lose invoices".to_string(),
        usable(60, 50),
    )]);

    let crawler = crawler(
        Database::new(temp.path())?,
        feed,
        results,
        calls.clone(),
        config(&["SideProject"]),
    );

    let first = crawler.crawl_all().await;
    assert_eq!(first.stored, 1);

    let second = crawler.crawl_all().await;
    assert_eq!(second.stored, 0);
    assert_eq!(second.skipped_existing, 1);

    // The oracle is never asked twice about the same item
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(crawler.database().count_source_items()?, 1);

    let item = &crawler.database().get_ungrouped_source_items()?[0];
    assert_eq!(item.categories, "saas, ai-ml");
    assert_eq!(item.score, 10);

    let stored: ExtractionResult = serde_json::from_str(&item.analysis_result)?;
    assert_eq!(stored, usable(60, 50));
    Ok(())
}

#[tokio::test]
async fn test_meta_and_empty_results_are_discarded() -> Result<()> {
    let temp = NamedTempFile::new()?;
    let calls = Arc::new(AtomicUsize::new(0));

    let mut meta = usable(90, 90);
    meta.is_meta = true;

    let feed = FakeFeed {
        posts: HashMap::from([(
            "startups".to_string(),
            vec![post("m1", "Thread", "Tell us"), post("e1", "Rant", "Nothing")],
        )]),
        comments: HashMap::new(),
    };
    let results = HashMap::from([
        ("Thread\nTell us".to_string(), meta),
        ("Rant\nNothing".to_string(), usable(0, 0)),
    ]);

    let crawler = crawler(
        Database::new(temp.path())?,
        feed,
        results,
        calls,
        config(&["startups"]),
    );

    let stats = crawler.crawl_all().await;
    assert_eq!(stats.meta, 1);
    assert_eq!(stats.empty, 1);
    assert_eq!(stats.stored, 0);

    let db = crawler.database();
    assert_eq!(db.count_source_items()?, 0);
    for kind in [EntityKind::Problem, EntityKind::Idea, EntityKind::Product] {
        assert_eq!(db.count_entities(kind)?, 0);
    }
    Ok(())
}

#[tokio::test]
async fn test_sharing_post_expands_comments_without_analysis() -> Result<()> {
    let temp = NamedTempFile::new()?;
    let calls = Arc::new(AtomicUsize::new(0));

    let feed = FakeFeed {
        posts: HashMap::from([(
            "SideProject".to_string(),
            vec![post("s1", "Share your startup - weekly thread", "Go!")],
        )]),
        comments: HashMap::from([(
            "s1".to_string(),
            vec![
                post("c1", "", "I built a tool that chases unpaid invoices"),
                post("c2", "", "Just here to lurk"),
            ],
        )]),
    };
    let results = HashMap::from([
        (
            "I built a tool that chases unpaid invoices".to_string(),
            usable(40, 70),
        ),
        ("Just here to lurk".to_string(), usable(0, 0)),
    ]);

    let crawler = crawler(
        Database::new(temp.path())?,
        feed,
        results,
        calls.clone(),
        config(&["SideProject"]),
    );

    let stats = crawler.crawl_all().await;
    assert_eq!(stats.meta, 1);
    assert_eq!(stats.stored, 1);
    assert_eq!(stats.empty, 1);

    // Only the two comments reached the oracle
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let items = crawler.database().get_ungrouped_source_items()?;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].source_item_id, "c1");
    assert!(items[0].title.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_expansion_can_be_disabled() -> Result<()> {
    let temp = NamedTempFile::new()?;
    let calls = Arc::new(AtomicUsize::new(0));

    let feed = FakeFeed {
        posts: HashMap::from([(
            "SideProject".to_string(),
            vec![post("s1", "Showcase Saturday", "")],
        )]),
        comments: HashMap::from([("s1".to_string(), vec![post("c1", "", "A comment")])]),
    };

    let crawler = crawler(
        Database::new(temp.path())?,
        feed,
        HashMap::from([("A comment".to_string(), usable(40, 40))]),
        calls.clone(),
        CrawlerConfig {
            expand_meta_comments: false,
            ..config(&["SideProject"])
        },
    );

    let stats = crawler.crawl_all().await;
    assert_eq!(stats.meta, 1);
    assert_eq!(stats.stored, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn test_failures_do_not_abort_siblings() -> Result<()> {
    let temp = NamedTempFile::new()?;
    let calls = Arc::new(AtomicUsize::new(0));

    let feed = FakeFeed {
        posts: HashMap::from([(
            "Entrepreneur".to_string(),
            vec![
                post("x1", "Unknown", "oracle will fail"),
                post("x2", "Known", "works"),
            ],
        )]),
        comments: HashMap::new(),
    };

    let crawler = crawler(
        Database::new(temp.path())?,
        feed,
        HashMap::from([("Known\nworks".to_string(), usable(30, 30))]),
        calls,
        // "missing" has no listing and fails as a whole topic
        config(&["missing", "Entrepreneur"]),
    );

    let stats: CrawlStats = crawler.crawl_all().await;
    assert_eq!(stats.topics, 2);
    assert_eq!(stats.topic_errors, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.stored, 1);

    // The failed item stays eligible for a later run
    assert!(!crawler.database().source_item_exists("reddit", "x1")?);
    Ok(())
}

#[tokio::test]
async fn test_resolver_hook_runs_per_stored_item() -> Result<()> {
    let temp = NamedTempFile::new()?;
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(AtomicUsize::new(0));

    let feed = FakeFeed {
        posts: HashMap::from([(
            "startups".to_string(),
            vec![post("r1", "A", "a"), post("r2", "B", "b")],
        )]),
        comments: HashMap::new(),
    };
    let results = HashMap::from([
        ("A\na".to_string(), usable(10, 10)),
        ("B\nb".to_string(), usable(20, 0)),
    ]);

    let crawler = crawler(
        Database::new(temp.path())?,
        feed,
        results,
        calls,
        config(&["startups"]),
    )
    .with_resolver(Box::new(CountingResolver { seen: seen.clone() }));

    let stats = crawler.crawl_all().await;
    assert_eq!(stats.stored, 2);
    assert_eq!(stats.resolved, 2);
    assert_eq!(seen.load(Ordering::SeqCst), 2);
    Ok(())
}
