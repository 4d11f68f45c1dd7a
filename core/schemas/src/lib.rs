use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ULID and ID Types
// ============================================================================

/// Integer row id of a source item. Doubles as the key of its vector row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceItemId(pub i64);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProblemId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdeaId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductId(pub String);

impl fmt::Display for SourceItemId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ProblemId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for IdeaId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Source Item Schema
// ============================================================================

/// One raw document pulled from a feed.
///
/// Everything except the three back-links is immutable once stored. Each
/// back-link goes from `None` to `Some` at most once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceItem {
    pub id: SourceItemId,
    pub source: String,
    pub source_item_id: String,
    pub title: String,
    pub content: String,
    pub author: String,
    pub url: String,
    pub score: i64,
    pub analysis_result: String, // JSON of the ExtractionResult
    pub categories: String,      // comma separated
    pub created_at: String,        // RFC3339
    pub source_created_at: String, // RFC3339
    pub problem_id: Option<ProblemId>,
    pub idea_id: Option<IdeaId>,
    pub product_id: Option<ProductId>,
}

impl SourceItem {
    /// True while none of the canonical back-links are set.
    pub fn is_ungrouped(&self) -> bool {
        self.problem_id.is_none() && self.idea_id.is_none() && self.product_id.is_none()
    }
}

/// A source item that has not been written yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSourceItem {
    pub source: String,
    pub source_item_id: String,
    pub title: String,
    pub content: String,
    pub author: String,
    pub url: String,
    pub score: i64,
    pub analysis_result: String,
    pub categories: String,
    pub source_created_at: String,
}

/// Text handed to the oracles: title and body on separate lines.
pub fn item_text(title: &str, content: &str) -> String {
    if title.trim().is_empty() {
        content.to_string()
    } else {
        format!("{}\n{}", title, content)
    }
}

// ============================================================================
// Canonical Entities
// ============================================================================

/// An identified user problem or unmet need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    pub id: ProblemId,
    pub slug: String,
    pub title: String,
    pub description: String,
    pub pain_points: Vec<String>,
    pub categories: Vec<String>,
    pub score: i64,
    pub created_at: String, // RFC3339
    pub updated_at: String, // RFC3339
}

/// A potential solution to a problem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Idea {
    pub id: IdeaId,
    pub slug: String,
    pub title: String,
    pub description: String,
    pub features: Vec<String>,
    pub categories: Vec<String>,
    /// Source URLs folded into this idea by clustering.
    pub references: Vec<String>,
    pub score: i64,
    pub created_at: String, // RFC3339
    pub updated_at: String, // RFC3339
}

/// An existing implementation of an idea.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub slug: String,
    pub name: String,
    pub description: String,
    pub url: String,
    pub categories: Vec<String>,
    pub score: i64,
    pub created_at: String, // RFC3339
    pub updated_at: String, // RFC3339
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    #[serde(rename = "problem")]
    Problem,
    #[serde(rename = "idea")]
    Idea,
    #[serde(rename = "product")]
    Product,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Problem => "problem",
            EntityKind::Idea => "idea",
            EntityKind::Product => "product",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Many-to-many associations between canonical entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkKind {
    ProblemIdea,
    ProblemProduct,
    IdeaProduct,
}

// ============================================================================
// Extraction Schema (structured oracle output)
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProblemCandidate {
    pub title: String,
    pub description: String,
    pub pain_points: Vec<String>,
    pub score: i64,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdeaCandidate {
    pub title: String,
    pub description: String,
    pub features: Vec<String>,
    pub score: i64,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductCandidate {
    pub name: String,
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub categories: Vec<String>,
}

/// Structured output of the analysis oracle for one post or comment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub is_meta: bool,
    pub problem: ProblemCandidate,
    pub idea: IdeaCandidate,
    pub products: Vec<ProductCandidate>,
}

impl ExtractionResult {
    /// No scored candidate and no product: nothing worth resolving.
    pub fn is_empty(&self) -> bool {
        self.problem.score == 0 && self.idea.score == 0 && self.products.is_empty()
    }

    /// Problem categories followed by idea categories, first occurrence wins.
    pub fn categories(&self) -> Vec<String> {
        let mut merged: Vec<String> = Vec::new();
        for category in self.problem.categories.iter().chain(&self.idea.categories) {
            let category = category.trim();
            if !category.is_empty() && !merged.iter().any(|c| c == category) {
                merged.push(category.to_string());
            }
        }
        merged
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Split a comma separated list, trimming whitespace and dropping blanks.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn join_list(items: &[String]) -> String {
    items.join(", ")
}

pub fn generate_problem_id() -> ProblemId {
    ProblemId(format!("prob_{}", ulid::Ulid::new()))
}

pub fn generate_idea_id() -> IdeaId {
    IdeaId(format!("idea_{}", ulid::Ulid::new()))
}

pub fn generate_product_id() -> ProductId {
    ProductId(format!("prod_{}", ulid::Ulid::new()))
}
