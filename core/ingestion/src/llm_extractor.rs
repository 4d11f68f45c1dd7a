use anyhow::{Context, Result};
use async_trait::async_trait;
use idea_graph_indexing::OracleError;
use idea_graph_schemas::ExtractionResult;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

const SERVICE: &str = "Mistral";

const CATEGORIES: &str = "technology, healthcare, finance, education, e-commerce, productivity, \
communication, entertainment, travel, food-beverage, fitness, real-estate, transportation, \
automotive, fashion, beauty, home-garden, pets, sports, gaming, music, art-design, photography, \
legal, hr-recruiting, marketing, sales, customer-service, analytics, security, sustainability, \
social-media, ai-ml, iot, blockchain, saas, mobile, web, hardware, infrastructure";

/// Configuration for the analysis oracle
#[derive(Debug, Clone)]
pub struct LLMConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.mistral.ai".to_string(),
            model: "mistral-small-latest".to_string(),
            timeout_secs: 60,
        }
    }
}

impl LLMConfig {
    /// Create config from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let api_key = std::env::var("MISTRAL_API_KEY")
            .context("MISTRAL_API_KEY required for the analysis oracle")?;

        Ok(Self {
            api_key,
            base_url: std::env::var("MISTRAL_BASE_URL").unwrap_or(defaults.base_url),
            model: std::env::var("MISTRAL_MODEL").unwrap_or(defaults.model),
            timeout_secs: std::env::var("MISTRAL_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.timeout_secs),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            anyhow::bail!("analysis oracle api key is required");
        }
        if self.model.trim().is_empty() {
            anyhow::bail!("analysis oracle model is required");
        }
        Ok(())
    }
}

/// Text → structured extraction capability
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn extract(&self, text: &str) -> Result<ExtractionResult>;
}

/// OpenAI-compatible chat completion client with a strict JSON schema
pub struct AnalysisClient {
    config: LLMConfig,
    client: Client,
}

impl AnalysisClient {
    pub fn new(config: LLMConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build analysis HTTP client")?;

        Ok(Self { config, client })
    }

    fn build_request(&self, text: &str) -> Value {
        json!({
            "model": self.config.model,
            "messages": [
                { "role": "user", "content": build_extraction_prompt(text) }
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "entity_analysis",
                    "schema": extraction_schema(),
                    "strict": true,
                }
            }
        })
    }
}

#[async_trait]
impl Analyzer for AnalysisClient {
    async fn extract(&self, text: &str) -> Result<ExtractionResult> {
        let url = format!("{}/v1/chat/completions", self.config.base_url);

        debug!("Calling {} at {}", SERVICE, url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&self.build_request(text))
            .send()
            .await
            .context("Failed to call Mistral API")?;

        if response.status() != reqwest::StatusCode::OK {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Status {
                service: SERVICE,
                status,
                body,
            }
            .into());
        }

        let body = response
            .text()
            .await
            .context("Failed to read Mistral response")?;

        parse_chat_response(&body)
    }
}

fn build_extraction_prompt(text: &str) -> String {
    format!(
        r#"You will check a reddit post for data to display on a public startup ideas database: pain points, ideas, existing products and the links between them.

Analyze the text and extract three kinds of entities. Return a single JSON object with the fields "problem", "idea", "products" and "is_meta".

- Problem: one user pain point or unmet need that could be the starting point of a business. Skip random problems that would not interest a startup founder.
- Idea: one potential solution to the problem.
- Products: existing implementations of the idea (startups, projects).

The output must be suitable for a public database. Do not mention brand names, company names or personal details unless it is a product name.

For the problem:
- title: a concise summary of the core problem
- description: who has it and what it costs them, as markdown with a heading
- pain_points: 2-5 specific user pain points
- score: real world, profitable potential, 0-100
- categories: categories of the problem

For the idea:
- title: a concise summary of the solution
- description: how it works and its potential, as markdown with a heading
- features: 2-5 key features
- score: real world, profitable potential, 0-100
- categories: categories of the idea

For each product:
- name, description (markdown with a heading), url if available, categories

If the text is a meta-post (for example "share your project"), set "is_meta" to true and leave everything else empty.

If no problem or idea is found, its score must be 0. If no product is found, "products" must be an empty array.
Categories must be 2-5 items from this list: [{categories}]

Post:
{text}"#,
        categories = CATEGORIES,
        text = text
    )
}

fn extraction_schema() -> Value {
    let strings = json!({ "type": "array", "items": { "type": "string" } });

    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["problem", "idea", "products", "is_meta"],
        "properties": {
            "problem": {
                "type": "object",
                "additionalProperties": false,
                "required": ["title", "description", "pain_points", "score", "categories"],
                "properties": {
                    "title": { "type": "string" },
                    "description": { "type": "string" },
                    "pain_points": strings,
                    "score": { "type": "integer" },
                    "categories": strings,
                }
            },
            "idea": {
                "type": "object",
                "additionalProperties": false,
                "required": ["title", "description", "features", "score", "categories"],
                "properties": {
                    "title": { "type": "string" },
                    "description": { "type": "string" },
                    "features": strings,
                    "score": { "type": "integer" },
                    "categories": strings,
                }
            },
            "products": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["name", "description", "url", "categories"],
                    "properties": {
                        "name": { "type": "string" },
                        "description": { "type": "string" },
                        "url": { "type": "string" },
                        "categories": strings,
                    }
                }
            },
            "is_meta": { "type": "boolean" },
        }
    })
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

/// Unwrap the chat envelope and validate the structured content
fn parse_chat_response(body: &str) -> Result<ExtractionResult> {
    let chat: ChatResponse = serde_json::from_str(body).map_err(|e| OracleError::Malformed {
        service: SERVICE,
        reason: format!("invalid chat envelope: {}", e),
    })?;

    let content = chat
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
        .ok_or_else(|| OracleError::Malformed {
            service: SERVICE,
            reason: "no choices in response".to_string(),
        })?;

    serde_json::from_str(&content).map_err(|e| {
        warn!("Unparseable analysis content: {}", content);
        anyhow::Error::from(OracleError::Malformed {
            service: SERVICE,
            reason: e.to_string(),
        })
    })
}
