//! Web search tool
//!
//! Uses the Brave Search API when a subscription key is configured and the
//! DuckDuckGo instant answer API otherwise (or when Brave answers non-2xx).
//! Every call first takes a token from the shared [`RateLimiter`].

use super::tools::{decode_args, Tool, ToolContext, ToolError};
use crate::ai::http_client;
use crate::rate_limit::RateLimiter;
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const BRAVE_SEARCH_URL: &str = "https://api.search.brave.com/res/v1/web/search";
pub const DUCKDUCKGO_URL: &str = "https://api.duckduckgo.com/";
const DUCKDUCKGO_SEARCH_PAGE: &str = "https://duckduckgo.com/";

const MAX_QUERY_LENGTH: usize = 1000;
const DEFAULT_RESULT_COUNT: i64 = 5;
const MAX_RESULT_COUNT: i64 = 20;

/// Where and how web searches are sent
#[derive(Debug, Clone)]
pub struct WebSearchConfig {
    /// Brave subscription token; `None` goes straight to DuckDuckGo
    pub brave_api_key: Option<String>,
    pub brave_url: String,
    pub duckduckgo_url: String,
    pub timeout: Duration,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            brave_api_key: None,
            brave_url: BRAVE_SEARCH_URL.to_string(),
            duckduckgo_url: DUCKDUCKGO_URL.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SearchResult {
    title: String,
    url: String,
    description: String,
}

#[derive(Debug, Deserialize, Default)]
struct BraveResponse {
    #[serde(default)]
    web: BraveWeb,
}

#[derive(Debug, Deserialize, Default)]
struct BraveWeb {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Debug, Deserialize)]
struct BraveResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
struct DuckDuckGoResponse {
    #[serde(default)]
    abstract_text: String,
    #[serde(default, rename = "AbstractURL")]
    abstract_url: String,
    #[serde(default)]
    heading: String,
    #[serde(default)]
    related_topics: Vec<RelatedTopic>,
}

/// Topic groups (`{Name, Topics}`) carry no text and are skipped
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
struct RelatedTopic {
    #[serde(default, rename = "FirstURL")]
    first_url: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    count: Option<f64>,
}

pub struct WebSearchTool {
    client: Client,
    limiter: Arc<RateLimiter>,
    config: WebSearchConfig,
}

impl WebSearchTool {
    pub fn new(limiter: Arc<RateLimiter>, config: WebSearchConfig) -> Result<Self, ToolError> {
        let client = http_client::tool_client(config.timeout)
            .map_err(|e| ToolError::Http(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            limiter,
            config,
        })
    }

    async fn search(&self, query: &str, count: usize) -> Result<Vec<SearchResult>, ToolError> {
        if let Some(key) = &self.config.brave_api_key {
            match self.search_brave(key, query, count).await? {
                Some(results) => return Ok(results),
                None => debug!("Brave search unavailable, falling back to DuckDuckGo"),
            }
        }
        self.search_duckduckgo(query, count).await
    }

    /// `Ok(None)` when Brave answered with a non-success status
    async fn search_brave(
        &self,
        key: &str,
        query: &str,
        count: usize,
    ) -> Result<Option<Vec<SearchResult>>, ToolError> {
        let count_text = count.to_string();
        let response = self
            .client
            .get(&self.config.brave_url)
            .query(&[("q", query), ("count", count_text.as_str())])
            .header("Accept", "application/json")
            .header("X-Subscription-Token", key)
            .send()
            .await
            .map_err(|e| ToolError::Http(format!("web search failed: {}", e)))?;

        if !response.status().is_success() {
            warn!(status = response.status().as_u16(), "Brave search returned an error status");
            return Ok(None);
        }

        let body: BraveResponse = response
            .json()
            .await
            .map_err(|e| ToolError::Http(format!("web search failed: {}", e)))?;

        Ok(Some(
            body.web
                .results
                .into_iter()
                .take(count)
                .map(|r| SearchResult {
                    title: r.title,
                    url: r.url,
                    description: r.description,
                })
                .collect(),
        ))
    }

    async fn search_duckduckgo(
        &self,
        query: &str,
        count: usize,
    ) -> Result<Vec<SearchResult>, ToolError> {
        let response = self
            .client
            .get(&self.config.duckduckgo_url)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await
            .map_err(|e| ToolError::Http(format!("web search failed: {}", e)))?;

        // The instant answer API sometimes labels JSON as javascript
        let text = response
            .text()
            .await
            .map_err(|e| ToolError::Http(format!("web search failed: {}", e)))?;
        let body: DuckDuckGoResponse = serde_json::from_str(&text)
            .map_err(|e| ToolError::Http(format!("web search failed: {}", e)))?;

        Ok(duckduckgo_results(body, query, count))
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for current information"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query string"
                },
                "count": {
                    "type": "integer",
                    "description": "Number of search results to return (default: 5, max: 20)",
                    "minimum": 1,
                    "maximum": 20
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        if !self.limiter.allow() {
            return Err(ToolError::RateLimited(format!(
                "rate limit exceeded: maximum {} web searches per minute allowed",
                searches_per_minute(&self.limiter)
            )));
        }

        let args: SearchArgs = decode_args(args)?;
        let query = args.query.trim();
        if query.is_empty() {
            return Err(ToolError::InvalidArguments(
                "search query cannot be empty".to_string(),
            ));
        }
        if query.chars().count() > MAX_QUERY_LENGTH {
            return Err(ToolError::InvalidArguments(format!(
                "search query too long (max {} characters)",
                MAX_QUERY_LENGTH
            )));
        }

        let count = args
            .count
            .map(|c| c as i64)
            .unwrap_or(DEFAULT_RESULT_COUNT)
            .clamp(1, MAX_RESULT_COUNT) as usize;

        ctx.check_cancelled()?;
        debug!(query, count, "Running web search");

        let results = self.search(query, count).await?;
        Ok(format_results(query, &results))
    }
}

fn searches_per_minute(limiter: &RateLimiter) -> u64 {
    let interval = limiter.refill_interval().as_millis().max(1);
    (60_000 / interval) as u64
}

fn duckduckgo_results(body: DuckDuckGoResponse, query: &str, count: usize) -> Vec<SearchResult> {
    let mut results = Vec::new();

    if !body.abstract_text.is_empty() {
        results.push(SearchResult {
            title: body.heading,
            url: body.abstract_url,
            description: body.abstract_text,
        });
    }

    for topic in body.related_topics {
        if results.len() >= count {
            break;
        }
        if topic.text.is_empty() {
            continue;
        }
        results.push(SearchResult {
            title: extract_title(&topic.text),
            url: topic.first_url,
            description: topic.text,
        });
    }

    if results.is_empty() {
        results.push(SearchResult {
            title: "Search Results".to_string(),
            url: duckduckgo_search_url(query),
            description: format!(
                "No instant results found for '{}'. Try searching directly on the web.",
                query
            ),
        });
    }

    results
}

/// Text before " - ", or the first 57 characters
fn extract_title(text: &str) -> String {
    if let Some((title, _)) = text.split_once(" - ") {
        return title.to_string();
    }
    if text.chars().count() > 60 {
        let head: String = text.chars().take(57).collect();
        return format!("{}...", head);
    }
    text.to_string()
}

/// Web search page for `query`, for when the instant answer API has nothing
fn duckduckgo_search_url(query: &str) -> String {
    Url::parse_with_params(DUCKDUCKGO_SEARCH_PAGE, &[("q", query)])
        .map(String::from)
        .unwrap_or_else(|_| DUCKDUCKGO_SEARCH_PAGE.to_string())
}

fn format_results(query: &str, results: &[SearchResult]) -> String {
    let mut out = format!("Web search results for: {}\n\n", query);

    if results.is_empty() {
        out.push_str("No results found. Try a different search query.\n");
        return out;
    }

    for (i, result) in results.iter().enumerate() {
        let _ = writeln!(out, "{}. {}", i + 1, result.title);
        let _ = writeln!(out, "   URL: {}", result.url);
        let _ = writeln!(out, "   {}\n", result.description);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn tool(limiter: RateLimiter) -> WebSearchTool {
        WebSearchTool::new(Arc::new(limiter), WebSearchConfig::default()).unwrap()
    }

    fn ctx() -> ToolContext {
        ToolContext::new(CancellationToken::new())
    }

    #[test]
    fn test_extract_title() {
        assert_eq!(extract_title("Rust - A systems language"), "Rust");
        assert_eq!(extract_title("short"), "short");
        let long = "x".repeat(80);
        assert_eq!(extract_title(&long), format!("{}...", "x".repeat(57)));
    }

    #[test]
    fn test_format_results() {
        let out = format_results(
            "rust",
            &[SearchResult {
                title: "Rust".into(),
                url: "https://www.rust-lang.org".into(),
                description: "A language".into(),
            }],
        );
        assert_eq!(
            out,
            "Web search results for: rust\n\n1. Rust\n   URL: https://www.rust-lang.org\n   A language\n\n"
        );
        assert!(format_results("q", &[]).contains("No results found"));
    }

    #[test]
    fn test_duckduckgo_results() {
        let body: DuckDuckGoResponse = serde_json::from_value(json!({
            "AbstractText": "Rust is a language.",
            "AbstractURL": "https://en.wikipedia.org/wiki/Rust",
            "Heading": "Rust",
            "RelatedTopics": [
                { "FirstURL": "https://a.example", "Text": "Cargo - The package manager" },
                { "Name": "Group", "Topics": [] },
                { "FirstURL": "https://b.example", "Text": "Crates" },
                { "FirstURL": "https://c.example", "Text": "Clippy" }
            ]
        }))
        .unwrap();

        let results = duckduckgo_results(body, "rust", 3);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].title, "Rust");
        assert_eq!(results[1].title, "Cargo");
        assert_eq!(results[2].url, "https://b.example");
    }

    #[test]
    fn test_duckduckgo_placeholder() {
        let results = duckduckgo_results(DuckDuckGoResponse::default(), "a b&c", 5);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, "https://duckduckgo.com/?q=a+b%26c");
    }

    #[test]
    fn test_duckduckgo_search_url_encoding() {
        assert_eq!(
            duckduckgo_search_url("café?#1"),
            "https://duckduckgo.com/?q=caf%C3%A9%3F%231"
        );
    }

    #[tokio::test]
    async fn test_rate_limited_before_validation() {
        let search = tool(RateLimiter::new(1, Duration::from_secs(12)));

        // Empty query still spends the token
        let err = search.execute(json!({"query": "  "}), &ctx()).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));

        let err = search.execute(json!({"query": "rust"}), &ctx()).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "rate limit exceeded: maximum 5 web searches per minute allowed"
        );
    }

    #[tokio::test]
    async fn test_query_too_long() {
        let search = tool(RateLimiter::per_minute(5));
        let err = search
            .execute(json!({"query": "q".repeat(1001)}), &ctx())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid arguments: search query too long (max 1000 characters)"
        );
    }
}
