//! Web search skill against the Brave Search API.

use crate::security::ActionClass;
use crate::skills::Skill;
use anyhow::{anyhow, Context as _};
use futures::FutureExt as _;
use std::sync::Arc;

const SEARCH_ENDPOINT: &str = "https://api.search.brave.com/res/v1/web/search";
const MAX_RESULTS: usize = 5;

pub fn web_search(api_key: Option<String>) -> Skill {
    let http = reqwest::Client::new();
    Skill::new(
        "web_search",
        "Search the web and return the top results with titles and URLs.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                }
            },
            "required": ["query"],
        }),
        ActionClass::Read,
        Arc::new(move |_ctx, args| {
            let http = http.clone();
            let api_key = api_key.clone();
            async move {
                let query = args
                    .get("query")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| anyhow!("missing 'query' argument"))?;
                let api_key = api_key
                    .ok_or_else(|| anyhow!("web search is not configured (no API key)"))?;

                let response = http
                    .get(SEARCH_ENDPOINT)
                    .query(&[("q", query), ("count", "5")])
                    .header("X-Subscription-Token", api_key)
                    .header("Accept", "application/json")
                    .send()
                    .await
                    .context("search request failed")?;

                let status = response.status();
                if !status.is_success() {
                    return Err(anyhow!("search endpoint returned {status}"));
                }

                let body: serde_json::Value = response
                    .json()
                    .await
                    .context("search response was not JSON")?;
                Ok(render_results(&body, query))
            }
            .boxed()
        }),
    )
}

fn render_results(body: &serde_json::Value, query: &str) -> String {
    let results = body
        .pointer("/web/results")
        .and_then(|v| v.as_array())
        .map(|v| v.as_slice())
        .unwrap_or_default();

    if results.is_empty() {
        return format!("No results for '{query}'.");
    }

    let mut out = format!("Top results for '{query}':\n");
    for result in results.iter().take(MAX_RESULTS) {
        let title = result.get("title").and_then(|v| v.as_str()).unwrap_or("(untitled)");
        let url = result.get("url").and_then(|v| v.as_str()).unwrap_or_default();
        out.push_str(&format!("- {title}\n  {url}\n"));
        if let Some(description) = result.get("description").and_then(|v| v.as_str()) {
            out.push_str(&format!("  {description}\n"));
        }
    }
    out
}
