//! The web tool: `fetch` (HTTP GET with a byte cap) and `search`
//! (external search API, top-N results).

use serde::Deserialize;
use serde_json::{json, Value};

use drost_domain::config::WebToolConfig;

use crate::{Tool, ToolContext, ToolError, ToolResult};

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum WebRequest {
    Fetch {
        url: String,
        #[serde(default, rename = "maxBytes")]
        max_bytes: Option<usize>,
    },
    Search {
        query: String,
        #[serde(default)]
        limit: Option<usize>,
    },
}

pub struct WebTool {
    cfg: WebToolConfig,
    client: reqwest::Client,
}

impl WebTool {
    pub fn new(cfg: WebToolConfig) -> Self {
        Self {
            cfg,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl Tool for WebTool {
    fn name(&self) -> &str {
        "web"
    }

    fn description(&self) -> &str {
        "Fetch a URL (byte-capped) or query the configured search API"
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "required": ["op"],
            "properties": {
                "op": { "type": "string", "enum": ["fetch", "search"] },
                "url": { "type": "string" },
                "maxBytes": { "type": "integer" },
                "query": { "type": "string" },
                "limit": { "type": "integer" }
            }
        }))
    }

    async fn execute(&self, input: Value, _ctx: &ToolContext) -> ToolResult {
        let req: WebRequest = serde_json::from_value(input)
            .map_err(|e| ToolError::execution(format!("bad web input: {e}")))?;

        match req {
            WebRequest::Fetch { url, max_bytes } => {
                let cap = max_bytes
                    .unwrap_or(self.cfg.fetch_max_bytes)
                    .min(self.cfg.fetch_max_bytes);
                self.fetch(&url, cap).await
            }
            WebRequest::Search { query, limit } => {
                let limit = limit
                    .unwrap_or(self.cfg.search_results)
                    .min(self.cfg.search_results.max(1));
                self.search(&query, limit).await
            }
        }
    }
}

impl WebTool {
    async fn fetch(&self, url: &str, cap: usize) -> ToolResult {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ToolError::execution(format!("fetch '{url}' failed: {e}")))?;
        let status = response.status().as_u16();

        let mut body: Vec<u8> = Vec::new();
        let mut truncated = false;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ToolError::execution(format!("read body failed: {e}")))?
        {
            let remaining = cap.saturating_sub(body.len());
            if chunk.len() > remaining {
                body.extend_from_slice(&chunk[..remaining]);
                truncated = true;
                break;
            }
            body.extend_from_slice(&chunk);
        }

        Ok(json!({
            "url": url,
            "status": status,
            "body": String::from_utf8_lossy(&body),
            "bytes": body.len(),
            "truncated": truncated,
        }))
    }

    async fn search(&self, query: &str, limit: usize) -> ToolResult {
        let Some(base) = &self.cfg.search_url else {
            return Err(ToolError::execution(
                "web.search is not configured (tools.web.search_url)",
            ));
        };

        let response = self
            .client
            .get(base)
            .query(&[("q", query)])
            .send()
            .await
            .map_err(|e| ToolError::execution(format!("search failed: {e}")))?;
        let payload: Value = response
            .json()
            .await
            .map_err(|e| ToolError::execution(format!("search response not JSON: {e}")))?;

        // Accept either a bare array or `{results: [...]}`.
        let results = payload
            .get("results")
            .and_then(Value::as_array)
            .or_else(|| payload.as_array())
            .cloned()
            .unwrap_or_default();

        Ok(json!({
            "query": query,
            "results": results.into_iter().take(limit).collect::<Vec<_>>(),
        }))
    }
}
