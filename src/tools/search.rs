//! Knowledge base search tool.
//!
//! Runs a hybrid semantic (and optionally vector) query against an Azure AI
//! Search index and hands the model the top chunks as plain text, each
//! prefixed with its identifier so the model can cite it later through the
//! grounding tool.

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::config::SearchConfig;
use crate::tools::{Tool, ToolError, ToolResult};

/// REST API version of the search service.
const SEARCH_API_VERSION: &str = "2024-07-01";

/// Chunks returned per query.
const SEARCH_TOP: usize = 5;

/// Nearest-neighbor count for the vector leg of a hybrid query.
const VECTOR_K: usize = 50;

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));

/// Thin client for the search index, shared by the search and grounding
/// tools.
pub struct SearchBackend {
    client: reqwest::Client,
    config: SearchConfig,
}

impl SearchBackend {
    pub fn new(config: SearchConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// POSTs a query document to the index and returns the result rows.
    pub async fn query(&self, body: Value) -> Result<Vec<Map<String, Value>>, ToolError> {
        let url = format!(
            "{}/indexes/{}/docs/search?api-version={}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.index,
            SEARCH_API_VERSION
        );

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.header("api-key", key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ToolError::Backend(format!(
                "search service returned {status}: {detail}"
            )));
        }

        let payload: Value = response.json().await?;
        let rows = payload
            .get("value")
            .and_then(Value::as_array)
            .ok_or_else(|| ToolError::Backend("search response has no result array".into()))?;
        Ok(rows
            .iter()
            .filter_map(Value::as_object)
            .cloned()
            .collect())
    }
}

/// The `search` tool exposed to the model.
pub struct SearchTool {
    backend: Arc<SearchBackend>,
}

impl SearchTool {
    pub fn new(backend: Arc<SearchBackend>) -> Self {
        Self { backend }
    }

    fn query_body(&self, query: &str) -> Value {
        let config = self.backend.config();
        let mut body = json!({
            "search": query,
            "queryType": "semantic",
            "semanticConfiguration": config.semantic_configuration,
            "top": SEARCH_TOP,
            "select": format!("{},{}", config.identifier_field, config.content_field),
        });
        if config.use_vector_query {
            body["vectorQueries"] = json!([{
                "kind": "text",
                "text": query,
                "k": VECTOR_K,
                "fields": config.embedding_field,
            }]);
        }
        body
    }
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "function",
            "name": "search",
            "description": "Search the knowledge base. The knowledge base is in English, \
                translate to and from English if needed. Results are formatted as a source \
                name first in square brackets, followed by the text content, and a line with \
                '-----' at the end of each result.",
            "parameters": {
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Search query"
                    }
                },
                "required": ["query"],
                "additionalProperties": false
            }
        })
    }

    async fn invoke(&self, args: Value) -> Result<ToolResult, ToolError> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments("missing string field 'query'".into()))?;
        debug!(query, "Searching knowledge base");

        let rows = self.backend.query(self.query_body(query)).await?;

        let config = self.backend.config();
        let mut result = String::new();
        for row in &rows {
            let id = row
                .get(&config.identifier_field)
                .and_then(Value::as_str)
                .unwrap_or_default();
            let content = row
                .get(&config.content_field)
                .and_then(Value::as_str)
                .unwrap_or_default();
            let content = HTML_TAG.replace_all(content, " ");
            result.push_str(&format!("[{id}]: {content}\n-----\n"));
        }
        Ok(ToolResult::upstream_text(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(endpoint: String, use_vector_query: bool) -> SearchConfig {
        SearchConfig {
            endpoint,
            index: "kb-index".into(),
            api_key: Some("search-key".into()),
            semantic_configuration: "default".into(),
            identifier_field: "chunk_id".into(),
            content_field: "chunk".into(),
            embedding_field: "text_vector".into(),
            title_field: "title".into(),
            use_vector_query,
        }
    }

    #[tokio::test]
    async fn formats_rows_with_identifier_and_separator() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/indexes/kb-index/docs/search"))
            .and(query_param("api-version", SEARCH_API_VERSION))
            .and(header("api-key", "search-key"))
            .and(body_partial_json(json!({
                "search": "vacation policy",
                "queryType": "semantic",
                "top": 5,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    {"chunk_id": "doc1_p2", "chunk": "Employees accrue <b>20 days</b>."},
                    {"chunk_id": "doc3_p1", "chunk": "Carry-over is capped."},
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let backend = Arc::new(SearchBackend::new(test_config(server.uri(), true)));
        let tool = SearchTool::new(backend);
        let result = tool
            .invoke(json!({"query": "vacation policy"}))
            .await
            .unwrap();

        assert_eq!(
            result.to_text(),
            "[doc1_p2]: Employees accrue  20 days .\n-----\n[doc3_p1]: Carry-over is capped.\n-----\n"
        );
    }

    #[tokio::test]
    async fn vector_leg_included_only_when_enabled() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/indexes/kb-index/docs/search"))
            .and(body_partial_json(json!({
                "vectorQueries": [{"kind": "text", "fields": "text_vector"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
            .expect(1)
            .mount(&server)
            .await;

        let backend = Arc::new(SearchBackend::new(test_config(server.uri(), true)));
        SearchTool::new(backend)
            .invoke(json!({"query": "q"}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn missing_query_is_invalid_arguments() {
        let backend = Arc::new(SearchBackend::new(test_config(
            "http://localhost:1".into(),
            false,
        )));
        let err = SearchTool::new(backend)
            .invoke(json!({"q": "typo"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn backend_error_status_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let backend = Arc::new(SearchBackend::new(test_config(server.uri(), false)));
        let err = SearchTool::new(backend)
            .invoke(json!({"query": "q"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Backend(_)));
    }
}
