//! Grounding report tool.
//!
//! After answering from search results, the model calls `report_grounding`
//! with the identifiers of the chunks it actually used. The tool fetches
//! those chunks back from the index and pushes them to the client as an
//! extension frame, so the UI can show citations; the model itself only
//! sees an empty return value.

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Value, json};
use tracing::debug;

use crate::tools::search::SearchBackend;
use crate::tools::{Tool, ToolError, ToolResult};

/// Identifiers are interpolated into a full-Lucene query, so anything not
/// matching this pattern is dropped rather than escaped.
static KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_=\-]+$").expect("valid regex"));

/// The `report_grounding` tool exposed to the model.
pub struct GroundingTool {
    backend: Arc<SearchBackend>,
}

impl GroundingTool {
    pub fn new(backend: Arc<SearchBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for GroundingTool {
    fn name(&self) -> &str {
        "report_grounding"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "function",
            "name": "report_grounding",
            "description": "Report use of a source from the knowledge base as part of an \
                answer (effectively, cite the source). Sources appear in square brackets \
                before each knowledge base passage. Always use this tool to cite sources \
                when responding with information from the knowledge base.",
            "parameters": {
                "type": "object",
                "properties": {
                    "sources": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "List of source names from last statement actually used, \
                            do not include the ones not used to formulate a response"
                    }
                },
                "required": ["sources"],
                "additionalProperties": false
            }
        })
    }

    async fn invoke(&self, args: Value) -> Result<ToolResult, ToolError> {
        let sources = args
            .get("sources")
            .and_then(Value::as_array)
            .ok_or_else(|| ToolError::InvalidArguments("missing array field 'sources'".into()))?;

        let valid: Vec<&str> = sources
            .iter()
            .filter_map(Value::as_str)
            .filter(|s| KEY_PATTERN.is_match(s))
            .collect();
        debug!(sources = ?valid, "Reporting grounding");
        if valid.is_empty() {
            return Ok(ToolResult::client_json(json!({"sources": []})));
        }

        let config = self.backend.config();
        let body = json!({
            "search": valid.join(" OR "),
            "searchFields": [config.identifier_field],
            "select": format!(
                "{},{},{}",
                config.identifier_field, config.title_field, config.content_field
            ),
            "top": valid.len(),
            "queryType": "full",
        });
        let rows = self.backend.query(body).await?;

        let docs: Vec<Value> = rows
            .iter()
            .map(|row| {
                json!({
                    "chunk_id": row.get(&config.identifier_field).cloned().unwrap_or(Value::Null),
                    "title": row.get(&config.title_field).cloned().unwrap_or(Value::Null),
                    "chunk": row.get(&config.content_field).cloned().unwrap_or(Value::Null),
                })
            })
            .collect();
        Ok(ToolResult::client_json(json!({"sources": docs})))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchConfig;
    use crate::tools::ToolDestination;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_backend(endpoint: String) -> Arc<SearchBackend> {
        Arc::new(SearchBackend::new(SearchConfig {
            endpoint,
            index: "kb-index".into(),
            api_key: None,
            semantic_configuration: "default".into(),
            identifier_field: "chunk_id".into(),
            content_field: "chunk".into(),
            embedding_field: "text_vector".into(),
            title_field: "title".into(),
            use_vector_query: true,
        }))
    }

    #[tokio::test]
    async fn cited_chunks_are_fetched_and_routed_to_client() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/indexes/kb-index/docs/search"))
            .and(body_partial_json(json!({
                "search": "doc1_p2 OR doc3_p1",
                "searchFields": ["chunk_id"],
                "queryType": "full",
                "top": 2,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    {"chunk_id": "doc1_p2", "title": "Benefits", "chunk": "Vacation accrual."},
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tool = GroundingTool::new(test_backend(server.uri()));
        let result = tool
            .invoke(json!({"sources": ["doc1_p2", "doc3_p1"]}))
            .await
            .unwrap();

        assert_eq!(result.destination, ToolDestination::ToClient);
        assert_eq!(
            result.to_text(),
            r#"{"sources":[{"chunk":"Vacation accrual.","chunk_id":"doc1_p2","title":"Benefits"}]}"#
        );
    }

    #[tokio::test]
    async fn malformed_identifiers_are_dropped_without_a_backend_call() {
        let tool = GroundingTool::new(test_backend("http://localhost:1".into()));
        let result = tool
            .invoke(json!({"sources": ["bad id", "also\"bad", 42]}))
            .await
            .unwrap();

        assert_eq!(result.destination, ToolDestination::ToClient);
        assert_eq!(result.to_text(), r#"{"sources":[]}"#);
    }

    #[tokio::test]
    async fn missing_sources_is_invalid_arguments() {
        let tool = GroundingTool::new(test_backend("http://localhost:1".into()));
        let err = tool.invoke(json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
