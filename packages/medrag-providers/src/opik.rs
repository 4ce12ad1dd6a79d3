//! Minimal client for the Opik REST API: trace and span ingestion, feedback scores, and dataset
//! items.

use std::{collections::BTreeMap, time::Duration};

use color_eyre::Result;
use reqwest::{
	Client, StatusCode,
	header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::llm::TokenUsage;

const WORKSPACE_HEADER: &str = "comet-workspace";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
	General,
	Llm,
	Tool,
	Guardrail,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceRecord {
	pub id: Uuid,
	pub project_name: String,
	pub name: String,
	#[serde(with = "crate::time_serde")]
	pub start_time: OffsetDateTime,
	#[serde(with = "crate::time_serde")]
	pub end_time: OffsetDateTime,
	pub input: Value,
	pub output: Value,
	pub metadata: Map<String, Value>,
	pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpanRecord {
	pub id: Uuid,
	pub trace_id: Uuid,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub parent_span_id: Option<Uuid>,
	pub project_name: String,
	pub name: String,
	#[serde(rename = "type")]
	pub kind: SpanKind,
	#[serde(with = "crate::time_serde")]
	pub start_time: OffsetDateTime,
	#[serde(with = "crate::time_serde")]
	pub end_time: OffsetDateTime,
	pub input: Value,
	pub output: Value,
	pub metadata: Map<String, Value>,
	pub tags: Vec<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub usage: Option<SpanUsage>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub model: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub total_estimated_cost: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error_info: Option<ErrorInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SpanUsage {
	pub prompt_tokens: u64,
	pub completion_tokens: u64,
	pub total_tokens: u64,
}
impl From<TokenUsage> for SpanUsage {
	fn from(usage: TokenUsage) -> Self {
		Self {
			prompt_tokens: usage.prompt_tokens,
			completion_tokens: usage.completion_tokens,
			total_tokens: usage.total(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
	pub exception_type: String,
	pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackScore {
	/// Trace or span id the score is attached to.
	pub id: Uuid,
	pub project_name: String,
	pub name: String,
	pub value: f64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub reason: Option<String>,
	pub source: &'static str,
}
impl FeedbackScore {
	pub fn new(id: Uuid, project_name: &str, name: &str, value: f64) -> Self {
		Self {
			id,
			project_name: project_name.to_string(),
			name: name.to_string(),
			value,
			reason: None,
			source: "sdk",
		}
	}

	pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
		self.reason = Some(reason.into());

		self
	}
}

/// One sampled answer with its metric scores, as stored in an Opik dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetItem {
	pub input: String,
	pub output: String,
	pub metrics: BTreeMap<String, f64>,
	#[serde(with = "crate::time_serde")]
	pub timestamp: OffsetDateTime,
	#[serde(default)]
	pub metadata: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct DatasetRef {
	id: Uuid,
}

#[derive(Debug, Deserialize)]
struct DatasetItemPage {
	#[serde(default)]
	content: Vec<DatasetItemEnvelope>,
}

#[derive(Debug, Deserialize)]
struct DatasetItemEnvelope {
	data: Value,
}

pub struct OpikClient {
	client: Client,
	api_base: String,
	headers: HeaderMap,
	project_name: String,
}
impl OpikClient {
	pub fn new(cfg: &medrag_config::Observability) -> Result<Self> {
		let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
		let headers = opik_headers(cfg.api_key.as_deref(), cfg.workspace.as_deref())?;

		Ok(Self {
			client,
			api_base: cfg.api_base.trim_end_matches('/').to_string(),
			headers,
			project_name: cfg.project_name.clone(),
		})
	}

	pub fn project_name(&self) -> &str {
		&self.project_name
	}

	pub async fn create_traces(&self, traces: &[TraceRecord]) -> Result<()> {
		self.send(self.client.post(self.url("/v1/private/traces/batch")), &serde_json::json!({
			"traces": traces,
		}))
		.await
	}

	pub async fn create_spans(&self, spans: &[SpanRecord]) -> Result<()> {
		self.send(self.client.post(self.url("/v1/private/spans/batch")), &serde_json::json!({
			"spans": spans,
		}))
		.await
	}

	pub async fn score_traces(&self, scores: &[FeedbackScore]) -> Result<()> {
		self.send(self.client.put(self.url("/v1/private/traces/feedback-scores")), &serde_json::json!({
			"scores": scores,
		}))
		.await
	}

	pub async fn score_spans(&self, scores: &[FeedbackScore]) -> Result<()> {
		self.send(self.client.put(self.url("/v1/private/spans/feedback-scores")), &serde_json::json!({
			"scores": scores,
		}))
		.await
	}

	/// Creates the dataset if it does not exist yet.
	pub async fn ensure_dataset(&self, name: &str) -> Result<()> {
		let response = self
			.client
			.post(self.url("/v1/private/datasets"))
			.headers(self.headers.clone())
			.json(&serde_json::json!({ "name": name }))
			.send()
			.await?;

		if response.status() == StatusCode::CONFLICT {
			return Ok(());
		}

		response.error_for_status()?;

		Ok(())
	}

	pub async fn insert_dataset_items(&self, dataset: &str, items: &[DatasetItem]) -> Result<()> {
		let mut payload = Vec::with_capacity(items.len());

		for item in items {
			payload.push(serde_json::json!({ "source": "sdk", "data": serde_json::to_value(item)? }));
		}

		self.send(self.client.put(self.url("/v1/private/datasets/items")), &serde_json::json!({
			"dataset_name": dataset,
			"items": payload,
		}))
		.await
	}

	/// Reads up to `limit` items. Items whose data is not a [`DatasetItem`] are skipped.
	pub async fn dataset_items(&self, dataset: &str, limit: usize) -> Result<Vec<DatasetItem>> {
		let dataset: DatasetRef = self
			.client
			.post(self.url("/v1/private/datasets/retrieve"))
			.headers(self.headers.clone())
			.json(&serde_json::json!({ "dataset_name": dataset }))
			.send()
			.await?
			.error_for_status()?
			.json()
			.await?;
		let page: DatasetItemPage = self
			.client
			.get(self.url(&format!("/v1/private/datasets/{}/items", dataset.id)))
			.headers(self.headers.clone())
			.query(&[("page", "1".to_string()), ("size", limit.to_string())])
			.send()
			.await?
			.error_for_status()?
			.json()
			.await?;

		Ok(parse_dataset_items(page))
	}

	fn url(&self, path: &str) -> String {
		format!("{}{path}", self.api_base)
	}

	async fn send(&self, request: reqwest::RequestBuilder, body: &Value) -> Result<()> {
		request.headers(self.headers.clone()).json(body).send().await?.error_for_status()?;

		Ok(())
	}
}

fn parse_dataset_items(page: DatasetItemPage) -> Vec<DatasetItem> {
	page.content
		.into_iter()
		.filter_map(|envelope| serde_json::from_value(envelope.data).ok())
		.collect()
}

/// Opik expects the raw API key in `authorization`, without a scheme.
pub fn opik_headers(api_key: Option<&str>, workspace: Option<&str>) -> Result<HeaderMap> {
	let mut headers = HeaderMap::new();

	if let Some(key) = api_key {
		headers.insert(AUTHORIZATION, HeaderValue::from_str(key)?);
	}
	if let Some(workspace) = workspace {
		headers.insert(HeaderName::from_static(WORKSPACE_HEADER), HeaderValue::from_str(workspace)?);
	}

	Ok(headers)
}

#[cfg(test)]
mod tests {
	use time::macros::datetime;

	use super::*;

	#[test]
	fn span_serializes_with_opik_field_names() {
		let span = SpanRecord {
			id: Uuid::nil(),
			trace_id: Uuid::nil(),
			parent_span_id: None,
			project_name: "medrag".to_string(),
			name: "answer_question".to_string(),
			kind: SpanKind::Llm,
			start_time: datetime!(2025-03-01 12:00:00 UTC),
			end_time: datetime!(2025-03-01 12:00:01 UTC),
			input: Value::Null,
			output: Value::Null,
			metadata: Map::new(),
			tags: Vec::new(),
			usage: Some(TokenUsage { prompt_tokens: 10, completion_tokens: 2 }.into()),
			model: Some("m".to_string()),
			total_estimated_cost: Some(0.25),
			error_info: None,
		};
		let json = serde_json::to_value(&span).expect("serialize failed");

		assert_eq!(json["type"], "llm");
		assert_eq!(json["start_time"], "2025-03-01T12:00:00Z");
		assert_eq!(json["usage"]["total_tokens"], 12);
		assert!(json.get("parent_span_id").is_none());
		assert!(json.get("error_info").is_none());
	}

	#[test]
	fn dataset_pages_keep_well_formed_items() {
		let page: DatasetItemPage = serde_json::from_value(serde_json::json!({
			"content": [
				{ "id": "a", "data": {
					"input": "How many patients?",
					"output": "One.",
					"metrics": { "usefulness": 0.9 },
					"timestamp": "2025-03-01T12:00:00Z"
				} },
				{ "id": "b", "data": { "input": "legacy row" } }
			]
		}))
		.expect("page decode failed");
		let items = parse_dataset_items(page);

		assert_eq!(items.len(), 1);
		assert_eq!(items[0].metrics.get("usefulness"), Some(&0.9));
		assert_eq!(items[0].timestamp, datetime!(2025-03-01 12:00:00 UTC));
		assert!(items[0].metadata.is_empty());
	}

	#[test]
	fn headers_use_raw_key_and_workspace() {
		let headers = opik_headers(Some("key-1"), Some("clinic")).expect("headers failed");

		assert_eq!(headers.get(AUTHORIZATION).expect("missing auth"), "key-1");
		assert_eq!(headers.get("Comet-Workspace").expect("missing workspace"), "clinic");
		assert!(opik_headers(None, None).expect("headers failed").is_empty());
	}
}
