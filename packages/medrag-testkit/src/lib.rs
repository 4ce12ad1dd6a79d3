//! In-memory stores, scripted providers, and recording telemetry for pipeline tests.

use std::{
	collections::HashMap,
	sync::{
		Arc, Mutex,
		atomic::{AtomicUsize, Ordering},
	},
};

use color_eyre::eyre;
use serde_json::{Map, Value};

use medrag_config::{
	Config, EmailGuardrail, EmbeddingProviderConfig, GraphStore as GraphStoreConfig, Guardrails,
	LlmProviderConfig, NoteIndex as NoteIndexConfig, Observability, Providers, Retrieval, Service,
	Storage,
};
use medrag_domain::{
	context::QueryRow,
	schema::{EdgeType, GraphSchema, NodeType, Property},
};
use medrag_providers::{
	llm::{ChatCompletion, TokenUsage},
	opik::{DatasetItem, FeedbackScore, SpanRecord, TraceRecord},
};
use medrag_service::{
	BoxFuture, EmbeddingProvider, GraphStore, LlmProvider, NoteSearch, Telemetry,
	functions::{LlmCall, LlmFunction},
	telemetry::ScoreTarget,
};
use medrag_storage::{
	Error as StorageError,
	notes::{NoteHit, SearchMode},
};

pub const TEST_VECTOR_DIM: u32 = 4;

type Responder = Box<dyn Fn(&LlmCall) -> Value + Send + Sync>;

/// A config with tracking on, metrics sampling off, and WARN email masking.
pub fn test_config() -> Config {
	Config {
		service: Service { http_bind: "127.0.0.1:0".to_string(), log_level: "info".to_string() },
		storage: Storage {
			graph: GraphStoreConfig {
				url: "http://127.0.0.1:7474".to_string(),
				database: "neo4j".to_string(),
				user: "neo4j".to_string(),
				password: None,
				timeout_ms: 1_000,
			},
			notes: NoteIndexConfig {
				url: "http://127.0.0.1:6334".to_string(),
				collection: "clinical_notes".to_string(),
				vector_dim: TEST_VECTOR_DIM,
				search_mode: "hybrid".to_string(),
				api_key: None,
			},
		},
		providers: Providers {
			llm: dummy_llm_provider("test-llm"),
			judge: dummy_llm_provider("test-judge"),
			embedding: EmbeddingProviderConfig {
				provider_id: "test".to_string(),
				api_base: "http://127.0.0.1:1".to_string(),
				api_key: String::new(),
				path: "/api/embed".to_string(),
				model: "test-embed".to_string(),
				dimensions: TEST_VECTOR_DIM,
				timeout_ms: 1_000,
				default_headers: Map::new(),
			},
		},
		retrieval: Retrieval { top_k: 2, candidate_k: 20 },
		guardrails: Guardrails {
			enabled: true,
			email: EmailGuardrail {
				blocked_domains: vec!["tempmail.com".to_string()],
				..EmailGuardrail::default()
			},
		},
		observability: Observability {
			tracking_enabled: true,
			metrics_sample_rate: 0.0,
			..Observability::default()
		},
	}
}

fn dummy_llm_provider(model: &str) -> LlmProviderConfig {
	LlmProviderConfig {
		provider_id: "test".to_string(),
		api_base: "http://127.0.0.1:1".to_string(),
		api_key: "test-key".to_string(),
		path: "/chat/completions".to_string(),
		model: model.to_string(),
		temperature: 0.0,
		timeout_ms: 1_000,
		default_headers: Map::new(),
	}
}

/// The FHIR-derived schema used across tests: patients, immunizations, and conditions.
pub fn patient_schema() -> GraphSchema {
	let property = |name: &str, kind: &str| Property { name: name.to_string(), kind: kind.to_string() };

	GraphSchema {
		nodes: vec![
			NodeType {
				label: "Patient".to_string(),
				properties: vec![
					property("patientId", "String"),
					property("firstName", "String"),
					property("lastName", "String"),
					property("birthDate", "Date"),
				],
			},
			NodeType {
				label: "Immunization".to_string(),
				properties: vec![property("vaccineCode", "String"), property("status", "String")],
			},
			NodeType {
				label: "Condition".to_string(),
				properties: vec![property("code", "String"), property("description", "String")],
			},
		],
		edges: vec![
			EdgeType {
				label: "WAS_IMMUNIZED".to_string(),
				src: "Patient".to_string(),
				dst: "Immunization".to_string(),
				properties: vec![property("occurrence", "DateTime")],
			},
			EdgeType {
				label: "HAS_CONDITION".to_string(),
				src: "Patient".to_string(),
				dst: "Condition".to_string(),
				properties: Vec::new(),
			},
		],
	}
}

pub fn row(value: Value) -> QueryRow {
	value.as_object().cloned().unwrap_or_default()
}

/// Graph store serving a fixed schema and a fixed result set.
pub struct FixtureGraph {
	pub schema: GraphSchema,
	pub rows: Vec<QueryRow>,
	pub fail_queries: bool,
	pub queries: Arc<Mutex<Vec<String>>>,
}
impl FixtureGraph {
	pub fn new(schema: GraphSchema, rows: Vec<QueryRow>) -> Self {
		Self { schema, rows, fail_queries: false, queries: Arc::new(Mutex::new(Vec::new())) }
	}

	pub fn failing(mut self) -> Self {
		self.fail_queries = true;

		self
	}
}

impl GraphStore for FixtureGraph {
	fn schema(&self) -> BoxFuture<'_, medrag_storage::Result<GraphSchema>> {
		Box::pin(async move { Ok(self.schema.clone()) })
	}

	fn query<'a>(&'a self, cypher: &'a str) -> BoxFuture<'a, medrag_storage::Result<Vec<QueryRow>>> {
		Box::pin(async move {
			self.queries.lock().unwrap_or_else(|err| err.into_inner()).push(cypher.to_string());

			if self.fail_queries {
				return Err(StorageError::GraphQuery {
					code: "Neo.ClientError.Statement.SyntaxError".to_string(),
					message: "Invalid input.".to_string(),
				});
			}

			Ok(self.rows.clone())
		})
	}
}

/// Note index returning fixed hits and counting searches.
pub struct SpyNoteIndex {
	pub mode: SearchMode,
	pub hits: Vec<NoteHit>,
	pub fail: bool,
	pub calls: Arc<AtomicUsize>,
	pub last_text: Arc<Mutex<Option<String>>>,
}
impl SpyNoteIndex {
	pub fn new(notes: &[&str]) -> Self {
		let hits = notes
			.iter()
			.enumerate()
			.map(|(idx, note)| NoteHit {
				record_id: idx.to_string(),
				note: note.to_string(),
				score: 1.0 / (idx as f32 + 1.0),
			})
			.collect();

		Self {
			mode: SearchMode::Hybrid,
			hits,
			fail: false,
			calls: Arc::new(AtomicUsize::new(0)),
			last_text: Arc::new(Mutex::new(None)),
		}
	}

	pub fn failing(mut self) -> Self {
		self.fail = true;

		self
	}

	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}

impl NoteSearch for SpyNoteIndex {
	fn mode(&self) -> SearchMode {
		self.mode
	}

	fn search<'a>(
		&'a self,
		text: &'a str,
		_vector: Option<&'a [f32]>,
		top_k: u32,
		_candidate_k: u32,
	) -> BoxFuture<'a, medrag_storage::Result<Vec<NoteHit>>> {
		Box::pin(async move {
			self.calls.fetch_add(1, Ordering::SeqCst);
			*self.last_text.lock().unwrap_or_else(|err| err.into_inner()) = Some(text.to_string());

			if self.fail {
				return Err(StorageError::InvalidResponse("Index unavailable.".to_string()));
			}

			Ok(self.hits.iter().take(top_k as usize).cloned().collect())
		})
	}
}

/// Embedding provider returning constant vectors of the configured dimension.
#[derive(Default)]
pub struct StubEmbedding {
	pub calls: Arc<AtomicUsize>,
}
impl StubEmbedding {
	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}

impl EmbeddingProvider for StubEmbedding {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, color_eyre::Result<Vec<Vec<f32>>>> {
		Box::pin(async move {
			self.calls.fetch_add(1, Ordering::SeqCst);

			Ok(texts.iter().map(|_| vec![0.5; cfg.dimensions as usize]).collect())
		})
	}
}

/// LLM provider answering each typed call from a registered responder.
///
/// Unregistered functions fail like an unreachable provider. Every call is recorded.
#[derive(Default)]
pub struct ScriptedLlm {
	responders: HashMap<LlmFunction, Responder>,
	usage: Option<TokenUsage>,
	pub calls: Arc<Mutex<Vec<(LlmFunction, String)>>>,
}
impl ScriptedLlm {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_json(self, function: LlmFunction, content: Value) -> Self {
		self.with(function, move |_| content.clone())
	}

	pub fn with<F>(mut self, function: LlmFunction, responder: F) -> Self
	where
		F: Fn(&LlmCall) -> Value + Send + Sync + 'static,
	{
		self.responders.insert(function, Box::new(responder));

		self
	}

	pub fn with_usage(mut self, prompt_tokens: u64, completion_tokens: u64) -> Self {
		self.usage = Some(TokenUsage { prompt_tokens, completion_tokens });

		self
	}

	pub fn count(&self, function: LlmFunction) -> usize {
		self.calls
			.lock()
			.unwrap_or_else(|err| err.into_inner())
			.iter()
			.filter(|(called, _)| *called == function)
			.count()
	}

	pub fn prompts(&self, function: LlmFunction) -> Vec<String> {
		self.calls
			.lock()
			.unwrap_or_else(|err| err.into_inner())
			.iter()
			.filter(|(called, _)| *called == function)
			.map(|(_, prompt)| prompt.clone())
			.collect()
	}
}

impl LlmProvider for ScriptedLlm {
	fn complete<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		call: &'a LlmCall,
	) -> BoxFuture<'a, color_eyre::Result<ChatCompletion>> {
		Box::pin(async move {
			self.calls
				.lock()
				.unwrap_or_else(|err| err.into_inner())
				.push((call.function, call.user_text().to_string()));

			let responder = self.responders.get(&call.function).ok_or_else(|| {
				eyre::eyre!("No scripted response for {}.", call.function.as_str())
			})?;

			Ok(ChatCompletion { content: responder(call), usage: self.usage, model: cfg.model.clone() })
		})
	}
}

/// Telemetry sink that keeps everything in memory.
#[derive(Default)]
pub struct RecordingTelemetry {
	pub fail: bool,
	pub traces: Mutex<Vec<TraceRecord>>,
	pub spans: Mutex<Vec<SpanRecord>>,
	pub scores: Mutex<Vec<(ScoreTarget, FeedbackScore)>>,
	pub datasets: Mutex<HashMap<String, Vec<DatasetItem>>>,
}
impl RecordingTelemetry {
	pub fn failing() -> Self {
		Self { fail: true, ..Self::default() }
	}

	pub fn span_names(&self) -> Vec<String> {
		self.spans
			.lock()
			.unwrap_or_else(|err| err.into_inner())
			.iter()
			.map(|span| span.name.clone())
			.collect()
	}

	pub fn scores(&self) -> Vec<(ScoreTarget, FeedbackScore)> {
		self.scores.lock().unwrap_or_else(|err| err.into_inner()).clone()
	}

	pub fn dataset(&self, name: &str) -> Vec<DatasetItem> {
		self.datasets
			.lock()
			.unwrap_or_else(|err| err.into_inner())
			.get(name)
			.cloned()
			.unwrap_or_default()
	}

	fn check(&self) -> color_eyre::Result<()> {
		if self.fail {
			return Err(eyre::eyre!("Telemetry backend unavailable."));
		}

		Ok(())
	}
}

impl Telemetry for RecordingTelemetry {
	fn record_trace<'a>(&'a self, trace: &'a TraceRecord) -> BoxFuture<'a, color_eyre::Result<()>> {
		Box::pin(async move {
			self.check()?;
			self.traces.lock().unwrap_or_else(|err| err.into_inner()).push(trace.clone());

			Ok(())
		})
	}

	fn record_spans<'a>(
		&'a self,
		spans: &'a [SpanRecord],
	) -> BoxFuture<'a, color_eyre::Result<()>> {
		Box::pin(async move {
			self.check()?;
			self.spans.lock().unwrap_or_else(|err| err.into_inner()).extend_from_slice(spans);

			Ok(())
		})
	}

	fn record_scores<'a>(
		&'a self,
		target: ScoreTarget,
		scores: &'a [FeedbackScore],
	) -> BoxFuture<'a, color_eyre::Result<()>> {
		Box::pin(async move {
			self.check()?;
			self.scores
				.lock()
				.unwrap_or_else(|err| err.into_inner())
				.extend(scores.iter().cloned().map(|score| (target, score)));

			Ok(())
		})
	}

	fn record_dataset_items<'a>(
		&'a self,
		dataset: &'a str,
		items: &'a [DatasetItem],
	) -> BoxFuture<'a, color_eyre::Result<()>> {
		Box::pin(async move {
			self.check()?;
			self.datasets
				.lock()
				.unwrap_or_else(|err| err.into_inner())
				.entry(dataset.to_string())
				.or_default()
				.extend_from_slice(items);

			Ok(())
		})
	}

	fn dataset_items<'a>(
		&'a self,
		dataset: &'a str,
		limit: usize,
	) -> BoxFuture<'a, color_eyre::Result<Vec<DatasetItem>>> {
		Box::pin(async move {
			self.check()?;

			Ok(self.dataset(dataset).into_iter().take(limit).collect())
		})
	}
}
