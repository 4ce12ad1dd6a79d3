pub mod feedback;
pub mod functions;
pub mod metrics;
pub mod optimization;
pub mod pipeline;
pub mod telemetry;

mod error;

pub use error::{Error, Result};
pub use feedback::{FeedbackRequest, FeedbackResponse};
pub use optimization::{DatasetStats, MetricStats};
pub use pipeline::{DetailedQueryResponse, QueryRequest, QueryResponse};
pub use telemetry::{NoopTelemetry, OpikTelemetry, Telemetry, TrackingStatus};

use std::{future::Future, pin::Pin, sync::Arc};

use functions::LlmCall;
use medrag_config::{Config, EmbeddingProviderConfig, LlmProviderConfig};
use medrag_domain::{context::QueryRow, guardrail::GuardrailManager, schema::GraphSchema};
use medrag_providers::{
	embedding,
	llm::{self, ChatCompletion},
};
use medrag_storage::{
	graph::GraphClient,
	notes::{NoteHit, NoteIndex, SearchMode},
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait GraphStore
where
	Self: Send + Sync,
{
	fn schema(&self) -> BoxFuture<'_, medrag_storage::Result<GraphSchema>>;

	fn query<'a>(&'a self, cypher: &'a str) -> BoxFuture<'a, medrag_storage::Result<Vec<QueryRow>>>;
}

pub trait NoteSearch
where
	Self: Send + Sync,
{
	fn mode(&self) -> SearchMode;

	fn search<'a>(
		&'a self,
		text: &'a str,
		vector: Option<&'a [f32]>,
		top_k: u32,
		candidate_k: u32,
	) -> BoxFuture<'a, medrag_storage::Result<Vec<NoteHit>>>;
}

pub trait LlmProvider
where
	Self: Send + Sync,
{
	fn complete<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		call: &'a LlmCall,
	) -> BoxFuture<'a, color_eyre::Result<ChatCompletion>>;
}

pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, color_eyre::Result<Vec<Vec<f32>>>>;
}

#[derive(Clone)]
pub struct Stores {
	pub graph: Arc<dyn GraphStore>,
	pub notes: Arc<dyn NoteSearch>,
}

#[derive(Clone)]
pub struct Providers {
	pub llm: Arc<dyn LlmProvider>,
	pub embedding: Arc<dyn EmbeddingProvider>,
}

pub struct RagService {
	pub cfg: Config,
	pub stores: Stores,
	pub providers: Providers,
	pub telemetry: Arc<dyn Telemetry>,
	pub guardrails: Option<GuardrailManager>,
}

struct DefaultProviders;

impl GraphStore for GraphClient {
	fn schema(&self) -> BoxFuture<'_, medrag_storage::Result<GraphSchema>> {
		Box::pin(GraphClient::schema(self))
	}

	fn query<'a>(&'a self, cypher: &'a str) -> BoxFuture<'a, medrag_storage::Result<Vec<QueryRow>>> {
		Box::pin(GraphClient::query(self, cypher))
	}
}

impl NoteSearch for NoteIndex {
	fn mode(&self) -> SearchMode {
		self.mode
	}

	fn search<'a>(
		&'a self,
		text: &'a str,
		vector: Option<&'a [f32]>,
		top_k: u32,
		candidate_k: u32,
	) -> BoxFuture<'a, medrag_storage::Result<Vec<NoteHit>>> {
		Box::pin(NoteIndex::search(self, text, vector, top_k, candidate_k))
	}
}

impl LlmProvider for DefaultProviders {
	fn complete<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		call: &'a LlmCall,
	) -> BoxFuture<'a, color_eyre::Result<ChatCompletion>> {
		Box::pin(llm::chat_json(cfg, &call.messages))
	}
}

impl EmbeddingProvider for DefaultProviders {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, color_eyre::Result<Vec<Vec<f32>>>> {
		Box::pin(embedding::embed(cfg, texts))
	}
}

impl Providers {
	pub fn new(llm: Arc<dyn LlmProvider>, embedding: Arc<dyn EmbeddingProvider>) -> Self {
		Self { llm, embedding }
	}
}

impl Default for Providers {
	fn default() -> Self {
		let provider = Arc::new(DefaultProviders);

		Self { llm: provider.clone(), embedding: provider }
	}
}

impl Stores {
	pub fn new(graph: Arc<dyn GraphStore>, notes: Arc<dyn NoteSearch>) -> Self {
		Self { graph, notes }
	}

	/// Connects to the configured Neo4j and Qdrant endpoints.
	pub fn connect(cfg: &Config) -> Result<Self> {
		let graph = GraphClient::new(&cfg.storage.graph)?;
		let notes = NoteIndex::new(&cfg.storage.notes)?;

		Ok(Self { graph: Arc::new(graph), notes: Arc::new(notes) })
	}
}

impl RagService {
	pub fn new(cfg: Config) -> Result<Self> {
		let stores = Stores::connect(&cfg)?;
		let telemetry: Arc<dyn Telemetry> = if cfg.observability.tracking_enabled {
			Arc::new(
				OpikTelemetry::new(&cfg.observability)
					.map_err(|err| Error::Config { message: err.to_string() })?,
			)
		} else {
			Arc::new(NoopTelemetry)
		};

		Ok(Self::with_parts(cfg, stores, Providers::default(), telemetry))
	}

	pub fn with_parts(
		cfg: Config,
		stores: Stores,
		providers: Providers,
		telemetry: Arc<dyn Telemetry>,
	) -> Self {
		let guardrails = GuardrailManager::from_config(&cfg.guardrails);

		if guardrails.is_none() {
			tracing::info!("Guardrails disabled.");
		}

		Self { cfg, stores, providers, telemetry, guardrails }
	}

	pub fn tracking_status(&self) -> TrackingStatus {
		TrackingStatus::from_config(&self.cfg.observability)
	}

	/// Runs one typed LLM call against the answering model.
	pub(crate) async fn complete(&self, call: &LlmCall) -> Result<ChatCompletion> {
		let completion = self.providers.llm.complete(&self.cfg.providers.llm, call).await?;

		Ok(completion)
	}
}
