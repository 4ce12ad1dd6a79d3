use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub providers: Providers,
	#[serde(default)]
	pub retrieval: Retrieval,
	#[serde(default)]
	pub guardrails: Guardrails,
	#[serde(default)]
	pub observability: Observability,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Storage {
	pub graph: GraphStore,
	pub notes: NoteIndex,
}

/// Neo4j HTTP endpoint holding the property graph built from the extracted records.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphStore {
	pub url: String,
	#[serde(default = "default_graph_database")]
	pub database: String,
	pub user: String,
	pub password: Option<String>,
	pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NoteIndex {
	pub url: String,
	pub collection: String,
	pub vector_dim: u32,
	/// One of `hybrid`, `vector`, or `keyword`.
	#[serde(default = "default_search_mode")]
	pub search_mode: String,
	pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Providers {
	pub llm: LlmProviderConfig,
	pub judge: LlmProviderConfig,
	pub embedding: EmbeddingProviderConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	#[serde(default)]
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub temperature: f32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	/// Local embedding servers usually need no key; an empty key sends no `Authorization`.
	#[serde(default)]
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Retrieval {
	#[serde(default = "default_top_k")]
	pub top_k: u32,
	#[serde(default = "default_candidate_k")]
	pub candidate_k: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Guardrails {
	#[serde(default = "default_true")]
	pub enabled: bool,
	#[serde(default)]
	pub email: EmailGuardrail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailGuardrail {
	/// One of `block`, `warn`, or `log`.
	#[serde(default = "default_guardrail_action")]
	pub action: String,
	/// One of `low`, `medium`, `high`, or `critical`.
	#[serde(default = "default_guardrail_severity")]
	pub severity: String,
	#[serde(default = "default_true")]
	pub mask_emails: bool,
	#[serde(default = "default_mask_char")]
	pub mask_char: String,
	#[serde(default)]
	pub block_common_domains: bool,
	#[serde(default)]
	pub allowed_domains: Vec<String>,
	#[serde(default)]
	pub blocked_domains: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Observability {
	#[serde(default = "default_true")]
	pub tracking_enabled: bool,
	#[serde(default = "default_opik_api_base")]
	pub api_base: String,
	pub api_key: Option<String>,
	pub workspace: Option<String>,
	#[serde(default = "default_project_name")]
	pub project_name: String,
	#[serde(default = "default_observability_timeout_ms")]
	pub timeout_ms: u64,
	/// Fraction of pipeline calls that run LLM-judge quality metrics.
	#[serde(default = "default_metrics_sample_rate")]
	pub metrics_sample_rate: f64,
	#[serde(default = "default_prompt_price_per_1k")]
	pub prompt_price_per_1k: f64,
	#[serde(default = "default_completion_price_per_1k")]
	pub completion_price_per_1k: f64,
	/// Opik dataset collecting sampled answers with their metric scores.
	#[serde(default = "default_optimization_dataset")]
	pub optimization_dataset: String,
}

impl Default for Retrieval {
	fn default() -> Self {
		Self { top_k: default_top_k(), candidate_k: default_candidate_k() }
	}
}

impl Default for Guardrails {
	fn default() -> Self {
		Self { enabled: true, email: EmailGuardrail::default() }
	}
}

impl Default for EmailGuardrail {
	fn default() -> Self {
		Self {
			action: default_guardrail_action(),
			severity: default_guardrail_severity(),
			mask_emails: true,
			mask_char: default_mask_char(),
			block_common_domains: false,
			allowed_domains: Vec::new(),
			blocked_domains: Vec::new(),
		}
	}
}

impl Default for Observability {
	fn default() -> Self {
		Self {
			tracking_enabled: true,
			api_base: default_opik_api_base(),
			api_key: None,
			workspace: None,
			project_name: default_project_name(),
			timeout_ms: default_observability_timeout_ms(),
			metrics_sample_rate: default_metrics_sample_rate(),
			prompt_price_per_1k: default_prompt_price_per_1k(),
			completion_price_per_1k: default_completion_price_per_1k(),
			optimization_dataset: default_optimization_dataset(),
		}
	}
}

fn default_true() -> bool {
	true
}

fn default_graph_database() -> String {
	"neo4j".to_string()
}

fn default_search_mode() -> String {
	"hybrid".to_string()
}

fn default_top_k() -> u32 {
	2
}

fn default_candidate_k() -> u32 {
	20
}

fn default_guardrail_action() -> String {
	"warn".to_string()
}

fn default_guardrail_severity() -> String {
	"medium".to_string()
}

fn default_mask_char() -> String {
	"*".to_string()
}

fn default_opik_api_base() -> String {
	"https://www.comet.com/opik/api".to_string()
}

fn default_project_name() -> String {
	"medrag".to_string()
}

fn default_observability_timeout_ms() -> u64 {
	10_000
}

fn default_metrics_sample_rate() -> f64 {
	0.05
}

fn default_prompt_price_per_1k() -> f64 {
	0.0005
}

fn default_completion_price_per_1k() -> f64 {
	0.000_009
}

fn default_optimization_dataset() -> String {
	"soa_prompt_optimization".to_string()
}
