mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Config, EmailGuardrail, EmbeddingProviderConfig, GraphStore, Guardrails, LlmProviderConfig,
	NoteIndex, Observability, Providers, Retrieval, Service, Storage,
};

use std::{env, fs, path::Path};

pub const ENV_METRICS_SAMPLE_RATE: &str = "METRICS_SAMPLE_RATE";
pub const ENV_GUARDRAILS_ENABLED: &str = "GUARDRAILS_ENABLED";
pub const ENV_TRACKING_ENABLED: &str = "OPIK_TRACKING_ENABLED";
pub const ENV_PROMPT_PRICE_PER_1K: &str = "PROMPT_PRICE_PER_1K";
pub const ENV_COMPLETION_PRICE_PER_1K: &str = "COMPLETION_PRICE_PER_1K";
pub const ENV_OPIK_API_KEY: &str = "OPIK_API_KEY";
pub const ENV_OPIK_WORKSPACE: &str = "OPIK_WORKSPACE";
pub const ENV_OPIK_PROJECT_NAME: &str = "OPIK_PROJECT_NAME";
pub const ENV_LLM_API_KEY: &str = "OPENROUTER_API_KEY";

const SEARCH_MODES: [&str; 3] = ["hybrid", "vector", "keyword"];
const GUARDRAIL_ACTIONS: [&str; 3] = ["block", "warn", "log"];
const GUARDRAIL_SEVERITIES: [&str; 4] = ["low", "medium", "high", "critical"];

/// Loads the config file and applies overrides from the process environment.
pub fn load(path: &Path) -> Result<Config> {
	load_with_env(path, |key| env::var(key).ok())
}

/// Same as [`load`] with an explicit environment lookup.
pub fn load_with_env<F>(path: &Path, lookup: F) -> Result<Config>
where
	F: Fn(&str) -> Option<String>,
{
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;
	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);
	apply_env_overrides(&mut cfg, lookup)?;
	validate(&cfg)?;

	Ok(cfg)
}

/// Environment values take precedence over the file. This is the only place the process
/// environment is read; everything downstream receives the resulting [`Config`].
pub fn apply_env_overrides<F>(cfg: &mut Config, lookup: F) -> Result<()>
where
	F: Fn(&str) -> Option<String>,
{
	let get = |key: &str| lookup(key).map(|value| value.trim().to_string()).filter(|v| !v.is_empty());

	if let Some(raw) = get(ENV_METRICS_SAMPLE_RATE) {
		cfg.observability.metrics_sample_rate = parse_f64(ENV_METRICS_SAMPLE_RATE, &raw)?;
	}
	if let Some(raw) = get(ENV_GUARDRAILS_ENABLED) {
		cfg.guardrails.enabled = parse_flag(ENV_GUARDRAILS_ENABLED, &raw)?;
	}
	if let Some(raw) = get(ENV_TRACKING_ENABLED) {
		cfg.observability.tracking_enabled = parse_flag(ENV_TRACKING_ENABLED, &raw)?;
	}
	if let Some(raw) = get(ENV_PROMPT_PRICE_PER_1K) {
		cfg.observability.prompt_price_per_1k = parse_f64(ENV_PROMPT_PRICE_PER_1K, &raw)?;
	}
	if let Some(raw) = get(ENV_COMPLETION_PRICE_PER_1K) {
		cfg.observability.completion_price_per_1k =
			parse_f64(ENV_COMPLETION_PRICE_PER_1K, &raw)?;
	}
	if let Some(raw) = get(ENV_OPIK_API_KEY) {
		cfg.observability.api_key = Some(raw);
	}
	if let Some(raw) = get(ENV_OPIK_WORKSPACE) {
		cfg.observability.workspace = Some(raw);
	}
	if let Some(raw) = get(ENV_OPIK_PROJECT_NAME) {
		cfg.observability.project_name = raw;
	}
	if let Some(raw) = get(ENV_LLM_API_KEY) {
		for provider in [&mut cfg.providers.llm, &mut cfg.providers.judge] {
			if provider.api_key.trim().is_empty() {
				provider.api_key = raw.clone();
			}
		}
	}

	Ok(())
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.http_bind.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.http_bind must be non-empty.".to_string(),
		});
	}
	if cfg.storage.graph.url.trim().is_empty() {
		return Err(Error::Validation {
			message: "storage.graph.url must be non-empty.".to_string(),
		});
	}
	if cfg.storage.graph.database.trim().is_empty() {
		return Err(Error::Validation {
			message: "storage.graph.database must be non-empty.".to_string(),
		});
	}
	if cfg.storage.notes.collection.trim().is_empty() {
		return Err(Error::Validation {
			message: "storage.notes.collection must be non-empty.".to_string(),
		});
	}
	if !SEARCH_MODES.contains(&cfg.storage.notes.search_mode.as_str()) {
		return Err(Error::Validation {
			message: "storage.notes.search_mode must be one of hybrid, vector, or keyword."
				.to_string(),
		});
	}
	if cfg.providers.embedding.dimensions == 0 {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must be greater than zero.".to_string(),
		});
	}
	if cfg.providers.embedding.dimensions != cfg.storage.notes.vector_dim {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must match storage.notes.vector_dim."
				.to_string(),
		});
	}

	for (label, key) in
		[("llm", &cfg.providers.llm.api_key), ("judge", &cfg.providers.judge.api_key)]
	{
		if key.trim().is_empty() {
			return Err(Error::Validation {
				message: format!("Provider {label} api_key must be non-empty."),
			});
		}
	}

	if cfg.retrieval.top_k == 0 {
		return Err(Error::Validation {
			message: "retrieval.top_k must be greater than zero.".to_string(),
		});
	}
	if cfg.retrieval.candidate_k < cfg.retrieval.top_k {
		return Err(Error::Validation {
			message: "retrieval.candidate_k must be greater than or equal to retrieval.top_k."
				.to_string(),
		});
	}

	let email = &cfg.guardrails.email;

	if !GUARDRAIL_ACTIONS.contains(&email.action.as_str()) {
		return Err(Error::Validation {
			message: "guardrails.email.action must be one of block, warn, or log.".to_string(),
		});
	}
	if !GUARDRAIL_SEVERITIES.contains(&email.severity.as_str()) {
		return Err(Error::Validation {
			message: "guardrails.email.severity must be one of low, medium, high, or critical."
				.to_string(),
		});
	}
	if email.mask_char.chars().count() != 1 {
		return Err(Error::Validation {
			message: "guardrails.email.mask_char must be exactly one character.".to_string(),
		});
	}

	let obs = &cfg.observability;

	if !obs.metrics_sample_rate.is_finite() || !(0.0..=1.0).contains(&obs.metrics_sample_rate)
	{
		return Err(Error::Validation {
			message: "observability.metrics_sample_rate must be in the range 0.0-1.0.".to_string(),
		});
	}

	for (label, price) in [
		("observability.prompt_price_per_1k", obs.prompt_price_per_1k),
		("observability.completion_price_per_1k", obs.completion_price_per_1k),
	] {
		if !price.is_finite() || price < 0.0 {
			return Err(Error::Validation {
				message: format!("{label} must be a finite number, zero or greater."),
			});
		}
	}

	if obs.tracking_enabled && obs.project_name.trim().is_empty() {
		return Err(Error::Validation {
			message: "observability.project_name must be non-empty when tracking is enabled."
				.to_string(),
		});
	}
	if obs.optimization_dataset.trim().is_empty() {
		return Err(Error::Validation {
			message: "observability.optimization_dataset must be non-empty.".to_string(),
		});
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	if cfg.storage.graph.password.as_deref().map(|value| value.trim().is_empty()).unwrap_or(false)
	{
		cfg.storage.graph.password = None;
	}
	if cfg.storage.notes.api_key.as_deref().map(|value| value.trim().is_empty()).unwrap_or(false)
	{
		cfg.storage.notes.api_key = None;
	}
	if cfg.observability.api_key.as_deref().map(|value| value.trim().is_empty()).unwrap_or(false)
	{
		cfg.observability.api_key = None;
	}
	if cfg
		.observability
		.workspace
		.as_deref()
		.map(|value| value.trim().is_empty())
		.unwrap_or(false)
	{
		cfg.observability.workspace = None;
	}

	cfg.storage.notes.search_mode = cfg.storage.notes.search_mode.trim().to_ascii_lowercase();
	cfg.guardrails.email.action = cfg.guardrails.email.action.trim().to_ascii_lowercase();
	cfg.guardrails.email.severity = cfg.guardrails.email.severity.trim().to_ascii_lowercase();

	for domains in
		[&mut cfg.guardrails.email.allowed_domains, &mut cfg.guardrails.email.blocked_domains]
	{
		for domain in domains.iter_mut() {
			*domain = domain.trim().to_ascii_lowercase();
		}

		domains.retain(|domain| !domain.is_empty());
	}
}

fn parse_flag(key: &'static str, raw: &str) -> Result<bool> {
	match raw.to_ascii_lowercase().as_str() {
		"true" | "1" | "yes" | "on" => Ok(true),
		"false" | "0" | "no" | "off" => Ok(false),
		_ => Err(Error::InvalidEnv { key, value: raw.to_string() }),
	}
}

fn parse_f64(key: &'static str, raw: &str) -> Result<f64> {
	raw.parse::<f64>().map_err(|_| Error::InvalidEnv { key, value: raw.to_string() })
}
