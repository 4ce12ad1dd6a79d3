use std::{sync::LazyLock, time::Instant};

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("email regex")
});

const COMMON_DOMAINS: [&str; 8] = [
	"gmail.com",
	"yahoo.com",
	"hotmail.com",
	"outlook.com",
	"aol.com",
	"icloud.com",
	"protonmail.com",
	"mail.com",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardrailAction {
	Block,
	Warn,
	Log,
}
impl GuardrailAction {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Block => "block",
			Self::Warn => "warn",
			Self::Log => "log",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		match raw {
			"block" => Some(Self::Block),
			"warn" => Some(Self::Warn),
			"log" => Some(Self::Log),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardrailSeverity {
	Low,
	Medium,
	High,
	Critical,
}
impl GuardrailSeverity {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Low => "low",
			Self::Medium => "medium",
			Self::High => "high",
			Self::Critical => "critical",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		match raw {
			"low" => Some(Self::Low),
			"medium" => Some(Self::Medium),
			"high" => Some(Self::High),
			"critical" => Some(Self::Critical),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationPhase {
	Input,
	Output,
}
impl ValidationPhase {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Input => "input",
			Self::Output => "output",
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuardrailResult {
	pub triggered: bool,
	pub action: GuardrailAction,
	pub severity: GuardrailSeverity,
	pub message: String,
	pub entities_found: Vec<String>,
	pub details: Map<String, Value>,
}

/// Span metadata and tags describing one guardrail pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuardrailReport {
	pub metadata: Map<String, Value>,
	pub tags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct GuardrailOutcome {
	pub text: String,
	pub results: Vec<GuardrailResult>,
	pub masked: bool,
	pub report: GuardrailReport,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("Guardrail validation failed: {}", .result.message)]
pub struct GuardrailBlocked {
	pub result: GuardrailResult,
	pub results: Vec<GuardrailResult>,
	pub report: GuardrailReport,
}

/// Running guardrail counters for one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GuardrailSummary {
	pub total_validations: u32,
	pub total_entities_found: u32,
	pub total_blocks: u32,
	pub total_warnings: u32,
	pub critical_violations: u32,
	pub high_severity_violations: u32,
}
impl GuardrailSummary {
	/// Counts one validation pass and its triggered results.
	pub fn record(&mut self, results: &[GuardrailResult]) {
		self.total_validations += 1;

		for result in results {
			self.total_entities_found += result.entities_found.len() as u32;

			if !result.triggered {
				continue;
			}

			match result.action {
				GuardrailAction::Block => self.total_blocks += 1,
				GuardrailAction::Warn => self.total_warnings += 1,
				GuardrailAction::Log => {},
			}
			match result.severity {
				GuardrailSeverity::Critical => self.critical_violations += 1,
				GuardrailSeverity::High => self.high_severity_violations += 1,
				_ => {},
			}
		}
	}
}

pub trait Guardrail: Send + Sync {
	fn kind(&self) -> &'static str;

	fn validate(&self, text: &str) -> GuardrailResult;

	/// Returns the masked text, or `None` when this guardrail does not mask.
	fn mask(&self, text: &str) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct EmailGuardrail {
	pub action: GuardrailAction,
	pub severity: GuardrailSeverity,
	pub block_common_domains: bool,
	pub allowed_domains: Vec<String>,
	pub blocked_domains: Vec<String>,
	pub mask_emails: bool,
	pub mask_char: char,
}
impl EmailGuardrail {
	pub fn new(action: GuardrailAction, severity: GuardrailSeverity) -> Self {
		Self {
			action,
			severity,
			block_common_domains: false,
			allowed_domains: Vec::new(),
			blocked_domains: Vec::new(),
			mask_emails: false,
			mask_char: '*',
		}
	}

	pub fn from_config(cfg: &medrag_config::EmailGuardrail) -> Self {
		Self {
			action: GuardrailAction::parse(&cfg.action).unwrap_or(GuardrailAction::Warn),
			severity: GuardrailSeverity::parse(&cfg.severity).unwrap_or(GuardrailSeverity::Medium),
			block_common_domains: cfg.block_common_domains,
			allowed_domains: cfg.allowed_domains.clone(),
			blocked_domains: cfg.blocked_domains.clone(),
			mask_emails: cfg.mask_emails,
			mask_char: cfg.mask_char.chars().next().unwrap_or('*'),
		}
	}

	pub fn with_masking(mut self, mask_char: char) -> Self {
		self.mask_emails = true;
		self.mask_char = mask_char;

		self
	}

	pub fn with_blocked_domains<I, S>(mut self, domains: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.blocked_domains = domains.into_iter().map(Into::into).collect();

		self
	}

	pub fn with_allowed_domains<I, S>(mut self, domains: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.allowed_domains = domains.into_iter().map(Into::into).collect();

		self
	}

	pub fn blocking_common_domains(mut self) -> Self {
		self.block_common_domains = true;

		self
	}

	/// Local part keeps its first and last characters; each domain label keeps its first.
	pub fn mask_text(&self, text: &str) -> String {
		EMAIL_REGEX
			.replace_all(text, |caps: &Captures| mask_address(&caps[0], self.mask_char))
			.into_owned()
	}

	fn result(&self, triggered: bool, message: String, details: Map<String, Value>) -> GuardrailResult {
		GuardrailResult {
			triggered,
			action: self.action,
			severity: self.severity,
			message,
			entities_found: Vec::new(),
			details,
		}
	}
}

impl Guardrail for EmailGuardrail {
	fn kind(&self) -> &'static str {
		"email"
	}

	fn validate(&self, text: &str) -> GuardrailResult {
		if text.is_empty() {
			return self.result(false, "No text provided for validation".to_string(), Map::new());
		}

		let emails: Vec<String> =
			EMAIL_REGEX.find_iter(text).map(|found| found.as_str().to_string()).collect();

		if emails.is_empty() {
			let mut details = Map::new();

			details.insert("total_emails".to_string(), json!(0));

			return self.result(false, "No email addresses detected".to_string(), details);
		}

		let mut email_details = Vec::with_capacity(emails.len());
		let mut blocked = Vec::new();
		let mut allowed = Vec::new();
		let mut common = Vec::new();

		for email in &emails {
			let domain = email.rsplit_once('@').map(|(_, domain)| domain).unwrap_or_default();
			let domain = domain.to_ascii_lowercase();
			let is_common = COMMON_DOMAINS.contains(&domain.as_str());
			let is_allowed =
				self.allowed_domains.is_empty() || self.allowed_domains.contains(&domain);
			let is_blocked = self.blocked_domains.contains(&domain);

			email_details.push(json!({
				"email": email,
				"domain": domain,
				"is_common": is_common,
				"is_allowed": is_allowed,
				"is_blocked": is_blocked,
			}));

			if is_blocked {
				blocked.push(email.clone());
			} else if is_allowed {
				allowed.push(email.clone());
			}
			if is_common {
				common.push(email.clone());
			}
		}

		let mut reasons = Vec::new();

		if !blocked.is_empty() {
			reasons.push(format!("Blocked domains detected: {}", blocked.join(", ")));
		}
		if self.block_common_domains && !common.is_empty() {
			reasons.push(format!("Common domains detected: {}", common.join(", ")));
		}
		if reasons.is_empty() && self.action == GuardrailAction::Block {
			reasons.push(format!("Email addresses detected: {}", emails.join(", ")));
		}

		let triggered = !reasons.is_empty();
		let message = if triggered {
			reasons.join("; ")
		} else {
			format!("Email addresses detected: {}", emails.join(", "))
		};
		let mut details = Map::new();

		details.insert("total_emails".to_string(), json!(emails.len()));
		details.insert("blocked_emails".to_string(), json!(blocked));
		details.insert("allowed_emails".to_string(), json!(allowed));
		details.insert("email_details".to_string(), Value::Array(email_details));
		details.insert("block_common_domains".to_string(), json!(self.block_common_domains));
		details.insert("has_blocked_domains".to_string(), json!(!self.blocked_domains.is_empty()));
		details.insert("has_allowed_domains".to_string(), json!(!self.allowed_domains.is_empty()));

		GuardrailResult { entities_found: emails, ..self.result(triggered, message, details) }
	}

	fn mask(&self, text: &str) -> Option<String> {
		self.mask_emails.then(|| self.mask_text(text))
	}
}

/// Runs every registered guardrail over a text and applies their actions.
///
/// A triggered BLOCK result wins regardless of registration order. WARN guardrails that found
/// entities mask the text when they have masking enabled. LOG results are only recorded.
#[derive(Default)]
pub struct GuardrailManager {
	guardrails: Vec<Box<dyn Guardrail>>,
}
impl GuardrailManager {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn from_config(cfg: &medrag_config::Guardrails) -> Option<Self> {
		if !cfg.enabled {
			return None;
		}

		let mut manager = Self::new();

		manager.push(EmailGuardrail::from_config(&cfg.email));

		Some(manager)
	}

	pub fn push<G>(&mut self, guardrail: G)
	where
		G: Guardrail + 'static,
	{
		self.guardrails.push(Box::new(guardrail));
	}

	pub fn with<G>(mut self, guardrail: G) -> Self
	where
		G: Guardrail + 'static,
	{
		self.push(guardrail);

		self
	}

	pub fn len(&self) -> usize {
		self.guardrails.len()
	}

	pub fn is_empty(&self) -> bool {
		self.guardrails.is_empty()
	}

	pub fn check(
		&self,
		text: &str,
		phase: ValidationPhase,
	) -> Result<GuardrailOutcome, GuardrailBlocked> {
		let started = Instant::now();
		let results: Vec<GuardrailResult> =
			self.guardrails.iter().map(|guardrail| guardrail.validate(text)).collect();
		let blocked = results
			.iter()
			.find(|result| result.triggered && result.action == GuardrailAction::Block)
			.cloned();
		let mut processed = text.to_string();

		if blocked.is_none() {
			for (guardrail, result) in self.guardrails.iter().zip(&results) {
				match result.action {
					GuardrailAction::Warn => {
						if result.triggered {
							tracing::warn!(
								phase = phase.as_str(),
								guardrail = guardrail.kind(),
								message = %result.message,
								"Guardrail triggered."
							);
						}
						if !result.entities_found.is_empty()
							&& let Some(masked) = guardrail.mask(&processed)
						{
							processed = masked;
						}
					},
					GuardrailAction::Log =>
						if result.triggered || !result.entities_found.is_empty() {
							tracing::info!(
								phase = phase.as_str(),
								guardrail = guardrail.kind(),
								message = %result.message,
								"Guardrail logged."
							);
						},
					GuardrailAction::Block => {},
				}
			}
		}

		let masked = processed != text;
		let kinds: Vec<&str> = self.guardrails.iter().map(|guardrail| guardrail.kind()).collect();
		let report = summarize(SummaryInput {
			kinds: &kinds,
			phase,
			input: text,
			output: &processed,
			results: &results,
			elapsed_ms: started.elapsed().as_secs_f64() * 1_000.0,
		});

		if let Some(result) = blocked {
			tracing::warn!(
				phase = phase.as_str(),
				message = %result.message,
				"Guardrail blocked the text."
			);

			return Err(GuardrailBlocked { result, results, report });
		}

		Ok(GuardrailOutcome { text: processed, results, masked, report })
	}
}

struct SummaryInput<'a> {
	kinds: &'a [&'a str],
	phase: ValidationPhase,
	input: &'a str,
	output: &'a str,
	results: &'a [GuardrailResult],
	elapsed_ms: f64,
}

fn summarize(input: SummaryInput<'_>) -> GuardrailReport {
	let SummaryInput { kinds, phase, input, output, results, elapsed_ms } = input;
	let mut entities: Vec<&str> = Vec::new();
	let mut severity_counts = Map::new();
	let mut action_counts = Map::new();

	for severity in ["low", "medium", "high", "critical"] {
		severity_counts.insert(severity.to_string(), json!(0));
	}
	for action in ["block", "warn", "log"] {
		action_counts.insert(action.to_string(), json!(0));
	}

	for result in results {
		bump(&mut severity_counts, result.severity.as_str());

		if result.triggered {
			bump(&mut action_counts, result.action.as_str());
		}

		for entity in &result.entities_found {
			if !entities.contains(&entity.as_str()) {
				entities.push(entity);
			}
		}
	}

	let triggered = results.iter().filter(|result| result.triggered).count();
	let mut metadata = Map::new();

	metadata.insert("guardrail_type".to_string(), json!(kinds.join(",")));
	metadata.insert("validation_phase".to_string(), json!(phase.as_str()));
	metadata.insert("processing_time_ms".to_string(), json!(elapsed_ms));
	metadata.insert("input_length".to_string(), json!(input.chars().count()));
	metadata.insert("output_length".to_string(), json!(output.chars().count()));
	metadata.insert("guardrails_run".to_string(), json!(results.len()));
	metadata.insert("guardrails_triggered".to_string(), json!(triggered));
	metadata.insert("text_modified".to_string(), json!(input != output));
	metadata.insert("masking_applied".to_string(), json!(input != output));
	metadata.insert("entities_found".to_string(), json!(entities));
	metadata.insert("severity_distribution".to_string(), Value::Object(severity_counts));
	metadata.insert("action_distribution".to_string(), Value::Object(action_counts));
	metadata.insert("results".to_string(), json!(results));

	let mut tags = vec!["guardrail".to_string(), "validation".to_string()];

	tags.extend(kinds.iter().map(|kind| kind.to_string()));

	// Only results that matched something contribute severity and action tags.
	let active: Vec<&GuardrailResult> = results
		.iter()
		.filter(|result| result.triggered || !result.entities_found.is_empty())
		.collect();

	if active.iter().any(|result| result.severity == GuardrailSeverity::Critical) {
		tags.push("critical".to_string());
	}
	if active.iter().any(|result| result.severity == GuardrailSeverity::High) {
		tags.push("high_severity".to_string());
	}
	if active.iter().any(|result| result.action == GuardrailAction::Block) {
		tags.push("blocked".to_string());
	}
	if active.iter().any(|result| result.action == GuardrailAction::Warn) {
		tags.push("warned".to_string());
	}

	GuardrailReport { metadata, tags }
}

fn bump(counts: &mut Map<String, Value>, key: &str) {
	let next = counts.get(key).and_then(Value::as_u64).unwrap_or(0) + 1;

	counts.insert(key.to_string(), json!(next));
}

fn mask_address(email: &str, mask_char: char) -> String {
	let Some((local, domain)) = email.split_once('@') else {
		return email.to_string();
	};
	let local_len = local.chars().count();
	let masked_local = if local_len <= 2 {
		mask_char.to_string().repeat(local_len)
	} else {
		let mut chars = local.chars();
		let first = chars.next().unwrap_or(mask_char);
		let last = chars.next_back().unwrap_or(mask_char);

		format!("{first}{}{last}", mask_char.to_string().repeat(local_len - 2))
	};
	let masked_domain = domain
		.split('.')
		.map(|label| {
			let len = label.chars().count();

			match label.chars().next() {
				Some(first) if len > 1 =>
					format!("{first}{}", mask_char.to_string().repeat(len - 1)),
				_ => label.to_string(),
			}
		})
		.collect::<Vec<_>>()
		.join(".");

	format!("{masked_local}@{masked_domain}")
}
