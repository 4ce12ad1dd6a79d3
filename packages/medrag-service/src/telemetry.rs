//! Per-request trace recording and delivery to the observability backend.

use std::sync::{
	Mutex,
	atomic::{AtomicBool, Ordering},
};

use serde::Serialize;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::BoxFuture;
use medrag_config::Observability;
use medrag_domain::guardrail::{GuardrailResult, GuardrailSummary};
use medrag_providers::{
	llm::TokenUsage,
	opik::{
		DatasetItem, ErrorInfo, FeedbackScore, OpikClient, SpanKind, SpanRecord, TraceRecord,
	},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreTarget {
	Trace,
	Span,
}

/// Sink for finished traces, spans, feedback scores, and optimization dataset items.
pub trait Telemetry
where
	Self: Send + Sync,
{
	fn record_trace<'a>(&'a self, trace: &'a TraceRecord) -> BoxFuture<'a, color_eyre::Result<()>>;

	fn record_spans<'a>(&'a self, spans: &'a [SpanRecord])
	-> BoxFuture<'a, color_eyre::Result<()>>;

	fn record_scores<'a>(
		&'a self,
		target: ScoreTarget,
		scores: &'a [FeedbackScore],
	) -> BoxFuture<'a, color_eyre::Result<()>>;

	fn record_dataset_items<'a>(
		&'a self,
		dataset: &'a str,
		items: &'a [DatasetItem],
	) -> BoxFuture<'a, color_eyre::Result<()>>;

	fn dataset_items<'a>(
		&'a self,
		dataset: &'a str,
		limit: usize,
	) -> BoxFuture<'a, color_eyre::Result<Vec<DatasetItem>>>;
}

pub struct NoopTelemetry;
impl Telemetry for NoopTelemetry {
	fn record_trace<'a>(&'a self, _trace: &'a TraceRecord) -> BoxFuture<'a, color_eyre::Result<()>> {
		Box::pin(async { Ok(()) })
	}

	fn record_spans<'a>(
		&'a self,
		_spans: &'a [SpanRecord],
	) -> BoxFuture<'a, color_eyre::Result<()>> {
		Box::pin(async { Ok(()) })
	}

	fn record_scores<'a>(
		&'a self,
		_target: ScoreTarget,
		_scores: &'a [FeedbackScore],
	) -> BoxFuture<'a, color_eyre::Result<()>> {
		Box::pin(async { Ok(()) })
	}

	fn record_dataset_items<'a>(
		&'a self,
		_dataset: &'a str,
		_items: &'a [DatasetItem],
	) -> BoxFuture<'a, color_eyre::Result<()>> {
		Box::pin(async { Ok(()) })
	}

	fn dataset_items<'a>(
		&'a self,
		_dataset: &'a str,
		_limit: usize,
	) -> BoxFuture<'a, color_eyre::Result<Vec<DatasetItem>>> {
		Box::pin(async { Ok(Vec::new()) })
	}
}

pub struct OpikTelemetry {
	client: OpikClient,
	dataset_ready: AtomicBool,
}
impl OpikTelemetry {
	pub fn new(cfg: &Observability) -> color_eyre::Result<Self> {
		Ok(Self { client: OpikClient::new(cfg)?, dataset_ready: AtomicBool::new(false) })
	}
}

impl Telemetry for OpikTelemetry {
	fn record_trace<'a>(&'a self, trace: &'a TraceRecord) -> BoxFuture<'a, color_eyre::Result<()>> {
		Box::pin(self.client.create_traces(std::slice::from_ref(trace)))
	}

	fn record_spans<'a>(
		&'a self,
		spans: &'a [SpanRecord],
	) -> BoxFuture<'a, color_eyre::Result<()>> {
		Box::pin(self.client.create_spans(spans))
	}

	fn record_scores<'a>(
		&'a self,
		target: ScoreTarget,
		scores: &'a [FeedbackScore],
	) -> BoxFuture<'a, color_eyre::Result<()>> {
		match target {
			ScoreTarget::Trace => Box::pin(self.client.score_traces(scores)),
			ScoreTarget::Span => Box::pin(self.client.score_spans(scores)),
		}
	}

	fn record_dataset_items<'a>(
		&'a self,
		dataset: &'a str,
		items: &'a [DatasetItem],
	) -> BoxFuture<'a, color_eyre::Result<()>> {
		Box::pin(async move {
			if !self.dataset_ready.load(Ordering::Relaxed) {
				self.client.ensure_dataset(dataset).await?;
				self.dataset_ready.store(true, Ordering::Relaxed);
			}

			self.client.insert_dataset_items(dataset, items).await
		})
	}

	fn dataset_items<'a>(
		&'a self,
		dataset: &'a str,
		limit: usize,
	) -> BoxFuture<'a, color_eyre::Result<Vec<DatasetItem>>> {
		Box::pin(self.client.dataset_items(dataset, limit))
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackingStatus {
	pub enabled: bool,
	pub api_key_set: bool,
	pub workspace_set: bool,
	pub project_name: String,
}
impl TrackingStatus {
	pub fn from_config(cfg: &Observability) -> Self {
		Self {
			enabled: cfg.tracking_enabled,
			api_key_set: cfg.api_key.is_some(),
			workspace_set: cfg.workspace.is_some(),
			project_name: cfg.project_name.clone(),
		}
	}
}

/// `prompt_tokens / 1000 * prompt_price + completion_tokens / 1000 * completion_price`.
pub fn estimate_cost(usage: TokenUsage, prompt_price_per_1k: f64, completion_price_per_1k: f64) -> f64 {
	usage.prompt_tokens as f64 / 1_000.0 * prompt_price_per_1k
		+ usage.completion_tokens as f64 / 1_000.0 * completion_price_per_1k
}

/// Collects the spans and scores of one request. Spans may finish concurrently.
pub struct Trace {
	id: Uuid,
	root_span_id: Uuid,
	project_name: String,
	prompt_price_per_1k: f64,
	completion_price_per_1k: f64,
	started: OffsetDateTime,
	spans: Mutex<Vec<SpanRecord>>,
	scores: Mutex<Vec<(ScoreTarget, FeedbackScore)>>,
	input: Mutex<Option<Value>>,
	guardrails: Mutex<GuardrailSummary>,
}
impl Trace {
	pub fn new(cfg: &Observability) -> Self {
		Self {
			id: Uuid::now_v7(),
			root_span_id: Uuid::now_v7(),
			project_name: cfg.project_name.clone(),
			prompt_price_per_1k: cfg.prompt_price_per_1k,
			completion_price_per_1k: cfg.completion_price_per_1k,
			started: OffsetDateTime::now_utc(),
			spans: Mutex::new(Vec::new()),
			scores: Mutex::new(Vec::new()),
			input: Mutex::new(None),
			guardrails: Mutex::new(GuardrailSummary::default()),
		}
	}

	pub fn id(&self) -> Uuid {
		self.id
	}

	pub fn root_span_id(&self) -> Uuid {
		self.root_span_id
	}

	pub fn span(&self, name: &str, kind: SpanKind, input: Value) -> OpenSpan {
		OpenSpan {
			id: Uuid::now_v7(),
			name: name.to_string(),
			kind,
			started: OffsetDateTime::now_utc(),
			input,
			metadata: Map::new(),
			tags: Vec::new(),
			usage: None,
			model: None,
			error: None,
		}
	}

	pub fn score(&self, target: ScoreTarget, id: Uuid, name: &str, value: f64, reason: Option<String>) {
		let mut score = FeedbackScore::new(id, &self.project_name, name, value);

		score.reason = reason;

		self.scores.lock().unwrap_or_else(|err| err.into_inner()).push((target, score));
	}

	/// Sets the trace input. Only text that passed the input guardrail belongs here.
	pub fn record_input(&self, input: Value) {
		*self.input.lock().unwrap_or_else(|err| err.into_inner()) = Some(input);
	}

	pub fn input(&self) -> Option<Value> {
		self.input.lock().unwrap_or_else(|err| err.into_inner()).clone()
	}

	pub fn record_guardrails(&self, results: &[GuardrailResult]) {
		self.guardrails.lock().unwrap_or_else(|err| err.into_inner()).record(results);
	}

	pub fn guardrail_summary(&self) -> GuardrailSummary {
		*self.guardrails.lock().unwrap_or_else(|err| err.into_inner())
	}

	pub fn span_names(&self) -> Vec<String> {
		self.spans
			.lock()
			.unwrap_or_else(|err| err.into_inner())
			.iter()
			.map(|span| span.name.clone())
			.collect()
	}

	fn push(&self, span: SpanRecord) {
		self.spans.lock().unwrap_or_else(|err| err.into_inner()).push(span);
	}

	/// Sends the trace, its spans, and its scores. Delivery failures are logged and dropped.
	pub async fn flush(self, telemetry: &dyn Telemetry, summary: TraceSummary) {
		let ended = OffsetDateTime::now_utc();
		let root = SpanRecord {
			id: self.root_span_id,
			trace_id: self.id,
			parent_span_id: None,
			project_name: self.project_name.clone(),
			name: summary.name.clone(),
			kind: SpanKind::General,
			start_time: self.started,
			end_time: ended,
			input: summary.input.clone(),
			output: summary.output.clone(),
			metadata: summary.metadata.clone(),
			tags: summary.tags.clone(),
			usage: None,
			model: None,
			total_estimated_cost: None,
			error_info: summary.error.clone(),
		};
		let trace = TraceRecord {
			id: self.id,
			project_name: self.project_name.clone(),
			name: summary.name,
			start_time: self.started,
			end_time: ended,
			input: summary.input,
			output: summary.output,
			metadata: summary.metadata,
			tags: summary.tags,
		};
		let mut spans = self.spans.into_inner().unwrap_or_else(|err| err.into_inner());

		spans.insert(0, root);

		if let Err(err) = telemetry.record_trace(&trace).await {
			tracing::warn!(error = %err, trace_id = %trace.id, "Trace delivery failed.");

			return;
		}
		if let Err(err) = telemetry.record_spans(&spans).await {
			tracing::warn!(error = %err, trace_id = %trace.id, "Span delivery failed.");
		}

		let scores = self.scores.into_inner().unwrap_or_else(|err| err.into_inner());

		for target in [ScoreTarget::Trace, ScoreTarget::Span] {
			let batch: Vec<FeedbackScore> = scores
				.iter()
				.filter(|(candidate, _)| *candidate == target)
				.map(|(_, score)| score.clone())
				.collect();

			if batch.is_empty() {
				continue;
			}
			if let Err(err) = telemetry.record_scores(target, &batch).await {
				tracing::warn!(error = %err, trace_id = %trace.id, "Feedback score delivery failed.");
			}
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct TraceSummary {
	pub name: String,
	pub input: Value,
	pub output: Value,
	pub metadata: Map<String, Value>,
	pub tags: Vec<String>,
	pub error: Option<ErrorInfo>,
}

/// A span that has started but not finished.
pub struct OpenSpan {
	id: Uuid,
	name: String,
	kind: SpanKind,
	started: OffsetDateTime,
	input: Value,
	metadata: Map<String, Value>,
	tags: Vec<String>,
	usage: Option<TokenUsage>,
	model: Option<String>,
	error: Option<ErrorInfo>,
}
impl OpenSpan {
	pub fn id(&self) -> Uuid {
		self.id
	}

	pub fn meta(&mut self, key: &str, value: impl Into<Value>) {
		self.metadata.insert(key.to_string(), value.into());
	}

	pub fn extend_meta(&mut self, metadata: Map<String, Value>) {
		self.metadata.extend(metadata);
	}

	pub fn tags<I>(&mut self, tags: I)
	where
		I: IntoIterator<Item = String>,
	{
		self.tags.extend(tags);
	}

	pub fn usage(&mut self, usage: Option<TokenUsage>, model: &str) {
		self.usage = usage;
		self.model = Some(model.to_string());
	}

	pub fn fail(&mut self, kind: &str, err: &dyn std::fmt::Display) {
		self.error = Some(ErrorInfo { exception_type: kind.to_string(), message: err.to_string() });
	}

	pub fn finish(self, trace: &Trace, output: Value) {
		let total_estimated_cost = self.usage.map(|usage| {
			estimate_cost(usage, trace.prompt_price_per_1k, trace.completion_price_per_1k)
		});

		if let Some(cost) = total_estimated_cost {
			tracing::debug!(span = %self.name, cost, "Span cost estimated.");
		}

		trace.push(SpanRecord {
			id: self.id,
			trace_id: trace.id,
			parent_span_id: Some(trace.root_span_id),
			project_name: trace.project_name.clone(),
			name: self.name,
			kind: self.kind,
			start_time: self.started,
			end_time: OffsetDateTime::now_utc(),
			input: self.input,
			output,
			metadata: self.metadata,
			tags: self.tags,
			usage: self.usage.map(Into::into),
			model: self.model,
			total_estimated_cost,
			error_info: self.error,
		});
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn cost_uses_per_thousand_prices() {
		let usage = TokenUsage { prompt_tokens: 2_000, completion_tokens: 1_000 };
		let cost = estimate_cost(usage, 0.0005, 0.000_009);

		assert!((cost - 0.001_009).abs() < 1e-12);
	}

	#[test]
	fn finished_spans_attach_to_the_root() {
		let trace = Trace::new(&Observability::default());
		let mut span = trace.span("answer_question", SpanKind::Llm, Value::Null);

		span.usage(Some(TokenUsage { prompt_tokens: 1_000, completion_tokens: 0 }), "m");
		span.finish(&trace, Value::Null);

		let spans = trace.spans.lock().unwrap_or_else(|err| err.into_inner());

		assert_eq!(spans[0].parent_span_id, Some(trace.root_span_id()));
		assert_eq!(spans[0].total_estimated_cost, Some(0.0005));
	}
}
