//! Sampled quality metrics: a heuristic entity check plus LLM-judge scores over the final answer.

use serde::Serialize;

use crate::{
	RagService,
	functions::{self, JudgeVerdict, LlmFunction},
	telemetry::{ScoreTarget, Trace},
};
use medrag_domain::entity::Entity;
use medrag_providers::opik::SpanKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
	Hallucination,
	AnswerRelevance,
	Moderation,
	Usefulness,
	/// Fraction of extracted entity values that appear in the final answer.
	Contains,
}
impl MetricKind {
	pub const JUDGED: [Self; 4] =
		[Self::Hallucination, Self::AnswerRelevance, Self::Moderation, Self::Usefulness];

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Hallucination => "hallucination",
			Self::AnswerRelevance => "answer_relevance",
			Self::Moderation => "moderation",
			Self::Usefulness => "usefulness",
			Self::Contains => "contains",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		match raw {
			"hallucination" => Some(Self::Hallucination),
			"answer_relevance" => Some(Self::AnswerRelevance),
			"moderation" => Some(Self::Moderation),
			"usefulness" => Some(Self::Usefulness),
			"contains" => Some(Self::Contains),
			_ => None,
		}
	}

	/// Hallucination is the only metric where a lower score is better.
	pub fn lower_is_better(self) -> bool {
		self == Self::Hallucination
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricResult {
	pub name: &'static str,
	pub value: f64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub reason: Option<String>,
}

/// One Bernoulli draw at `rate`. Rates at or below zero never sample; at or above one always do.
pub fn should_sample(rate: f64) -> bool {
	if rate <= 0.0 || rate.is_nan() {
		return false;
	}
	if rate >= 1.0 {
		return true;
	}

	rand::random::<f64>() < rate
}

pub fn clamp_score(metric: MetricKind, value: f64) -> f64 {
	if value.is_nan() {
		tracing::warn!(metric = metric.as_str(), "Metric score is NaN. Using 0.");

		return 0.0;
	}
	if !(0.0..=1.0).contains(&value) {
		let clamped = value.clamp(0.0, 1.0);

		tracing::warn!(metric = metric.as_str(), value, clamped, "Metric score clamped.");

		return clamped;
	}

	value
}

/// Case-insensitive share of entity values found in `text`. No entities scores 0.
pub fn contains_score(text: &str, entities: &[Entity]) -> f64 {
	if entities.is_empty() {
		return 0.0;
	}

	let haystack = text.to_lowercase();
	let hits = entities
		.iter()
		.filter(|entity| {
			let needle = entity.value.trim().to_lowercase();

			!needle.is_empty() && haystack.contains(&needle)
		})
		.count();

	hits as f64 / entities.len() as f64
}

pub(crate) struct JudgeInput<'a> {
	pub(crate) span_id: uuid::Uuid,
	pub(crate) input: &'a str,
	pub(crate) output: &'a str,
	pub(crate) context: &'a str,
	pub(crate) entities: &'a [Entity],
}

impl RagService {
	/// Scores a synthesized answer when tracking is on and this call is sampled: Contains against
	/// the extracted entities, then the judge metrics. Judge failures are logged and skipped.
	pub(crate) async fn record_answer_metrics(
		&self,
		trace: &Trace,
		input: JudgeInput<'_>,
	) -> Vec<MetricResult> {
		let obs = &self.cfg.observability;

		if !obs.tracking_enabled || !should_sample(obs.metrics_sample_rate) {
			return Vec::new();
		}

		let mut results = Vec::with_capacity(MetricKind::JUDGED.len() + 1);
		let contains = MetricKind::Contains;
		let value = clamp_score(contains, contains_score(input.output, input.entities));

		trace.score(ScoreTarget::Span, input.span_id, contains.as_str(), value, None);
		trace.score(ScoreTarget::Trace, trace.id(), contains.as_str(), value, None);
		results.push(MetricResult { name: contains.as_str(), value, reason: None });

		for metric in MetricKind::JUDGED {
			let call = functions::judge(metric, input.input, input.output, input.context);
			let mut span = trace.span(
				&format!("metric_{}", metric.as_str()),
				SpanKind::Llm,
				serde_json::json!({ "metric": metric.as_str() }),
			);
			let verdict = match self.providers.llm.complete(&self.cfg.providers.judge, &call).await {
				Ok(completion) => {
					span.usage(completion.usage, &completion.model);

					functions::decode::<JudgeVerdict>(LlmFunction::Judge, completion.content)
				},
				Err(err) => Err(err.into()),
			};

			match verdict {
				Ok(verdict) => {
					let value = clamp_score(metric, verdict.score);

					trace.score(
						ScoreTarget::Span,
						input.span_id,
						metric.as_str(),
						value,
						verdict.reason.clone(),
					);
					trace.score(
						ScoreTarget::Trace,
						trace.id(),
						metric.as_str(),
						value,
						verdict.reason.clone(),
					);
					span.finish(trace, serde_json::json!({ "score": value, "reason": verdict.reason }));
					results.push(MetricResult { name: metric.as_str(), value, reason: verdict.reason });
				},
				Err(err) => {
					tracing::warn!(metric = metric.as_str(), error = %err, "Judge metric failed.");

					span.fail("JudgeError", &err);
					span.finish(trace, serde_json::Value::Null);
				},
			}
		}

		results
	}
}
