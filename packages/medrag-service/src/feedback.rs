use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{RagService, telemetry::ScoreTarget};
use medrag_providers::opik::FeedbackScore;

pub const USER_FEEDBACK_SCORE: &str = "user_feedback";

#[derive(Debug, Clone, Deserialize)]
pub struct FeedbackRequest {
	pub trace_id: String,
	pub span_id: Option<String>,
	pub thumbs_up: bool,
	pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackResponse {
	pub submitted: bool,
}

impl RagService {
	/// Attaches a thumbs-up (1) or thumbs-down (0) score to a trace and, when given, its span.
	///
	/// Unknown identifiers and delivery failures are logged and reported as not submitted.
	pub async fn submit_feedback(&self, req: FeedbackRequest) -> FeedbackResponse {
		if !self.cfg.observability.tracking_enabled {
			tracing::info!("Tracking disabled. Feedback not submitted.");

			return FeedbackResponse { submitted: false };
		}

		let Some(trace_id) = parse_id("trace_id", &req.trace_id) else {
			return FeedbackResponse { submitted: false };
		};
		let span_id = req.span_id.as_deref().and_then(|raw| parse_id("span_id", raw));
		let project = &self.cfg.observability.project_name;
		let value = if req.thumbs_up { 1.0 } else { 0.0 };
		let score = |id: Uuid| {
			let score = FeedbackScore::new(id, project, USER_FEEDBACK_SCORE, value);

			match req.reason.as_deref().map(str::trim).filter(|reason| !reason.is_empty()) {
				Some(reason) => score.with_reason(reason),
				None => score,
			}
		};
		let trace_scores = [score(trace_id)];

		if let Err(err) = self.telemetry.record_scores(ScoreTarget::Trace, &trace_scores).await {
			tracing::warn!(error = %err, %trace_id, "Feedback delivery failed.");

			return FeedbackResponse { submitted: false };
		}
		if let Some(span_id) = span_id {
			let span_scores = [score(span_id)];

			if let Err(err) = self.telemetry.record_scores(ScoreTarget::Span, &span_scores).await {
				tracing::warn!(error = %err, %span_id, "Span feedback delivery failed.");
			}
		}

		tracing::info!(%trace_id, thumbs_up = req.thumbs_up, "Feedback submitted.");

		FeedbackResponse { submitted: true }
	}
}

fn parse_id(field: &'static str, raw: &str) -> Option<Uuid> {
	match Uuid::parse_str(raw.trim()) {
		Ok(id) => Some(id),
		Err(_) => {
			tracing::warn!(field, value = raw, "Feedback identifier is not a UUID. Skipping.");

			None
		},
	}
}
