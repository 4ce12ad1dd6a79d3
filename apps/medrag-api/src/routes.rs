use axum::{
	Json, Router,
	extract::{State, rejection::JsonRejection},
	http::StatusCode,
	response::{IntoResponse, Response},
	routing::{get, post},
};
use serde::Serialize;

use crate::state::AppState;
use medrag_service::{
	DetailedQueryResponse, Error as ServiceError, FeedbackRequest, FeedbackResponse, QueryRequest,
	QueryResponse, TrackingStatus,
};

pub const REFUSAL_MESSAGE: &str =
	"This request cannot be processed because it contains restricted content.";

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/v1/query", post(query))
		.route("/v1/query/detailed", post(query_detailed))
		.route("/v1/feedback", post(feedback))
		.route("/v1/observability/status", get(observability_status))
		.with_state(state)
}

async fn health() -> StatusCode {
	StatusCode::OK
}

async fn query(
	State(state): State<AppState>,
	payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, ApiError> {
	let Json(payload) = payload?;
	let response = state.service.answer_query(payload).await?;

	Ok(Json(response))
}

async fn query_detailed(
	State(state): State<AppState>,
	payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<DetailedQueryResponse>, ApiError> {
	let Json(payload) = payload?;
	let response = state.service.answer_query_detailed(payload).await?;

	Ok(Json(response))
}

async fn feedback(
	State(state): State<AppState>,
	payload: Result<Json<FeedbackRequest>, JsonRejection>,
) -> Result<Json<FeedbackResponse>, ApiError> {
	let Json(payload) = payload?;

	Ok(Json(state.service.submit_feedback(payload).await))
}

async fn observability_status(State(state): State<AppState>) -> Json<TrackingStatus> {
	Json(state.service.tracking_status())
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error_code: String,
	message: String,
	fields: Option<Vec<String>>,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	error_code: String,
	message: String,
	fields: Option<Vec<String>>,
}
impl ApiError {
	fn new(
		status: StatusCode,
		error_code: impl Into<String>,
		message: impl Into<String>,
		fields: Option<Vec<String>>,
	) -> Self {
		Self { status, error_code: error_code.into(), message: message.into(), fields }
	}
}

impl From<ServiceError> for ApiError {
	fn from(err: ServiceError) -> Self {
		let code = err.code();

		match err {
			ServiceError::InvalidRequest { message } =>
				Self::new(StatusCode::BAD_REQUEST, code, message, Some(vec!["$.query".to_string()])),
			ServiceError::GuardrailBlocked { result } => {
				tracing::info!(reason = %result.message, "Request refused by guardrail.");

				Self::new(
					StatusCode::UNPROCESSABLE_ENTITY,
					code,
					REFUSAL_MESSAGE,
					Some(vec![result.message]),
				)
			},
			ServiceError::Provider { message } | ServiceError::Storage { message } => {
				tracing::error!(error_code = code, %message, "Upstream failure.");

				Self::new(StatusCode::BAD_GATEWAY, code, message, None)
			},
			ServiceError::Config { message } =>
				Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, message, None),
		}
	}
}

impl From<JsonRejection> for ApiError {
	fn from(rejection: JsonRejection) -> Self {
		Self::new(StatusCode::BAD_REQUEST, "INVALID_REQUEST", rejection.body_text(), None)
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body =
			ErrorBody { error_code: self.error_code, message: self.message, fields: self.fields };

		(self.status, Json(body)).into_response()
	}
}
