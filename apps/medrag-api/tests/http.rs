use std::sync::Arc;

use axum::{
	Router,
	body::{self, Body},
	http::{Request, StatusCode},
};
use serde_json::{Value, json};
use tower::util::ServiceExt;

use medrag_api::{routes, state::AppState};
use medrag_config::Config;
use medrag_service::{Providers, RagService, Stores, functions::LlmFunction};
use medrag_testkit::{
	FixtureGraph, RecordingTelemetry, ScriptedLlm, SpyNoteIndex, StubEmbedding, patient_schema, row,
	test_config,
};

fn scripted_llm() -> ScriptedLlm {
	ScriptedLlm::new()
		.with_json(
			LlmFunction::PruneSchema,
			json!({ "nodes": [{ "label": "Patient", "properties": [] }], "edges": [] }),
		)
		.with_json(
			LlmFunction::ExtractEntityKeywords,
			json!({ "entities": [{ "key": "lastName", "value": "Rosenbaum" }] }),
		)
		.with_json(
			LlmFunction::Text2Cypher,
			json!({ "cypher": "MATCH (p:Patient {lastName: 'Rosenbaum'}) RETURN count(p) AS patients" }),
		)
		.with_json(LlmFunction::AnswerQuestion, json!({ "answer": "One patient." }))
		.with_json(LlmFunction::SynthesizeAnswers, json!({ "answer": "There is one patient." }))
}

fn app_with(cfg: Config, llm: ScriptedLlm) -> Router {
	let service = RagService::with_parts(
		cfg,
		Stores::new(
			Arc::new(FixtureGraph::new(patient_schema(), vec![row(json!({ "patients": 1 }))])),
			Arc::new(SpyNoteIndex::new(&["Rosenbaum received two vaccines."])),
		),
		Providers::new(Arc::new(llm), Arc::new(StubEmbedding::default())),
		Arc::new(RecordingTelemetry::default()),
	);

	routes::router(AppState::from_service(service))
}

fn app() -> Router {
	app_with(test_config(), scripted_llm())
}

fn post(uri: &str, payload: Value) -> Request<Body> {
	Request::builder()
		.method("POST")
		.uri(uri)
		.header("content-type", "application/json")
		.body(Body::from(payload.to_string()))
		.expect("Failed to build request.")
}

async fn read_json(response: axum::response::Response) -> Value {
	let body = body::to_bytes(response.into_body(), usize::MAX)
		.await
		.expect("Failed to read response body.");

	serde_json::from_slice(&body).expect("Failed to parse response.")
}

#[tokio::test]
async fn health_ok() {
	let response = app()
		.oneshot(Request::builder().uri("/health").body(Body::empty()).expect("Failed to build request."))
		.await
		.expect("Failed to call /health.");

	assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn query_returns_answers_and_trace_ids() {
	let response = app()
		.oneshot(post("/v1/query", json!({ "query": "How many patients named Rosenbaum?" })))
		.await
		.expect("Failed to call /v1/query.");

	assert_eq!(response.status(), StatusCode::OK);

	let json = read_json(response).await;

	assert_eq!(json["response"], "There is one patient.");
	assert_eq!(json["graph_answer"], "One patient.");
	assert!(json["trace_id"].is_string());
	assert!(json.get("cypher").is_none());
}

#[tokio::test]
async fn detailed_query_exposes_intermediate_artifacts() {
	let response = app()
		.oneshot(post("/v1/query/detailed", json!({ "query": "How many patients named Rosenbaum?" })))
		.await
		.expect("Failed to call /v1/query/detailed.");

	assert_eq!(response.status(), StatusCode::OK);

	let json = read_json(response).await;

	assert_eq!(json["pruned_schema"]["nodes"][0]["label"], "Patient");
	assert_eq!(json["entities"][0]["value"], "Rosenbaum");
	assert_eq!(json["graph_rows"][0]["patients"], 1);
	assert!(json["cypher"].as_str().is_some_and(|cypher| cypher.starts_with("MATCH")));
	assert_eq!(json["vector_context"], "Rosenbaum received two vaccines.");
}

#[tokio::test]
async fn blank_query_is_a_bad_request() {
	let response = app()
		.oneshot(post("/v1/query", json!({ "query": " " })))
		.await
		.expect("Failed to call /v1/query.");

	assert_eq!(response.status(), StatusCode::BAD_REQUEST);
	assert_eq!(read_json(response).await["error_code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn malformed_body_is_a_bad_request() {
	let response = app()
		.oneshot(post("/v1/query", json!({ "question": "wrong field" })))
		.await
		.expect("Failed to call /v1/query.");

	assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn guardrail_block_is_refused() {
	let mut cfg = test_config();

	cfg.guardrails.email.action = "block".to_string();

	let response = app_with(cfg, scripted_llm())
		.oneshot(post("/v1/query", json!({ "query": "Send it to someone@tempmail.com" })))
		.await
		.expect("Failed to call /v1/query.");

	assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

	let json = read_json(response).await;

	assert_eq!(json["error_code"], "GUARDRAIL_BLOCKED");
	assert_eq!(json["message"], routes::REFUSAL_MESSAGE);
}

#[tokio::test]
async fn llm_failure_is_a_bad_gateway() {
	let response = app_with(test_config(), ScriptedLlm::new())
		.oneshot(post("/v1/query", json!({ "query": "How many patients?" })))
		.await
		.expect("Failed to call /v1/query.");

	assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
	assert_eq!(read_json(response).await["error_code"], "PROVIDER_ERROR");
}

#[tokio::test]
async fn feedback_with_unknown_trace_is_not_submitted() {
	let response = app()
		.oneshot(post("/v1/feedback", json!({ "trace_id": "abc", "thumbs_up": true })))
		.await
		.expect("Failed to call /v1/feedback.");

	assert_eq!(response.status(), StatusCode::OK);
	assert_eq!(read_json(response).await["submitted"], false);
}

#[tokio::test]
async fn observability_status_reports_credentials() {
	let response = app()
		.oneshot(
			Request::builder()
				.uri("/v1/observability/status")
				.body(Body::empty())
				.expect("Failed to build request."),
		)
		.await
		.expect("Failed to call /v1/observability/status.");
	let json = read_json(response).await;

	assert_eq!(json["enabled"], true);
	assert_eq!(json["api_key_set"], false);
	assert_eq!(json["workspace_set"], false);
}
