//! Hybrid retrieval pipeline: schema pruning, entity extraction, concurrent graph and note
//! retrieval, synthesis, guardrails, and sampled metrics.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::Instrument;
use uuid::Uuid;

use crate::{
	Error, RagService, Result,
	functions::{self, Answer, CypherQuery, EntityList, LlmCall, LlmFunction, SynthesizedAnswer},
	metrics::JudgeInput,
	telemetry::{Trace, TraceSummary},
};
use medrag_domain::{
	context::{self, QueryRow},
	entity::{self, Entity},
	guardrail::{GuardrailReport, ValidationPhase},
	schema::GraphSchema,
};
use medrag_providers::opik::{ErrorInfo, SpanKind};

#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
	pub query: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
	pub response: String,
	pub vector_answer: String,
	pub graph_answer: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub trace_id: Option<Uuid>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub span_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetailedQueryResponse {
	#[serde(flatten)]
	pub answer: QueryResponse,
	pub pruned_schema: GraphSchema,
	pub entities: Vec<Entity>,
	pub cypher: String,
	pub graph_rows: Vec<QueryRow>,
	pub vector_context: String,
}

/// Output of the graph path.
#[derive(Debug, Clone)]
pub struct GraphPath {
	pub cypher: String,
	pub rows: Vec<QueryRow>,
	pub context: String,
	pub answer: String,
}

/// Output of the note path.
#[derive(Debug, Clone)]
pub struct VectorPath {
	pub context: String,
	pub answer: String,
}

struct PipelineRun {
	pruned_schema: GraphSchema,
	entities: Vec<Entity>,
	graph: GraphPath,
	vector: VectorPath,
	response: String,
}

impl RagService {
	pub async fn answer_query(&self, req: QueryRequest) -> Result<QueryResponse> {
		Ok(self.answer_query_detailed(req).await?.answer)
	}

	pub async fn answer_query_detailed(&self, req: QueryRequest) -> Result<DetailedQueryResponse> {
		let question = req.query.trim();

		if question.is_empty() {
			return Err(Error::InvalidRequest { message: "query must be non-empty.".to_string() });
		}

		let trace = Trace::new(&self.cfg.observability);
		let result = self
			.run_pipeline(&trace, question)
			.instrument(tracing::info_span!("rag_query", trace_id = %trace.id()))
			.await;
		let tracking = self.cfg.observability.tracking_enabled;
		let (trace_id, span_id) = (trace.id(), trace.root_span_id());

		if tracking {
			let summary = self.summarize(&trace, &result);

			trace.flush(self.telemetry.as_ref(), summary).await;
		}

		let run = result?;

		Ok(DetailedQueryResponse {
			answer: QueryResponse {
				response: run.response,
				vector_answer: run.vector.answer,
				graph_answer: run.graph.answer,
				trace_id: tracking.then_some(trace_id),
				span_id: tracking.then_some(span_id),
			},
			pruned_schema: run.pruned_schema,
			entities: run.entities,
			cypher: run.graph.cypher,
			graph_rows: run.graph.rows,
			vector_context: run.vector.context,
		})
	}

	/// Introspects the store schema and keeps the part the LLM selects for `question`.
	///
	/// Labels, relationships, and properties the store does not have are dropped, so the result
	/// is always a subset of the introspected schema.
	pub async fn prune_schema(&self, trace: &Trace, question: &str) -> Result<GraphSchema> {
		let full = self.stores.graph.schema().await?;
		let call = functions::prune_schema(&full.to_xml(), question);
		let (candidate, _) =
			self.run_llm(trace, "prune_schema", &call, Map::new(), functions::decode_schema).await?;
		let (pruned, dropped) = full.restrict(&candidate);

		if !dropped.is_empty() {
			tracing::warn!(dropped = ?dropped, "Pruned schema referenced unknown elements.");
		}

		tracing::debug!(
			nodes = pruned.nodes.len(),
			edges = pruned.edges.len(),
			"Schema pruned."
		);

		Ok(pruned)
	}

	pub async fn extract_entities(
		&self,
		trace: &Trace,
		question: &str,
		schema: &GraphSchema,
	) -> Result<Vec<Entity>> {
		let call = functions::extract_entity_keywords(question, &schema.to_xml());
		let (list, _) = self
			.run_llm(trace, "extract_entities", &call, Map::new(), |content| {
				functions::decode::<EntityList>(LlmFunction::ExtractEntityKeywords, content)
			})
			.await?;

		tracing::info!(count = list.entities.len(), "Entities extracted.");

		Ok(list.entities)
	}

	/// Generates Cypher, runs it, and answers from the rows. Query failures degrade to the
	/// `no rows` context.
	pub async fn graph_path(
		&self,
		trace: &Trace,
		question: &str,
		schema: &GraphSchema,
		entities: &[Entity],
	) -> Result<GraphPath> {
		let call = functions::text2cypher(question, &schema.to_xml(), &entity::search_string(entities));
		let (query, _) = self
			.run_llm(trace, "text2cypher", &call, Map::new(), |content| {
				functions::decode::<CypherQuery>(LlmFunction::Text2Cypher, content)
			})
			.await?;
		let cypher = query.cypher.trim().to_string();
		let rows = if cypher.is_empty() {
			tracing::info!("No Cypher generated. Using empty graph context.");

			Vec::new()
		} else {
			self.execute_cypher(trace, &cypher).await
		};
		let context = context::graph_context(&cypher, &rows);
		let answer = self.answer_question(trace, "graph_answer", question, &context).await?;

		Ok(GraphPath { cypher, rows, context, answer })
	}

	/// Note context for the entity search string. No entities means no embedding and no search.
	pub async fn vector_context(&self, trace: &Trace, entities: &[Entity]) -> Result<String> {
		let text = entity::search_string(entities);

		if text.trim().is_empty() {
			tracing::info!("No entities. Skipping note search.");

			return Ok(String::new());
		}

		let notes = &self.stores.notes;
		let mode = notes.mode();
		let vector = if mode.needs_vector() {
			let texts = vec![text.clone()];
			let mut vectors =
				self.providers.embedding.embed(&self.cfg.providers.embedding, &texts).await?;

			if vectors.is_empty() {
				return Err(Error::Provider {
					message: "Embedding provider returned no vectors.".to_string(),
				});
			}

			Some(vectors.swap_remove(0))
		} else {
			None
		};
		let mut span = trace.span(
			"note_search",
			SpanKind::Tool,
			serde_json::json!({ "text": text, "mode": mode.as_str() }),
		);
		let retrieval = &self.cfg.retrieval;
		let context = match notes
			.search(&text, vector.as_deref(), retrieval.top_k, retrieval.candidate_k)
			.await
		{
			Ok(hits) => {
				span.meta("hits", hits.len());
				span.meta(
					"record_ids",
					hits.iter().map(|hit| hit.record_id.clone()).collect::<Vec<_>>(),
				);

				context::notes_context(hits.iter().map(|hit| hit.note.as_str()))
			},
			Err(err) => {
				tracing::warn!(error = %err, "Note search failed. Using empty context.");

				span.fail("StorageError", &err);

				String::new()
			},
		};

		span.finish(trace, serde_json::json!({ "context": context }));

		Ok(context)
	}

	pub async fn answer_question(
		&self,
		trace: &Trace,
		span_name: &str,
		question: &str,
		context: &str,
	) -> Result<String> {
		let call = functions::answer_question(question, context);
		let (answer, _) = self
			.run_llm(trace, span_name, &call, Map::new(), |content| {
				functions::decode::<Answer>(LlmFunction::AnswerQuestion, content)
			})
			.await?;

		Ok(answer.answer)
	}

	/// Runs the graph path and the note path concurrently. The note answer starts as soon as its
	/// context is ready.
	pub async fn run_hybrid_rag(
		&self,
		trace: &Trace,
		question: &str,
		schema: &GraphSchema,
		entities: &[Entity],
	) -> Result<(GraphPath, VectorPath)> {
		let graph = self
			.graph_path(trace, question, schema, entities)
			.instrument(tracing::info_span!("graph_path"));
		let vector = async {
			let context = self.vector_context(trace, entities).await?;
			let answer = self.answer_question(trace, "vector_answer", question, &context).await?;

			Ok::<_, Error>(VectorPath { context, answer })
		}
		.instrument(tracing::info_span!("vector_path"));

		tokio::try_join!(graph, vector)
	}

	/// Merges both path answers. Returns the answer and the synthesis span id.
	pub async fn synthesize(
		&self,
		trace: &Trace,
		question: &str,
		vector_answer: &str,
		graph_answer: &str,
	) -> Result<(String, Uuid)> {
		let agreement = context::answer_agreement(vector_answer, graph_answer);
		let mut metadata = Map::new();

		metadata.insert("answer_agreement".to_string(), agreement.into());

		tracing::debug!(agreement, "Path answers compared.");

		let call = functions::synthesize_answers(question, vector_answer, graph_answer);
		let (answer, span_id) = self
			.run_llm(trace, "synthesize", &call, metadata, |content| {
				functions::decode::<SynthesizedAnswer>(LlmFunction::SynthesizeAnswers, content)
			})
			.await?;

		Ok((answer.answer, span_id))
	}

	async fn run_pipeline(&self, trace: &Trace, raw_question: &str) -> Result<PipelineRun> {
		let mut question = raw_question.to_string();

		self.guard(trace, ValidationPhase::Input, &mut [&mut question])?;
		trace.record_input(serde_json::json!({ "query": question }));

		let pruned_schema = self
			.prune_schema(trace, &question)
			.instrument(tracing::info_span!("prune_schema"))
			.await?;
		let entities = self
			.extract_entities(trace, &question, &pruned_schema)
			.instrument(tracing::info_span!("extract_entities"))
			.await?;
		let (graph, vector) =
			self.run_hybrid_rag(trace, &question, &pruned_schema, &entities).await?;
		let (answer, synthesis_span) = self
			.synthesize(trace, &question, &vector.answer, &graph.answer)
			.instrument(tracing::info_span!("synthesize"))
			.await?;
		let mut run = PipelineRun { pruned_schema, entities, graph, vector, response: answer };

		self.guard_outputs(trace, &mut run)?;

		let judge_context = format!("{}\n\n{}", run.vector.context, run.graph.context);
		let metrics = self
			.record_answer_metrics(trace, JudgeInput {
				span_id: synthesis_span,
				input: &question,
				output: &run.response,
				context: &judge_context,
				entities: &run.entities,
			})
			.instrument(tracing::info_span!("metrics"))
			.await;

		if !metrics.is_empty() {
			tracing::info!(count = metrics.len(), "Answer metrics recorded.");

			self.collect_for_optimization(trace, &question, &run.response, &metrics).await;
		}

		Ok(run)
	}

	async fn execute_cypher(&self, trace: &Trace, cypher: &str) -> Vec<QueryRow> {
		let mut span =
			trace.span("graph_query", SpanKind::Tool, serde_json::json!({ "cypher": cypher }));
		let rows = match self.stores.graph.query(cypher).await {
			Ok(rows) => {
				span.meta("rows", rows.len());

				rows
			},
			Err(err) => {
				tracing::warn!(error = %err, "Graph query failed. Using empty result.");

				span.fail("StorageError", &err);

				Vec::new()
			},
		};

		span.finish(trace, serde_json::json!({ "rows": rows }));

		rows
	}

	/// Masks or blocks every client-visible text the run produced. Path answers, contexts, and
	/// graph rows go through the same output pass as the synthesized response.
	fn guard_outputs(&self, trace: &Trace, run: &mut PipelineRun) -> Result<()> {
		let PipelineRun { entities, graph, vector, response, .. } = run;
		let mut texts: Vec<&mut String> = vec![
			response,
			&mut vector.answer,
			&mut graph.answer,
			&mut vector.context,
			&mut graph.context,
			&mut graph.cypher,
		];

		texts.extend(entities.iter_mut().map(|entity| &mut entity.value));

		for row in graph.rows.iter_mut() {
			for value in row.values_mut() {
				string_leaves(value, &mut texts);
			}
		}

		self.guard(trace, ValidationPhase::Output, &mut texts)
	}

	/// Applies one phase's guardrails to each text in place. A BLOCK on any text blocks the pass.
	fn guard(&self, trace: &Trace, phase: ValidationPhase, texts: &mut [&mut String]) -> Result<()> {
		let Some(manager) = self.guardrails.as_ref() else {
			return Ok(());
		};
		let mut span = trace.span(
			&format!("{}_guardrail", phase.as_str()),
			SpanKind::Guardrail,
			serde_json::json!({ "phase": phase.as_str(), "texts": texts.len() }),
		);
		let mut results = Vec::new();
		let mut report: Option<GuardrailReport> = None;
		let mut masked = 0_usize;

		for text in texts.iter_mut().filter(|text| !text.is_empty()) {
			match manager.check(text.as_str(), phase) {
				Ok(outcome) => {
					results.extend(outcome.results);
					merge_report(&mut report, outcome.report);

					if outcome.masked {
						masked += 1;
						**text = outcome.text;
					}
				},
				Err(blocked) => {
					results.extend(blocked.results.iter().cloned());
					trace.record_guardrails(&results);
					span.extend_meta(blocked.report.metadata.clone());
					span.tags(blocked.report.tags.clone());
					span.fail("GuardrailBlocked", &blocked);
					span.finish(trace, serde_json::json!({ "result": blocked.result }));

					return Err(blocked.into());
				},
			}
		}

		trace.record_guardrails(&results);

		if let Some(report) = report {
			span.extend_meta(report.metadata);
			span.tags(report.tags);
		}

		let mut entities: Vec<&str> = Vec::new();

		for entity in results.iter().flat_map(|result| &result.entities_found) {
			if !entities.contains(&entity.as_str()) {
				entities.push(entity);
			}
		}

		span.meta("entities_found", entities);
		span.meta("masking_applied", masked > 0);
		span.meta("texts_masked", masked);
		span.finish(trace, serde_json::json!({ "masked": masked > 0 }));

		Ok(())
	}

	async fn run_llm<T, F>(
		&self,
		trace: &Trace,
		span_name: &str,
		call: &LlmCall,
		metadata: Map<String, Value>,
		decode: F,
	) -> Result<(T, Uuid)>
	where
		F: FnOnce(Value) -> Result<T>,
	{
		let mut span = trace.span(
			span_name,
			SpanKind::Llm,
			serde_json::json!({ "function": call.function.as_str(), "prompt": call.user_text() }),
		);

		span.extend_meta(metadata);

		let completion = match self.complete(call).await {
			Ok(completion) => completion,
			Err(err) => {
				span.fail("ProviderError", &err);
				span.finish(trace, Value::Null);

				return Err(err);
			},
		};

		span.usage(completion.usage, &completion.model);

		let id = span.id();
		let output = completion.content.clone();

		match decode(completion.content) {
			Ok(value) => {
				span.finish(trace, output);

				Ok((value, id))
			},
			Err(err) => {
				span.fail("DecodeError", &err);
				span.finish(trace, output);

				Err(err)
			},
		}
	}

	/// The trace input is the guarded question. A request blocked at input records no question.
	fn summarize(&self, trace: &Trace, result: &Result<PipelineRun>) -> TraceSummary {
		let mut metadata = Map::new();

		metadata.insert("search_mode".to_string(), self.stores.notes.mode().as_str().into());
		metadata.insert("guardrails_enabled".to_string(), self.guardrails.is_some().into());

		if self.guardrails.is_some() {
			metadata
				.insert("guardrail_summary".to_string(), serde_json::json!(trace.guardrail_summary()));
		}

		let mut summary = TraceSummary {
			name: "hybrid_rag".to_string(),
			input: trace.input().unwrap_or(Value::Null),
			metadata,
			tags: vec!["rag".to_string()],
			..Default::default()
		};

		match result {
			Ok(run) => {
				summary.output = serde_json::json!({
					"response": run.response,
					"vector_answer": run.vector.answer,
					"graph_answer": run.graph.answer,
				});
			},
			Err(err) => {
				summary.error = Some(ErrorInfo {
					exception_type: err.code().to_string(),
					message: err.to_string(),
				});

				if matches!(err, Error::GuardrailBlocked { .. }) {
					summary.tags.push("blocked".to_string());
				}
			},
		}

		summary
	}
}

fn merge_report(merged: &mut Option<GuardrailReport>, next: GuardrailReport) {
	match merged {
		Some(report) =>
			for tag in next.tags {
				if !report.tags.contains(&tag) {
					report.tags.push(tag);
				}
			},
		None => *merged = Some(next),
	}
}

fn string_leaves<'a>(value: &'a mut Value, out: &mut Vec<&'a mut String>) {
	match value {
		Value::String(text) => out.push(text),
		Value::Array(items) =>
			for item in items {
				string_leaves(item, out);
			},
		Value::Object(map) =>
			for item in map.values_mut() {
				string_leaves(item, out);
			},
		_ => {},
	}
}
