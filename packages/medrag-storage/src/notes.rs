//! Clinical note index on Qdrant with dense and BM25 named vectors.

use std::{collections::HashMap, time::Instant};

use qdrant_client::{
	Qdrant,
	qdrant::{
		Document, Fusion, PrefetchQueryBuilder, Query, QueryPoints, QueryPointsBuilder,
		ScoredPoint, Value, value::Kind,
	},
};

use crate::{Error, Result};

pub const DENSE_VECTOR_NAME: &str = "dense";
pub const BM25_VECTOR_NAME: &str = "bm25";
pub const BM25_MODEL: &str = "qdrant/bm25";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
	/// Dense and BM25 prefetch merged with reciprocal rank fusion.
	Hybrid,
	Vector,
	Keyword,
}
impl SearchMode {
	pub fn parse(raw: &str) -> Option<Self> {
		match raw {
			"hybrid" => Some(Self::Hybrid),
			"vector" => Some(Self::Vector),
			"keyword" => Some(Self::Keyword),
			_ => None,
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Hybrid => "hybrid",
			Self::Vector => "vector",
			Self::Keyword => "keyword",
		}
	}

	pub fn needs_vector(self) -> bool {
		!matches!(self, Self::Keyword)
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct NoteHit {
	pub record_id: String,
	pub note: String,
	pub score: f32,
}

pub struct NoteIndex {
	pub client: Qdrant,
	pub collection: String,
	pub vector_dim: u32,
	pub mode: SearchMode,
}
impl NoteIndex {
	pub fn new(cfg: &medrag_config::NoteIndex) -> Result<Self> {
		let mode = SearchMode::parse(&cfg.search_mode).ok_or_else(|| {
			Error::InvalidArgument(format!("Unknown search mode {:?}.", cfg.search_mode))
		})?;
		let mut builder = Qdrant::from_url(&cfg.url);

		if let Some(key) = cfg.api_key.as_ref() {
			builder = builder.api_key(key.clone());
		}

		let client = builder.build()?;

		Ok(Self { client, collection: cfg.collection.clone(), vector_dim: cfg.vector_dim, mode })
	}

	pub async fn search(
		&self,
		text: &str,
		vector: Option<&[f32]>,
		top_k: u32,
		candidate_k: u32,
	) -> Result<Vec<NoteHit>> {
		if let Some(vector) = vector
			&& vector.len() != self.vector_dim as usize
		{
			return Err(Error::InvalidArgument(format!(
				"Query vector has {} dimensions, index expects {}.",
				vector.len(),
				self.vector_dim
			)));
		}

		let request =
			build_search(&self.collection, self.mode, text, vector, top_k, candidate_k)?;
		let started = Instant::now();
		let response = match self.client.query(request).await {
			Ok(response) => response,
			Err(err) => {
				tracing::warn!(
					collection = %self.collection,
					mode = self.mode.as_str(),
					error = %err,
					elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0,
					"Note search failed."
				);

				return Err(err.into());
			},
		};
		let hits: Vec<NoteHit> = response.result.iter().filter_map(note_hit).collect();

		tracing::debug!(
			collection = %self.collection,
			mode = self.mode.as_str(),
			points = response.result.len(),
			hits = hits.len(),
			elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0,
			"Note search completed."
		);

		Ok(hits)
	}
}

/// Builds the Qdrant query for one search mode. Hybrid prefetches `candidate_k` points from each
/// named vector and fuses them; the final limit is `top_k`.
pub fn build_search(
	collection: &str,
	mode: SearchMode,
	text: &str,
	vector: Option<&[f32]>,
	top_k: u32,
	candidate_k: u32,
) -> Result<QueryPoints> {
	let dense = || {
		vector.map(<[f32]>::to_vec).ok_or_else(|| {
			Error::InvalidArgument(format!("Search mode {} needs a query vector.", mode.as_str()))
		})
	};
	let search = QueryPointsBuilder::new(collection.to_string());
	let search = match mode {
		SearchMode::Hybrid => {
			let dense_prefetch = PrefetchQueryBuilder::default()
				.query(Query::new_nearest(dense()?))
				.using(DENSE_VECTOR_NAME)
				.limit(candidate_k as u64);
			let bm25_prefetch = PrefetchQueryBuilder::default()
				.query(Query::new_nearest(Document::new(text.to_string(), BM25_MODEL)))
				.using(BM25_VECTOR_NAME)
				.limit(candidate_k as u64);

			search.add_prefetch(dense_prefetch).add_prefetch(bm25_prefetch).query(Fusion::Rrf)
		},
		SearchMode::Vector => search.query(Query::new_nearest(dense()?)).using(DENSE_VECTOR_NAME),
		SearchMode::Keyword => search
			.query(Query::new_nearest(Document::new(text.to_string(), BM25_MODEL)))
			.using(BM25_VECTOR_NAME),
	};

	Ok(search.with_payload(true).limit(top_k as u64).build())
}

fn note_hit(point: &ScoredPoint) -> Option<NoteHit> {
	let note = payload_string(&point.payload, "note")?;
	let record_id = payload_string(&point.payload, "record_id").unwrap_or_default();

	Some(NoteHit { record_id, note, score: point.score })
}

fn payload_string(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
	let value = payload.get(key)?;

	match &value.kind {
		Some(Kind::StringValue(text)) => Some(text.to_string()),
		Some(Kind::IntegerValue(number)) => Some(number.to_string()),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn hybrid_search_prefetches_both_vectors() {
		let vector = [0.1_f32, 0.2];
		let request =
			build_search("notes", SearchMode::Hybrid, "lastName Rosenbaum", Some(&vector), 2, 20)
				.expect("build failed");

		assert_eq!(request.prefetch.len(), 2);
		assert_eq!(request.limit, Some(2));
		assert!(request.using.is_none());
	}

	#[test]
	fn keyword_search_needs_no_vector() {
		let request = build_search("notes", SearchMode::Keyword, "influenza", None, 2, 20)
			.expect("build failed");

		assert!(request.prefetch.is_empty());
		assert_eq!(request.using.as_deref(), Some(BM25_VECTOR_NAME));
	}

	#[test]
	fn vector_modes_reject_missing_vector() {
		assert!(build_search("notes", SearchMode::Vector, "x", None, 2, 20).is_err());
		assert!(build_search("notes", SearchMode::Hybrid, "x", None, 2, 20).is_err());
	}

	#[test]
	fn points_without_note_payload_are_skipped() {
		let mut point = ScoredPoint::default();

		assert!(note_hit(&point).is_none());

		point
			.payload
			.insert("note".to_string(), Value { kind: Some(Kind::StringValue("Flu shot.".to_string())) });
		point
			.payload
			.insert("record_id".to_string(), Value { kind: Some(Kind::IntegerValue(7)) });

		let hit = note_hit(&point).expect("hit expected");

		assert_eq!(hit.record_id, "7");
		assert_eq!(hit.note, "Flu shot.");
	}
}
