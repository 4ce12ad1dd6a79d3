use std::time::Duration;

use color_eyre::{Result, eyre};
use reqwest::Client;
use serde_json::Value;

/// Embeds `texts` with an OpenAI-compatible `/embeddings` or an Ollama `/api/embed` endpoint.
pub async fn embed(
	cfg: &medrag_config::EmbeddingProviderConfig,
	texts: &[String],
) -> Result<Vec<Vec<f32>>> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let body = serde_json::json!({
		"model": cfg.model,
		"input": texts,
		"dimensions": cfg.dimensions,
	});
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;
	let vectors = parse_embedding_response(json)?;

	if vectors.len() != texts.len() {
		return Err(eyre::eyre!(
			"Embedding response has {} vectors for {} inputs.",
			vectors.len(),
			texts.len()
		));
	}

	Ok(vectors)
}

fn parse_embedding_response(json: Value) -> Result<Vec<Vec<f32>>> {
	if let Some(data) = json.get("data").and_then(|v| v.as_array()) {
		let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());

		for (fallback_index, item) in data.iter().enumerate() {
			let index = item
				.get("index")
				.and_then(|v| v.as_u64())
				.map(|v| v as usize)
				.unwrap_or(fallback_index);
			let embedding = item
				.get("embedding")
				.ok_or_else(|| eyre::eyre!("Embedding item missing embedding array."))?;

			indexed.push((index, parse_vector(embedding)?));
		}

		indexed.sort_by_key(|(index, _)| *index);

		return Ok(indexed.into_iter().map(|(_, vec)| vec).collect());
	}

	if let Some(embeddings) = json.get("embeddings").and_then(|v| v.as_array()) {
		return embeddings.iter().map(parse_vector).collect();
	}

	Err(eyre::eyre!("Embedding response is missing data or embeddings array."))
}

fn parse_vector(raw: &Value) -> Result<Vec<f32>> {
	let values = raw.as_array().ok_or_else(|| eyre::eyre!("Embedding must be an array."))?;
	let mut vec = Vec::with_capacity(values.len());

	for value in values {
		let number =
			value.as_f64().ok_or_else(|| eyre::eyre!("Embedding value must be numeric."))?;

		vec.push(number as f32);
	}

	Ok(vec)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_openai_embeddings_in_index_order() {
		let json = serde_json::json!({
			"data": [
				{ "index": 1, "embedding": [2.0, 3.0] },
				{ "index": 0, "embedding": [0.5, 1.5] }
			]
		});
		let parsed = parse_embedding_response(json).expect("parse failed");

		assert_eq!(parsed, vec![vec![0.5, 1.5], vec![2.0, 3.0]]);
	}

	#[test]
	fn parses_ollama_embeddings() {
		let json = serde_json::json!({
			"model": "nomic-embed-text",
			"embeddings": [[0.25, -0.5]]
		});
		let parsed = parse_embedding_response(json).expect("parse failed");

		assert_eq!(parsed, vec![vec![0.25, -0.5]]);
	}

	#[test]
	fn rejects_non_numeric_values() {
		let json = serde_json::json!({ "embeddings": [["x"]] });

		assert!(parse_embedding_response(json).is_err());
	}
}
