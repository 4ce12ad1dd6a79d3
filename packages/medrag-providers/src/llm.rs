use std::time::Duration;

use color_eyre::{Result, eyre};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
	pub prompt_tokens: u64,
	pub completion_tokens: u64,
}
impl TokenUsage {
	pub fn total(&self) -> u64 {
		self.prompt_tokens + self.completion_tokens
	}
}

#[derive(Debug, Clone)]
pub struct ChatCompletion {
	/// Parsed JSON object from the first choice.
	pub content: Value,
	pub usage: Option<TokenUsage>,
	pub model: String,
}

/// One chat completion in JSON mode. No retry; malformed output is an error.
pub async fn chat_json(
	cfg: &medrag_config::LlmProviderConfig,
	messages: &[Value],
) -> Result<ChatCompletion> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let body = serde_json::json!({
		"model": cfg.model,
		"temperature": cfg.temperature,
		"messages": messages,
		"response_format": { "type": "json_object" },
	});
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_chat_response(json, &cfg.model)
}

fn parse_chat_response(json: Value, requested_model: &str) -> Result<ChatCompletion> {
	let content = json
		.get("choices")
		.and_then(|v| v.as_array())
		.and_then(|arr| arr.first())
		.and_then(|choice| choice.get("message"))
		.and_then(|msg| msg.get("content"))
		.and_then(|c| c.as_str())
		.ok_or_else(|| eyre::eyre!("Chat response is missing message content."))?;
	let content: Value = serde_json::from_str(strip_code_fence(content))
		.map_err(|_| eyre::eyre!("Chat content is not valid JSON."))?;
	let usage = json.get("usage").and_then(|usage| {
		Some(TokenUsage {
			prompt_tokens: usage.get("prompt_tokens")?.as_u64()?,
			completion_tokens: usage.get("completion_tokens")?.as_u64()?,
		})
	});
	let model = json
		.get("model")
		.and_then(|v| v.as_str())
		.unwrap_or(requested_model)
		.to_string();

	Ok(ChatCompletion { content, usage, model })
}

fn strip_code_fence(raw: &str) -> &str {
	let trimmed = raw.trim();
	let Some(inner) = trimmed.strip_prefix("```") else {
		return trimmed;
	};
	let inner = inner.strip_prefix("json").unwrap_or(inner);

	inner.strip_suffix("```").unwrap_or(inner).trim()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_content_usage_and_model() {
		let json = serde_json::json!({
			"model": "google/gemini-2.0-flash-001",
			"choices": [
				{ "message": { "content": "{\"cypher\": \"MATCH (n) RETURN n\"}" } }
			],
			"usage": { "prompt_tokens": 120, "completion_tokens": 8, "total_tokens": 128 }
		});
		let parsed = parse_chat_response(json, "fallback").expect("parse failed");

		assert_eq!(parsed.content["cypher"], "MATCH (n) RETURN n");
		assert_eq!(parsed.usage, Some(TokenUsage { prompt_tokens: 120, completion_tokens: 8 }));
		assert_eq!(parsed.model, "google/gemini-2.0-flash-001");
	}

	#[test]
	fn accepts_fenced_json_without_usage() {
		let json = serde_json::json!({
			"choices": [
				{ "message": { "content": "```json\n{\"answer\": \"one\"}\n```" } }
			]
		});
		let parsed = parse_chat_response(json, "fallback").expect("parse failed");

		assert_eq!(parsed.content["answer"], "one");
		assert!(parsed.usage.is_none());
		assert_eq!(parsed.model, "fallback");
	}

	#[test]
	fn rejects_prose_content() {
		let json = serde_json::json!({
			"choices": [ { "message": { "content": "There is one patient." } } ]
		});

		assert!(parse_chat_response(json, "m").is_err());
	}
}
