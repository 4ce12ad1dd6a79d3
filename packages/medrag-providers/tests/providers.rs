use reqwest::header::AUTHORIZATION;
use serde_json::{Map, Value};

#[test]
fn builds_bearer_auth_header() {
	let headers =
		medrag_providers::auth_headers("secret", &Map::new()).expect("Failed to build headers.");
	let value = headers.get(AUTHORIZATION).expect("Missing authorization header.");

	assert_eq!(value, "Bearer secret");
}

#[test]
fn empty_key_sends_no_authorization() {
	let mut defaults = Map::new();

	defaults.insert("x-title".to_string(), Value::String("medrag".to_string()));

	let headers =
		medrag_providers::auth_headers("", &defaults).expect("Failed to build headers.");

	assert!(headers.get(AUTHORIZATION).is_none());
	assert_eq!(headers.get("x-title").expect("Missing default header."), "medrag");
}

#[test]
fn non_string_default_header_is_rejected() {
	let mut defaults = Map::new();

	defaults.insert("x-retries".to_string(), Value::from(3));

	assert!(medrag_providers::auth_headers("secret", &defaults).is_err());
}
