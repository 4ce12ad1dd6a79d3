use std::env;

use medrag_storage::{graph::GraphClient, notes::NoteIndex};

fn graph_config(url: String) -> medrag_config::GraphStore {
	medrag_config::GraphStore {
		url,
		database: env::var("MEDRAG_NEO4J_DATABASE").unwrap_or_else(|_| "neo4j".to_string()),
		user: env::var("MEDRAG_NEO4J_USER").unwrap_or_else(|_| "neo4j".to_string()),
		password: env::var("MEDRAG_NEO4J_PASSWORD").ok(),
		timeout_ms: 10_000,
	}
}

#[tokio::test]
#[ignore = "Requires external Neo4j. Set MEDRAG_NEO4J_URL to run."]
async fn graph_schema_and_read_query_round_trip() {
	let Ok(url) = env::var("MEDRAG_NEO4J_URL") else {
		eprintln!("Skipping graph_schema_and_read_query_round_trip; set MEDRAG_NEO4J_URL to run.");

		return;
	};
	let client = GraphClient::new(&graph_config(url)).expect("Failed to build graph client.");
	let schema = client.schema().await.expect("Failed to introspect schema.");

	assert!(!schema.to_xml().is_empty());

	let rows = client.query("RETURN 1 AS one").await.expect("Failed to run read query.");

	assert_eq!(rows.len(), 1);
	assert_eq!(rows[0]["one"], 1);
}

#[tokio::test]
#[ignore = "Requires external Neo4j. Set MEDRAG_NEO4J_URL to run."]
async fn graph_rejects_writes_in_read_mode() {
	let Ok(url) = env::var("MEDRAG_NEO4J_URL") else {
		eprintln!("Skipping graph_rejects_writes_in_read_mode; set MEDRAG_NEO4J_URL to run.");

		return;
	};
	let client = GraphClient::new(&graph_config(url)).expect("Failed to build graph client.");

	assert!(client.query("CREATE (:Probe {at: timestamp()})").await.is_err());
}

#[tokio::test]
#[ignore = "Requires external Qdrant. Set MEDRAG_QDRANT_URL to run."]
async fn keyword_search_returns_at_most_top_k() {
	let Ok(url) = env::var("MEDRAG_QDRANT_URL") else {
		eprintln!("Skipping keyword_search_returns_at_most_top_k; set MEDRAG_QDRANT_URL to run.");

		return;
	};
	let cfg = medrag_config::NoteIndex {
		url,
		collection: env::var("MEDRAG_QDRANT_COLLECTION")
			.unwrap_or_else(|_| "clinical_notes".to_string()),
		vector_dim: 768,
		search_mode: "keyword".to_string(),
		api_key: None,
	};
	let index = NoteIndex::new(&cfg).expect("Failed to build note index.");
	let hits = index.search("immunization influenza", None, 2, 20).await.expect("Search failed.");

	assert!(hits.len() <= 2);
}
