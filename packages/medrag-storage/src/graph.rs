//! Read-only access to the property graph over the Neo4j HTTP transactional API.

use std::{
	collections::{BTreeMap, BTreeSet},
	time::{Duration, Instant},
};

use reqwest::Client;
use serde_json::{Map, Value};

use crate::{Error, Result};
use medrag_domain::{
	context::QueryRow,
	schema::{EdgeType, GraphSchema, NodeType, Property},
};

const NODE_PROPERTIES_QUERY: &str = "CALL db.schema.nodeTypeProperties() \
	YIELD nodeLabels, propertyName, propertyTypes \
	RETURN nodeLabels, propertyName, propertyTypes";
const REL_PROPERTIES_QUERY: &str = "CALL db.schema.relTypeProperties() \
	YIELD relType, propertyName, propertyTypes \
	RETURN relType, propertyName, propertyTypes";
const REL_ENDPOINTS_QUERY: &str = "MATCH (a)-[r]->(b) \
	RETURN DISTINCT type(r) AS relType, labels(a) AS src, labels(b) AS dst";

pub struct GraphClient {
	client: Client,
	endpoint: String,
	user: String,
	password: Option<String>,
}
impl GraphClient {
	pub fn new(cfg: &medrag_config::GraphStore) -> Result<Self> {
		let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
		let endpoint =
			format!("{}/db/{}/tx/commit", cfg.url.trim_end_matches('/'), cfg.database);

		Ok(Self { client, endpoint, user: cfg.user.clone(), password: cfg.password.clone() })
	}

	/// Runs one statement in a read-only auto-commit transaction and returns every row.
	pub async fn query(&self, cypher: &str) -> Result<Vec<QueryRow>> {
		let mut results = self.execute(&[cypher]).await?;

		results.pop().ok_or_else(|| Error::InvalidResponse("Missing statement result.".to_string()))
	}

	/// Introspects node labels, relationship types, and their properties.
	pub async fn schema(&self) -> Result<GraphSchema> {
		let mut results = self
			.execute(&[NODE_PROPERTIES_QUERY, REL_PROPERTIES_QUERY, REL_ENDPOINTS_QUERY])
			.await?
			.into_iter();
		let mut next = || {
			results
				.next()
				.ok_or_else(|| Error::InvalidResponse("Missing schema statement result.".to_string()))
		};
		let node_rows = next()?;
		let rel_rows = next()?;
		let endpoint_rows = next()?;

		Ok(assemble_schema(&node_rows, &rel_rows, &endpoint_rows))
	}

	async fn execute(&self, statements: &[&str]) -> Result<Vec<Vec<QueryRow>>> {
		let started = Instant::now();
		let result = self.send(statements).await;
		let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;

		match &result {
			Ok(results) => tracing::debug!(
				statements = statements.len(),
				rows = results.iter().map(Vec::len).sum::<usize>(),
				elapsed_ms,
				"Graph statements executed."
			),
			Err(err) => tracing::warn!(
				statements = statements.len(),
				error = %err,
				elapsed_ms,
				"Graph statements failed."
			),
		}

		result
	}

	async fn send(&self, statements: &[&str]) -> Result<Vec<Vec<QueryRow>>> {
		let body = serde_json::json!({
			"statements": statements
				.iter()
				.map(|statement| serde_json::json!({ "statement": statement }))
				.collect::<Vec<_>>(),
		});
		let res = self
			.client
			.post(&self.endpoint)
			.basic_auth(&self.user, self.password.as_deref())
			.header("access-mode", "READ")
			.json(&body)
			.send()
			.await?;
		let json: Value = res.error_for_status()?.json().await?;

		decode_results(&json)
	}
}

/// Decodes a transactional response into one row list per statement.
///
/// Any entry in `errors` fails the whole call, since statements in one request share a
/// transaction.
pub fn decode_results(json: &Value) -> Result<Vec<Vec<QueryRow>>> {
	if let Some(err) = json.get("errors").and_then(Value::as_array).and_then(|errors| errors.first())
	{
		let field = |key: &str| err.get(key).and_then(Value::as_str).unwrap_or_default().to_string();

		return Err(Error::GraphQuery { code: field("code"), message: field("message") });
	}

	let results = json
		.get("results")
		.and_then(Value::as_array)
		.ok_or_else(|| Error::InvalidResponse("Response is missing results array.".to_string()))?;
	let mut out = Vec::with_capacity(results.len());

	for result in results {
		let columns: Vec<&str> = result
			.get("columns")
			.and_then(Value::as_array)
			.ok_or_else(|| Error::InvalidResponse("Result is missing columns.".to_string()))?
			.iter()
			.map(|column| column.as_str().unwrap_or_default())
			.collect();
		let data = result.get("data").and_then(Value::as_array).cloned().unwrap_or_default();
		let mut rows = Vec::with_capacity(data.len());

		for entry in data {
			let values = entry
				.get("row")
				.and_then(Value::as_array)
				.ok_or_else(|| Error::InvalidResponse("Data entry is missing row.".to_string()))?;

			if values.len() != columns.len() {
				return Err(Error::InvalidResponse(format!(
					"Row has {} values for {} columns.",
					values.len(),
					columns.len()
				)));
			}

			let row: Map<String, Value> = columns
				.iter()
				.zip(values)
				.map(|(column, value)| (column.to_string(), value.clone()))
				.collect();

			rows.push(row);
		}

		out.push(rows);
	}

	Ok(out)
}

/// Builds a [`GraphSchema`] from the three introspection result sets.
///
/// Labels and relationship types are sorted. Relationships observed between several label pairs
/// yield one edge per pair.
pub fn assemble_schema(
	node_rows: &[QueryRow],
	rel_rows: &[QueryRow],
	endpoint_rows: &[QueryRow],
) -> GraphSchema {
	let mut nodes: BTreeMap<String, Vec<Property>> = BTreeMap::new();

	for row in node_rows {
		let labels = string_list(row.get("nodeLabels"));

		for label in labels {
			let properties = nodes.entry(label).or_default();

			if let Some(property) = property_from_row(row)
				&& !properties.iter().any(|known| known.name == property.name)
			{
				properties.push(property);
			}
		}
	}

	let mut rel_properties: BTreeMap<String, Vec<Property>> = BTreeMap::new();

	for row in rel_rows {
		let Some(rel_type) = row.get("relType").and_then(Value::as_str) else {
			continue;
		};
		let properties = rel_properties.entry(clean_rel_type(rel_type)).or_default();

		if let Some(property) = property_from_row(row)
			&& !properties.iter().any(|known| known.name == property.name)
		{
			properties.push(property);
		}
	}

	let mut endpoints = BTreeSet::new();

	for row in endpoint_rows {
		let Some(rel_type) = row.get("relType").and_then(Value::as_str) else {
			continue;
		};

		for src in string_list(row.get("src")) {
			for dst in string_list(row.get("dst")) {
				endpoints.insert((rel_type.to_string(), src.clone(), dst));
			}
		}
	}

	let edges = endpoints
		.into_iter()
		.map(|(label, src, dst)| {
			let properties = rel_properties.get(&label).cloned().unwrap_or_default();

			EdgeType { label, src, dst, properties }
		})
		.collect();
	let nodes = nodes.into_iter().map(|(label, properties)| NodeType { label, properties }).collect();

	GraphSchema { nodes, edges }
}

fn property_from_row(row: &QueryRow) -> Option<Property> {
	let name = row.get("propertyName").and_then(Value::as_str)?;
	let kind = string_list(row.get("propertyTypes")).join("|");

	Some(Property { name: name.to_string(), kind })
}

fn string_list(value: Option<&Value>) -> Vec<String> {
	value
		.and_then(Value::as_array)
		.map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
		.unwrap_or_default()
}

/// `db.schema.relTypeProperties` reports types as ``:`TREATS` ``.
fn clean_rel_type(raw: &str) -> String {
	raw.trim_start_matches(':').trim_matches('`').to_string()
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn rows(value: Value) -> Vec<QueryRow> {
		value
			.as_array()
			.map(|items| items.iter().filter_map(|item| item.as_object().cloned()).collect())
			.unwrap_or_default()
	}

	#[tokio::test]
	async fn unreachable_store_surfaces_transport_errors() {
		let client = GraphClient::new(&medrag_config::GraphStore {
			url: "http://127.0.0.1:1".to_string(),
			database: "neo4j".to_string(),
			user: "neo4j".to_string(),
			password: None,
			timeout_ms: 500,
		})
		.expect("client build failed");
		let err = client.query("RETURN 1").await.expect_err("Expected a transport error.");

		assert!(matches!(err, Error::Reqwest(_)));
	}

	#[test]
	fn decodes_rows_by_column() {
		let json = json!({
			"results": [{
				"columns": ["name", "count"],
				"data": [
					{ "row": ["Rosenbaum", 1], "meta": [null, null] },
					{ "row": ["Klein", 3], "meta": [null, null] }
				]
			}],
			"errors": []
		});
		let decoded = decode_results(&json).expect("decode failed");

		assert_eq!(decoded.len(), 1);
		assert_eq!(decoded[0][0]["name"], "Rosenbaum");
		assert_eq!(decoded[0][1]["count"], 3);
	}

	#[test]
	fn surfaces_statement_errors() {
		let json = json!({
			"results": [],
			"errors": [{
				"code": "Neo.ClientError.Statement.SyntaxError",
				"message": "Invalid input 'RETRUN'"
			}]
		});
		let err = decode_results(&json).expect_err("Expected a statement error.");

		assert!(matches!(err, Error::GraphQuery { ref code, .. } if code.ends_with("SyntaxError")));
	}

	#[test]
	fn assembles_schema_from_introspection_rows() {
		let node_rows = rows(json!([
			{ "nodeLabels": ["Patient"], "propertyName": "lastName", "propertyTypes": ["String"] },
			{ "nodeLabels": ["Patient"], "propertyName": "birthDate", "propertyTypes": ["Date"] },
			{ "nodeLabels": ["Immunization"], "propertyName": null, "propertyTypes": null }
		]));
		let rel_rows = rows(json!([
			{ "relType": ":`WAS_IMMUNIZED`", "propertyName": "occurrence", "propertyTypes": ["DateTime"] }
		]));
		let endpoint_rows = rows(json!([
			{ "relType": "WAS_IMMUNIZED", "src": ["Patient"], "dst": ["Immunization"] }
		]));
		let schema = assemble_schema(&node_rows, &rel_rows, &endpoint_rows);

		assert_eq!(schema.nodes.len(), 2);
		assert_eq!(schema.nodes[0].label, "Immunization");
		assert!(schema.nodes[0].properties.is_empty());
		assert_eq!(schema.nodes[1].properties.len(), 2);
		assert_eq!(schema.edges.len(), 1);
		assert_eq!(schema.edges[0].src, "Patient");
		assert_eq!(schema.edges[0].properties[0].kind, "DateTime");
	}
}
