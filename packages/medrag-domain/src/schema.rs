use std::collections::HashSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSchema {
	#[serde(default)]
	pub nodes: Vec<NodeType>,
	#[serde(default)]
	pub edges: Vec<EdgeType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeType {
	pub label: String,
	#[serde(default)]
	pub properties: Vec<Property>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeType {
	pub label: String,
	pub src: String,
	pub dst: String,
	#[serde(default)]
	pub properties: Vec<Property>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
	pub name: String,
	#[serde(rename = "type", default)]
	pub kind: String,
}

impl GraphSchema {
	pub fn is_empty(&self) -> bool {
		self.nodes.is_empty() && self.edges.is_empty()
	}

	pub fn node(&self, label: &str) -> Option<&NodeType> {
		self.nodes.iter().find(|node| node.label == label)
	}

	pub fn edge(&self, label: &str, src: &str, dst: &str) -> Option<&EdgeType> {
		self.edges.iter().find(|edge| edge.label == label && edge.src == src && edge.dst == dst)
	}

	/// Renders the prompt document with `<structure>`, `<nodes>`, and `<relationships>` sections.
	pub fn to_xml(&self) -> String {
		let mut structure = Vec::with_capacity(self.edges.len());

		for edge in &self.edges {
			structure.push(format!(
				"  <rel label=\"{}\" from=\"{}\" to=\"{}\" />",
				escape(&edge.label),
				escape(&edge.src),
				escape(&edge.dst)
			));
		}

		let mut nodes = Vec::with_capacity(self.nodes.len());

		for node in &self.nodes {
			nodes.push(format!(
				"  <node label=\"{}\">\n{}\n  </node>",
				escape(&node.label),
				render_properties(&node.properties)
			));
		}

		let mut relationships = Vec::with_capacity(self.edges.len());

		for edge in &self.edges {
			if edge.properties.is_empty() {
				relationships.push(format!("  <rel label=\"{}\" />", escape(&edge.label)));
			} else {
				relationships.push(format!(
					"  <rel label=\"{}\">\n{}\n  </rel>",
					escape(&edge.label),
					render_properties(&edge.properties)
				));
			}
		}

		format!(
			"<structure>\n{}\n</structure>\n<nodes>\n{}\n</nodes>\n<relationships>\n{}\n</relationships>",
			structure.join("\n"),
			nodes.join("\n"),
			relationships.join("\n")
		)
	}

	/// Keeps only the parts of `candidate` that also exist in `self`.
	///
	/// Property types always come from `self`. Returns the restricted schema together with a
	/// description of everything that was dropped.
	pub fn restrict(&self, candidate: &GraphSchema) -> (GraphSchema, Vec<String>) {
		let mut dropped = Vec::new();
		let mut nodes = Vec::new();
		let mut seen_nodes = HashSet::new();

		for node in &candidate.nodes {
			let Some(known) = self.node(&node.label) else {
				dropped.push(format!("node {}", node.label));

				continue;
			};

			if !seen_nodes.insert(node.label.as_str()) {
				continue;
			}

			let properties =
				restrict_properties(&known.properties, &node.properties, &node.label, &mut dropped);

			nodes.push(NodeType { label: known.label.clone(), properties });
		}

		let mut edges = Vec::new();
		let mut seen_edges = HashSet::new();

		for edge in &candidate.edges {
			let Some(known) = self.edge(&edge.label, &edge.src, &edge.dst) else {
				dropped.push(format!("edge {}({}->{})", edge.label, edge.src, edge.dst));

				continue;
			};

			if !seen_edges.insert((edge.label.as_str(), edge.src.as_str(), edge.dst.as_str())) {
				continue;
			}

			let properties =
				restrict_properties(&known.properties, &edge.properties, &edge.label, &mut dropped);

			edges.push(EdgeType {
				label: known.label.clone(),
				src: known.src.clone(),
				dst: known.dst.clone(),
				properties,
			});
		}

		(GraphSchema { nodes, edges }, dropped)
	}

	/// Whether every node, edge, and property of `self` is present in `other`.
	pub fn is_subset_of(&self, other: &GraphSchema) -> bool {
		let nodes_fit = self.nodes.iter().all(|node| {
			other.node(&node.label).is_some_and(|known| {
				properties_fit(&node.properties, &known.properties)
			})
		});
		let edges_fit = self.edges.iter().all(|edge| {
			other.edge(&edge.label, &edge.src, &edge.dst).is_some_and(|known| {
				properties_fit(&edge.properties, &known.properties)
			})
		});

		nodes_fit && edges_fit
	}
}

fn restrict_properties(
	known: &[Property],
	requested: &[Property],
	owner: &str,
	dropped: &mut Vec<String>,
) -> Vec<Property> {
	let mut out = Vec::new();

	for property in requested {
		match known.iter().find(|candidate| candidate.name == property.name) {
			Some(found) if !out.iter().any(|kept: &Property| kept.name == found.name) =>
				out.push(found.clone()),
			Some(_) => {},
			None => dropped.push(format!("property {owner}.{}", property.name)),
		}
	}

	out
}

fn properties_fit(properties: &[Property], known: &[Property]) -> bool {
	properties.iter().all(|property| known.iter().any(|candidate| candidate == property))
}

fn render_properties(properties: &[Property]) -> String {
	properties
		.iter()
		.map(|property| {
			format!(
				"    <property name=\"{}\" type=\"{}\" />",
				escape(&property.name),
				escape(&property.kind)
			)
		})
		.collect::<Vec<_>>()
		.join("\n")
}

fn escape(raw: &str) -> String {
	raw.replace('&', "&amp;").replace('"', "&quot;").replace('<', "&lt;")
}

#[cfg(test)]
mod tests {
	use super::*;

	fn property(name: &str, kind: &str) -> Property {
		Property { name: name.to_string(), kind: kind.to_string() }
	}

	fn fhir_schema() -> GraphSchema {
		GraphSchema {
			nodes: vec![
				NodeType {
					label: "Patient".to_string(),
					properties: vec![
						property("patient_id", "STRING"),
						property("lastName", "STRING"),
						property("birthDate", "DATE"),
					],
				},
				NodeType {
					label: "Immunization".to_string(),
					properties: vec![property("immunization_id", "STRING")],
				},
			],
			edges: vec![EdgeType {
				label: "WAS_IMMUNIZED".to_string(),
				src: "Patient".to_string(),
				dst: "Immunization".to_string(),
				properties: vec![property("occurrenceDateTime", "TIMESTAMP")],
			}],
		}
	}

	#[test]
	fn xml_contains_all_sections() {
		let xml = fhir_schema().to_xml();

		assert!(xml.starts_with("<structure>\n  <rel label=\"WAS_IMMUNIZED\" from=\"Patient\" to=\"Immunization\" />"));
		assert!(xml.contains("  <node label=\"Patient\">\n    <property name=\"patient_id\" type=\"STRING\" />"));
		assert!(xml.contains("<relationships>\n  <rel label=\"WAS_IMMUNIZED\">\n    <property name=\"occurrenceDateTime\" type=\"TIMESTAMP\" />\n  </rel>\n</relationships>"));
	}

	#[test]
	fn restrict_drops_unknown_parts_and_fills_types() {
		let candidate = GraphSchema {
			nodes: vec![
				NodeType {
					label: "Patient".to_string(),
					properties: vec![property("lastName", ""), property("ssn", "STRING")],
				},
				NodeType { label: "Invoice".to_string(), properties: Vec::new() },
			],
			edges: vec![EdgeType {
				label: "WAS_IMMUNIZED".to_string(),
				src: "Immunization".to_string(),
				dst: "Patient".to_string(),
				properties: Vec::new(),
			}],
		};
		let (restricted, dropped) = fhir_schema().restrict(&candidate);

		assert_eq!(restricted.nodes.len(), 1);
		assert_eq!(restricted.nodes[0].properties, vec![property("lastName", "STRING")]);
		assert!(restricted.edges.is_empty());
		assert_eq!(dropped.len(), 3);
		assert!(restricted.is_subset_of(&fhir_schema()));
	}

	#[test]
	fn parses_llm_schema_without_property_types() {
		let raw = r#"{"nodes":[{"label":"Patient","properties":[{"name":"lastName"}]}]}"#;
		let parsed: GraphSchema = serde_json::from_str(raw).expect("Schema must parse.");

		assert_eq!(parsed.nodes[0].properties[0].kind, "");
		assert!(parsed.edges.is_empty());
	}
}
