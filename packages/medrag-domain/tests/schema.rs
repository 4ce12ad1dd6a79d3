use medrag_domain::schema::{EdgeType, GraphSchema, NodeType, Property};

fn property(name: &str, kind: &str) -> Property {
	Property { name: name.to_string(), kind: kind.to_string() }
}

fn full_schema() -> GraphSchema {
	GraphSchema {
		nodes: vec![
			NodeType {
				label: "Patient".to_string(),
				properties: vec![property("patient_id", "STRING"), property("lastName", "STRING")],
			},
			NodeType {
				label: "Practitioner".to_string(),
				properties: vec![property("name", "STRING")],
			},
			NodeType {
				label: "Immunization".to_string(),
				properties: vec![property("vaccineCode", "STRING")],
			},
		],
		edges: vec![
			EdgeType {
				label: "WAS_IMMUNIZED".to_string(),
				src: "Patient".to_string(),
				dst: "Immunization".to_string(),
				properties: Vec::new(),
			},
			EdgeType {
				label: "TREATS".to_string(),
				src: "Practitioner".to_string(),
				dst: "Patient".to_string(),
				properties: Vec::new(),
			},
		],
	}
}

fn llm_choice() -> GraphSchema {
	GraphSchema {
		nodes: vec![
			NodeType { label: "Patient".to_string(), properties: vec![property("lastName", "")] },
			NodeType {
				label: "Immunization".to_string(),
				properties: vec![property("vaccineCode", "")],
			},
		],
		edges: vec![EdgeType {
			label: "WAS_IMMUNIZED".to_string(),
			src: "Patient".to_string(),
			dst: "Immunization".to_string(),
			properties: Vec::new(),
		}],
	}
}

#[test]
fn pruning_twice_never_grows_the_schema() {
	let full = full_schema();
	let (once, _) = full.restrict(&llm_choice());
	// A second pass sees a model that hallucinates an extra node on top of the same choice.
	let mut noisy = llm_choice();

	noisy.nodes.push(NodeType { label: "Practitioner".to_string(), properties: Vec::new() });

	let (twice, dropped) = once.restrict(&noisy);

	assert!(once.is_subset_of(&full));
	assert!(twice.is_subset_of(&once));
	assert_eq!(twice, once);
	assert_eq!(dropped, vec!["node Practitioner".to_string()]);
}

#[test]
fn pruned_document_renders_only_kept_labels() {
	let (pruned, _) = full_schema().restrict(&llm_choice());
	let xml = pruned.to_xml();

	assert!(xml.contains("<node label=\"Patient\">"));
	assert!(!xml.contains("Practitioner"));
	assert!(xml.contains("<rel label=\"WAS_IMMUNIZED\" from=\"Patient\" to=\"Immunization\" />"));
}
