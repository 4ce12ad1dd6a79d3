use std::collections::HashSet;

use serde_json::{Map, Value};

pub type QueryRow = Map<String, Value>;

pub const NO_ROWS: &str = "no rows";

/// Builds the context handed to answer generation on the graph path.
///
/// An empty `cypher` yields empty sections. Executed queries with no rows, or whose execution
/// failed, render [`NO_ROWS`] in the result section.
pub fn graph_context(cypher: &str, rows: &[QueryRow]) -> String {
	let cypher = cypher.trim();

	if cypher.is_empty() {
		return "<CYPHER>\n\n</CYPHER>\n\n<RESULT>\n\n</RESULT>".to_string();
	}

	let result = if rows.is_empty() {
		NO_ROWS.to_string()
	} else {
		rows.iter()
			.map(|row| Value::Object(row.clone()).to_string())
			.collect::<Vec<_>>()
			.join("\n")
	};

	format!("<CYPHER>\n{cypher}\n</CYPHER>\n\n<RESULT>\n{result}\n</RESULT>")
}

pub fn notes_context<'a, I>(notes: I) -> String
where
	I: IntoIterator<Item = &'a str>,
{
	notes.into_iter().collect::<Vec<_>>().join("\n")
}

/// Word-overlap agreement between the two path answers, in `[0, 1]`.
///
/// Shared lowercase words divided by the larger word set; zero when both answers are empty.
pub fn answer_agreement(left: &str, right: &str) -> f64 {
	let left_lower = left.to_lowercase();
	let right_lower = right.to_lowercase();
	let left_words: HashSet<&str> = left_lower.split_whitespace().collect();
	let right_words: HashSet<&str> = right_lower.split_whitespace().collect();
	let denominator = left_words.len().max(right_words.len());

	if denominator == 0 {
		return 0.0;
	}

	left_words.intersection(&right_words).count() as f64 / denominator as f64
}
