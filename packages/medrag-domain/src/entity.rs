use serde::{Deserialize, Serialize};

/// A keyword pair extracted from the question, such as `lastName` / `Rosenbaum`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
	pub key: String,
	pub value: String,
}

/// Joins entities into the note-index search string: `"key value"` per entity, separated by
/// single spaces, with underscores turned into spaces.
pub fn search_string(entities: &[Entity]) -> String {
	entities
		.iter()
		.map(|entity| format!("{} {}", entity.key, entity.value).replace('_', " "))
		.collect::<Vec<_>>()
		.join(" ")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn search_string_replaces_underscores() {
		let entities = vec![
			Entity { key: "last_name".to_string(), value: "Rosenbaum".to_string() },
			Entity { key: "vaccine".to_string(), value: "flu_shot".to_string() },
		];

		assert_eq!(search_string(&entities), "last name Rosenbaum vaccine flu shot");
		assert_eq!(search_string(&[]), "");
	}
}
