use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::field::FieldType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
	pub name: String,
	#[serde(flatten)]
	pub ty: FieldType,
}

impl FieldSpec {
	pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
		Self {
			name: name.into(),
			ty,
		}
	}
}

/// A `NodeType`'s input/output record schemas (spec §3). Field order is
/// significant: it is the order used to compute the cache fingerprint
/// (spec §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
	pub input: Vec<FieldSpec>,
	pub output: Vec<FieldSpec>,
}

impl Schema {
	/// Validates the "input and output field names MUST be disjoint"
	/// invariant from spec §3.
	pub fn validate(&self) -> Result<(), String> {
		let input_names: HashSet<&str> = self.input.iter().map(|f| f.name.as_str()).collect();
		for f in &self.output {
			if input_names.contains(f.name.as_str()) {
				return Err(format!(
					"field {:?} appears in both input and output records",
					f.name
				));
			}
		}
		Ok(())
	}

	pub fn input_keys(&self) -> Vec<String> {
		self.input.iter().map(|f| f.name.clone()).collect()
	}

	pub fn output_keys(&self) -> Vec<String> {
		self.output.iter().map(|f| f.name.clone()).collect()
	}

	/// Declared file-valued input fields (the `/filename_keys` endpoint).
	pub fn file_input_keys(&self) -> Vec<String> {
		self.input
			.iter()
			.filter(|f| f.ty.is_file())
			.map(|f| f.name.clone())
			.collect()
	}

	pub fn find_input(&self, name: &str) -> Option<&FieldSpec> {
		self.input.iter().find(|f| f.name == name)
	}

	pub fn find_output(&self, name: &str) -> Option<&FieldSpec> {
		self.output.iter().find(|f| f.name == name)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rejects_overlapping_field_names() {
		let schema = Schema {
			input: vec![FieldSpec::new("scalar", FieldType::Int)],
			output: vec![FieldSpec::new("scalar", FieldType::Float)],
		};
		assert!(schema.validate().is_err());
	}

	#[test]
	fn accepts_disjoint_field_names() {
		let schema = Schema {
			input: vec![FieldSpec::new("scalar", FieldType::Int)],
			output: vec![FieldSpec::new("out_message", FieldType::String)],
		};
		assert!(schema.validate().is_ok());
	}
}
