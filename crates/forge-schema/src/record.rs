use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value as Json};

use crate::field::{FieldType, FieldValue};
use crate::schema::FieldSpec;

/// A partially- or fully-populated input/output record (spec §3's `input`
/// and `output` on a `Job`). Field order for hashing/iteration purposes
/// always comes from the owning `Schema`, never from this map.
#[derive(Debug, Clone, Default)]
pub struct Record(HashMap<String, FieldValue>);

impl Record {
	pub fn new() -> Self {
		Self(HashMap::new())
	}

	pub fn get(&self, name: &str) -> Option<&FieldValue> {
		self.0.get(name)
	}

	pub fn set(&mut self, name: impl Into<String>, value: FieldValue) {
		self.0.insert(name.into(), value);
	}

	/// Parses the non-file fields of a JSON object against a schema,
	/// leaving file fields untouched (they arrive later via upload). This
	/// is the `/jobs` create-job payload shape (spec §4.5).
	pub fn from_json_non_file(fields: &[FieldSpec], obj: &Map<String, Json>) -> Result<Self, String> {
		let mut record = Record::new();
		for field in fields {
			if field.ty.is_file() {
				continue;
			}
			match obj.get(&field.name) {
				Some(value) => {
					let parsed = FieldValue::from_json(&field.ty, value)
						.map_err(|e| format!("field {:?}: {e}", field.name))?;
					record.set(field.name.clone(), parsed);
				}
				None if field.ty.is_optional() => {
					record.set(field.name.clone(), FieldValue::Null);
				}
				None => {
					// Left absent; checked at `validate_complete` time so that
					// partial records during Preparing are allowed.
				}
			}
		}
		Ok(record)
	}

	/// Re-validates a record against the full schema at job-start time
	/// (spec §4.2 `Preparing -> Initializing`): every required field must
	/// be present, and every present file-valued field must exist on disk.
	pub fn validate_complete(&self, fields: &[FieldSpec]) -> Result<(), String> {
		for field in fields {
			match self.0.get(&field.name) {
				Some(FieldValue::Null) | None => {
					if !field.ty.is_optional() {
						return Err(format!("missing required input {:?}", field.name));
					}
				}
				Some(value) => {
					if field.ty.is_file() {
						if let Some(path) = value.as_file_path() {
							if !path.exists() {
								return Err(format!(
									"file for input {:?} does not exist at {}",
									field.name,
									path.display()
								));
							}
						}
					}
				}
			}
		}
		Ok(())
	}

	/// Rewrites every file-valued field whose value lives under `from` to
	/// the equivalent path under `to`. Used when copying cache hits into a
	/// job's output dir and when materializing download URLs.
	pub fn rewrite_file_paths(&self, fields: &[FieldSpec], from: &Path, to: &Path) -> Self {
		let mut out = self.clone();
		for field in fields {
			if !field.ty.is_file() {
				continue;
			}
			if let Some(FieldValue::FilePath(p)) = out.0.get(&field.name) {
				if let Ok(rel) = p.strip_prefix(from) {
					out.0
						.insert(field.name.clone(), FieldValue::FilePath(to.join(rel)));
				}
			}
		}
		out
	}

	/// Serializes every declared field (file fields as plain path strings)
	/// to a JSON object, e.g. for the worker IPC payload or cache manifest.
	pub fn to_json(&self, fields: &[FieldSpec]) -> Map<String, Json> {
		let mut map = Map::new();
		for field in fields {
			let value = self.0.get(&field.name).cloned().unwrap_or(FieldValue::Null);
			map.insert(field.name.clone(), value.to_json());
		}
		map
	}

	/// Parses every declared field (file fields as plain path strings) from
	/// a JSON object. Used on the worker side to deserialize its stdin
	/// payload, where file fields are always already-resolved paths.
	pub fn from_json_all(fields: &[FieldSpec], obj: &Map<String, Json>) -> Result<Self, String> {
		let mut record = Record::new();
		for field in fields {
			match obj.get(&field.name) {
				Some(value) if !value.is_null() => {
					let parsed = if field.ty.is_file() {
						value
							.as_str()
							.map(|s| FieldValue::FilePath(PathBuf::from(s)))
							.ok_or_else(|| format!("field {:?}: expected path string", field.name))?
					} else {
						FieldValue::from_json(&field.ty, value)
							.map_err(|e| format!("field {:?}: {e}", field.name))?
					};
					record.set(field.name.clone(), parsed);
				}
				_ => record.set(field.name.clone(), FieldValue::Null),
			}
		}
		Ok(record)
	}

	pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
		self.0.iter()
	}
}

/// Declared type lookup helper shared by callers iterating a `Record`
/// without holding onto the owning `Schema`.
pub fn field_type<'a>(fields: &'a [FieldSpec], name: &str) -> Option<&'a FieldType> {
	fields.iter().find(|f| f.name == name).map(|f| &f.ty)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::schema::FieldSpec;

	fn fields() -> Vec<FieldSpec> {
		vec![
			FieldSpec::new("scalar", FieldType::Int),
			FieldSpec::new("note", FieldType::Optional(Box::new(FieldType::String))),
			FieldSpec::new("in_file", FieldType::FilePath),
		]
	}

	#[test]
	fn validate_complete_requires_non_optional_fields() {
		let record = Record::new();
		let err = record.validate_complete(&fields()).unwrap_err();
		assert!(err.contains("scalar"));
	}

	#[test]
	fn validate_complete_allows_missing_optional_fields() {
		let mut record = Record::new();
		record.set("scalar", FieldValue::Int(3));
		record.set(
			"in_file",
			FieldValue::FilePath(PathBuf::from("/does/not/exist")),
		);
		let err = record.validate_complete(&fields()).unwrap_err();
		assert!(err.contains("in_file"));
	}
}
