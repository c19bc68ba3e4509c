use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// A field's semantic type (spec §3: "each field has a semantic type from
/// {int, float, bool, string, file-path, optional-of-any-of-these}").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldType {
	Int,
	Float,
	Bool,
	String,
	FilePath,
	Optional(Box<FieldType>),
}

impl FieldType {
	/// Whether a value of this type is allowed to be absent/null.
	pub fn is_optional(&self) -> bool {
		matches!(self, FieldType::Optional(_))
	}

	/// The innermost non-optional type.
	pub fn inner(&self) -> &FieldType {
		match self {
			FieldType::Optional(inner) => inner.inner(),
			other => other,
		}
	}

	pub fn is_file(&self) -> bool {
		matches!(self.inner(), FieldType::FilePath)
	}
}

/// A single field's runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
	Int(i64),
	Float(f64),
	Bool(bool),
	String(String),
	FilePath(PathBuf),
	Null,
}

impl FieldValue {
	pub fn is_null(&self) -> bool {
		matches!(self, FieldValue::Null)
	}

	pub fn as_file_path(&self) -> Option<&std::path::Path> {
		match self {
			FieldValue::FilePath(p) => Some(p.as_path()),
			_ => None,
		}
	}

	/// Deterministic textual representation used for non-file cache-key
	/// hashing (spec §4.3: "SHA-256 of the textual representation of the
	/// value").
	pub fn textual_repr(&self) -> String {
		match self {
			FieldValue::Int(v) => v.to_string(),
			FieldValue::Float(v) => format!("{v:?}"),
			FieldValue::Bool(v) => v.to_string(),
			FieldValue::String(v) => v.clone(),
			FieldValue::FilePath(p) => p.to_string_lossy().to_string(),
			FieldValue::Null => "null".to_string(),
		}
	}

	/// Converts to a JSON value for wire transport of non-file fields.
	pub fn to_json(&self) -> Json {
		match self {
			FieldValue::Int(v) => Json::from(*v),
			FieldValue::Float(v) => serde_json::Number::from_f64(*v)
				.map(Json::Number)
				.unwrap_or(Json::Null),
			FieldValue::Bool(v) => Json::from(*v),
			FieldValue::String(v) => Json::from(v.clone()),
			FieldValue::FilePath(p) => Json::from(p.to_string_lossy().to_string()),
			FieldValue::Null => Json::Null,
		}
	}

	/// Parses a JSON value according to a declared field type. File-valued
	/// fields never arrive via JSON (they are uploaded separately); this is
	/// only used to populate non-file fields.
	pub fn from_json(ty: &FieldType, value: &Json) -> Result<Self, String> {
		if value.is_null() {
			if ty.is_optional() {
				return Ok(FieldValue::Null);
			}
			return Err("value is null but field is required".to_string());
		}

		match ty.inner() {
			FieldType::Int => value
				.as_i64()
				.map(FieldValue::Int)
				.ok_or_else(|| "expected integer".to_string()),
			FieldType::Float => value
				.as_f64()
				.map(FieldValue::Float)
				.ok_or_else(|| "expected float".to_string()),
			FieldType::Bool => value
				.as_bool()
				.map(FieldValue::Bool)
				.ok_or_else(|| "expected bool".to_string()),
			FieldType::String => value
				.as_str()
				.map(|s| FieldValue::String(s.to_string()))
				.ok_or_else(|| "expected string".to_string()),
			FieldType::FilePath => value
				.as_str()
				.map(|s| FieldValue::FilePath(PathBuf::from(s)))
				.ok_or_else(|| "expected file path string".to_string()),
			FieldType::Optional(_) => unreachable!("inner() never returns Optional"),
		}
	}
}
