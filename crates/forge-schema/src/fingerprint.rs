use sha2::{Digest, Sha256};

use crate::field::FieldValue;
use crate::record::Record;
use crate::schema::FieldSpec;

/// Computes the content-address of an input record (spec §4.3): iterate
/// fields in declared order, hash file contents for non-null file fields
/// and the textual representation otherwise, concatenate the per-field hex
/// digests, and hash the concatenation.
pub async fn compute_cache_key(fields: &[FieldSpec], record: &Record) -> std::io::Result<String> {
	let mut concatenated = String::new();

	for field in fields {
		let value = record.get(&field.name).cloned().unwrap_or(FieldValue::Null);
		let digest = if field.ty.is_file() && !value.is_null() {
			let path = value
				.as_file_path()
				.expect("non-null file field must carry a path");
			let bytes = tokio::fs::read(path).await?;
			hex::encode(Sha256::digest(&bytes))
		} else {
			hex::encode(Sha256::digest(value.textual_repr().as_bytes()))
		};
		concatenated.push_str(&digest);
	}

	Ok(hex::encode(Sha256::digest(concatenated.as_bytes())))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::field::FieldType;
	use crate::schema::FieldSpec;

	#[tokio::test]
	async fn identical_inputs_produce_identical_keys() {
		let dir = tempfile::tempdir().unwrap();
		let file_path = dir.path().join("in.bin");
		tokio::fs::write(&file_path, b"hello world").await.unwrap();

		let fields = vec![
			FieldSpec::new("scalar", FieldType::Int),
			FieldSpec::new("in_file", FieldType::FilePath),
		];

		let mut a = Record::new();
		a.set("scalar", FieldValue::Int(3));
		a.set("in_file", FieldValue::FilePath(file_path.clone()));

		let mut b = Record::new();
		b.set("scalar", FieldValue::Int(3));
		b.set("in_file", FieldValue::FilePath(file_path.clone()));

		let key_a = compute_cache_key(&fields, &a).await.unwrap();
		let key_b = compute_cache_key(&fields, &b).await.unwrap();
		assert_eq!(key_a, key_b);
	}

	#[tokio::test]
	async fn differing_file_contents_produce_different_keys() {
		let dir = tempfile::tempdir().unwrap();
		let path_a = dir.path().join("a.bin");
		let path_b = dir.path().join("b.bin");
		tokio::fs::write(&path_a, b"hello").await.unwrap();
		tokio::fs::write(&path_b, b"world").await.unwrap();

		let fields = vec![FieldSpec::new("in_file", FieldType::FilePath)];

		let mut a = Record::new();
		a.set("in_file", FieldValue::FilePath(path_a));
		let mut b = Record::new();
		b.set("in_file", FieldValue::FilePath(path_b));

		let key_a = compute_cache_key(&fields, &a).await.unwrap();
		let key_b = compute_cache_key(&fields, &b).await.unwrap();
		assert_ne!(key_a, key_b);
	}

	#[tokio::test]
	async fn differing_scalar_values_produce_different_keys() {
		let fields = vec![FieldSpec::new("scalar", FieldType::Int)];

		let mut a = Record::new();
		a.set("scalar", FieldValue::Int(3));
		let mut b = Record::new();
		b.set("scalar", FieldValue::Int(4));

		let key_a = compute_cache_key(&fields, &a).await.unwrap();
		let key_b = compute_cache_key(&fields, &b).await.unwrap();
		assert_ne!(key_a, key_b);
	}
}
