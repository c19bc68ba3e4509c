//! Post-run output directory hygiene (spec §4.2 Running → Finished):
//! delete every regular file not referenced by an output field, prune
//! empty subdirectories, and rewrite relative output paths against the
//! worker's working directory.

use std::path::{Path, PathBuf};

use forge_schema::{FieldSpec, FieldValue, Record};

/// Rewrites absolute file-valued outputs to be relative to `output_dir`,
/// and absolutizes relative ones under `output_dir`. Errors if any
/// resulting path escapes `output_dir`.
pub fn normalize_output_paths(
	record: &Record,
	fields: &[FieldSpec],
	output_dir: &Path,
) -> Result<Record, String> {
	let mut normalized = Record::new();
	for field in fields {
		let Some(value) = record.get(&field.name) else {
			normalized.set(field.name.clone(), FieldValue::Null);
			continue;
		};
		if !field.ty.is_file() {
			normalized.set(field.name.clone(), value.clone());
			continue;
		}
		match value {
			FieldValue::Null => normalized.set(field.name.clone(), FieldValue::Null),
			FieldValue::FilePath(p) => {
				let absolute = if p.is_absolute() {
					p.clone()
				} else {
					output_dir.join(p)
				};
				if !absolute.starts_with(output_dir) {
					return Err(format!(
						"output {:?} path {} escapes output_dir {}",
						field.name,
						absolute.display(),
						output_dir.display()
					));
				}
				normalized.set(field.name.clone(), FieldValue::FilePath(absolute));
			}
			_ => unreachable!("file field holds non-file value"),
		}
	}
	Ok(normalized)
}

/// Deletes every regular file under `output_dir` not referenced by an
/// output field, then prunes directories left empty by that deletion.
pub async fn scrub_output_dir(
	output_dir: &Path,
	output: &Record,
	fields: &[FieldSpec],
) -> std::io::Result<()> {
	let referenced: std::collections::HashSet<PathBuf> = fields
		.iter()
		.filter(|f| f.ty.is_file())
		.filter_map(|f| output.get(&f.name))
		.filter_map(|v| v.as_file_path().map(|p| p.to_path_buf()))
		.collect();

	delete_unreferenced(output_dir, &referenced).await?;
	prune_empty_dirs(output_dir).await?;
	Ok(())
}

async fn delete_unreferenced(
	dir: &Path,
	referenced: &std::collections::HashSet<PathBuf>,
) -> std::io::Result<()> {
	let mut entries = tokio::fs::read_dir(dir).await?;
	while let Some(entry) = entries.next_entry().await? {
		let path = entry.path();
		let file_type = entry.file_type().await?;
		if file_type.is_dir() {
			Box::pin(delete_unreferenced(&path, referenced)).await?;
		} else if file_type.is_file() && !referenced.contains(&path) {
			tokio::fs::remove_file(&path).await?;
		}
	}
	Ok(())
}

async fn prune_empty_dirs(dir: &Path) -> std::io::Result<bool> {
	let mut entries = tokio::fs::read_dir(dir).await?;
	let mut is_empty = true;
	let mut subdirs = Vec::new();
	while let Some(entry) = entries.next_entry().await? {
		if entry.file_type().await?.is_dir() {
			subdirs.push(entry.path());
		} else {
			is_empty = false;
		}
	}
	for subdir in subdirs {
		if Box::pin(prune_empty_dirs(&subdir)).await? {
			tokio::fs::remove_dir(&subdir).await?;
		} else {
			is_empty = false;
		}
	}
	Ok(is_empty)
}

#[cfg(test)]
mod tests {
	use super::*;
	use forge_schema::FieldType;

	#[tokio::test]
	async fn scrub_removes_unreferenced_files_and_prunes_empty_dirs() {
		let dir = tempfile::tempdir().unwrap();
		tokio::fs::write(dir.path().join("keep.bin"), b"x").await.unwrap();
		tokio::fs::write(dir.path().join("scratch.tmp"), b"y").await.unwrap();
		tokio::fs::create_dir(dir.path().join("empty_subdir")).await.unwrap();
		tokio::fs::create_dir(dir.path().join("nonempty_subdir")).await.unwrap();
		tokio::fs::write(dir.path().join("nonempty_subdir/also_scratch"), b"z")
			.await
			.unwrap();

		let fields = vec![FieldSpec::new("out_file", FieldType::FilePath)];
		let mut output = Record::new();
		output.set(
			"out_file",
			FieldValue::FilePath(dir.path().join("keep.bin")),
		);

		scrub_output_dir(dir.path(), &output, &fields).await.unwrap();

		assert!(dir.path().join("keep.bin").exists());
		assert!(!dir.path().join("scratch.tmp").exists());
		assert!(!dir.path().join("empty_subdir").exists());
		assert!(!dir.path().join("nonempty_subdir").exists());
	}

	#[test]
	fn normalize_rejects_paths_escaping_output_dir() {
		let fields = vec![FieldSpec::new("out_file", FieldType::FilePath)];
		let mut record = Record::new();
		record.set("out_file", FieldValue::FilePath(PathBuf::from("/etc/passwd")));

		let err = normalize_output_paths(&record, &fields, Path::new("/tmp/job1")).unwrap_err();
		assert!(err.contains("escapes"));
	}

	#[test]
	fn normalize_absolutizes_relative_paths_under_output_dir() {
		let fields = vec![FieldSpec::new("out_file", FieldType::FilePath)];
		let mut record = Record::new();
		record.set("out_file", FieldValue::FilePath(PathBuf::from("result.bin")));

		let normalized = normalize_output_paths(&record, &fields, Path::new("/tmp/job1")).unwrap();
		assert_eq!(
			normalized.get("out_file").unwrap().as_file_path().unwrap(),
			Path::new("/tmp/job1/result.bin")
		);
	}
}
