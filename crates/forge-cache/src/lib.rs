//! Content-addressed result cache (spec §4.3). Entries live at
//! `<root>/<key>/{response.json,files/,last_accessed.txt}`; eviction is
//! LRU by `last_accessed.txt`, writes are first-writer-wins.
//!
//! Grounded on `rhnode/cache.py`'s `Cache` class, translated from
//! synchronous `shutil`/`hashlib` calls to `tokio::fs` and the workspace's
//! `forge-error` error type.

mod fs_util;

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use forge_error::Error;
use forge_schema::{FieldSpec, Record};
use serde_json::Value as Json;
use tokio::fs;
use tracing::{debug, instrument, warn};

const FILES_DIR: &str = "files";
const MANIFEST_FILE: &str = "response.json";
const LAST_ACCESSED_FILE: &str = "last_accessed.txt";

pub struct Cache {
	root: PathBuf,
	capacity: usize,
	output_fields: Vec<FieldSpec>,
}

impl Cache {
	pub fn new(root: impl Into<PathBuf>, capacity: usize, output_fields: Vec<FieldSpec>) -> Self {
		Self {
			root: root.into(),
			capacity,
			output_fields,
		}
	}

	fn entry_dir(&self, key: &str) -> PathBuf {
		self.root.join(key)
	}

	/// Looks up a cache entry without copying anything out, verifying every
	/// file the manifest references still exists. A present-but-broken
	/// entry surfaces as `CacheCorrupted`, matching spec §4.3: "fatal local
	/// failure — caller recomputes".
	#[instrument(skip(self))]
	pub async fn lookup(&self, key: &str) -> Result<Option<Record>, Error> {
		let dir = self.entry_dir(key);
		if !fs::try_exists(&dir).await.unwrap_or(false) {
			return Ok(None);
		}

		let manifest = self.read_manifest(&dir).await?;
		self.check_integrity(&manifest)?;
		Ok(Some(manifest))
	}

	async fn read_manifest(&self, dir: &Path) -> Result<Record, Error> {
		let manifest_path = dir.join(MANIFEST_FILE);
		let data = fs::read_to_string(&manifest_path)
			.await
			.map_err(|e| Error::CacheCorrupted(format!("reading manifest: {e}")))?;
		let json: Json = serde_json::from_str(&data)
			.map_err(|e| Error::CacheCorrupted(format!("parsing manifest: {e}")))?;
		let obj = json
			.as_object()
			.ok_or_else(|| Error::CacheCorrupted("manifest is not a JSON object".to_string()))?;
		Record::from_json_all(&self.output_fields, obj)
			.map_err(|e| Error::CacheCorrupted(format!("decoding manifest: {e}")))
	}

	fn check_integrity(&self, manifest: &Record) -> Result<(), Error> {
		for field in &self.output_fields {
			if !field.ty.is_file() {
				continue;
			}
			if let Some(value) = manifest.get(&field.name) {
				if let Some(path) = value.as_file_path() {
					if !path.exists() {
						return Err(Error::CacheCorrupted(format!(
							"missing file for output {:?} at {}",
							field.name,
							path.display()
						)));
					}
				}
			}
		}
		Ok(())
	}

	/// Copies a hit's files into `dest_dir`, rewrites the manifest to point
	/// there, bumps `last_accessed`, and evicts if over capacity.
	#[instrument(skip(self))]
	pub async fn load(&self, key: &str, dest_dir: &Path) -> Result<Record, Error> {
		let dir = self.entry_dir(key);
		let manifest = self.read_manifest(&dir).await?;
		self.check_integrity(&manifest)?;

		let files_dir = dir.join(FILES_DIR);
		fs_util::copy_dir_all(&files_dir, dest_dir)
			.await
			.map_err(|e| Error::Other(e.into()))?;

		let rewritten = manifest.rewrite_file_paths(&self.output_fields, &files_dir, dest_dir);

		self.record_access(&dir).await?;
		self.maybe_evict().await?;

		Ok(rewritten)
	}

	/// Writes a new entry for `key` unless one already exists (first-writer
	/// wins, spec §4.3). `src_dir` is copied into `files/` and `manifest`'s
	/// file paths (which must live under `src_dir`) are rewritten
	/// accordingly.
	#[instrument(skip(self, manifest))]
	pub async fn save(&self, key: &str, manifest: &Record, src_dir: &Path) -> Result<(), Error> {
		let dir = self.entry_dir(key);

		if fs::try_exists(&dir).await.unwrap_or(false) {
			debug!(key, "cache entry already exists, skipping save");
			self.record_access(&dir).await?;
			self.maybe_evict().await?;
			return Ok(());
		}

		let files_dir = dir.join(FILES_DIR);
		fs::create_dir_all(&files_dir)
			.await
			.map_err(|e| Error::Other(e.into()))?;
		fs_util::copy_dir_all(src_dir, &files_dir)
			.await
			.map_err(|e| Error::Other(e.into()))?;

		let rewritten = manifest.rewrite_file_paths(&self.output_fields, src_dir, &files_dir);
		let json = Json::Object(rewritten.to_json(&self.output_fields));
		fs::write(
			dir.join(MANIFEST_FILE),
			serde_json::to_vec_pretty(&json).map_err(|e| Error::Other(e.into()))?,
		)
		.await
		.map_err(|e| Error::Other(e.into()))?;

		self.record_access(&dir).await?;
		self.maybe_evict().await?;

		Ok(())
	}

	async fn record_access(&self, dir: &Path) -> Result<(), Error> {
		let now = SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.unwrap_or_default()
			.as_secs_f64();
		fs::write(dir.join(LAST_ACCESSED_FILE), now.to_string())
			.await
			.map_err(|e| Error::Other(e.into()))
	}

	async fn last_accessed(&self, key_dir: &Path) -> f64 {
		fs::read_to_string(key_dir.join(LAST_ACCESSED_FILE))
			.await
			.ok()
			.and_then(|s| s.trim().parse().ok())
			.unwrap_or(0.0)
	}

	/// Evicts entries oldest-first until at most `capacity` remain (spec
	/// §4.3/§8 invariant 5).
	#[instrument(skip(self))]
	pub async fn evict(&self) -> Result<(), Error> {
		self.maybe_evict().await
	}

	async fn maybe_evict(&self) -> Result<(), Error> {
		fs::create_dir_all(&self.root)
			.await
			.map_err(|e| Error::Other(e.into()))?;

		let mut entries = fs::read_dir(&self.root)
			.await
			.map_err(|e| Error::Other(e.into()))?;
		let mut keys = Vec::new();
		while let Some(entry) = entries
			.next_entry()
			.await
			.map_err(|e| Error::Other(e.into()))?
		{
			if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
				keys.push(entry.path());
			}
		}

		if keys.len() <= self.capacity {
			return Ok(());
		}

		let mut with_times = Vec::with_capacity(keys.len());
		for key_dir in keys {
			let accessed = self.last_accessed(&key_dir).await;
			with_times.push((accessed, key_dir));
		}
		with_times.sort_by(|a, b| a.0.total_cmp(&b.0));

		let excess = with_times.len() - self.capacity;
		for (_, dir) in with_times.into_iter().take(excess) {
			warn!(dir = %dir.display(), "evicting cache entry");
			if let Err(e) = fs::remove_dir_all(&dir).await {
				warn!(dir = %dir.display(), error = %e, "failed to evict cache entry");
			}
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use forge_schema::{FieldType, FieldValue};

	fn output_fields() -> Vec<FieldSpec> {
		vec![
			FieldSpec::new("out_message", FieldType::String),
			FieldSpec::new("out_file", FieldType::FilePath),
		]
	}

	async fn make_src_dir() -> (tempfile::TempDir, Record) {
		let src = tempfile::tempdir().unwrap();
		fs::write(src.path().join("result.bin"), b"payload")
			.await
			.unwrap();

		let mut manifest = Record::new();
		manifest.set("out_message", FieldValue::String("this worked".into()));
		manifest.set(
			"out_file",
			FieldValue::FilePath(src.path().join("result.bin")),
		);
		(src, manifest)
	}

	#[tokio::test]
	async fn save_then_lookup_round_trips() {
		let root = tempfile::tempdir().unwrap();
		let cache = Cache::new(root.path(), 10, output_fields());
		let (src, manifest) = make_src_dir().await;

		cache.save("k1", &manifest, src.path()).await.unwrap();

		let hit = cache.lookup("k1").await.unwrap().expect("should hit");
		assert_eq!(
			hit.get("out_message").unwrap().textual_repr(),
			"this worked"
		);
	}

	#[tokio::test]
	async fn save_is_first_writer_wins() {
		let root = tempfile::tempdir().unwrap();
		let cache = Cache::new(root.path(), 10, output_fields());
		let (src, manifest) = make_src_dir().await;
		cache.save("k1", &manifest, src.path()).await.unwrap();

		let src2 = tempfile::tempdir().unwrap();
		fs::write(src2.path().join("result.bin"), b"different")
			.await
			.unwrap();
		let mut manifest2 = Record::new();
		manifest2.set("out_message", FieldValue::String("overwritten".into()));
		manifest2.set(
			"out_file",
			FieldValue::FilePath(src2.path().join("result.bin")),
		);
		cache.save("k1", &manifest2, src2.path()).await.unwrap();

		let hit = cache.lookup("k1").await.unwrap().unwrap();
		assert_eq!(hit.get("out_message").unwrap().textual_repr(), "this worked");
	}

	#[tokio::test]
	async fn load_copies_files_and_rewrites_paths() {
		let root = tempfile::tempdir().unwrap();
		let cache = Cache::new(root.path(), 10, output_fields());
		let (src, manifest) = make_src_dir().await;
		cache.save("k1", &manifest, src.path()).await.unwrap();

		let dest = tempfile::tempdir().unwrap();
		let loaded = cache.load("k1", dest.path()).await.unwrap();

		let out_file = loaded.get("out_file").unwrap().as_file_path().unwrap();
		assert!(out_file.starts_with(dest.path()));
		assert!(out_file.exists());
	}

	#[tokio::test]
	async fn missing_file_reports_corrupted() {
		let root = tempfile::tempdir().unwrap();
		let cache = Cache::new(root.path(), 10, output_fields());
		let (src, manifest) = make_src_dir().await;
		cache.save("k1", &manifest, src.path()).await.unwrap();

		fs::remove_dir_all(root.path().join("k1").join("files"))
			.await
			.unwrap();

		let err = cache.lookup("k1").await.unwrap_err();
		assert!(matches!(err, Error::CacheCorrupted(_)));
	}

	#[tokio::test]
	async fn eviction_keeps_most_recently_accessed() {
		let root = tempfile::tempdir().unwrap();
		let cache = Cache::new(root.path(), 2, output_fields());

		for i in 0..3 {
			let (src, mut manifest) = make_src_dir().await;
			manifest.set("out_message", FieldValue::String(format!("job-{i}")));
			cache.save(&format!("k{i}"), &manifest, src.path()).await.unwrap();
			// Ensure distinct last_accessed timestamps.
			tokio::time::sleep(std::time::Duration::from_millis(10)).await;
		}

		let mut remaining = fs::read_dir(root.path()).await.unwrap();
		let mut count = 0;
		while remaining.next_entry().await.unwrap().is_some() {
			count += 1;
		}
		assert_eq!(count, 2);
		// Oldest entry (k0) should have been evicted.
		assert!(cache.lookup("k0").await.unwrap().is_none());
		assert!(cache.lookup("k2").await.unwrap().is_some());
	}
}
