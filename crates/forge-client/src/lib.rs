//! Client driver (spec §4.6). Grounded on
//! `original_source/rhnode/rhjob.py::RHJob`: resolve the target node
//! address (directly, or through the manager's dispatcher), create a job,
//! upload files one by one, start it, poll status, and on `Finished`
//! download file outputs into a local directory. Reworked from
//! `RHJob`'s synchronous `requests` calls into an async `reqwest` driver
//! returning the workspace's `forge_error::Error` rather than raising
//! ad hoc Python exceptions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use forge_error::Error;
use forge_supervisor::{JobErrorInfo, JobStatus, RunConfig};
use serde_json::{Map, Value as Json};

/// How often the client polls job status while queued or running. Not
/// part of the core contract (spec §5's poll intervals are server-side);
/// chosen generously since this loop only burns a client HTTP round trip.
const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(2);

/// One input value supplied to a job: either a plain JSON scalar or a path
/// to a file that must be uploaded for a declared file-valued input field.
#[derive(Debug, Clone)]
pub enum InputValue {
	Json(Json),
	File(PathBuf),
}

/// What `wait` returns: the non-file output fields plus the local paths
/// any file-valued outputs were downloaded to.
#[derive(Debug, Clone, Default)]
pub struct JobOutcome {
	pub fields: Map<String, Json>,
	pub downloaded_files: HashMap<String, PathBuf>,
}

/// A job submitted to a specific node host. Wraps the node's HTTP surface
/// (spec §4.5) for the lifetime of one job.
pub struct JobClient {
	http: reqwest::Client,
	root: String,
	node_name: String,
	pub job_id: String,
}

impl JobClient {
	/// Resolves `node_name`'s host, via the manager's dispatcher, matching
	/// `RHJob._get_addr_for_job`.
	pub async fn resolve_host(manager_address: &str, node_name: &str) -> Result<String, Error> {
		let root = with_scheme(manager_address);
		let url = format!("{root}/manager/dispatcher/get_host/{node_name}");
		let client = reqwest::Client::new();
		let host: String = client
			.get(&url)
			.send()
			.await
			.map_err(|e| Error::Other(e.into()))?
			.error_for_status()
			.map_err(|e| Error::Other(e.into()))?
			.json()
			.await
			.map_err(|e| Error::Other(e.into()))?;
		Ok(host)
	}

	fn base_url(&self) -> String {
		format!("{}/{}", self.root, self.node_name)
	}

	/// Attaches to an already-submitted job (e.g. from a CLI invocation
	/// that only has a host/node/job-id triple), without going through
	/// `create`.
	pub fn attach(host: &str, node_name: &str, job_id: impl Into<String>) -> Self {
		Self {
			http: reqwest::Client::new(),
			root: with_scheme(host),
			node_name: node_name.to_string(),
			job_id: job_id.into(),
		}
	}

	/// Creates and starts a job on `host` (a bare or scheme-prefixed
	/// `host:port`), matching `RHJob.start`: split inputs into file and
	/// non-file fields via `/filename_keys`, create, upload each file, then
	/// start.
	pub async fn create(
		host: &str,
		node_name: &str,
		inputs: HashMap<String, InputValue>,
		run_config: RunConfig,
	) -> Result<Self, Error> {
		let http = reqwest::Client::new();
		let root = with_scheme(host);
		let base_url = format!("{root}/{node_name}");

		let file_keys: Vec<String> = http
			.get(format!("{base_url}/filename_keys"))
			.send()
			.await
			.map_err(|e| Error::Other(e.into()))?
			.error_for_status()
			.map_err(|e| Error::Other(e.into()))?
			.json()
			.await
			.map_err(|e| Error::Other(e.into()))?;

		let mut non_file = Map::new();
		let mut files = Vec::new();
		for (key, value) in inputs {
			match value {
				InputValue::Json(json) => {
					non_file.insert(key, json);
				}
				InputValue::File(path) => {
					if !file_keys.contains(&key) {
						return Err(Error::NotReady(format!(
							"{key:?} is not a declared file input field on node {node_name:?}"
						)));
					}
					files.push((key, path));
				}
			}
		}

		let created: Json = http
			.post(format!("{base_url}/jobs"))
			.json(&non_file)
			.send()
			.await
			.map_err(|e| Error::Other(e.into()))?
			.error_for_status()
			.map_err(|e| Error::Other(e.into()))?
			.json()
			.await
			.map_err(|e| Error::Other(e.into()))?;
		let job_id = created
			.get("job_id")
			.and_then(Json::as_str)
			.ok_or_else(|| Error::Other(anyhow::anyhow!("create response missing job_id")))?
			.to_string();

		for (key, path) in files {
			let bytes = tokio::fs::read(&path).await.map_err(anyhow::Error::from)?;
			let file_name = path
				.file_name()
				.map(|n| n.to_string_lossy().to_string())
				.unwrap_or_else(|| key.clone());
			let form = reqwest::multipart::Form::new()
				.text("key", key.clone())
				.part("file", reqwest::multipart::Part::bytes(bytes).file_name(file_name));

			http.post(format!("{base_url}/jobs/{job_id}/upload"))
				.multipart(form)
				.send()
				.await
				.map_err(|e| Error::Other(e.into()))?
				.error_for_status()
				.map_err(|e| Error::Other(e.into()))?;
		}

		http.post(format!("{base_url}/jobs/{job_id}/start"))
			.json(&run_config)
			.send()
			.await
			.map_err(|e| Error::Other(e.into()))?
			.error_for_status()
			.map_err(|e| Error::Other(e.into()))?;

		Ok(Self {
			http,
			root,
			node_name: node_name.to_string(),
			job_id,
		})
	}

	pub async fn status(&self) -> Result<JobStatus, Error> {
		self.http
			.get(format!("{}/jobs/{}/status", self.base_url(), self.job_id))
			.send()
			.await
			.map_err(|e| Error::Other(e.into()))?
			.error_for_status()
			.map_err(|e| Error::Other(e.into()))?
			.json()
			.await
			.map_err(|e| Error::Other(e.into()))
	}

	/// Requests cancellation (spec §4.6's `stop`).
	pub async fn stop(&self) -> Result<(), Error> {
		self.http
			.post(format!("{}/jobs/{}/stop", self.base_url(), self.job_id))
			.send()
			.await
			.map_err(|e| Error::Other(e.into()))?
			.error_for_status()
			.map_err(|e| Error::Other(e.into()))?;
		Ok(())
	}

	/// Polls until the job reaches a terminal status, then, on `Finished`,
	/// downloads file outputs into `output_dir`. Raises the error kinds
	/// spec §7 names for the client driver: `JobFailed` and `JobCancelled`.
	pub async fn wait(&self, output_dir: &Path) -> Result<JobOutcome, Error> {
		loop {
			match self.status().await? {
				JobStatus::Finished => return self.collect_output(output_dir).await,
				JobStatus::Error => {
					let info: JobErrorInfo = self
						.http
						.get(format!("{}/jobs/{}/error", self.base_url(), self.job_id))
						.send()
						.await
						.map_err(|e| Error::Other(e.into()))?
						.error_for_status()
						.map_err(|e| Error::Other(e.into()))?
						.json()
						.await
						.map_err(|e| Error::Other(e.into()))?;
					return Err(Error::JobFailed {
						message: info.message,
						traceback: info.traceback.unwrap_or_default(),
						error_type: info.kind,
					});
				}
				JobStatus::Cancelled => return Err(Error::JobCancelled),
				_ => tokio::time::sleep(POLL_INTERVAL).await,
			}
		}
	}

	async fn collect_output(&self, output_dir: &Path) -> Result<JobOutcome, Error> {
		let data: Map<String, Json> = self
			.http
			.get(format!("{}/jobs/{}/data", self.base_url(), self.job_id))
			.send()
			.await
			.map_err(|e| Error::Other(e.into()))?
			.error_for_status()
			.map_err(|e| Error::Other(e.into()))?
			.json()
			.await
			.map_err(|e| Error::Other(e.into()))?;

		let mut outcome = JobOutcome::default();
		for (key, value) in data {
			if let Some(relative_url) = value.as_str().filter(|s| s.contains("/download/")) {
				let bytes = self
					.http
					.get(format!("{}{relative_url}", self.root))
					.send()
					.await
					.map_err(|e| Error::Other(e.into()))?
					.error_for_status()
					.map_err(|e| Error::Other(e.into()))?
					.bytes()
					.await
					.map_err(|e| Error::Other(e.into()))?;

				tokio::fs::create_dir_all(output_dir).await.map_err(anyhow::Error::from)?;
				let dest = output_dir.join(&key);
				tokio::fs::write(&dest, &bytes).await.map_err(anyhow::Error::from)?;
				outcome.downloaded_files.insert(key, dest);
			} else {
				outcome.fields.insert(key, value);
			}
		}
		Ok(outcome)
	}
}

/// Builds a child job's `RunConfig` from its parent's, matching
/// `RHJob.from_parent_job`: inherits `priority`/`check_cache`/
/// `save_to_cache` unconditionally, and when `use_same_resources` is set
/// (or the parent already ran with resources included) inherits
/// `device_id` and marks `resources_included`.
pub fn child_run_config(parent: &RunConfig, use_same_resources: bool) -> RunConfig {
	let inherits_device = use_same_resources || parent.resources_included;
	RunConfig {
		priority: parent.priority,
		check_cache: parent.check_cache,
		save_to_cache: parent.save_to_cache,
		resources_included: parent.resources_included || use_same_resources,
		device_id: if inherits_device { parent.device_id } else { None },
	}
}

/// Picks an output directory for a job, appending a numeric suffix if the
/// preferred name already exists (spec §4.6: "created with a
/// numerically-suffixed name if already exists unless the caller pinned
/// one"), matching `_create_output_directory_name`.
pub fn unique_output_dir(base: &Path, node_name: &str) -> PathBuf {
	let mut candidate = base.join(node_name);
	let mut suffix = 1;
	while candidate.exists() {
		candidate = base.join(format!("{node_name}_{suffix}"));
		suffix += 1;
	}
	candidate
}

fn with_scheme(address: &str) -> String {
	if address.starts_with("http://") || address.starts_with("https://") {
		address.to_string()
	} else {
		format!("http://{address}")
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unique_output_dir_appends_numeric_suffix() {
		let tmp = tempfile::tempdir().unwrap();
		std::fs::create_dir(tmp.path().join("add")).unwrap();
		std::fs::create_dir(tmp.path().join("add_1")).unwrap();

		let picked = unique_output_dir(tmp.path(), "add");
		assert_eq!(picked, tmp.path().join("add_2"));
	}

	#[test]
	fn unique_output_dir_uses_bare_name_when_free() {
		let tmp = tempfile::tempdir().unwrap();
		let picked = unique_output_dir(tmp.path(), "add");
		assert_eq!(picked, tmp.path().join("add"));
	}

	#[test]
	fn child_inherits_parent_fields_without_resource_sharing() {
		let parent = RunConfig {
			priority: 5,
			check_cache: false,
			save_to_cache: true,
			resources_included: false,
			device_id: Some(2),
		};
		let child = child_run_config(&parent, false);
		assert_eq!(child.priority, 5);
		assert!(!child.check_cache);
		assert!(child.save_to_cache);
		assert!(!child.resources_included);
		assert_eq!(child.device_id, None);
	}

	#[test]
	fn child_inherits_device_when_sharing_resources() {
		let parent = RunConfig {
			priority: 5,
			check_cache: true,
			save_to_cache: true,
			resources_included: false,
			device_id: Some(2),
		};
		let child = child_run_config(&parent, true);
		assert!(child.resources_included);
		assert_eq!(child.device_id, Some(2));
	}

	#[test]
	fn child_inherits_device_when_parent_already_resources_included() {
		let parent = RunConfig {
			priority: 1,
			check_cache: true,
			save_to_cache: false,
			resources_included: true,
			device_id: Some(1),
		};
		let child = child_run_config(&parent, false);
		assert!(child.resources_included);
		assert_eq!(child.device_id, Some(1));
	}
}
