//! Environment and file-based configuration for the node and manager
//! binaries.
//!
//! Grounded on `packages/infra/client/manager/src/main.rs::init`: read a
//! config file whose format is inferred from its extension, plus a handful
//! of deployment knobs taken straight from the environment (spec §6).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Manager-level configuration, entirely environment-driven (spec §6).
#[derive(Debug, Clone)]
pub struct ManagerConfig {
	/// Per-GPU memory budgets in MB, from `GPU_MEM` (e.g. `"8000,8000"`).
	pub gpu_mem_mb: Vec<u64>,
	/// From `NUM_THREADS`.
	pub num_threads: u32,
	/// From `MEMORY`, in GB.
	pub memory_gb: u32,
	/// `host:port` identifying this manager, from `NAME`.
	pub name: String,
	/// From `PEER_ADDRESSES`, comma separated.
	pub peer_addresses: Vec<String>,
	/// Operational flag, out of core scope; carried for completeness.
	pub mode: Option<String>,
	/// Operational flag, out of core scope; carried for completeness.
	pub email_on_error: bool,
}

impl ManagerConfig {
	pub fn from_env() -> Result<Self> {
		let gpu_mem_mb = parse_csv_u64(&env_var("GPU_MEM")?).context("parsing GPU_MEM")?;
		let num_threads = env_var("NUM_THREADS")?
			.parse()
			.context("parsing NUM_THREADS")?;
		let memory_gb = env_var("MEMORY")?.parse().context("parsing MEMORY")?;
		let name = env_var("NAME")?;
		let peer_addresses = std::env::var("PEER_ADDRESSES")
			.ok()
			.map(|s| {
				s.split(',')
					.map(str::trim)
					.filter(|s| !s.is_empty())
					.map(str::to_string)
					.collect()
			})
			.unwrap_or_default();
		let mode = std::env::var("MODE").ok();
		let email_on_error = std::env::var("EMAIL_ON_ERROR")
			.map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
			.unwrap_or(false);

		Ok(Self {
			gpu_mem_mb,
			num_threads,
			memory_gb,
			name,
			peer_addresses,
			mode,
			email_on_error,
		})
	}
}

fn env_var(key: &str) -> Result<String> {
	std::env::var(key).with_context(|| format!("missing required env var {key}"))
}

fn parse_csv_u64(s: &str) -> Result<Vec<u64>> {
	s.split(',')
		.map(str::trim)
		.filter(|s| !s.is_empty())
		.map(|s| s.parse::<u64>().map_err(Into::into))
		.collect()
}

/// Static per-node-process configuration (spec §3's `NodeType` fields),
/// read from a config file passed on the command line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
	pub name: String,
	pub required_gpu_mem_gb: u64,
	pub required_threads: u32,
	pub required_memory_gb: u32,
	pub cache_size: usize,
	pub cache_dir: PathBuf,
	pub output_dir_root: PathBuf,
	pub input_dir_root: PathBuf,
	/// `host:port` of the manager this node registers and queues against.
	pub manager_address: String,
	/// `host:port` this node itself listens on and advertises to the
	/// manager/dispatcher.
	pub self_address: String,
}

impl NodeConfig {
	pub async fn load(path: &Path) -> Result<Self> {
		let data = tokio::fs::read_to_string(path)
			.await
			.with_context(|| format!("failed to read config file at {}", path.display()))?;

		match path.extension().and_then(|s| s.to_str()) {
			Some("json") => serde_json::from_str(&data)
				.with_context(|| format!("failed to parse JSON config at {}", path.display())),
			Some("yaml") | Some("yml") => serde_yaml::from_str(&data)
				.with_context(|| format!("failed to parse YAML config at {}", path.display())),
			_ => bail!("unrecognized config file extension at {}", path.display()),
		}
	}
}

/// Sets up a `tracing_subscriber` registry matching the teacher's
/// `init_tracing` (logfmt layer at info level, overridable via `RUST_LOG`).
pub fn init_tracing() {
	use tracing_subscriber::prelude::*;

	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

	let _ = tracing_subscriber::registry()
		.with(tracing_logfmt::builder().layer())
		.with(filter)
		.try_init();
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_csv() {
		assert_eq!(parse_csv_u64("8000,8000").unwrap(), vec![8000, 8000]);
		assert_eq!(parse_csv_u64(" 8000 , 4000 ").unwrap(), vec![8000, 4000]);
	}

	#[tokio::test]
	async fn loads_yaml_node_config() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("node.yaml");
		tokio::fs::write(
			&path,
			r#"
name: add
required_gpu_mem_gb: 3
required_threads: 3
required_memory_gb: 3
cache_size: 10
cache_dir: /tmp/add/cache
output_dir_root: /tmp/add/jobs
input_dir_root: /tmp/add/inputs
manager_address: "localhost:9050"
self_address: "localhost:8000"
"#,
		)
		.await
		.unwrap();

		let cfg = NodeConfig::load(&path).await.unwrap();
		assert_eq!(cfg.name, "add");
		assert_eq!(cfg.required_gpu_mem_gb, 3);
	}

	#[tokio::test]
	async fn rejects_unknown_extension() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("node.txt");
		tokio::fs::write(&path, "name: add").await.unwrap();
		assert!(NodeConfig::load(&path).await.is_err());
	}
}
