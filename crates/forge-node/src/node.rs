//! The `Node` entity: owns the job table for one `NodeType` process and the
//! [`SupervisorContext`] every job's supervisor task runs against.
//!
//! Grounded on `packages/infra/client/manager/src/main.rs`'s registration
//! retry loop, reworked from a blocking retry into an async one with a
//! fixed backoff (spec §5: "manager registration retries 5 times with 2s
//! backoff").

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use forge_cache::Cache;
use forge_config::NodeConfig;
use forge_error::Error;
use forge_schema::Schema;
use forge_supervisor::{HttpManagerClient, Job, ProcessWorkerLauncher, SupervisorContext, WorkerLauncher};
use tokio::sync::Mutex;
use tracing::{info, warn};

const REGISTER_RETRIES: u32 = 5;
const REGISTER_BACKOFF: Duration = Duration::from_secs(2);
const CLEANUP_AGE_HOURS: i64 = 8;

/// Wire shape of spec §6's `NodeMetaData`, the `register_node` body.
/// `address` is a SPEC_FULL.md supplement (see `forge-manager`'s
/// `NodeRegistry`): the node's own reachable `host:port`, separate from
/// `name`, the node *type* name used to key the registry.
#[derive(Debug, serde::Serialize)]
struct NodeMetaData {
	name: String,
	address: String,
	last_heard_from: chrono::DateTime<Utc>,
	gpu_gb_required: u64,
	threads_required: u32,
	memory_required: u32,
}

pub struct Node {
	pub config: NodeConfig,
	pub schema: Schema,
	pub ctx: Arc<SupervisorContext>,
	jobs: Mutex<HashMap<String, Arc<Job>>>,
}

impl Node {
	/// `config_path` is the `--config <path>` the node process itself was
	/// started with; it is forwarded to worker subprocesses (spec §4.2) so
	/// they can rebuild the same static `NodeType` configuration.
	pub fn new(config: NodeConfig, schema: Schema, config_path: &std::path::Path) -> std::io::Result<Self> {
		let (queue_poll_interval, cancel_poll_interval) = SupervisorContext::poll_defaults();
		let manager = HttpManagerClient::new(with_scheme(&config.manager_address));
		let worker_extra_args = vec!["--config".to_string(), config_path.to_string_lossy().into_owned()];
		let worker_launcher: Arc<dyn WorkerLauncher> =
			Arc::new(ProcessWorkerLauncher::for_current_exe(worker_extra_args)?);
		let cache = Cache::new(&config.cache_dir, config.cache_size, schema.output.clone());

		let ctx = Arc::new(SupervisorContext {
			cache: Arc::new(cache),
			manager: Arc::new(manager),
			worker_launcher,
			input_fields: schema.input.clone(),
			output_fields: schema.output.clone(),
			required_gpu_mb: config.required_gpu_mem_gb * 1024,
			required_threads: config.required_threads,
			required_memory_gb: config.required_memory_gb,
			queue_poll_interval,
			cancel_poll_interval,
		});

		Ok(Self {
			config,
			schema,
			ctx,
			jobs: Mutex::new(HashMap::new()),
		})
	}

	pub fn name(&self) -> &str {
		&self.config.name
	}

	pub async fn insert_job(&self, job: Arc<Job>) {
		self.jobs.lock().await.insert(job.id.clone(), job);
	}

	pub async fn get_job(&self, id: &str) -> Result<Arc<Job>, Error> {
		self.jobs
			.lock()
			.await
			.get(id)
			.cloned()
			.ok_or_else(|| Error::not_found(format!("job {id:?}")))
	}

	pub async fn remove_job(&self, id: &str) -> Option<Arc<Job>> {
		self.jobs.lock().await.remove(id)
	}

	pub async fn snapshot(&self) -> HashMap<String, forge_supervisor::JobStatus> {
		self.jobs
			.lock()
			.await
			.values()
			.map(|job| (job.id.clone(), job.status()))
			.collect()
	}

	/// Registers with this node's manager, retrying per spec §5. Logged but
	/// non-fatal on exhaustion: the node still serves job creation/upload,
	/// only dispatch-by-name via the manager is degraded.
	pub async fn register_with_manager(&self) {
		let client = reqwest::Client::new();
		let url = format!("{}/manager/register_node", with_scheme(&self.config.manager_address));
		let meta = NodeMetaData {
			name: self.config.name.clone(),
			address: with_scheme(&self.config.self_address),
			last_heard_from: Utc::now(),
			gpu_gb_required: self.config.required_gpu_mem_gb,
			threads_required: self.config.required_threads,
			memory_required: self.config.required_memory_gb,
		};

		for attempt in 1..=REGISTER_RETRIES {
			match client.post(&url).json(&meta).send().await {
				Ok(resp) if resp.status().is_success() => {
					info!(manager = %self.config.manager_address, "registered with manager");
					return;
				}
				Ok(resp) => {
					warn!(status = %resp.status(), attempt, "manager registration rejected");
				}
				Err(e) => {
					warn!(error = %e, attempt, "manager registration failed");
				}
			}
			if attempt < REGISTER_RETRIES {
				tokio::time::sleep(REGISTER_BACKOFF).await;
			}
		}
		warn!(manager = %self.config.manager_address, "giving up on manager registration");
	}

	/// Deletes terminal jobs older than [`CLEANUP_AGE_HOURS`] and their
	/// output directories. Intended to run once daily (see
	/// [`crate::schedule::start_cleanup_scheduler`]).
	pub async fn sweep_expired_jobs(&self) {
		let cutoff = Utc::now() - chrono::Duration::hours(CLEANUP_AGE_HOURS);
		let expired: Vec<Arc<Job>> = {
			let jobs = self.jobs.lock().await;
			jobs.values()
				.filter(|job| job.status().is_terminal() && job.created_at < cutoff)
				.cloned()
				.collect()
		};

		for job in expired {
			if let Err(e) = tokio::fs::remove_dir_all(&job.output_dir).await {
				if e.kind() != std::io::ErrorKind::NotFound {
					warn!(job_id = %job.id, error = %e, "failed to remove expired job output dir");
				}
			}
			self.jobs.lock().await.remove(&job.id);
			info!(job_id = %job.id, "swept expired job");
		}
	}
}

/// `NAME`/`PEER_ADDRESSES`/`manager_address` are bare `host:port` per spec
/// §6; the HTTP clients here need a scheme to build a request URL from.
pub fn with_scheme(address: &str) -> String {
	if address.starts_with("http://") || address.starts_with("https://") {
		address.to_string()
	} else {
		format!("http://{address}")
	}
}

/// Strips the scheme back off for `TcpListener::bind`.
pub fn bind_address(address: &str) -> &str {
	address
		.trim_start_matches("https://")
		.trim_start_matches("http://")
}
