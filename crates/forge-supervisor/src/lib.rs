//! Per-job state machine driver (spec §4.2). Grounded on
//! `original_source/rhnode/rhnode.py`'s `RHJob`/`process_wrapper`
//! lifecycle, reworked from a threaded Flask app into cooperative async
//! tasks: one `run_supervisor` future per Job, spawned by the node's HTTP
//! `start` handler and otherwise untouched by it.

mod fs_scrub;
mod job;
mod manager_client;
mod protocol;
mod worker;

pub use job::{Job, JobErrorInfo, JobStatus, RunConfig};
pub use manager_client::{HttpManagerClient, ManagerClient};
pub use protocol::{read_frame, write_frame, JobDescriptor, WorkerMessage, WORKER_FLAG};
pub use worker::{ProcessWorkerLauncher, WorkerHandle, WorkerLauncher};

use std::sync::Arc;
use std::time::Duration;

use forge_cache::Cache;
use forge_error::Error;
use forge_schema::{FieldSpec, Record};
use serde_json::{Map, Value as Json};
use tracing::{info, instrument, warn};

/// Static, per-node-type configuration the supervisor needs but which does
/// not vary per job (spec §3 `NodeType`).
pub struct SupervisorContext {
	pub cache: Arc<Cache>,
	pub manager: Arc<dyn ManagerClient>,
	pub worker_launcher: Arc<dyn WorkerLauncher>,
	pub input_fields: Vec<FieldSpec>,
	pub output_fields: Vec<FieldSpec>,
	pub required_gpu_mb: u64,
	pub required_threads: u32,
	pub required_memory_gb: u32,
	pub queue_poll_interval: Duration,
	pub cancel_poll_interval: Duration,
}

impl SupervisorContext {
	/// Default polling cadence from spec §4.2/§5: ~3s queue polls, 0.5s
	/// cancel-drain polls.
	pub fn poll_defaults() -> (Duration, Duration) {
		(Duration::from_secs(3), Duration::from_millis(500))
	}
}

/// Finalizes `Preparing -> Initializing`: re-validates the partial input
/// record against the full schema. Called synchronously from the node's
/// `start` handler, before the supervisor task is spawned, so a missing
/// required input surfaces as an immediate `NotReady` response rather than
/// an async job-error transition.
pub fn validate_for_start(job: &Job, input_fields: &[FieldSpec]) -> Result<(), Error> {
	job.with_input(|record| record.validate_complete(input_fields))
		.map_err(Error::NotReady)?;
	job.set_status(JobStatus::Initializing);
	Ok(())
}

/// Drives a Job from `Initializing` through to a terminal status. Intended
/// to be spawned as a background task immediately after
/// [`validate_for_start`] succeeds.
#[instrument(skip(job, ctx), fields(job_id = %job.id))]
pub async fn run_supervisor(job: Arc<Job>, ctx: Arc<SupervisorContext>) {
	let input_record = job.with_input(|r| r.clone());

	let cache_key = match forge_schema::compute_cache_key(&ctx.input_fields, &input_record).await {
		Ok(key) => key,
		Err(e) => {
			fail_job(&job, "CacheKeyError", e.to_string(), None);
			return;
		}
	};

	let run_config = job.run_config();

	if run_config.check_cache {
		match ctx.cache.lookup(&cache_key).await {
			Ok(Some(_manifest)) => {
				match ctx.cache.load(&cache_key, &job.output_dir).await {
					Ok(output) => {
						info!(cache_key, "cache hit, skipping queue and worker");
						job.set_output(output);
						job.set_status(JobStatus::Finished);
						return;
					}
					Err(e) => {
						warn!(error = %e, "cache hit reported corrupted, recomputing");
					}
				}
			}
			Ok(None) => {}
			Err(e) => {
				warn!(error = %e, "cache lookup failed, recomputing");
			}
		}
	}

	if job.status() == JobStatus::Cancelling {
		job.set_status(JobStatus::Cancelled);
		return;
	}

	let queue_id = job.queue_id();

	if !run_config.resources_included {
		if let Err(e) = ctx
			.manager
			.add_job(
				&queue_id,
				run_config.priority,
				ctx.required_gpu_mb,
				ctx.required_threads,
				ctx.required_memory_gb,
			)
			.await
		{
			let kind = match &e {
				Error::InvalidRequirements(_) => "InvalidRequirements",
				_ => "ManagerUnreachable",
			};
			fail_job(&job, kind, e.to_string(), None);
			return;
		}
		job.set_status(JobStatus::Queued);

		loop {
			if job.status() == JobStatus::Cancelling {
				ctx.manager.end_job(&queue_id).await.ok();
				job.set_status(JobStatus::Cancelled);
				return;
			}
			match ctx.manager.is_active(&queue_id).await {
				Ok((true, device_id)) => {
					if let Some(id) = device_id {
						job.set_device_id(id);
					}
					break;
				}
				Ok((false, _)) => {}
				Err(e) => {
					warn!(error = %e, "is_active poll failed, retrying");
				}
			}
			tokio::time::sleep(ctx.queue_poll_interval).await;
		}
	}

	job.set_status(JobStatus::Running);

	let run_config = job.run_config();
	let descriptor = JobDescriptor {
		device_id: run_config.device_id,
		output_dir: job.output_dir.to_string_lossy().to_string(),
		priority: run_config.priority,
		check_cache: run_config.check_cache,
		save_to_cache: run_config.save_to_cache,
		resources_included: run_config.resources_included,
	};

	let mut handle = match ctx
		.worker_launcher
		.launch(&input_record, &ctx.input_fields, descriptor)
		.await
	{
		Ok(handle) => handle,
		Err(e) => {
			end_resources(&ctx, &queue_id, &run_config).await;
			fail_job(&job, "WorkerSpawnError", e.to_string(), None);
			return;
		}
	};

	let worker_result = {
		let mut recv_fut = handle.recv();
		loop {
			tokio::select! {
				result = &mut recv_fut => break Some(result),
				_ = tokio::time::sleep(ctx.queue_poll_interval) => {
					if job.status() == JobStatus::Cancelling {
						break None;
					}
				}
			}
		}
	};

	let Some(worker_result) = worker_result else {
		handle.terminate().await;
		loop {
			if handle.try_exited().await {
				break;
			}
			tokio::time::sleep(ctx.cancel_poll_interval).await;
		}
		end_resources(&ctx, &queue_id, &run_config).await;
		job.set_status(JobStatus::Cancelled);
		return;
	};

	end_resources(&ctx, &queue_id, &run_config).await;

	match worker_result {
		Ok(WorkerMessage::Success { output }) => {
			finalize_success(&job, &ctx, &cache_key, &run_config, output).await;
		}
		Ok(WorkerMessage::Error { traceback, error_type }) => {
			fail_job(&job, &error_type, "worker reported an error".to_string(), Some(traceback));
		}
		Err(e) => {
			fail_job(&job, "WorkerCrashed", e.to_string(), None);
		}
	}
}

async fn end_resources(ctx: &SupervisorContext, queue_id: &str, run_config: &RunConfig) {
	if !run_config.resources_included {
		if let Err(e) = ctx.manager.end_job(queue_id).await {
			warn!(queue_id, error = %e, "end_job failed, resources may leak until manager restart");
		}
	}
}

async fn finalize_success(
	job: &Job,
	ctx: &SupervisorContext,
	cache_key: &str,
	run_config: &RunConfig,
	output: std::collections::HashMap<String, Json>,
) {
	let obj: Map<String, Json> = output.into_iter().collect();
	let record = match Record::from_json_all(&ctx.output_fields, &obj) {
		Ok(record) => record,
		Err(e) => {
			fail_job(job, "InvalidOutput", e, None);
			return;
		}
	};

	let normalized = match fs_scrub::normalize_output_paths(&record, &ctx.output_fields, &job.output_dir) {
		Ok(record) => record,
		Err(e) => {
			fail_job(job, "InvalidOutput", e, None);
			return;
		}
	};

	if let Err(e) = fs_scrub::scrub_output_dir(&job.output_dir, &normalized, &ctx.output_fields).await {
		warn!(error = %e, "failed to scrub output dir");
	}

	if let Err(e) = tokio::fs::remove_dir_all(&job.input_dir).await {
		warn!(error = %e, "failed to delete input dir");
	}

	if run_config.save_to_cache {
		if let Err(e) = ctx.cache.save(cache_key, &normalized, &job.output_dir).await {
			warn!(error = %e, "failed to write result to cache");
		}
	}

	job.set_output(normalized);
	job.set_status(JobStatus::Finished);
}

fn fail_job(job: &Job, kind: &str, message: String, traceback: Option<String>) {
	job.set_error(JobErrorInfo {
		kind: kind.to_string(),
		message,
		traceback,
	});
	job.set_status(JobStatus::Error);
}

#[cfg(test)]
mod tests {
	use super::*;
	use forge_schema::{FieldType, FieldValue};
	use std::collections::HashMap;
	use std::sync::Mutex as StdMutex;

	fn fields() -> (Vec<FieldSpec>, Vec<FieldSpec>) {
		(
			vec![FieldSpec::new("name", FieldType::String)],
			vec![FieldSpec::new("out_message", FieldType::String)],
		)
	}

	fn make_job(tmp: &tempfile::TempDir, check_cache: bool) -> Arc<Job> {
		let input_dir = tmp.path().join("input");
		let output_dir = tmp.path().join("output");
		std::fs::create_dir_all(&input_dir).unwrap();
		std::fs::create_dir_all(&output_dir).unwrap();

		let mut input = Record::new();
		input.set("name", FieldValue::String("earth".into()));

		let job = Job::new(
			"job-1".into(),
			"add".into(),
			chrono::Utc::now(),
			input_dir,
			output_dir,
			input,
			RunConfig {
				priority: 3,
				check_cache,
				save_to_cache: true,
				resources_included: false,
				device_id: None,
			},
		);
		job.set_status(JobStatus::Initializing);
		Arc::new(job)
	}

	struct FakeManager {
		active_after: StdMutex<u32>,
	}

	#[async_trait::async_trait]
	impl ManagerClient for FakeManager {
		async fn add_job(&self, _: &str, _: u8, _: u64, _: u32, _: u32) -> Result<(), Error> {
			Ok(())
		}
		async fn end_job(&self, _: &str) -> Result<(), Error> {
			Ok(())
		}
		async fn is_active(&self, _: &str) -> Result<(bool, Option<usize>), Error> {
			let mut remaining = self.active_after.lock().unwrap();
			if *remaining == 0 {
				Ok((true, Some(0)))
			} else {
				*remaining -= 1;
				Ok((false, None))
			}
		}
	}

	struct FakeHandle {
		message: Option<WorkerMessage>,
		exited: bool,
	}

	#[async_trait::async_trait]
	impl WorkerHandle for FakeHandle {
		async fn recv(&mut self) -> Result<WorkerMessage, Error> {
			match self.message.take() {
				Some(msg) => Ok(msg),
				None => std::future::pending().await,
			}
		}
		async fn terminate(&mut self) {
			self.exited = true;
		}
		async fn try_exited(&mut self) -> bool {
			self.exited
		}
	}

	struct FakeLauncher {
		message: StdMutex<Option<WorkerMessage>>,
	}

	#[async_trait::async_trait]
	impl WorkerLauncher for FakeLauncher {
		async fn launch(
			&self,
			_input: &Record,
			_input_fields: &[FieldSpec],
			_descriptor: JobDescriptor,
		) -> Result<Box<dyn WorkerHandle>, Error> {
			Ok(Box::new(FakeHandle {
				message: self.message.lock().unwrap().take(),
				exited: false,
			}))
		}
	}

	fn ctx(manager: FakeManager, launcher: FakeLauncher, cache_root: &std::path::Path) -> Arc<SupervisorContext> {
		let (input_fields, output_fields) = fields();
		Arc::new(SupervisorContext {
			cache: Arc::new(Cache::new(cache_root, 10, output_fields.clone())),
			manager: Arc::new(manager),
			worker_launcher: Arc::new(launcher),
			input_fields,
			output_fields,
			required_gpu_mb: 1024,
			required_threads: 1,
			required_memory_gb: 1,
			queue_poll_interval: Duration::from_millis(5),
			cancel_poll_interval: Duration::from_millis(5),
		})
	}

	#[tokio::test]
	async fn queued_then_running_then_finished() {
		let tmp = tempfile::tempdir().unwrap();
		let cache_root = tempfile::tempdir().unwrap();
		let job = make_job(&tmp, false);

		let mut output = HashMap::new();
		output.insert("out_message".to_string(), Json::String("this worked".into()));

		let ctx = ctx(
			FakeManager { active_after: StdMutex::new(1) },
			FakeLauncher { message: StdMutex::new(Some(WorkerMessage::Success { output })) },
			cache_root.path(),
		);

		run_supervisor(job.clone(), ctx).await;

		assert_eq!(job.status(), JobStatus::Finished);
		let output = job.output().unwrap();
		assert_eq!(output.get("out_message").unwrap().textual_repr(), "this worked");
		assert!(!job.input_dir.exists());
	}

	#[tokio::test]
	async fn worker_error_transitions_to_error_status() {
		let tmp = tempfile::tempdir().unwrap();
		let cache_root = tempfile::tempdir().unwrap();
		let job = make_job(&tmp, false);

		let ctx = ctx(
			FakeManager { active_after: StdMutex::new(0) },
			FakeLauncher {
				message: StdMutex::new(Some(WorkerMessage::Error {
					traceback: "Traceback...".into(),
					error_type: "ValueError".into(),
				})),
			},
			cache_root.path(),
		);

		run_supervisor(job.clone(), ctx).await;

		assert_eq!(job.status(), JobStatus::Error);
		let error = job.error().unwrap();
		assert_eq!(error.kind, "ValueError");
	}

	#[tokio::test]
	async fn cache_hit_skips_queue_and_worker() {
		let tmp = tempfile::tempdir().unwrap();
		let cache_root = tempfile::tempdir().unwrap();
		let (_, output_fields) = fields();

		// Pre-populate the cache for this exact input.
		let job = make_job(&tmp, true);
		let input = job.with_input(|r| r.clone());
		let (input_fields, _) = fields();
		let key = forge_schema::compute_cache_key(&input_fields, &input).await.unwrap();

		let cache = Cache::new(cache_root.path(), 10, output_fields);
		let src = tempfile::tempdir().unwrap();
		let mut manifest = Record::new();
		manifest.set("out_message", FieldValue::String("from cache".into()));
		cache.save(&key, &manifest, src.path()).await.unwrap();

		let ctx = ctx(
			FakeManager { active_after: StdMutex::new(0) },
			FakeLauncher { message: StdMutex::new(None) },
			cache_root.path(),
		);

		run_supervisor(job.clone(), ctx).await;

		assert_eq!(job.status(), JobStatus::Finished);
		let output = job.output().unwrap();
		assert_eq!(output.get("out_message").unwrap().textual_repr(), "from cache");
	}

	#[tokio::test]
	async fn cancel_while_queued_transitions_to_cancelled() {
		let tmp = tempfile::tempdir().unwrap();
		let cache_root = tempfile::tempdir().unwrap();
		let job = make_job(&tmp, false);

		let ctx = ctx(
			FakeManager { active_after: StdMutex::new(1000) },
			FakeLauncher { message: StdMutex::new(None) },
			cache_root.path(),
		);

		let job_for_cancel = job.clone();
		let runner = tokio::spawn(run_supervisor(job.clone(), ctx));

		// Give the supervisor a moment to reach Queued, then cancel.
		tokio::time::sleep(Duration::from_millis(20)).await;
		assert_eq!(job_for_cancel.status(), JobStatus::Queued);
		job_for_cancel.request_cancel();

		runner.await.unwrap();
		assert_eq!(job.status(), JobStatus::Cancelled);
	}

	#[tokio::test]
	async fn cancel_while_running_terminates_worker() {
		let tmp = tempfile::tempdir().unwrap();
		let cache_root = tempfile::tempdir().unwrap();
		let job = make_job(&tmp, false);

		let ctx = ctx(
			FakeManager { active_after: StdMutex::new(0) },
			FakeLauncher { message: StdMutex::new(None) },
			cache_root.path(),
		);

		let job_for_cancel = job.clone();
		let runner = tokio::spawn(run_supervisor(job.clone(), ctx));

		tokio::time::sleep(Duration::from_millis(20)).await;
		assert_eq!(job_for_cancel.status(), JobStatus::Running);
		job_for_cancel.request_cancel();

		runner.await.unwrap();
		assert_eq!(job.status(), JobStatus::Cancelled);
	}
}
