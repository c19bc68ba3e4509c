//! The `Job` entity and its status lifecycle (spec §3/§4.2).

use std::path::PathBuf;
use std::sync::Mutex;

use forge_schema::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
	Preparing,
	Initializing,
	Queued,
	Running,
	Finished,
	Error,
	Cancelling,
	Cancelled,
}

impl JobStatus {
	pub fn is_terminal(self) -> bool {
		matches!(self, JobStatus::Finished | JobStatus::Error | JobStatus::Cancelled)
	}
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RunConfig {
	pub priority: u8,
	pub check_cache: bool,
	pub save_to_cache: bool,
	pub resources_included: bool,
	pub device_id: Option<usize>,
}

impl Default for RunConfig {
	fn default() -> Self {
		Self {
			priority: 3,
			check_cache: true,
			save_to_cache: true,
			resources_included: false,
			device_id: None,
		}
	}
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct JobErrorInfo {
	pub kind: String,
	pub message: String,
	pub traceback: Option<String>,
}

/// One submission against a node. Shared between the HTTP handlers (reads,
/// uploads, stop requests) and the supervisor task that owns its lifecycle
/// after `start`; all mutable fields are behind `Mutex` rather than owned
/// by a single task, since the HTTP surface needs to read status/error/
/// output concurrently with the supervisor driving transitions.
pub struct Job {
	pub id: String,
	pub node_name: String,
	pub created_at: chrono::DateTime<chrono::Utc>,
	pub input_dir: PathBuf,
	pub output_dir: PathBuf,

	status: Mutex<JobStatus>,
	input: Mutex<Record>,
	output: Mutex<Option<Record>>,
	error: Mutex<Option<JobErrorInfo>>,
	run_config: Mutex<RunConfig>,
}

impl Job {
	pub fn new(
		id: String,
		node_name: String,
		created_at: chrono::DateTime<chrono::Utc>,
		input_dir: PathBuf,
		output_dir: PathBuf,
		input: Record,
		run_config: RunConfig,
	) -> Self {
		Self {
			id,
			node_name,
			created_at,
			input_dir,
			output_dir,
			status: Mutex::new(JobStatus::Preparing),
			input: Mutex::new(input),
			output: Mutex::new(None),
			error: Mutex::new(None),
			run_config: Mutex::new(run_config),
		}
	}

	pub fn queue_id(&self) -> String {
		format!("{}_{}", self.node_name, self.id)
	}

	pub fn status(&self) -> JobStatus {
		*self.status.lock().unwrap()
	}

	pub fn set_status(&self, status: JobStatus) {
		*self.status.lock().unwrap() = status;
	}

	/// Requests cancellation. No-op on an already-terminal job; idempotent
	/// while already `Cancelling` (spec §4.2 stop semantics).
	pub fn request_cancel(&self) -> bool {
		let mut status = self.status.lock().unwrap();
		if status.is_terminal() || *status == JobStatus::Cancelling {
			return false;
		}
		*status = JobStatus::Cancelling;
		true
	}

	pub fn with_input<R>(&self, f: impl FnOnce(&Record) -> R) -> R {
		f(&self.input.lock().unwrap())
	}

	pub fn set_input(&self, record: Record) {
		*self.input.lock().unwrap() = record;
	}

	pub fn output(&self) -> Option<Record> {
		self.output.lock().unwrap().clone()
	}

	pub fn set_output(&self, record: Record) {
		*self.output.lock().unwrap() = Some(record);
	}

	pub fn error(&self) -> Option<JobErrorInfo> {
		self.error.lock().unwrap().clone()
	}

	pub fn set_error(&self, error: JobErrorInfo) {
		*self.error.lock().unwrap() = Some(error);
	}

	pub fn run_config(&self) -> RunConfig {
		self.run_config.lock().unwrap().clone()
	}

	pub fn set_run_config(&self, config: RunConfig) {
		*self.run_config.lock().unwrap() = config;
	}

	pub fn set_device_id(&self, device_id: usize) {
		self.run_config.lock().unwrap().device_id = Some(device_id);
	}
}
