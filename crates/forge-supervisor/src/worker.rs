//! Spawns and supervises the per-job worker subprocess (spec §4.2 Queued →
//! Running). Grounded on `original_source/rhnode/rhnode.py`'s use of
//! `multiprocessing.Process` to isolate the user callback: here the
//! isolation unit is a real OS process (`forge-worker`) rather than a
//! thread, communicating over stdin/stdout instead of a `Queue`.

use std::path::PathBuf;
use std::process::Stdio;

use forge_error::Error;
use forge_schema::{FieldSpec, Record};
use tokio::process::{Child, ChildStdout, Command};

use crate::protocol::{self, JobDescriptor, WorkerMessage, WORKER_FLAG};

#[async_trait::async_trait]
pub trait WorkerLauncher: Send + Sync {
	async fn launch(
		&self,
		input: &Record,
		input_fields: &[FieldSpec],
		descriptor: JobDescriptor,
	) -> Result<Box<dyn WorkerHandle>, Error>;
}

#[async_trait::async_trait]
pub trait WorkerHandle: Send {
	/// Awaits the worker's single framed result message.
	async fn recv(&mut self) -> Result<WorkerMessage, Error>;
	/// Sends a termination signal; does not wait for exit.
	async fn terminate(&mut self);
	/// Non-blocking check for whether the process has exited, used by the
	/// 0.5s cancel-drain poll (spec §4.2).
	async fn try_exited(&mut self) -> bool;
}

/// Re-execs the current node binary with [`WORKER_FLAG`] as a subprocess
/// per launch; the binary's own `main` dispatches to `forge_worker::run`
/// instead of starting the HTTP server when it sees that flag.
///
/// `extra_args` are forwarded ahead of `WORKER_FLAG` (e.g. the original
/// `--config <path>` the node process itself was started with), since the
/// worker needs the same static configuration to build its `NodeType`.
pub struct ProcessWorkerLauncher {
	pub worker_binary: PathBuf,
	pub extra_args: Vec<String>,
}

impl ProcessWorkerLauncher {
	pub fn for_current_exe(extra_args: Vec<String>) -> std::io::Result<Self> {
		Ok(Self {
			worker_binary: std::env::current_exe()?,
			extra_args,
		})
	}
}

#[async_trait::async_trait]
impl WorkerLauncher for ProcessWorkerLauncher {
	async fn launch(
		&self,
		input: &Record,
		input_fields: &[FieldSpec],
		descriptor: JobDescriptor,
	) -> Result<Box<dyn WorkerHandle>, Error> {
		let mut child = Command::new(&self.worker_binary)
			.args(&self.extra_args)
			.arg(WORKER_FLAG)
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::inherit())
			.kill_on_drop(true)
			.spawn()
			.map_err(|e| Error::Other(e.into()))?;

		let mut stdin = child.stdin.take().expect("stdin piped");
		let stdout = child.stdout.take().expect("stdout piped");

		let input_json = input.to_json(input_fields);
		protocol::write_frame(&mut stdin, &input_json)
			.await
			.map_err(|e| Error::Other(e.into()))?;
		protocol::write_frame(&mut stdin, &descriptor)
			.await
			.map_err(|e| Error::Other(e.into()))?;
		drop(stdin);

		Ok(Box::new(ProcessWorkerHandle { child, stdout }))
	}
}

struct ProcessWorkerHandle {
	child: Child,
	stdout: ChildStdout,
}

#[async_trait::async_trait]
impl WorkerHandle for ProcessWorkerHandle {
	async fn recv(&mut self) -> Result<WorkerMessage, Error> {
		let msg = protocol::read_frame::<_, WorkerMessage>(&mut self.stdout)
			.await
			.map_err(|e| Error::Other(e.into()))?;
		Ok(msg)
	}

	async fn terminate(&mut self) {
		let _ = self.child.start_kill();
	}

	async fn try_exited(&mut self) -> bool {
		matches!(self.child.try_wait(), Ok(Some(_)))
	}
}
