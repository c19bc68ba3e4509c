//! The worker-subprocess entrypoint every node binary embeds (spec §4.2,
//! §4.7 of the expanded design). Grounded on
//! `original_source/rhnode/rhnode.py::process_wrapper`, which runs the
//! user callback inside a forked `multiprocessing.Process` and reports
//! `("success", output)` / `("error", traceback, type_name)` back to the
//! parent. Rust has no fork-with-shared-code primitive, so the "fork" here
//! is re-exec'ing the node binary itself with [`forge_supervisor::WORKER_FLAG`];
//! call [`is_worker_invocation`] at the very top of `main` and hand off to
//! [`run`] before anything else starts (HTTP listeners, tracing output on
//! the wrong stream, etc).

use std::sync::Arc;

use forge_schema::{FieldSpec, Record};
use forge_supervisor::{read_frame, write_frame, JobDescriptor, WorkerMessage, WORKER_FLAG};
use serde_json::Map;

/// The error a `process` callback reports when it fails; distinct from a
/// Rust panic, which is caught separately and reported as its own kind.
#[derive(Debug)]
pub struct ProcessFailure {
	pub error_type: String,
	pub message: String,
}

impl ProcessFailure {
	pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			error_type: error_type.into(),
			message: message.into(),
		}
	}
}

impl std::fmt::Display for ProcessFailure {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}: {}", self.error_type, self.message)
	}
}

impl std::error::Error for ProcessFailure {}

/// The user-supplied task implementation a node binary registers. One impl
/// per node type (spec §3 `NodeType`); `demos/add-node` and
/// `demos/dependent-node` are concrete examples.
#[async_trait::async_trait]
pub trait NodeProcess: Send + Sync {
	async fn process(&self, input: Record, descriptor: JobDescriptor) -> Result<Record, ProcessFailure>;
}

/// True if this process was re-exec'd as a worker subprocess, i.e. `main`
/// should call [`run`] and never return, rather than starting the HTTP
/// server. `WORKER_FLAG` is appended last by [`forge_supervisor::ProcessWorkerLauncher`],
/// after any static args the node was itself started with, so this checks
/// presence rather than position.
pub fn is_worker_invocation() -> bool {
	std::env::args().any(|a| a == WORKER_FLAG)
}

/// Reads the finalized input record and job descriptor from stdin, runs
/// `node.process`, and writes the framed result to stdout. Never returns:
/// exits the process directly, matching `process_wrapper`'s role as the
/// entire body of the forked child.
pub async fn run(node: Arc<dyn NodeProcess>, input_fields: Vec<FieldSpec>, output_fields: Vec<FieldSpec>) -> ! {
	let message = run_once(node, &input_fields, &output_fields).await;

	let mut stdout = tokio::io::stdout();
	if let Err(e) = write_frame(&mut stdout, &message).await {
		tracing::error!(error = %e, "worker failed to write result frame");
		std::process::exit(1);
	}
	std::process::exit(0);
}

async fn run_once(
	node: Arc<dyn NodeProcess>,
	input_fields: &[FieldSpec],
	output_fields: &[FieldSpec],
) -> WorkerMessage {
	let mut stdin = tokio::io::stdin();

	let input_json: Map<String, serde_json::Value> = match read_frame(&mut stdin).await {
		Ok(json) => json,
		Err(e) => {
			return WorkerMessage::Error {
				traceback: e.to_string(),
				error_type: "ProtocolError".to_string(),
			};
		}
	};
	let descriptor: JobDescriptor = match read_frame(&mut stdin).await {
		Ok(d) => d,
		Err(e) => {
			return WorkerMessage::Error {
				traceback: e.to_string(),
				error_type: "ProtocolError".to_string(),
			};
		}
	};

	let input = match Record::from_json_all(input_fields, &input_json) {
		Ok(record) => record,
		Err(e) => {
			return WorkerMessage::Error {
				traceback: e,
				error_type: "InvalidInput".to_string(),
			};
		}
	};

	let handle = tokio::spawn(async move { node.process(input, descriptor).await });

	match handle.await {
		Ok(Ok(output)) => WorkerMessage::Success {
			output: output.to_json(output_fields).into_iter().collect(),
		},
		Ok(Err(failure)) => WorkerMessage::Error {
			traceback: failure.message,
			error_type: failure.error_type,
		},
		Err(join_error) => WorkerMessage::Error {
			traceback: join_error.to_string(),
			error_type: if join_error.is_panic() { "Panic".to_string() } else { "Cancelled".to_string() },
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use forge_schema::{FieldType, FieldValue};

	struct EchoNode;

	#[async_trait::async_trait]
	impl NodeProcess for EchoNode {
		async fn process(&self, input: Record, _descriptor: JobDescriptor) -> Result<Record, ProcessFailure> {
			let mut output = Record::new();
			output.set(
				"out_message",
				input.get("name").cloned().unwrap_or(FieldValue::String("?".into())),
			);
			Ok(output)
		}
	}

	struct PanickingNode;

	#[async_trait::async_trait]
	impl NodeProcess for PanickingNode {
		async fn process(&self, _input: Record, _descriptor: JobDescriptor) -> Result<Record, ProcessFailure> {
			panic!("boom");
		}
	}

	fn fields() -> (Vec<FieldSpec>, Vec<FieldSpec>) {
		(
			vec![FieldSpec::new("name", FieldType::String)],
			vec![FieldSpec::new("out_message", FieldType::String)],
		)
	}

	#[tokio::test]
	async fn successful_process_reports_success() {
		let (input_fields, output_fields) = fields();
		let mut input = Map::new();
		input.insert("name".to_string(), serde_json::json!("earth"));

		let descriptor = JobDescriptor {
			device_id: None,
			output_dir: "/tmp/job".to_string(),
			priority: 3,
			check_cache: true,
			save_to_cache: true,
			resources_included: false,
		};

		let input_record = Record::from_json_all(&input_fields, &input).unwrap();
		let output = EchoNode.process(input_record, descriptor).await.unwrap();
		let json = output.to_json(&output_fields);
		assert_eq!(json.get("out_message").unwrap(), "earth");
	}

	#[tokio::test]
	async fn panicking_process_is_caught_as_a_panic_error() {
		let node: Arc<dyn NodeProcess> = Arc::new(PanickingNode);
		let (input_fields, output_fields) = fields();
		let descriptor = JobDescriptor {
			device_id: None,
			output_dir: "/tmp/job".to_string(),
			priority: 3,
			check_cache: true,
			save_to_cache: true,
			resources_included: false,
		};
		let input = Record::new();

		let handle = tokio::spawn(async move { node.process(input, descriptor).await });
		let result = handle.await;
		assert!(result.is_err());
		assert!(result.unwrap_err().is_panic());
		let _ = (input_fields, output_fields);
	}
}
