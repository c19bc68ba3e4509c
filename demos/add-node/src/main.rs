//! The `add` node (spec §8 scenarios S1, S3, S4). Grounded on
//! `original_source/tests/nodes/testnode_add/add.py`: add a scalar to a
//! file's contents, optionally sleep, optionally fail. Reworked from
//! nibabel/NIfTI array arithmetic to plain byte-wise addition, since no
//! medical-imaging crate is part of this workspace's dependency stack
//! (see `DESIGN.md`).

use std::path::PathBuf;
use std::sync::Arc;

use forge_schema::{FieldSpec, FieldType, FieldValue, Record, Schema};
use forge_supervisor::JobDescriptor;
use forge_worker::{NodeProcess, ProcessFailure};

fn schema() -> Schema {
	Schema {
		input: vec![
			FieldSpec::new("scalar", FieldType::Int),
			FieldSpec::new("in_file", FieldType::FilePath),
			FieldSpec::new("sleep_time", FieldType::Optional(Box::new(FieldType::Int))),
			FieldSpec::new("throw_error", FieldType::Optional(Box::new(FieldType::Bool))),
		],
		output: vec![
			FieldSpec::new("out_file", FieldType::FilePath),
			FieldSpec::new("out_message", FieldType::String),
		],
	}
}

struct AddProcess;

#[async_trait::async_trait]
impl NodeProcess for AddProcess {
	async fn process(&self, input: Record, descriptor: JobDescriptor) -> Result<Record, ProcessFailure> {
		let scalar = match input.get("scalar") {
			Some(FieldValue::Int(v)) => *v,
			_ => return Err(ProcessFailure::new("InvalidInput", "scalar is required")),
		};
		let in_file = match input.get("in_file") {
			Some(FieldValue::FilePath(p)) => p.clone(),
			_ => return Err(ProcessFailure::new("InvalidInput", "in_file is required")),
		};
		let sleep_time = match input.get("sleep_time") {
			Some(FieldValue::Int(v)) => *v,
			_ => 0,
		};
		let throw_error = matches!(input.get("throw_error"), Some(FieldValue::Bool(true)));

		let bytes = tokio::fs::read(&in_file)
			.await
			.map_err(|e| ProcessFailure::new("IoError", format!("failed to read in_file: {e}")))?;
		let added: Vec<u8> = bytes.iter().map(|b| b.wrapping_add(scalar as u8)).collect();

		let outpath = PathBuf::from(&descriptor.output_dir).join("added.bin");
		tokio::fs::write(&outpath, &added)
			.await
			.map_err(|e| ProcessFailure::new("IoError", format!("failed to write out_file: {e}")))?;

		if sleep_time > 0 {
			tokio::time::sleep(std::time::Duration::from_secs(sleep_time as u64)).await;
		}

		if throw_error {
			return Err(ProcessFailure::new(
				"AssertionError",
				"This an error caused by throw_error=True",
			));
		}

		let mut output = Record::new();
		output.set("out_file", FieldValue::FilePath(outpath));
		output.set("out_message", FieldValue::String("this worked".into()));
		Ok(output)
	}
}

/// Pulls `--config <path>` out of argv by hand rather than via `clap`: the
/// worker subprocess is launched with this plus [`forge_supervisor::WORKER_FLAG`]
/// appended, and a strict derive parser would reject the unrecognized flag.
fn config_path_from_args() -> anyhow::Result<PathBuf> {
	let args: Vec<String> = std::env::args().collect();
	args.iter()
		.position(|a| a == "--config")
		.and_then(|i| args.get(i + 1))
		.map(PathBuf::from)
		.ok_or_else(|| anyhow::anyhow!("usage: add-node --config <path> [{}]", forge_supervisor::WORKER_FLAG))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	if forge_worker::is_worker_invocation() {
		forge_worker::run(Arc::new(AddProcess), schema().input, schema().output).await;
	}

	forge_config::init_tracing();
	let config_path = config_path_from_args()?;
	let config = forge_config::NodeConfig::load(&config_path).await?;
	let schema = schema();
	schema.validate().map_err(anyhow::Error::msg)?;

	let node = Arc::new(forge_node::Node::new(config.clone(), schema, &config_path)?);
	node.register_with_manager().await;
	let _scheduler = forge_node::start_cleanup_scheduler(node.clone()).await?;

	let app = forge_node::app(node.clone());
	tracing::info!(name = %node.name(), "add node starting");
	let listener = tokio::net::TcpListener::bind(forge_node::bind_address(&config.self_address)).await?;
	axum::serve(listener, app).await?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use forge_supervisor::JobDescriptor;

	fn descriptor(output_dir: &std::path::Path) -> JobDescriptor {
		JobDescriptor {
			device_id: None,
			output_dir: output_dir.to_string_lossy().to_string(),
			priority: 3,
			check_cache: true,
			save_to_cache: true,
			resources_included: false,
		}
	}

	#[tokio::test]
	async fn adds_scalar_to_file_contents() {
		let tmp = tempfile::tempdir().unwrap();
		let in_file = tmp.path().join("in.bin");
		tokio::fs::write(&in_file, [1u8, 2, 3]).await.unwrap();

		let mut input = Record::new();
		input.set("scalar", FieldValue::Int(10));
		input.set("in_file", FieldValue::FilePath(in_file));
		input.set("sleep_time", FieldValue::Int(0));
		input.set("throw_error", FieldValue::Bool(false));

		let output = AddProcess.process(input, descriptor(tmp.path())).await.unwrap();
		match output.get("out_message").unwrap() {
			FieldValue::String(s) => assert_eq!(s, "this worked"),
			other => panic!("unexpected out_message: {other:?}"),
		}
		let out_path = match output.get("out_file").unwrap() {
			FieldValue::FilePath(p) => p.clone(),
			other => panic!("unexpected out_file: {other:?}"),
		};
		let written = tokio::fs::read(out_path).await.unwrap();
		assert_eq!(written, vec![11, 12, 13]);
	}

	#[tokio::test]
	async fn throw_error_reports_process_failure() {
		let tmp = tempfile::tempdir().unwrap();
		let in_file = tmp.path().join("in.bin");
		tokio::fs::write(&in_file, [1u8]).await.unwrap();

		let mut input = Record::new();
		input.set("scalar", FieldValue::Int(1));
		input.set("in_file", FieldValue::FilePath(in_file));
		input.set("sleep_time", FieldValue::Int(0));
		input.set("throw_error", FieldValue::Bool(true));

		let err = AddProcess.process(input, descriptor(tmp.path())).await.unwrap_err();
		assert_eq!(err.error_type, "AssertionError");
	}

	#[tokio::test]
	async fn missing_scalar_is_invalid_input() {
		let tmp = tempfile::tempdir().unwrap();
		let mut input = Record::new();
		input.set("in_file", FieldValue::FilePath(tmp.path().join("missing.bin")));

		let err = AddProcess.process(input, descriptor(tmp.path())).await.unwrap_err();
		assert_eq!(err.error_type, "InvalidInput");
	}
}
