//! The `dependent` node (spec §8 scenario S5). Grounded on
//! `original_source/example/dependant_node_project/mydependent.py`: spawns
//! two `add` children in parallel via the client driver, multiplies the
//! first child's output by `multiplier`, and returns the second child's
//! output untouched. Reworked from nibabel/NIfTI array arithmetic to plain
//! byte-wise multiplication for the same reason as `add-node` (see
//! `DESIGN.md`).

use std::path::PathBuf;
use std::sync::Arc;

use forge_client::{child_run_config, unique_output_dir, InputValue, JobClient};
use forge_schema::{FieldSpec, FieldType, FieldValue, Record, Schema};
use forge_supervisor::{JobDescriptor, RunConfig};
use forge_worker::{NodeProcess, ProcessFailure};

const CHILD_NODE: &str = "add";

fn schema() -> Schema {
	Schema {
		input: vec![
			FieldSpec::new("multiplier", FieldType::Int),
			FieldSpec::new("in_file", FieldType::FilePath),
		],
		output: vec![
			FieldSpec::new("message", FieldType::String),
			FieldSpec::new("img1", FieldType::FilePath),
			FieldSpec::new("img2", FieldType::FilePath),
		],
	}
}

struct DependentProcess {
	manager_address: String,
}

#[async_trait::async_trait]
impl NodeProcess for DependentProcess {
	async fn process(&self, input: Record, descriptor: JobDescriptor) -> Result<Record, ProcessFailure> {
		let multiplier = match input.get("multiplier") {
			Some(FieldValue::Int(v)) => *v,
			_ => return Err(ProcessFailure::new("InvalidInput", "multiplier is required")),
		};
		let in_file = match input.get("in_file") {
			Some(FieldValue::FilePath(p)) => p.clone(),
			_ => return Err(ProcessFailure::new("InvalidInput", "in_file is required")),
		};

		let parent_run_config = RunConfig {
			priority: descriptor.priority,
			check_cache: descriptor.check_cache,
			save_to_cache: descriptor.save_to_cache,
			resources_included: descriptor.resources_included,
			device_id: descriptor.device_id,
		};
		let child_config = child_run_config(&parent_run_config, false);

		let host = JobClient::resolve_host(&self.manager_address, CHILD_NODE)
			.await
			.map_err(|e| ProcessFailure::new("DispatchError", e.to_string()))?;

		let job_output_dir = PathBuf::from(&descriptor.output_dir);
		let child1_dir = unique_output_dir(&job_output_dir, CHILD_NODE);
		tokio::fs::create_dir_all(&child1_dir)
			.await
			.map_err(|e| ProcessFailure::new("IoError", format!("failed to reserve child output dir: {e}")))?;
		// Reserved before picking the second child's directory so
		// `unique_output_dir` does not hand out the same path twice.
		let child2_dir = unique_output_dir(&job_output_dir, CHILD_NODE);

		// Start both children in parallel, matching `add_1_node.start()` /
		// `add_2_node.start()` before either is waited on.
		let (child1, child2) = tokio::try_join!(
			spawn_add_child(&host, in_file.clone(), child_config.clone()),
			spawn_add_child(&host, in_file.clone(), child_config.clone()),
		)?;

		let outcome1 = child1
			.wait(&child1_dir)
			.await
			.map_err(|e| ProcessFailure::new("ChildJobFailed", e.to_string()))?;
		let child1_out_file = outcome1
			.downloaded_files
			.get("out_file")
			.ok_or_else(|| ProcessFailure::new("ChildJobFailed", "add child did not produce out_file"))?;

		let bytes = tokio::fs::read(child1_out_file)
			.await
			.map_err(|e| ProcessFailure::new("IoError", format!("failed to read child output: {e}")))?;
		let multiplied: Vec<u8> = bytes
			.iter()
			.map(|b| (*b as i64 * multiplier).rem_euclid(256) as u8)
			.collect();
		let img1_path = job_output_dir.join("img1.bin");
		tokio::fs::write(&img1_path, &multiplied)
			.await
			.map_err(|e| ProcessFailure::new("IoError", format!("failed to write img1: {e}")))?;

		let outcome2 = child2
			.wait(&child2_dir)
			.await
			.map_err(|e| ProcessFailure::new("ChildJobFailed", e.to_string()))?;
		let img2_path = outcome2
			.downloaded_files
			.get("out_file")
			.cloned()
			.ok_or_else(|| ProcessFailure::new("ChildJobFailed", "add child did not produce out_file"))?;

		let mut output = Record::new();
		output.set("message", FieldValue::String("Hello World".into()));
		output.set("img1", FieldValue::FilePath(img1_path));
		output.set("img2", FieldValue::FilePath(img2_path));
		Ok(output)
	}
}

async fn spawn_add_child(
	host: &str,
	in_file: PathBuf,
	run_config: RunConfig,
) -> Result<JobClient, ProcessFailure> {
	let mut inputs = std::collections::HashMap::new();
	inputs.insert("scalar".to_string(), InputValue::Json(serde_json::json!(1)));
	inputs.insert("in_file".to_string(), InputValue::File(in_file));

	JobClient::create(host, CHILD_NODE, inputs, run_config)
		.await
		.map_err(|e| ProcessFailure::new("ChildJobFailed", e.to_string()))
}

fn config_path_from_args() -> anyhow::Result<PathBuf> {
	let args: Vec<String> = std::env::args().collect();
	args.iter()
		.position(|a| a == "--config")
		.and_then(|i| args.get(i + 1))
		.map(PathBuf::from)
		.ok_or_else(|| anyhow::anyhow!("usage: dependent-node --config <path> [{}]", forge_supervisor::WORKER_FLAG))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let config_path = config_path_from_args()?;
	let config = forge_config::NodeConfig::load(&config_path).await?;

	if forge_worker::is_worker_invocation() {
		let process = DependentProcess {
			manager_address: config.manager_address.clone(),
		};
		forge_worker::run(Arc::new(process), schema().input, schema().output).await;
	}

	forge_config::init_tracing();
	let schema = schema();
	schema.validate().map_err(anyhow::Error::msg)?;

	let node = Arc::new(forge_node::Node::new(config.clone(), schema, &config_path)?);
	node.register_with_manager().await;
	let _scheduler = forge_node::start_cleanup_scheduler(node.clone()).await?;

	let app = forge_node::app(node.clone());
	tracing::info!(name = %node.name(), "dependent node starting");
	let listener = tokio::net::TcpListener::bind(forge_node::bind_address(&config.self_address)).await?;
	axum::serve(listener, app).await?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn child_run_config_inherits_from_descriptor_shaped_parent() {
		let parent = RunConfig {
			priority: 7,
			check_cache: false,
			save_to_cache: true,
			resources_included: false,
			device_id: Some(0),
		};
		let child = child_run_config(&parent, false);
		assert_eq!(child.priority, 7);
		assert!(!child.check_cache);
		assert!(child.save_to_cache);
		assert!(!child.resources_included);
		assert_eq!(child.device_id, None);
	}

	#[test]
	fn byte_multiplication_wraps_like_the_original_would_overflow() {
		let bytes = [1u8, 2, 3];
		let multiplier = 100i64;
		let multiplied: Vec<u8> = bytes
			.iter()
			.map(|b| (*b as i64 * multiplier).rem_euclid(256) as u8)
			.collect();
		assert_eq!(multiplied, vec![100, 200, 44]);
	}
}
