//! `forgectl`: a thin CLI wrapper over `forge-client`, the idiomatic-Rust
//! replacement for `original_source/rhnode/rhjob.py`'s ad hoc
//! `RHJob(_cli_mode=True)` argv parsing (spec §6's "exit codes (CLI)").
//!
//! Grounded on `packages/cli/src/main.rs`'s `clap::Parser` + subcommand
//! shape.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use forge_client::{InputValue, JobClient};
use forge_supervisor::RunConfig;

#[derive(Parser)]
#[command(name = "forgectl", version, about)]
struct Cli {
	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand)]
enum Command {
	/// Submit a job and block until it reaches a terminal status.
	Run {
		/// Node type to submit to.
		#[arg(long)]
		node: String,
		/// Node address (`host:port`); resolved via `--manager` if omitted.
		#[arg(long)]
		host: Option<String>,
		/// Manager address used to resolve `--node`'s host when `--host`
		/// is not given.
		#[arg(long)]
		manager: Option<String>,
		/// Non-file input, repeatable: `key=value` (JSON value or bare string).
		#[arg(long = "input", value_parser = parse_key_value)]
		inputs: Vec<(String, String)>,
		/// File input, repeatable: `key=path`.
		#[arg(long = "input-file", value_parser = parse_key_value)]
		input_files: Vec<(String, String)>,
		/// Directory to download file outputs into.
		#[arg(long)]
		output_dir: PathBuf,
		#[arg(long, default_value_t = 3)]
		priority: u8,
		#[arg(long)]
		no_cache: bool,
		#[arg(long)]
		no_save_cache: bool,
	},
	/// Request cancellation of a running job.
	Stop {
		#[arg(long)]
		node: String,
		#[arg(long)]
		host: String,
		#[arg(long)]
		job_id: String,
	},
	/// Print a job's current status.
	Status {
		#[arg(long)]
		node: String,
		#[arg(long)]
		host: String,
		#[arg(long)]
		job_id: String,
	},
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
	let (key, value) = s
		.split_once('=')
		.ok_or_else(|| format!("expected key=value, got {s:?}"))?;
	Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> ExitCode {
	forge_config::init_tracing();

	match run(Cli::parse()).await {
		Ok(code) => code,
		Err(e) => {
			eprintln!("error: {e:#}");
			ExitCode::FAILURE
		}
	}
}

async fn run(cli: Cli) -> Result<ExitCode> {
	match cli.command {
		Command::Run {
			node,
			host,
			manager,
			inputs,
			input_files,
			output_dir,
			priority,
			no_cache,
			no_save_cache,
		} => run_job(node, host, manager, inputs, input_files, output_dir, priority, no_cache, no_save_cache).await,
		Command::Stop { node, host, job_id } => {
			let client = JobClient::attach(&host, &node, job_id);
			client.stop().await.context("failed to stop job")?;
			println!("stop requested");
			Ok(ExitCode::SUCCESS)
		}
		Command::Status { node, host, job_id } => {
			let client = JobClient::attach(&host, &node, job_id);
			let status = client.status().await.context("failed to fetch status")?;
			println!("{status:?}");
			Ok(ExitCode::SUCCESS)
		}
	}
}

#[allow(clippy::too_many_arguments)]
async fn run_job(
	node: String,
	host: Option<String>,
	manager: Option<String>,
	inputs: Vec<(String, String)>,
	input_files: Vec<(String, String)>,
	output_dir: PathBuf,
	priority: u8,
	no_cache: bool,
	no_save_cache: bool,
) -> Result<ExitCode> {
	let host = match host {
		Some(h) => h,
		None => {
			let manager = manager.context("either --host or --manager must be given")?;
			JobClient::resolve_host(&manager, &node)
				.await
				.context("failed to resolve node host via manager")?
		}
	};

	let mut values: HashMap<String, InputValue> = HashMap::new();
	for (key, raw) in inputs {
		let json = serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw));
		values.insert(key, InputValue::Json(json));
	}
	for (key, path) in input_files {
		values.insert(key, InputValue::File(PathBuf::from(path)));
	}

	let run_config = RunConfig {
		priority,
		check_cache: !no_cache,
		save_to_cache: !no_save_cache,
		resources_included: false,
		device_id: None,
	};

	let client = JobClient::create(&host, &node, values, run_config)
		.await
		.context("failed to create job")?;
	println!("submitted job {} to {host}", client.job_id);

	match client.wait(&output_dir).await {
		Ok(outcome) => {
			println!("{}", serde_json::to_string_pretty(&outcome.fields)?);
			for (key, path) in &outcome.downloaded_files {
				println!("downloaded {key} -> {}", path.display());
			}
			Ok(ExitCode::SUCCESS)
		}
		Err(forge_error::Error::JobFailed { message, traceback, error_type }) => {
			bail_with_traceback(&error_type, &message, &traceback)
		}
		Err(forge_error::Error::JobCancelled) => {
			eprintln!("job was cancelled");
			Ok(ExitCode::FAILURE)
		}
		Err(e) => {
			bail!("job wait failed: {e}")
		}
	}
}

fn bail_with_traceback(kind: &str, message: &str, traceback: &str) -> Result<ExitCode> {
	eprintln!("job failed ({kind}): {message}");
	if !traceback.is_empty() {
		eprintln!("{traceback}");
	}
	Ok(ExitCode::FAILURE)
}
