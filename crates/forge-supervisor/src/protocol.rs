//! Wire protocol between a supervisor and the worker subprocess it spawns
//! (spec §4.2). Grounded on `original_source/rhnode/rhnode.py`'s
//! `process_wrapper`, which passes `(inputs, job)` into the user callback
//! over a `multiprocessing.Queue` and returns `("success", output)` or
//! `("error", traceback, type_name)`. Here the channel is the worker's
//! stdin/stdout and messages are length-prefixed JSON.
//!
//! Shared by `forge-supervisor` (the reader/writer side) and `forge-worker`
//! (the binary that runs inside the spawned subprocess).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// CLI flag a node binary checks for on startup to decide whether it should
/// run as the worker subprocess (read one job off stdin, run it, exit) or
/// as the long-lived HTTP server. Re-exec-self stands in for
/// `multiprocessing.Process`, which forks the same Python interpreter
/// image; Rust has no equivalent fork-with-shared-code primitive, so the
/// worker is the same binary invoked with this marker argument instead.
pub const WORKER_FLAG: &str = "--forge-worker";
use serde_json::Value as Json;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Everything the worker needs besides the finalized input record itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDescriptor {
	pub device_id: Option<usize>,
	pub output_dir: String,
	pub priority: u8,
	pub check_cache: bool,
	pub save_to_cache: bool,
	pub resources_included: bool,
}

/// The result a worker reports back over stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerMessage {
	Success { output: HashMap<String, Json> },
	Error { traceback: String, error_type: String },
}

/// Writes a single length-prefixed JSON message: a 4-byte little-endian
/// length followed by that many bytes of UTF-8 JSON.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> std::io::Result<()>
where
	W: AsyncWrite + Unpin,
	T: Serialize,
{
	let bytes = serde_json::to_vec(value)?;
	writer.write_all(&(bytes.len() as u32).to_le_bytes()).await?;
	writer.write_all(&bytes).await?;
	writer.flush().await?;
	Ok(())
}

/// Reads a single length-prefixed JSON message written by [`write_frame`].
pub async fn read_frame<R, T>(reader: &mut R) -> std::io::Result<T>
where
	R: AsyncRead + Unpin,
	T: for<'de> Deserialize<'de>,
{
	let mut len_buf = [0u8; 4];
	reader.read_exact(&mut len_buf).await?;
	let len = u32::from_le_bytes(len_buf) as usize;
	let mut buf = vec![0u8; len];
	reader.read_exact(&mut buf).await?;
	serde_json::from_slice(&buf).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn frame_round_trips_success() {
		let mut buf = Vec::new();
		let mut output = HashMap::new();
		output.insert("out_message".to_string(), Json::String("this worked".into()));
		let msg = WorkerMessage::Success { output };
		write_frame(&mut buf, &msg).await.unwrap();

		let mut cursor = std::io::Cursor::new(buf);
		let read_back: WorkerMessage = read_frame(&mut cursor).await.unwrap();
		match read_back {
			WorkerMessage::Success { output } => {
				assert_eq!(output.get("out_message").unwrap(), "this worked");
			}
			_ => panic!("expected success"),
		}
	}

	#[tokio::test]
	async fn frame_round_trips_error() {
		let mut buf = Vec::new();
		let msg = WorkerMessage::Error {
			traceback: "Traceback (most recent call last)".into(),
			error_type: "ValueError".into(),
		};
		write_frame(&mut buf, &msg).await.unwrap();

		let mut cursor = std::io::Cursor::new(buf);
		let read_back: WorkerMessage = read_frame(&mut cursor).await.unwrap();
		assert!(matches!(read_back, WorkerMessage::Error { .. }));
	}
}
