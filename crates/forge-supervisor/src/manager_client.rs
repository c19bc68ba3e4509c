//! Abstraction over the manager HTTP surface the supervisor depends on
//! (`add_job`/`end_job`/`is_active`), so the state machine can be unit
//! tested with an in-process fake instead of a real HTTP round trip. The
//! `reqwest`-backed implementation talks to whatever manager address the
//! node was configured with (spec §4.2/§6).

use forge_error::Error;
use reqwest::StatusCode;

#[async_trait::async_trait]
pub trait ManagerClient: Send + Sync {
	async fn add_job(
		&self,
		queue_id: &str,
		priority: u8,
		gpu_mb: u64,
		threads: u32,
		memory_gb: u32,
	) -> Result<(), Error>;

	async fn end_job(&self, queue_id: &str) -> Result<(), Error>;

	async fn is_active(&self, queue_id: &str) -> Result<(bool, Option<usize>), Error>;
}

pub struct HttpManagerClient {
	manager_address: String,
	client: reqwest::Client,
}

impl HttpManagerClient {
	pub fn new(manager_address: impl Into<String>) -> Self {
		Self {
			manager_address: manager_address.into(),
			client: reqwest::Client::new(),
		}
	}
}

/// Wire shape is spec §6's `QueueRequest`.
#[derive(serde::Serialize)]
struct AddJobRequest<'a> {
	job_id: &'a str,
	priority: u8,
	required_gpu_mem: u64,
	required_threads: u32,
	required_memory: u32,
}

#[derive(serde::Deserialize)]
struct IsActiveResponse {
	is_active: bool,
	gpu_device_id: Option<usize>,
}

#[async_trait::async_trait]
impl ManagerClient for HttpManagerClient {
	async fn add_job(
		&self,
		queue_id: &str,
		priority: u8,
		gpu_mb: u64,
		threads: u32,
		memory_gb: u32,
	) -> Result<(), Error> {
		let url = format!("{}/manager/add_job", self.manager_address);
		let resp = self
			.client
			.post(&url)
			.json(&AddJobRequest {
				job_id: queue_id,
				priority,
				required_gpu_mem: gpu_mb,
				required_threads: threads,
				required_memory: memory_gb,
			})
			.send()
			.await
			.map_err(|e| Error::Other(e.into()))?;

		if resp.status() == StatusCode::BAD_REQUEST {
			let message = resp.text().await.unwrap_or_default();
			return Err(Error::InvalidRequirements(message));
		}
		resp.error_for_status().map_err(|e| Error::Other(e.into()))?;
		Ok(())
	}

	async fn end_job(&self, queue_id: &str) -> Result<(), Error> {
		let url = format!("{}/manager/end_job/{queue_id}", self.manager_address);
		self.client
			.post(&url)
			.send()
			.await
			.map_err(|e| Error::Other(e.into()))?;
		Ok(())
	}

	async fn is_active(&self, queue_id: &str) -> Result<(bool, Option<usize>), Error> {
		let url = format!("{}/manager/is_job_active/{queue_id}", self.manager_address);
		let resp: IsActiveResponse = self
			.client
			.get(&url)
			.send()
			.await
			.map_err(|e| Error::Other(e.into()))?
			.json()
			.await
			.map_err(|e| Error::Other(e.into()))?;
		Ok((resp.is_active, resp.gpu_device_id))
	}
}
