//! Node HTTP surface (spec §4.5). Grounded on the handler shape of
//! `packages/core/api-public/src/actors/create.rs`: typed request/response
//! structs, `Result<Json<_>, ApiError>` handlers, `#[utoipa::path]`
//! annotations documenting the surface without wiring a generated
//! `OpenApi` document (no consumer for one in this crate family).

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use forge_error::{ApiError, Error};
use forge_schema::{FieldValue, Record};
use forge_supervisor::{Job, JobErrorInfo, JobStatus, RunConfig};
use serde_json::{Map, Value as Json_};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::node::Node;

pub fn router(node: Arc<Node>) -> Router {
	let prefix = format!("/{}", node.name());
	Router::new()
		.route(&format!("{prefix}/"), get(status_summary))
		.route(&format!("{prefix}/jobs"), post(create_job))
		.route(&format!("{prefix}/jobs/{{id}}/upload"), post(upload))
		.route(&format!("{prefix}/jobs/{{id}}/start"), post(start))
		.route(&format!("{prefix}/jobs/{{id}}/status"), get(status))
		.route(&format!("{prefix}/jobs/{{id}}/data"), get(data))
		.route(&format!("{prefix}/jobs/{{id}}/download/{{field}}"), get(download))
		.route(&format!("{prefix}/jobs/{{id}}/error"), get(error))
		.route(&format!("{prefix}/jobs/{{id}}/stop"), post(stop))
		.route(&format!("{prefix}/jobs/{{id}}/delete"), post(delete))
		.route(&format!("{prefix}/filename_keys"), get(filename_keys))
		.route(&format!("{prefix}/keys"), get(keys))
		.with_state(node)
}

#[utoipa::path(post, path = "/{name}/jobs", responses((status = 200, body = String)))]
async fn create_job(
	State(node): State<Arc<Node>>,
	Json(body): Json<Json_>,
) -> Result<Json<Json_>, ApiError> {
	let obj = body
		.as_object()
		.cloned()
		.ok_or_else(|| Error::NotReady("job creation body must be a JSON object".to_string()))?;

	let input = Record::from_json_non_file(&node.schema.input, &obj).map_err(Error::NotReady)?;

	let id = Uuid::new_v4().to_string();
	let input_dir = node.config.input_dir_root.join(&id);
	let output_dir = node.config.output_dir_root.join(&id);
	tokio::fs::create_dir_all(&input_dir).await.map_err(anyhow::Error::from)?;
	tokio::fs::create_dir_all(&output_dir).await.map_err(anyhow::Error::from)?;

	let job = Arc::new(Job::new(
		id.clone(),
		node.name().to_string(),
		chrono::Utc::now(),
		input_dir,
		output_dir,
		input,
		RunConfig::default(),
	));
	node.insert_job(job).await;

	Ok(Json(serde_json::json!({"job_id": id})))
}

#[utoipa::path(post, path = "/{name}/jobs/{id}/upload", responses((status = 200)))]
async fn upload(
	State(node): State<Arc<Node>>,
	Path(id): Path<String>,
	mut multipart: Multipart,
) -> Result<Json<Json_>, ApiError> {
	let job = node.get_job(&id).await?;
	if job.status() != JobStatus::Preparing {
		return Err(Error::InvalidForStatus("uploads only allowed while preparing".to_string()).into());
	}

	let mut key: Option<String> = None;
	let mut bytes: Option<bytes::Bytes> = None;

	while let Some(field) = multipart.next_field().await.map_err(|e| Error::Other(e.into()))? {
		match field.name() {
			Some("key") => {
				key = Some(field.text().await.map_err(|e| Error::Other(e.into()))?);
			}
			Some("file") => {
				bytes = Some(field.bytes().await.map_err(|e| Error::Other(e.into()))?);
			}
			_ => {}
		}
	}

	let key = key.ok_or_else(|| Error::NotReady("upload missing 'key' field".to_string()))?;
	let bytes = bytes.ok_or_else(|| Error::NotReady("upload missing 'file' field".to_string()))?;

	let field_spec = node
		.schema
		.input
		.iter()
		.find(|f| f.name == key && f.ty.is_file())
		.ok_or_else(|| Error::NotReady(format!("{key:?} is not a declared file input field")))?;

	let dest = job.input_dir.join(&field_spec.name);
	tokio::fs::write(&dest, &bytes).await.map_err(anyhow::Error::from)?;

	let mut updated = job.with_input(|r| r.clone());
	updated.set(field_spec.name.clone(), FieldValue::FilePath(dest));
	job.set_input(updated);

	Ok(Json(serde_json::json!({"ok": true})))
}

/// `POST .../start` body: every field optional, overriding the job's
/// default `RunConfig` (spec §4.5: "POST(run_config)").
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StartRequest {
	priority: Option<u8>,
	check_cache: Option<bool>,
	save_to_cache: Option<bool>,
	resources_included: Option<bool>,
	device_id: Option<usize>,
}

#[utoipa::path(post, path = "/{name}/jobs/{id}/start", responses((status = 200)))]
async fn start(
	State(node): State<Arc<Node>>,
	Path(id): Path<String>,
	Json(req): Json<StartRequest>,
) -> Result<Json<Json_>, ApiError> {
	let job = node.get_job(&id).await?;
	if job.status() != JobStatus::Preparing {
		return Err(Error::InvalidForStatus("start only allowed while preparing".to_string()).into());
	}

	let mut run_config = job.run_config();
	if let Some(v) = req.priority {
		run_config.priority = v;
	}
	if let Some(v) = req.check_cache {
		run_config.check_cache = v;
	}
	if let Some(v) = req.save_to_cache {
		run_config.save_to_cache = v;
	}
	if let Some(v) = req.resources_included {
		run_config.resources_included = v;
	}
	if req.device_id.is_some() {
		run_config.device_id = req.device_id;
	}
	job.set_run_config(run_config);

	forge_supervisor::validate_for_start(&job, &node.schema.input)?;

	let ctx = node.ctx.clone();
	tokio::spawn(forge_supervisor::run_supervisor(job, ctx));

	Ok(Json(serde_json::json!({"ok": true})))
}

#[utoipa::path(get, path = "/{name}/jobs/{id}/status", responses((status = 200)))]
async fn status(State(node): State<Arc<Node>>, Path(id): Path<String>) -> Result<Json<JobStatus>, ApiError> {
	let job = node.get_job(&id).await?;
	Ok(Json(job.status()))
}

#[utoipa::path(get, path = "/{name}/jobs/{id}/data", responses((status = 200)))]
async fn data(State(node): State<Arc<Node>>, Path(id): Path<String>) -> Result<Json<Json_>, ApiError> {
	let job = node.get_job(&id).await?;
	if job.status() != JobStatus::Finished {
		return Err(Error::InvalidForStatus("data only available once finished".to_string()).into());
	}
	let output = job.output().expect("finished job has output");

	let mut fields = Map::new();
	for field in &node.schema.output {
		let value = output.get(&field.name).cloned().unwrap_or(FieldValue::Null);
		let json = if field.ty.is_file() && !value.is_null() {
			Json_::String(format!("/{}/jobs/{}/download/{}", node.name(), id, field.name))
		} else {
			value.to_json()
		};
		fields.insert(field.name.clone(), json);
	}
	Ok(Json(Json_::Object(fields)))
}

#[utoipa::path(get, path = "/{name}/jobs/{id}/download/{field}", responses((status = 200)))]
async fn download(
	State(node): State<Arc<Node>>,
	Path((id, field)): Path<(String, String)>,
) -> Result<Response, ApiError> {
	let job = node.get_job(&id).await?;
	if job.status() != JobStatus::Finished {
		return Err(Error::InvalidForStatus("download only available once finished".to_string()).into());
	}
	let output = job.output().expect("finished job has output");
	let path = output
		.get(&field)
		.and_then(FieldValue::as_file_path)
		.ok_or_else(|| Error::not_found(format!("output field {field:?}")))?
		.to_path_buf();

	let file = tokio::fs::File::open(&path).await.map_err(anyhow::Error::from)?;
	let stream = ReaderStream::new(file);
	let body = axum::body::Body::from_stream(stream);
	Ok(body.into_response())
}

#[utoipa::path(get, path = "/{name}/jobs/{id}/error", responses((status = 200)))]
async fn error(State(node): State<Arc<Node>>, Path(id): Path<String>) -> Result<Json<JobErrorInfo>, ApiError> {
	let job = node.get_job(&id).await?;
	match job.status() {
		JobStatus::Error => Ok(Json(job.error().expect("errored job has error info"))),
		JobStatus::Cancelled => Ok(Json(job.error().unwrap_or(JobErrorInfo {
			kind: "cancelled".to_string(),
			message: "job was cancelled".to_string(),
			traceback: None,
		}))),
		_ => Err(Error::InvalidForStatus("error only available once errored or cancelled".to_string()).into()),
	}
}

#[utoipa::path(post, path = "/{name}/jobs/{id}/stop", responses((status = 200)))]
async fn stop(State(node): State<Arc<Node>>, Path(id): Path<String>) -> Result<Json<Json_>, ApiError> {
	let job = node.get_job(&id).await?;
	let requested = job.request_cancel();
	Ok(Json(serde_json::json!({"requested": requested})))
}

#[utoipa::path(post, path = "/{name}/jobs/{id}/delete", responses((status = 200)))]
async fn delete(State(node): State<Arc<Node>>, Path(id): Path<String>) -> Result<Json<Json_>, ApiError> {
	let job = node.remove_job(&id).await.ok_or_else(|| Error::not_found(format!("job {id:?}")))?;
	let _ = tokio::fs::remove_dir_all(&job.output_dir).await;
	let _ = tokio::fs::remove_dir_all(&job.input_dir).await;
	Ok(Json(serde_json::json!({"ok": true})))
}

#[utoipa::path(get, path = "/{name}/filename_keys", responses((status = 200)))]
async fn filename_keys(State(node): State<Arc<Node>>) -> Json<Vec<String>> {
	Json(node.schema.file_input_keys())
}

#[utoipa::path(get, path = "/{name}/keys", responses((status = 200)))]
async fn keys(State(node): State<Arc<Node>>) -> Json<Json_> {
	Json(serde_json::json!({
		"input_keys": node.schema.input_keys(),
		"output_keys": node.schema.output_keys(),
	}))
}

async fn status_summary(State(node): State<Arc<Node>>) -> Json<HashMap<String, JobStatus>> {
	Json(node.snapshot().await)
}
