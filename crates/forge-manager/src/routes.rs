//! Manager HTTP surface (spec §4.4/§6), grounded on the handler shape of
//! `packages/core/api-public/src/actors/create.rs` (typed request/response
//! structs, `Result<Json<_>, ApiError>` handlers).

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use forge_error::ApiError;
use serde::{Deserialize, Serialize};

use crate::registry::NodeMetaData;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/manager/register_node", post(register_node))
		.route("/manager/add_job", post(add_job))
		.route("/manager/end_job/{job_id}", post(end_job))
		.route("/manager/is_job_active/{job_id}", get(is_job_active))
		.route("/manager/get_load", get(get_load))
		.route("/manager/dispatcher/has_node/{name}", get(has_node))
		.route("/manager/dispatcher/get_host/{name}", get(get_host))
		.route("/manager/ping", get(ping))
		.route("/manager/host_name", get(host_name))
		.with_state(state)
}

async fn register_node(
	State(state): State<AppState>,
	Json(meta): Json<NodeMetaData>,
) -> Json<serde_json::Value> {
	state.registry.register(meta);
	Json(serde_json::json!({"ok": true}))
}

/// Wire shape is spec §6's `QueueRequest`.
#[derive(Debug, Deserialize)]
struct QueueRequest {
	job_id: String,
	priority: u8,
	required_gpu_mem: u64,
	required_threads: u32,
	required_memory: u32,
}

async fn add_job(
	State(state): State<AppState>,
	Json(req): Json<QueueRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
	state.pool.add(
		req.job_id,
		req.priority,
		req.required_gpu_mem,
		req.required_threads,
		req.required_memory,
	)?;
	Ok(Json(serde_json::json!({"ok": true})))
}

async fn end_job(State(state): State<AppState>, Path(job_id): Path<String>) -> Json<serde_json::Value> {
	state.pool.end(&job_id);
	Json(serde_json::json!({"ok": true}))
}

#[derive(Debug, Serialize)]
struct IsActiveResponse {
	is_active: bool,
	gpu_device_id: Option<usize>,
}

async fn is_job_active(State(state): State<AppState>, Path(job_id): Path<String>) -> Json<IsActiveResponse> {
	let (is_active, gpu_device_id) = state.pool.is_active(&job_id);
	Json(IsActiveResponse { is_active, gpu_device_id })
}

async fn get_load(State(state): State<AppState>) -> Json<f64> {
	Json(state.pool.load())
}

async fn has_node(State(state): State<AppState>, Path(name): Path<String>) -> Json<Option<String>> {
	Json(state.registry.address_of(&name))
}

async fn get_host(State(state): State<AppState>, Path(name): Path<String>) -> Result<Json<String>, ApiError> {
	let local_load = state.pool.load();
	let host = state.dispatcher().get_host(&name, local_load).await?;
	Ok(Json(host))
}

async fn ping() -> Json<bool> {
	Json(true)
}

async fn host_name(State(state): State<AppState>) -> Json<String> {
	Json(state.self_address.as_ref().clone())
}
