//! Error kinds shared by every `forge-*` crate, plus the HTTP mapping used by
//! the node and manager servers.

use axum::{
	Json,
	http::StatusCode,
	response::{IntoResponse, Response},
};
use serde::Serialize;

/// Core error kinds surfaced by the job runtime (spec §7).
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("job requirements exceed pool capacity: {0}")]
	InvalidRequirements(String),

	#[error("job is not ready to start: {0}")]
	NotReady(String),

	#[error("operation not valid for current status: {0}")]
	InvalidForStatus(String),

	#[error("not found: {0}")]
	NotFound(String),

	#[error("no host could be found for node {0:?}")]
	NoHostForNode(String),

	#[error("job failed: {message}")]
	JobFailed {
		message: String,
		traceback: String,
		error_type: String,
	},

	#[error("job was cancelled")]
	JobCancelled,

	#[error("cache entry corrupted: {0}")]
	CacheCorrupted(String),

	#[error(transparent)]
	Other(#[from] anyhow::Error),
}

impl Error {
	pub fn not_found(what: impl Into<String>) -> Self {
		Error::NotFound(what.into())
	}

	fn status_code(&self) -> StatusCode {
		match self {
			Error::InvalidRequirements(_) => StatusCode::BAD_REQUEST,
			Error::NotReady(_) => StatusCode::BAD_REQUEST,
			Error::InvalidForStatus(_) => StatusCode::BAD_REQUEST,
			Error::NotFound(_) => StatusCode::NOT_FOUND,
			Error::NoHostForNode(_) => StatusCode::NOT_FOUND,
			// Terminal job outcomes are reported through the job's own status,
			// not as a failing HTTP response to the triggering request.
			Error::JobFailed { .. } => StatusCode::OK,
			Error::JobCancelled => StatusCode::OK,
			Error::CacheCorrupted(_) => StatusCode::INTERNAL_SERVER_ERROR,
			Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}

	/// Machine-readable discriminant, mirrors the error kind names in spec §7.
	pub fn kind(&self) -> &'static str {
		match self {
			Error::InvalidRequirements(_) => "invalid_requirements",
			Error::NotReady(_) => "not_ready",
			Error::InvalidForStatus(_) => "invalid_for_status",
			Error::NotFound(_) => "not_found",
			Error::NoHostForNode(_) => "no_host_for_node",
			Error::JobFailed { .. } => "job_failed",
			Error::JobCancelled => "job_cancelled",
			Error::CacheCorrupted(_) => "cache_corrupted",
			Error::Other(_) => "internal",
		}
	}
}

#[derive(Serialize)]
struct ErrorBody {
	kind: &'static str,
	message: String,
}

/// Wrapper that axum handlers return on the error path of a `Result`.
///
/// Grounded on the teacher's `ApiError::from(err).into_response()` handler
/// shape (`packages/core/api-public/src/actors/create.rs`), simplified since
/// this crate has no OpenAPI-error-catalogue macro to drive.
pub struct ApiError(pub Error);

impl<E: Into<Error>> From<E> for ApiError {
	fn from(err: E) -> Self {
		ApiError(err.into())
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let status = self.0.status_code();
		if status.is_server_error() {
			tracing::error!(err = %self.0, kind = self.0.kind(), "request failed");
		} else {
			tracing::debug!(err = %self.0, kind = self.0.kind(), "request rejected");
		}

		let body = ErrorBody {
			kind: self.0.kind(),
			message: self.0.to_string(),
		};
		(status, Json(body)).into_response()
	}
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
