//! Node HTTP surface (spec §4.5): create/upload/start/poll/download/stop/
//! delete a job against one `NodeType`'s process, plus the schema
//! introspection and cleanup-sweep ambient surface described in
//! `SPEC_FULL.md` §4.5.

mod node;
mod routes;
mod schedule;

pub use node::{bind_address, with_scheme, Node};
pub use routes::router;
pub use schedule::start_cleanup_scheduler;

use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

/// Wraps the job-surface router with request tracing, matching
/// `forge-manager`'s `router` wrapper.
pub fn app(node: Arc<Node>) -> Router {
	router(node).layer(TraceLayer::new_for_http())
}
