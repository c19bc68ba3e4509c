//! Manager HTTP server: owns this host's `ResourcePool` and answers peer
//! dispatcher probes (spec §4.1/§4.4/§6).

pub mod registry;
pub mod routes;
pub mod state;

use std::sync::Arc;

use forge_config::ManagerConfig;
use forge_dispatcher::HttpPeerClient;
use forge_resource_pool::ResourcePool;

use crate::registry::NodeRegistry;
use crate::state::AppState;

pub fn build_state(config: &ManagerConfig) -> AppState {
	let pool = Arc::new(ResourcePool::new(
		config.gpu_mem_mb.clone(),
		config.num_threads,
		config.memory_gb,
	));

	AppState {
		pool,
		registry: Arc::new(NodeRegistry::new()),
		peer_addresses: Arc::new(config.peer_addresses.iter().map(|a| with_scheme(a)).collect()),
		self_address: Arc::new(with_scheme(&config.name)),
		peer_client: Arc::new(HttpPeerClient::new()),
	}
}

/// `NAME`/`PEER_ADDRESSES` are configured as bare `host:port` (spec §6);
/// the dispatcher needs a connectable base URL.
fn with_scheme(address: &str) -> String {
	if address.starts_with("http://") || address.starts_with("https://") {
		address.to_string()
	} else {
		format!("http://{address}")
	}
}

/// Strips any scheme back off so the value is usable with
/// `TcpListener::bind`.
pub fn bind_address(name: &str) -> &str {
	name.trim_start_matches("https://").trim_start_matches("http://")
}

pub fn router(state: AppState) -> axum::Router {
	routes::router(state).layer(tower_http::trace::TraceLayer::new_for_http())
}
