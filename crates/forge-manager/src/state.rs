use std::sync::Arc;

use forge_dispatcher::{Dispatcher, HttpPeerClient, PeerClient};
use forge_resource_pool::ResourcePool;

use crate::registry::NodeRegistry;

#[derive(Clone)]
pub struct AppState {
	pub pool: Arc<ResourcePool>,
	pub registry: Arc<NodeRegistry>,
	pub peer_addresses: Arc<Vec<String>>,
	pub self_address: Arc<String>,
	pub peer_client: Arc<HttpPeerClient>,
}

impl AppState {
	/// Builds a fresh `Dispatcher` snapshot from the current registry and
	/// peer list for a single `get_host` call. Cheap: no network I/O
	/// happens until `get_host` is actually invoked.
	pub fn dispatcher(&self) -> Dispatcher<SharedHttpPeerClient> {
		Dispatcher::new(
			self.registry.local_addresses(),
			self.peer_addresses.as_ref().clone(),
			SharedHttpPeerClient(self.peer_client.clone()),
		)
	}
}

/// Adapts a shared `Arc<HttpPeerClient>` to the `PeerClient` trait so
/// `AppState` doesn't need to rebuild an HTTP client per request.
pub struct SharedHttpPeerClient(Arc<HttpPeerClient>);

#[async_trait::async_trait]
impl forge_dispatcher::PeerClient for SharedHttpPeerClient {
	async fn has_node(&self, peer_address: &str, node_name: &str) -> Option<String> {
		self.0.has_node(peer_address, node_name).await
	}

	async fn load(&self, peer_address: &str) -> Option<f64> {
		self.0.load(peer_address).await
	}
}
