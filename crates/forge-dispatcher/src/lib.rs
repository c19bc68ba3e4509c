//! Peer cluster placement (spec §4.4).
//!
//! Grounded on `packages/core/guard/server/src/routing/mod.rs`'s routing
//! function shape (a boxed async closure resolving a request to a target):
//! here the "request" is a node name and the "target" is a host address,
//! with a fan-out probe across peers instead of header/path parsing.

use std::collections::HashMap;
use std::time::Duration;

use forge_error::Error;
use tracing::{debug, instrument, warn};

const PEER_TIMEOUT: Duration = Duration::from_secs(1);

/// Abstraction over "ask a peer manager whether it hosts a node, and how
/// loaded it is", so `Dispatcher` can be unit tested against in-process
/// fakes instead of real HTTP (spec §8 testable properties).
///
/// `has_node` returns the node's own reachable address on that peer, not
/// just a bool: the peer manager's own address serves only its `/manager/*`
/// routes, never the node's `/{node_name}/*` surface (spec §4.5), so the
/// dispatcher has no other way to learn where to actually send a client.
#[async_trait::async_trait]
pub trait PeerClient: Send + Sync {
	async fn has_node(&self, peer_address: &str, node_name: &str) -> Option<String>;
	async fn load(&self, peer_address: &str) -> Option<f64>;
}

/// `reqwest`-backed `PeerClient` used in production, with the ~1s timeouts
/// spec §4.4 mandates for peer probes.
pub struct HttpPeerClient {
	client: reqwest::Client,
}

impl HttpPeerClient {
	pub fn new() -> Self {
		Self {
			client: reqwest::Client::builder()
				.timeout(PEER_TIMEOUT)
				.build()
				.expect("reqwest client builds"),
		}
	}
}

impl Default for HttpPeerClient {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait::async_trait]
impl PeerClient for HttpPeerClient {
	async fn has_node(&self, peer_address: &str, node_name: &str) -> Option<String> {
		let url = format!("{peer_address}/manager/dispatcher/has_node/{node_name}");
		match self.client.get(&url).send().await {
			Ok(resp) => resp.json::<Option<String>>().await.unwrap_or(None),
			Err(e) => {
				debug!(peer_address, error = %e, "peer unreachable during has_node probe");
				None
			}
		}
	}

	async fn load(&self, peer_address: &str) -> Option<f64> {
		let url = format!("{peer_address}/manager/get_load");
		match self.client.get(&url).send().await {
			Ok(resp) => resp.json::<f64>().await.ok(),
			Err(e) => {
				debug!(peer_address, error = %e, "peer unreachable during load probe");
				None
			}
		}
	}
}

/// Resolves which host (self or a peer) should receive a job for a given
/// node type. Placement uses whatever snapshot is observed; there is no
/// distributed locking (spec §4.4).
pub struct Dispatcher<P: PeerClient> {
	local_nodes: HashMap<String, String>,
	peer_addresses: Vec<String>,
	peer_client: P,
}

impl<P: PeerClient> Dispatcher<P> {
	/// `local_nodes` maps a node type name to the address that actually
	/// serves it (spec §4.5's `/{node_name}/*` routes), not the manager's
	/// own address.
	pub fn new(
		local_nodes: HashMap<String, String>,
		peer_addresses: Vec<String>,
		peer_client: P,
	) -> Self {
		Self {
			local_nodes,
			peer_addresses,
			peer_client,
		}
	}

	pub fn has_node_locally(&self, node_name: &str) -> bool {
		self.local_nodes.contains_key(node_name)
	}

	/// Implements §4.4 verbatim: seed with self if hosted locally, fan out
	/// `has_node` probes to peers in parallel, adopt any peer that reports
	/// an address and strictly lower load, fail `NoHostForNode` if no
	/// candidate exists at all.
	#[instrument(skip(self, local_load))]
	pub async fn get_host(
		&self,
		node_name: &str,
		local_load: f64,
	) -> Result<String, Error> {
		let mut best: Option<(String, f64)> = None;

		if let Some(address) = self.local_nodes.get(node_name) {
			best = Some((address.clone(), local_load));
		}

		let probes = self.peer_addresses.iter().map(|peer| {
			let node_name = node_name.to_string();
			async move {
				let address = self.peer_client.has_node(peer, &node_name).await?;
				let load = self.peer_client.load(peer).await;
				Some((address, load))
			}
		});

		let results = futures::future::join_all(probes).await;

		for result in results.into_iter().flatten() {
			let (address, load) = result;
			let Some(load) = load else {
				warn!(address, "peer hosts node but load probe failed, skipping");
				continue;
			};
			let adopt = match &best {
				None => true,
				Some((_, best_load)) => load < *best_load,
			};
			if adopt {
				best = Some((address, load));
			}
		}

		best.map(|(address, _)| address)
			.ok_or_else(|| Error::NoHostForNode(node_name.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Mutex;

	/// `hosts` maps a peer address to the node-type -> address pairs it
	/// claims to serve, mirroring what a real peer manager's
	/// `/manager/dispatcher/has_node/{name}` route returns.
	struct FakePeerClient {
		hosts: HashMap<String, HashMap<String, String>>,
		loads: HashMap<String, f64>,
		probed: Mutex<Vec<String>>,
	}

	#[async_trait::async_trait]
	impl PeerClient for FakePeerClient {
		async fn has_node(&self, peer_address: &str, node_name: &str) -> Option<String> {
			self.probed.lock().unwrap().push(peer_address.to_string());
			self.hosts.get(peer_address).and_then(|names| names.get(node_name)).cloned()
		}

		async fn load(&self, peer_address: &str) -> Option<f64> {
			self.loads.get(peer_address).copied()
		}
	}

	fn fake(hosts: &[(&str, &[(&str, &str)])], loads: &[(&str, f64)]) -> FakePeerClient {
		FakePeerClient {
			hosts: hosts
				.iter()
				.map(|(addr, names)| {
					(
						addr.to_string(),
						names
							.iter()
							.map(|(name, node_address)| (name.to_string(), node_address.to_string()))
							.collect(),
					)
				})
				.collect(),
			loads: loads.iter().map(|(addr, l)| (addr.to_string(), *l)).collect(),
			probed: Mutex::new(Vec::new()),
		}
	}

	fn local(pairs: &[(&str, &str)]) -> HashMap<String, String> {
		pairs.iter().map(|(name, addr)| (name.to_string(), addr.to_string())).collect()
	}

	#[tokio::test]
	async fn prefers_self_when_no_peer_is_less_loaded() {
		let client = fake(
			&[("http://peer1", &[("add", "http://peer1-node")])],
			&[("http://peer1", 0.9)],
		);
		let dispatcher = Dispatcher::new(
			local(&[("add", "http://self-node")]),
			vec!["http://peer1".to_string()],
			client,
		);

		let host = dispatcher.get_host("add", 0.2).await.unwrap();
		assert_eq!(host, "http://self-node");
	}

	#[tokio::test]
	async fn adopts_less_loaded_peer() {
		let client = fake(
			&[("http://peer1", &[("add", "http://peer1-node")])],
			&[("http://peer1", 0.1)],
		);
		let dispatcher = Dispatcher::new(
			local(&[("add", "http://self-node")]),
			vec!["http://peer1".to_string()],
			client,
		);

		let host = dispatcher.get_host("add", 0.8).await.unwrap();
		assert_eq!(host, "http://peer1-node");
	}

	#[tokio::test]
	async fn fails_with_no_host_for_node_when_nobody_hosts_it() {
		let client = fake(&[("http://peer1", &[("other", "http://peer1-other")])], &[]);
		let dispatcher = Dispatcher::new(
			HashMap::new(),
			vec!["http://peer1".to_string()],
			client,
		);

		let err = dispatcher.get_host("add", 0.0).await.unwrap_err();
		assert!(matches!(err, Error::NoHostForNode(_)));
	}

	#[tokio::test]
	async fn ignores_peers_that_do_not_host_the_node() {
		let client = fake(
			&[
				("http://peer1", &[("other", "http://peer1-other")]),
				("http://peer2", &[("add", "http://peer2-node")]),
			],
			&[("http://peer2", 0.05)],
		);
		let dispatcher = Dispatcher::new(
			HashMap::new(),
			vec!["http://peer1".to_string(), "http://peer2".to_string()],
			client,
		);

		let host = dispatcher.get_host("add", 0.0).await.unwrap();
		assert_eq!(host, "http://peer2-node");
	}
}
