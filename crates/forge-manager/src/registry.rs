//! Tracks which node types have registered with this manager (spec §6
//! `register_node` / §4.4 dispatcher `has_node`).

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `address` is a SPEC_FULL.md supplement to spec §6's literal
/// `NodeMetaData` wire shape: the node's own reachable `host:port`,
/// distinct from `name` (the node *type* name, e.g. `"add"`, used to key
/// the registry and build route prefixes). Without it the manager has no
/// way to answer a dispatcher `get_host` query with an address a client
/// can actually reach (see `DESIGN.md`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMetaData {
	pub name: String,
	pub address: String,
	pub last_heard_from: DateTime<Utc>,
	pub gpu_gb_required: u64,
	pub threads_required: u32,
	pub memory_required: u32,
}

#[derive(Default)]
pub struct NodeRegistry {
	nodes: Mutex<HashMap<String, NodeMetaData>>,
}

impl NodeRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&self, meta: NodeMetaData) {
		self.nodes.lock().unwrap().insert(meta.name.clone(), meta);
	}

	/// The registered address to dispatch a job for `name` to, if this
	/// manager has a node of that type registered.
	pub fn address_of(&self, name: &str) -> Option<String> {
		self.nodes.lock().unwrap().get(name).map(|meta| meta.address.clone())
	}

	/// Every locally-registered node type mapped to its reachable address,
	/// for seeding the dispatcher's local-candidate lookup.
	pub fn local_addresses(&self) -> HashMap<String, String> {
		self.nodes
			.lock()
			.unwrap()
			.values()
			.map(|meta| (meta.name.clone(), meta.address.clone()))
			.collect()
	}
}
