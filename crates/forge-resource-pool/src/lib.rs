//! Per-host resource queue and admission scheduler (spec §4.1).
//!
//! Grounded on `original_source/nodes/queue/newmanager.py`'s `ResourceQueue`
//! (priority heap + strict head-of-line admission), reworked as a
//! `std::sync::Mutex`-guarded struct with a `tokio::sync::Notify` so
//! callers (and tests) can await admission instead of polling in lockstep,
//! while the documented contract (spec §4.2/§5) still polls `is_active`
//! every ~3s as the primary interface.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;

use forge_error::Error;
use tokio::sync::Notify;
use tracing::{debug, instrument};

#[derive(Debug, Clone, Copy)]
pub struct Gpu {
	pub capacity_mb: u64,
	pub available_mb: u64,
}

#[derive(Debug, Clone)]
pub struct PendingJob {
	pub queue_id: String,
	pub priority: u8,
	pub gpu_mb: u64,
	pub threads: u32,
	pub memory_gb: u32,
	created_seq: u64,
}

impl PartialEq for PendingJob {
	fn eq(&self, other: &Self) -> bool {
		self.priority == other.priority && self.created_seq == other.created_seq
	}
}
impl Eq for PendingJob {}

impl PartialOrd for PendingJob {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for PendingJob {
	/// Higher priority first; ties broken by earlier `created_seq` first.
	/// `BinaryHeap` is a max-heap, so "greater" here means "should be
	/// admitted sooner".
	fn cmp(&self, other: &Self) -> Ordering {
		self.priority
			.cmp(&other.priority)
			.then_with(|| other.created_seq.cmp(&self.created_seq))
	}
}

#[derive(Debug, Clone, Copy)]
struct ActiveJob {
	device_id: usize,
	gpu_mb: u64,
	threads: u32,
	memory_gb: u32,
}

struct Inner {
	gpus: Vec<Gpu>,
	threads_total: u32,
	threads_available: u32,
	memory_total_gb: u32,
	memory_available_gb: u32,
	pending: BinaryHeap<PendingJob>,
	active: HashMap<String, ActiveJob>,
}

pub struct ResourcePool {
	inner: Mutex<Inner>,
	notify: Notify,
	seq: AtomicU64,
}

impl ResourcePool {
	pub fn new(gpu_capacities_mb: Vec<u64>, threads_total: u32, memory_total_gb: u32) -> Self {
		let gpus = gpu_capacities_mb
			.into_iter()
			.map(|capacity_mb| Gpu {
				capacity_mb,
				available_mb: capacity_mb,
			})
			.collect();
		Self {
			inner: Mutex::new(Inner {
				gpus,
				threads_total,
				threads_available: threads_total,
				memory_total_gb,
				memory_available_gb: memory_total_gb,
				pending: BinaryHeap::new(),
				active: HashMap::new(),
			}),
			notify: Notify::new(),
			seq: AtomicU64::new(0),
		}
	}

	/// Validates and enqueues a job, then immediately attempts admission
	/// (spec §4.1 `add`).
	#[instrument(skip(self))]
	pub fn add(
		&self,
		queue_id: String,
		priority: u8,
		gpu_mb: u64,
		threads: u32,
		memory_gb: u32,
	) -> Result<(), Error> {
		if !(1..=5).contains(&priority) {
			return Err(Error::InvalidRequirements(format!(
				"priority must be in [1,5], got {priority}"
			)));
		}

		let mut inner = self.inner.lock().unwrap();

		let max_gpu_capacity = inner.gpus.iter().map(|g| g.capacity_mb).max().unwrap_or(0);
		if gpu_mb > max_gpu_capacity {
			return Err(Error::InvalidRequirements(format!(
				"gpu_mb {gpu_mb} exceeds largest device capacity {max_gpu_capacity}"
			)));
		}
		if threads > inner.threads_total {
			return Err(Error::InvalidRequirements(format!(
				"threads {threads} exceeds total {}",
				inner.threads_total
			)));
		}
		if memory_gb > inner.memory_total_gb {
			return Err(Error::InvalidRequirements(format!(
				"memory_gb {memory_gb} exceeds total {}",
				inner.memory_total_gb
			)));
		}

		let created_seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
		inner.pending.push(PendingJob {
			queue_id,
			priority,
			gpu_mb,
			threads,
			memory_gb,
			created_seq,
		});

		process_queue(&mut inner);
		drop(inner);
		self.notify.notify_waiters();

		Ok(())
	}

	/// Releases a job's resources (if active) or removes it from the
	/// pending heap (if not yet admitted), then re-attempts admission
	/// (spec §4.1 `end`). Idempotent on an unknown id per §9's resolved
	/// open question.
	#[instrument(skip(self))]
	pub fn end(&self, queue_id: &str) {
		let mut inner = self.inner.lock().unwrap();

		if let Some(active) = inner.active.remove(queue_id) {
			if let Some(gpu) = inner.gpus.get_mut(active.device_id) {
				gpu.available_mb += active.gpu_mb;
			}
			inner.threads_available += active.threads;
			inner.memory_available_gb += active.memory_gb;
		} else {
			let before = inner.pending.len();
			let retained: BinaryHeap<PendingJob> = inner
				.pending
				.drain()
				.filter(|j| j.queue_id != queue_id)
				.collect();
			inner.pending = retained;
			if inner.pending.len() == before {
				debug!(queue_id, "end() called for unknown queue id, no-op");
			}
		}

		process_queue(&mut inner);
		drop(inner);
		self.notify.notify_waiters();
	}

	pub fn is_active(&self, queue_id: &str) -> (bool, Option<usize>) {
		let inner = self.inner.lock().unwrap();
		match inner.active.get(queue_id) {
			Some(active) => (true, Some(active.device_id)),
			None => (false, None),
		}
	}

	/// `max` over the three `(required/capacity)` ratios, summed over
	/// active ∪ pending (spec §4.1 `load`).
	pub fn load(&self) -> f64 {
		let inner = self.inner.lock().unwrap();

		let gpu_capacity: u64 = inner.gpus.iter().map(|g| g.capacity_mb).sum();
		let mut gpu_required: u64 = inner.active.values().map(|a| a.gpu_mb).sum();
		gpu_required += inner.pending.iter().map(|p| p.gpu_mb).sum::<u64>();

		let mut threads_required: u64 = inner.active.values().map(|a| a.threads as u64).sum();
		threads_required += inner.pending.iter().map(|p| p.threads as u64).sum::<u64>();

		let mut memory_required: u64 = inner.active.values().map(|a| a.memory_gb as u64).sum();
		memory_required += inner.pending.iter().map(|p| p.memory_gb as u64).sum::<u64>();

		let gpu_ratio = ratio(gpu_required, gpu_capacity);
		let threads_ratio = ratio(threads_required, inner.threads_total as u64);
		let memory_ratio = ratio(memory_required, inner.memory_total_gb as u64);

		gpu_ratio.max(threads_ratio).max(memory_ratio)
	}

	/// Waits (with a bounded timeout, matching the ~3s queue-poll cadence
	/// in spec §4.2) for any admission event. Used by the supervisor as an
	/// efficient alternative to a fixed `sleep`; functionally equivalent to
	/// polling `is_active` in a loop.
	pub async fn wait_for_change(&self, timeout: std::time::Duration) {
		let notified = self.notify.notified();
		let _ = tokio::time::timeout(timeout, notified).await;
	}
}

fn ratio(required: u64, capacity: u64) -> f64 {
	if capacity == 0 {
		if required == 0 { 0.0 } else { 1.0 }
	} else {
		required as f64 / capacity as f64
	}
}

/// Strict head-of-line admission: repeatedly check the heap's head; if it
/// fits, pop and admit; otherwise stop without skipping ahead (spec §4.1).
fn process_queue(inner: &mut Inner) {
	loop {
		let Some(head) = inner.pending.peek() else {
			break;
		};

		let fitting_gpu = inner
			.gpus
			.iter()
			.enumerate()
			.find(|(_, g)| g.available_mb >= head.gpu_mb)
			.map(|(idx, _)| idx);

		let fits = fitting_gpu.is_some()
			&& inner.threads_available >= head.threads
			&& inner.memory_available_gb >= head.memory_gb;

		if !fits {
			break;
		}

		let job = inner.pending.pop().expect("peeked above");
		let device_id = fitting_gpu.expect("checked above");

		inner.gpus[device_id].available_mb -= job.gpu_mb;
		inner.threads_available -= job.threads;
		inner.memory_available_gb -= job.memory_gb;

		inner.active.insert(
			job.queue_id.clone(),
			ActiveJob {
				device_id,
				gpu_mb: job.gpu_mb,
				threads: job.threads,
				memory_gb: job.memory_gb,
			},
		);
	}
}
