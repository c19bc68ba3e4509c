//! Daily cleanup sweep for terminal jobs (spec §4.5 supplement, from
//! `original_source/rhnode/rhnode.py`'s periodic `clean_old_jobs` thread).
//! Reworked onto `tokio-cron-scheduler` rather than a raw sleep loop, since
//! that is the cron-style scheduling crate the rest of the pack reaches for.

use std::sync::Arc;

use tokio_cron_scheduler::{Job as CronJob, JobScheduler};

use crate::node::Node;

/// Runs once daily at 03:30, matching the original implementation's sweep
/// time (an arbitrary policy knob per the design notes, not a contract).
const CLEANUP_CRON: &str = "0 30 3 * * *";

pub async fn start_cleanup_scheduler(node: Arc<Node>) -> anyhow::Result<JobScheduler> {
	let scheduler = JobScheduler::new().await?;

	let job = CronJob::new_async(CLEANUP_CRON, move |_uuid, _lock| {
		let node = node.clone();
		Box::pin(async move {
			node.sweep_expired_jobs().await;
		})
	})?;

	scheduler.add(job).await?;
	scheduler.start().await?;
	Ok(scheduler)
}
