//! Activity log facade: weighted, owner-visible audit trail.
//!
//! Recording is fire-and-forget: audit writes ride the write serializer
//! but never block or fail the request that produced them; failures are
//! counted instead. Retention deletes by `(weight ASC, created_at ASC)`
//! so noise ages out before signal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::meta_adapter::{ActivityEntry, ListActivityOptions, MetaAdapter};
use crate::prelude::*;

/// Rows kept by the retention sweep.
const DEFAULT_KEEP_ROWS: u64 = 50_000;
const RETENTION_SWEEP_SECS: u64 = 3600;

pub struct ActivityLog {
	meta: Arc<dyn MetaAdapter>,
	dropped: AtomicU64,
	keep_rows: u64,
}

impl std::fmt::Debug for ActivityLog {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ActivityLog")
			.field("dropped", &self.dropped.load(Ordering::Relaxed))
			.finish()
	}
}

impl ActivityLog {
	pub fn new(meta: Arc<dyn MetaAdapter>) -> Arc<ActivityLog> {
		Arc::new(ActivityLog { meta, dropped: AtomicU64::new(0), keep_rows: DEFAULT_KEEP_ROWS })
	}

	/// Record an entry without blocking the caller. Write failures are
	/// counted, never propagated.
	pub fn record(self: &Arc<Self>, entry: ActivityEntry) {
		let log = self.clone();
		tokio::spawn(async move {
			if let Err(err) = log.meta.append_activity(entry).await {
				log.dropped.fetch_add(1, Ordering::Relaxed);
				warn!("activity write failed: {}", err);
			}
		});
	}

	pub async fn list(&self, opts: &ListActivityOptions) -> FzResult<Vec<ActivityEntry>> {
		self.meta.list_activity(opts).await
	}

	pub fn dropped(&self) -> u64 {
		self.dropped.load(Ordering::Relaxed)
	}

	/// Periodic weight-first retention sweep.
	pub fn start_retention(self: &Arc<Self>) {
		let log = self.clone();
		tokio::spawn(async move {
			let mut interval =
				tokio::time::interval(std::time::Duration::from_secs(RETENTION_SWEEP_SECS));
			interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
			loop {
				interval.tick().await;
				match log.meta.prune_activity(log.keep_rows).await {
					Ok(0) => {}
					Ok(pruned) => debug!("activity retention pruned {} rows", pruned),
					Err(err) => warn!("activity retention failed: {}", err),
				}
			}
		});
	}
}

// vim: ts=4
