//! Analytics buffer: coalesces tracking events into batched inserts.
//!
//! Events append to an in-memory slice; when the slice reaches the batch
//! threshold or the flush interval elapses, the slice is swapped out and
//! submitted as one write-serializer closure inserting the whole batch in
//! a single transaction. The buffer is lossy under overload: a failed
//! batch is dropped (the request path wins over historical fidelity) and
//! counted for `/api/system/health`.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::meta_adapter::{EventRecord, MetaAdapter};
use crate::prelude::*;

pub const DEFAULT_BATCH_THRESHOLD: usize = 1000;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);

pub struct AnalyticsBuffer {
	/// None leaves the buffer uninitialized: pushes become no-ops.
	meta: Option<Arc<dyn MetaAdapter>>,
	buf: Mutex<Vec<EventRecord>>,
	last_flush: Mutex<Instant>,
	dropped_batches: AtomicU64,
	flushed_events: AtomicU64,
	batch_threshold: usize,
	flush_interval: Duration,
}

impl std::fmt::Debug for AnalyticsBuffer {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("AnalyticsBuffer")
			.field("buffered", &self.buf.lock().len())
			.field("dropped_batches", &self.dropped_batches.load(Ordering::Relaxed))
			.finish()
	}
}

impl AnalyticsBuffer {
	pub fn new(meta: Arc<dyn MetaAdapter>) -> Arc<AnalyticsBuffer> {
		Arc::new(AnalyticsBuffer {
			meta: Some(meta),
			buf: Mutex::new(Vec::new()),
			last_flush: Mutex::new(Instant::now()),
			dropped_batches: AtomicU64::new(0),
			flushed_events: AtomicU64::new(0),
			batch_threshold: DEFAULT_BATCH_THRESHOLD,
			flush_interval: DEFAULT_FLUSH_INTERVAL,
		})
	}

	/// A buffer with no store behind it; every push is a silent no-op.
	pub fn disabled() -> Arc<AnalyticsBuffer> {
		Arc::new(AnalyticsBuffer {
			meta: None,
			buf: Mutex::new(Vec::new()),
			last_flush: Mutex::new(Instant::now()),
			dropped_batches: AtomicU64::new(0),
			flushed_events: AtomicU64::new(0),
			batch_threshold: DEFAULT_BATCH_THRESHOLD,
			flush_interval: DEFAULT_FLUSH_INTERVAL,
		})
	}

	/// Queue one event. Timestamp 0 is stamped with now.
	pub fn push(self: &Arc<Self>, mut event: EventRecord) {
		if self.meta.is_none() {
			return;
		}
		if event.created_at.0 == 0 {
			event.created_at = Timestamp::now();
		}
		let flush_needed = {
			let mut buf = self.buf.lock();
			buf.push(event);
			buf.len() >= self.batch_threshold
		};
		if flush_needed {
			let buffer = self.clone();
			tokio::spawn(async move { buffer.flush().await });
		}
	}

	/// Swap the slice out and submit it as one batch.
	pub async fn flush(self: &Arc<Self>) {
		let Some(meta) = &self.meta else { return };
		let batch = {
			let mut buf = self.buf.lock();
			*self.last_flush.lock() = Instant::now();
			if buf.is_empty() {
				return;
			}
			std::mem::take(&mut *buf)
		};

		let count = batch.len() as u64;
		match meta.insert_events(batch).await {
			Ok(()) => {
				self.flushed_events.fetch_add(count, Ordering::Relaxed);
				debug!("analytics flushed {} events", count);
			}
			Err(err) => {
				self.dropped_batches.fetch_add(1, Ordering::Relaxed);
				warn!("analytics batch of {} dropped: {}", count, err);
			}
		}
	}

	pub fn dropped_batches(&self) -> u64 {
		self.dropped_batches.load(Ordering::Relaxed)
	}

	pub fn flushed_events(&self) -> u64 {
		self.flushed_events.load(Ordering::Relaxed)
	}

	pub fn buffered(&self) -> usize {
		self.buf.lock().len()
	}

	/// Background age-based flushing.
	pub fn start(self: &Arc<Self>) {
		if self.meta.is_none() {
			return;
		}
		let buffer = self.clone();
		tokio::spawn(async move {
			let mut interval = tokio::time::interval(Duration::from_secs(5));
			interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
			loop {
				interval.tick().await;
				let due = buffer.last_flush.lock().elapsed() >= buffer.flush_interval;
				if due {
					buffer.flush().await;
				}
			}
		});
	}

	/// Shutdown drain: one final flush before the serializer closes.
	pub async fn shutdown(self: &Arc<Self>) {
		self.flush().await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn event(domain: &str) -> EventRecord {
		EventRecord {
			domain: domain.into(),
			tags: None,
			source_type: None,
			event_type: "pageview".into(),
			path: Some("/".into()),
			referrer: None,
			user_agent: None,
			ip: None,
			query_params: None,
			created_at: Timestamp(0),
		}
	}

	#[tokio::test]
	async fn disabled_buffer_is_a_noop() {
		let buffer = AnalyticsBuffer::disabled();
		for _ in 0..10_000 {
			buffer.push(event("blog"));
		}
		assert_eq!(buffer.buffered(), 0);
		buffer.flush().await;
		buffer.shutdown().await;
	}

	#[tokio::test]
	async fn push_stamps_timestamp() {
		let buffer = AnalyticsBuffer::disabled();
		// The stamping path is exercised through push on an enabled buffer;
		// here we at least pin the zero-default contract.
		let e = event("blog");
		assert_eq!(e.created_at.0, 0);
		buffer.push(e);
	}
}

// vim: ts=4
