//! The write serializer.
//!
//! SQLite allows exactly one writer; under concurrent write pressure the
//! naive approach surfaces `SQLITE_BUSY`. All mutating statements instead
//! funnel through a FIFO queue of closures drained by a single worker task
//! over a 1-connection pool. Writes are thereby totally ordered: every
//! closure sees the effects of every earlier-submitted, committed closure.
//!
//! A submission may carry a cancellation token; when the token fires before
//! the worker picks the item up, the job is dropped unexecuted and the
//! caller fails fast. Batched writes (analytics, log shipping) submit one
//! closure per batch, not per row.

use flume::{Receiver, Sender};
use futures::channel::oneshot;
use futures::future::BoxFuture;
use sqlx::SqlitePool;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use fazt::error::{Error, FzResult};

type Job = Box<dyn FnOnce(SqlitePool) -> BoxFuture<'static, ()> + Send>;

struct QueueItem {
	job: Job,
	cancel: Option<CancellationToken>,
}

pub struct WriteSerializer {
	tx: Mutex<Option<Sender<QueueItem>>>,
	worker: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl std::fmt::Debug for WriteSerializer {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("WriteSerializer").finish()
	}
}

async fn worker_loop(db: SqlitePool, rx: Receiver<QueueItem>) {
	while let Ok(item) = rx.recv_async().await {
		if let Some(cancel) = &item.cancel {
			if cancel.is_cancelled() {
				// Dropping the job drops its result sender; the submitter
				// observes the cancellation instead of a result.
				debug!("write job cancelled before pickup");
				continue;
			}
		}
		(item.job)(db.clone()).await;
	}
	debug!("write serializer drained");
}

impl WriteSerializer {
	/// Start the single drain worker over the (1-connection) write pool.
	pub fn new(db: SqlitePool) -> WriteSerializer {
		let (tx, rx) = flume::unbounded::<QueueItem>();
		let worker = tokio::spawn(worker_loop(db, rx));
		WriteSerializer { tx: Mutex::new(Some(tx)), worker: Mutex::new(Some(worker)) }
	}

	/// Submit a write closure and await its result.
	pub async fn submit<T, F, Fut>(&self, f: F) -> FzResult<T>
	where
		T: Send + 'static,
		F: FnOnce(SqlitePool) -> Fut + Send + 'static,
		Fut: std::future::Future<Output = FzResult<T>> + Send + 'static,
	{
		self.submit_inner(None, f).await
	}

	/// Submit with a cancellation token. If the token fires before the
	/// worker picks the item, the closure never runs and the call fails
	/// with `SERVICE_UNAVAILABLE`. A job already running is not interrupted.
	pub async fn submit_cancellable<T, F, Fut>(
		&self,
		cancel: CancellationToken,
		f: F,
	) -> FzResult<T>
	where
		T: Send + 'static,
		F: FnOnce(SqlitePool) -> Fut + Send + 'static,
		Fut: std::future::Future<Output = FzResult<T>> + Send + 'static,
	{
		self.submit_inner(Some(cancel), f).await
	}

	async fn submit_inner<T, F, Fut>(
		&self,
		cancel: Option<CancellationToken>,
		f: F,
	) -> FzResult<T>
	where
		T: Send + 'static,
		F: FnOnce(SqlitePool) -> Fut + Send + 'static,
		Fut: std::future::Future<Output = FzResult<T>> + Send + 'static,
	{
		let (res_tx, res_rx) = oneshot::channel::<FzResult<T>>();
		let job: Job = Box::new(move |db| {
			Box::pin(async move {
				let result = f(db).await;
				let _ = res_tx.send(result);
			})
		});

		{
			let tx = self.tx.lock().map_err(|_| Error::Internal("write queue lock".into()))?;
			let Some(tx) = tx.as_ref() else {
				return Err(Error::ServiceUnavailable("write queue closed".into()));
			};
			tx.send(QueueItem { job, cancel })
				.map_err(|_| Error::ServiceUnavailable("write queue closed".into()))?;
		}

		res_rx
			.await
			.map_err(|_| Error::ServiceUnavailable("write cancelled".into()))?
	}

	/// Stop intake. Jobs already queued still run; `join` awaits the drain.
	pub fn close(&self) {
		if let Ok(mut tx) = self.tx.lock() {
			tx.take();
		}
	}

	/// Await worker completion after `close`.
	pub async fn join(&self) {
		let handle = match self.worker.lock() {
			Ok(mut worker) => worker.take(),
			Err(_) => None,
		};
		if let Some(handle) = handle {
			if let Err(err) = handle.await {
				warn!("write serializer worker panicked: {}", err);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
	use std::sync::atomic::{AtomicU32, Ordering};
	use std::sync::Arc;

	async fn memory_pool() -> SqlitePool {
		SqlitePoolOptions::new()
			.max_connections(1)
			.connect_with(SqliteConnectOptions::new().in_memory(true))
			.await
			.unwrap()
	}

	#[tokio::test]
	async fn executes_in_submission_order() {
		let serializer = Arc::new(WriteSerializer::new(memory_pool().await));
		let order = Arc::new(std::sync::Mutex::new(Vec::new()));

		let mut waits = Vec::new();
		for i in 0..16u32 {
			let order = order.clone();
			waits.push(serializer.submit(move |_db| async move {
				order.lock().unwrap().push(i);
				Ok(i)
			}));
		}
		for (i, wait) in waits.into_iter().enumerate() {
			assert_eq!(wait.await.unwrap(), i as u32);
		}
		assert_eq!(*order.lock().unwrap(), (0..16).collect::<Vec<_>>());
	}

	#[tokio::test]
	async fn no_two_jobs_run_concurrently() {
		let serializer = Arc::new(WriteSerializer::new(memory_pool().await));
		let running = Arc::new(AtomicU32::new(0));
		let max_seen = Arc::new(AtomicU32::new(0));

		let mut waits = Vec::new();
		for _ in 0..8 {
			let running = running.clone();
			let max_seen = max_seen.clone();
			waits.push(serializer.submit(move |_db| async move {
				let now = running.fetch_add(1, Ordering::SeqCst) + 1;
				max_seen.fetch_max(now, Ordering::SeqCst);
				tokio::time::sleep(std::time::Duration::from_millis(5)).await;
				running.fetch_sub(1, Ordering::SeqCst);
				Ok(())
			}));
		}
		for wait in waits {
			wait.await.unwrap();
		}
		assert_eq!(max_seen.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn cancelled_before_pickup_fails_fast() {
		let serializer = Arc::new(WriteSerializer::new(memory_pool().await));

		// Occupy the worker so the next submission queues
		let blocker = serializer.submit(|_db| async {
			tokio::time::sleep(std::time::Duration::from_millis(50)).await;
			Ok(())
		});

		let cancel = CancellationToken::new();
		cancel.cancel();
		let res = serializer
			.submit_cancellable(cancel, |_db| async {
				// Must never run: the token was cancelled before pickup
				Err::<(), _>(Error::Internal("cancelled job executed".into()))
			})
			.await;
		assert!(matches!(res, Err(Error::ServiceUnavailable(_))));
		blocker.await.unwrap();
	}

	#[tokio::test]
	async fn close_rejects_new_submissions() {
		let serializer = Arc::new(WriteSerializer::new(memory_pool().await));
		serializer.close();
		let res = serializer.submit(|_db| async { Ok(()) }).await;
		assert!(matches!(res, Err(Error::ServiceUnavailable(_))));
		serializer.join().await;
	}
}

// vim: ts=4
