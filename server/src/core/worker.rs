//! CPU worker pool for blocking work (image decode/encode).
//!
//! Dedicated OS threads draining flume queues, so CPU-bound jobs never
//! stall the async runtime. High-priority jobs (request-path image ops)
//! are tried before low-priority ones (background processing).

use flume::{Receiver, Sender};
use futures::channel::oneshot;
use std::{sync::Arc, thread};

type Job = Box<dyn FnOnce() + Send>;

#[derive(Debug)]
pub struct WorkerPool {
	tx_high: Sender<Job>,
	tx_low: Sender<Job>,
}

impl WorkerPool {
	/// `n_high` threads serve only the high queue; `n_shared` drain both.
	pub fn new(n_high: usize, n_shared: usize) -> Arc<WorkerPool> {
		let (tx_high, rx_high) = flume::unbounded();
		let (tx_low, rx_low) = flume::unbounded();

		let rx_high = Arc::new(rx_high);
		let rx_low = Arc::new(rx_low);

		for _ in 0..n_high.max(1) {
			let rx_high = Arc::clone(&rx_high);
			thread::spawn(move || worker_loop(vec![rx_high]));
		}
		for _ in 0..n_shared.max(1) {
			let rx_high = Arc::clone(&rx_high);
			let rx_low = Arc::clone(&rx_low);
			thread::spawn(move || worker_loop(vec![rx_high, rx_low]));
		}

		Arc::new(WorkerPool { tx_high, tx_low })
	}

	/// Run a closure on the pool and await its result.
	pub fn run<F, T>(&self, f: F) -> impl std::future::Future<Output = T>
	where
		F: FnOnce() -> T + Send + 'static,
		T: Send + 'static,
	{
		self.submit(&self.tx_high, f)
	}

	/// Low-priority variant for background jobs.
	pub fn run_slow<F, T>(&self, f: F) -> impl std::future::Future<Output = T>
	where
		F: FnOnce() -> T + Send + 'static,
		T: Send + 'static,
	{
		self.submit(&self.tx_low, f)
	}

	fn submit<F, T>(&self, tx: &Sender<Job>, f: F) -> impl std::future::Future<Output = T>
	where
		F: FnOnce() -> T + Send + 'static,
		T: Send + 'static,
	{
		let (res_tx, res_rx) = oneshot::channel();
		let job = Box::new(move || {
			let result = f();
			let _ = res_tx.send(result);
		});
		// Unbounded queue: send only fails when all workers are gone
		let _ = tx.send(job);
		async move {
			match res_rx.await {
				Ok(result) => result,
				Err(_) => std::future::pending().await,
			}
		}
	}
}

fn worker_loop(queues: Vec<Arc<Receiver<Job>>>) {
	loop {
		// Try higher-priority queues first (non-blocking)
		let mut job = None;
		for rx in &queues {
			if let Ok(j) = rx.try_recv() {
				job = Some(j);
				break;
			}
		}

		if let Some(job) = job {
			job();
			continue;
		}

		// Wait for the next job on any queue
		let mut selector = flume::Selector::new();
		for rx in &queues {
			selector = selector.recv(rx, |res| res);
		}

		match selector.wait() {
			Ok(job) => job(),
			Err(_) => return,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn runs_jobs_and_returns_results() {
		let pool = WorkerPool::new(1, 1);
		let result = pool.run(|| 21 * 2).await;
		assert_eq!(result, 42);
	}

	#[tokio::test]
	async fn many_concurrent_jobs() {
		let pool = WorkerPool::new(2, 2);
		let mut futs = Vec::new();
		for i in 0..64u64 {
			futs.push(pool.run(move || i * i));
		}
		for (i, fut) in futs.into_iter().enumerate() {
			assert_eq!(fut.await, (i * i) as u64);
		}
	}
}

// vim: ts=4
