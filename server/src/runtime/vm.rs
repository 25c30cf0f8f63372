//! VM workers: dedicated threads each owning one `JsRuntime`.
//!
//! V8 isolates cannot migrate across await points on a multi-threaded
//! scheduler, so every VM lives on its own OS thread with a
//! current-thread tokio runtime; jobs arrive over a flume channel and
//! results return over oneshots. A wall-clock watchdog terminates the
//! isolate from its thread-safe handle when a handler overruns its
//! deadline; a terminated or crashed VM is discarded, never reused.

use deno_core::{JsRuntime, PollEventLoopOptions, RuntimeOptions};
use flume::{Receiver, Sender};
use futures::channel::oneshot;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::data_adapter::Scope;
use crate::auth_adapter::UserRecord;
use crate::prelude::*;
use crate::runtime::ops::{fazt_runtime, HandlerResponse, HostCaps, JobCtx};

const BOOTSTRAP_JS: &str = include_str!("bootstrap.js");

/// Extra wait past the deadline before we give a worker up for dead.
const REPLY_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct JsErrorDetail {
	pub message: Box<str>,
	pub stack: Option<Box<str>>,
}

/// What one execution produced.
#[derive(Debug)]
pub struct ExecOutcome {
	pub response: Option<HandlerResponse>,
	pub storage_ops: u32,
	pub error: Option<JsErrorDetail>,
}

pub struct VmJob {
	pub request: Value,
	pub scope: Scope,
	pub user: Option<UserRecord>,
	pub deadline: Duration,
	pub reply: oneshot::Sender<FzResult<ExecOutcome>>,
}

pub struct VmWorker {
	tx: Sender<VmJob>,
	alive: Arc<AtomicBool>,
	last_used: Mutex<Instant>,
}

impl std::fmt::Debug for VmWorker {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("VmWorker").field("alive", &self.is_alive()).finish()
	}
}

impl VmWorker {
	/// Spawn a VM thread with the app's handler source loaded.
	pub fn spawn(caps: HostCaps, source: String, heap_bytes: usize) -> Arc<VmWorker> {
		let (tx, rx) = flume::bounded::<VmJob>(32);
		let alive = Arc::new(AtomicBool::new(true));
		let thread_alive = alive.clone();

		std::thread::Builder::new()
			.name("fazt-vm".to_string())
			.spawn(move || {
				vm_thread_main(caps, source, heap_bytes, rx, thread_alive.clone());
				thread_alive.store(false, Ordering::Release);
			})
			.ok();

		Arc::new(VmWorker { tx, alive, last_used: Mutex::new(Instant::now()) })
	}

	pub fn is_alive(&self) -> bool {
		self.alive.load(Ordering::Acquire)
	}

	pub fn idle_for(&self) -> Duration {
		self.last_used.lock().elapsed()
	}

	/// Queue a job and await the outcome.
	pub async fn execute(
		&self,
		request: Value,
		scope: Scope,
		user: Option<UserRecord>,
		deadline: Duration,
	) -> FzResult<ExecOutcome> {
		*self.last_used.lock() = Instant::now();
		let (reply_tx, reply_rx) = oneshot::channel();
		self.tx
			.send_async(VmJob { request, scope, user, deadline, reply: reply_tx })
			.await
			.map_err(|_| Error::ServiceUnavailable("vm worker gone".into()))?;

		match tokio::time::timeout(deadline + REPLY_GRACE, reply_rx).await {
			Ok(Ok(outcome)) => outcome,
			Ok(Err(_)) => {
				self.alive.store(false, Ordering::Release);
				Err(Error::ServiceUnavailable("vm worker dropped job".into()))
			}
			Err(_) => {
				self.alive.store(false, Ordering::Release);
				Err(Error::Timeout)
			}
		}
	}
}

fn vm_thread_main(
	caps: HostCaps,
	source: String,
	heap_bytes: usize,
	rx: Receiver<VmJob>,
	alive: Arc<AtomicBool>,
) {
	let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
		Ok(runtime) => runtime,
		Err(err) => {
			error!("vm thread runtime build failed: {}", err);
			return;
		}
	};
	let local = tokio::task::LocalSet::new();
	local.block_on(&runtime, vm_loop(caps, source, heap_bytes, rx, alive));
}

async fn vm_loop(
	caps: HostCaps,
	source: String,
	heap_bytes: usize,
	rx: Receiver<VmJob>,
	alive: Arc<AtomicBool>,
) {
	let create_params =
		deno_core::v8::CreateParams::default().heap_limits(0, heap_bytes.max(8 * 1024 * 1024));
	let mut js = JsRuntime::new(RuntimeOptions {
		extensions: vec![fazt_runtime::init(caps)],
		create_params: Some(create_params),
		..Default::default()
	});

	if let Err(err) = js.execute_script("fazt:bootstrap", BOOTSTRAP_JS) {
		error!("vm bootstrap failed: {}", err);
		return;
	}

	// The handler module body is compiled once per VM lifetime; each
	// request invokes the wrapped entry function.
	let wrapped = format!(
		"globalThis.__fazt_entry = async function(request, respond) {{\n{}\n}};",
		source
	);
	let load_error: Option<JsErrorDetail> = match js.execute_script("fazt:main", wrapped) {
		Ok(_) => None,
		Err(err) => {
			warn!("handler module failed to load: {}", err);
			Some(JsErrorDetail { message: err.to_string().into(), stack: None })
		}
	};

	while let Ok(job) = rx.recv_async().await {
		if let Some(load_error) = &load_error {
			let _ = job.reply.send(Ok(ExecOutcome {
				response: None,
				storage_ops: 0,
				error: Some(load_error.clone()),
			}));
			continue;
		}

		let deadline = job.deadline;
		let deadline_at = Instant::now() + deadline;
		js.op_state()
			.borrow_mut()
			.put(JobCtx::new(job.scope.clone(), job.user.clone(), deadline_at));

		// Watchdog: terminate the isolate if the handler overruns. The
		// cancel channel is signalled on normal completion.
		let isolate_handle = js.v8_isolate().thread_safe_handle();
		let terminated = Arc::new(AtomicBool::new(false));
		let watchdog_terminated = terminated.clone();
		let (cancel_tx, cancel_rx) = std::sync::mpsc::channel::<()>();
		std::thread::spawn(move || {
			if cancel_rx.recv_timeout(deadline).is_err() {
				watchdog_terminated.store(true, Ordering::Release);
				isolate_handle.terminate_execution();
			}
		});

		let dispatch = format!(
			"globalThis.__fazt_dispatch({})",
			serde_json::to_string(&job.request).unwrap_or_else(|_| "null".to_string())
		);
		let run = async {
			let promise = js.execute_script("fazt:dispatch", dispatch)?;
			let resolved = js.resolve(promise);
			js.with_event_loop_promise(resolved, PollEventLoopOptions::default()).await
		};
		let result = run.await;
		let _ = cancel_tx.send(());

		let ctx = js.op_state().borrow_mut().take::<JobCtx>();
		let outcome = match result {
			Ok(_) => {
				Ok(ExecOutcome { response: ctx.response, storage_ops: ctx.storage_ops, error: None })
			}
			Err(_) if terminated.load(Ordering::Acquire) => Err(Error::Timeout),
			Err(err) => Ok(ExecOutcome {
				response: None,
				storage_ops: ctx.storage_ops,
				error: Some(extract_js_error(&err)),
			}),
		};

		let timed_out = matches!(&outcome, Err(Error::Timeout));
		let _ = job.reply.send(outcome);
		if timed_out {
			// A terminated isolate is not reusable; the pool discards us.
			alive.store(false, Ordering::Release);
			return;
		}
	}
}

fn extract_js_error(err: &deno_core::error::CoreError) -> JsErrorDetail {
	match err {
		deno_core::error::CoreError::Js(js_err) => JsErrorDetail {
			message: js_err
				.message
				.clone()
				.unwrap_or_else(|| "uncaught exception".to_string())
				.into(),
			stack: js_err.stack.clone().map(Into::into),
		},
		other => JsErrorDetail { message: other.to_string().into(), stack: None },
	}
}

// vim: ts=4
