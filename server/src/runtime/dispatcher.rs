//! Request -> VM dispatch: pool management per app, request/response
//! bridging, execution records and error publication.

use axum::{
	body::Body,
	http::{header, Request, StatusCode},
	response::Response,
};
use http_body_util::BodyExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::auth_adapter::UserRecord;
use crate::data_adapter::Scope;
use crate::meta_adapter::{ActivityEntry, Actor, AppRecord, MetaAdapter};
use crate::prelude::*;
use crate::runtime::logring::{ErrorRecord, ExecutionRecord, LogRing};
use crate::runtime::ops::{HandlerResponse, HostCaps};
use crate::runtime::vm::{ExecOutcome, VmWorker};
use crate::types::ApiResponse;

/// Path of the serverless handler inside an app's VFS.
pub const HANDLER_PATH: &str = "api/main.js";

/// Warm VMs kept per app.
const PER_APP_POOL: usize = 4;
/// Workers idle beyond this are evicted (oldest first).
const IDLE_EVICT: Duration = Duration::from_secs(600);

struct AppPool {
	workers: Vec<Arc<VmWorker>>,
	/// modified_at of the loaded handler; a redeploy flushes the pool
	source_stamp: i64,
	next: usize,
}

pub struct RuntimePool {
	caps: HostCaps,
	meta: Arc<dyn MetaAdapter>,
	pools: Mutex<HashMap<AppId, AppPool>>,
	permits: Arc<tokio::sync::Semaphore>,
	heap_bytes: usize,
	pub handler_timeout: Duration,
	pub log_ring: LogRing,
	activity: Arc<crate::activity::ActivityLog>,
	max_body_bytes: usize,
}

impl std::fmt::Debug for RuntimePool {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RuntimePool").finish()
	}
}

impl RuntimePool {
	pub fn new(
		caps: HostCaps,
		meta: Arc<dyn MetaAdapter>,
		activity: Arc<crate::activity::ActivityLog>,
		limits: &crate::core::limits::Limits,
	) -> Arc<RuntimePool> {
		Arc::new(RuntimePool {
			caps,
			meta,
			pools: Mutex::new(HashMap::new()),
			permits: Arc::new(tokio::sync::Semaphore::new(limits.serverless_concurrency)),
			heap_bytes: 64 * 1024 * 1024,
			handler_timeout: Duration::from_millis(limits.handler_timeout_ms),
			log_ring: LogRing::new(),
			activity,
			max_body_bytes: limits.max_upload_bytes as usize,
		})
	}

	/// Whether the app declares a serverless handler.
	pub async fn has_handler(&self, app: &AppId) -> bool {
		self.meta.read_file(app, HANDLER_PATH).await.is_ok()
	}

	/// Drop the app's warm pool (handler redeploy, app delete).
	pub fn flush_app(&self, app: &AppId) {
		self.pools.lock().remove(app);
	}

	fn checkout_worker(&self, app: &AppId, source: &crate::meta_adapter::FileRecord) -> Arc<VmWorker> {
		let mut pools = self.pools.lock();
		let pool = pools.entry(app.clone()).or_insert(AppPool {
			workers: Vec::new(),
			source_stamp: source.modified_at.0,
			next: 0,
		});

		if pool.source_stamp != source.modified_at.0 {
			debug!("handler changed for {}, flushing vm pool", app);
			pool.workers.clear();
			pool.source_stamp = source.modified_at.0;
		}
		pool.workers.retain(|worker| worker.is_alive());
		// Oldest-idle eviction, always keeping one warm VM
		while pool.workers.len() > 1 {
			let oldest = pool
				.workers
				.iter()
				.enumerate()
				.max_by_key(|(_, worker)| worker.idle_for())
				.map(|(i, worker)| (i, worker.idle_for()));
			match oldest {
				Some((index, idle)) if idle > IDLE_EVICT => {
					pool.workers.remove(index);
				}
				_ => break,
			}
		}

		if pool.workers.len() < PER_APP_POOL {
			let source_text = String::from_utf8_lossy(&source.bytes).into_owned();
			let worker = VmWorker::spawn(self.caps.clone(), source_text, self.heap_bytes);
			pool.workers.push(worker.clone());
			return worker;
		}

		pool.next = (pool.next + 1) % pool.workers.len();
		pool.workers[pool.next].clone()
	}

	async fn execute(
		&self,
		app: &AppId,
		source: &crate::meta_adapter::FileRecord,
		request: Value,
		scope: Scope,
		user: Option<UserRecord>,
	) -> FzResult<ExecOutcome> {
		let _permit = self
			.permits
			.clone()
			.acquire_owned()
			.await
			.map_err(|_| Error::ServiceUnavailable("runtime shutting down".into()))?;

		let worker = self.checkout_worker(app, source);
		let result = worker.execute(request, scope, user, self.handler_timeout).await;
		if !worker.is_alive() {
			// Crashed or terminated: drop it from the pool now
			let mut pools = self.pools.lock();
			if let Some(pool) = pools.get_mut(app) {
				pool.workers.retain(|candidate| candidate.is_alive());
			}
		}
		result
	}
}

/// Build the request object handed to the handler: method, remainder path
/// after `/api`, query map, headers, parsed body.
fn build_request_value(
	method: &str,
	api_path: &str,
	query: Option<&str>,
	headers: &axum::http::HeaderMap,
	body: &[u8],
) -> Value {
	let query_map: HashMap<String, String> = query
		.map(|raw| {
			url::form_urlencoded::parse(raw.as_bytes())
				.map(|(name, value)| (name.into_owned(), value.into_owned()))
				.collect()
		})
		.unwrap_or_default();

	let header_map: HashMap<String, String> = headers
		.iter()
		.filter_map(|(name, value)| {
			value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string()))
		})
		.collect();

	let body_value = if body.is_empty() {
		Value::Null
	} else {
		serde_json::from_slice(body)
			.unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
	};

	json!({
		"method": method,
		"path": api_path,
		"query": query_map,
		"headers": header_map,
		"body": body_value,
	})
}

fn response_from_handler(response: HandlerResponse) -> FzResult<Response> {
	let (status, payload) = if response.raw {
		(StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK), response.body)
	} else {
		(StatusCode::OK, serde_json::to_value(ApiResponse::new(response.body))?)
	};

	if payload.is_null() && status == StatusCode::NO_CONTENT {
		return Ok(Response::builder().status(status).body(Body::empty())?);
	}
	Ok(Response::builder()
		.status(status)
		.header(header::CONTENT_TYPE, "application/json")
		.body(Body::from(serde_json::to_vec(&payload)?))?)
}

/// Entry point for `/api/*` requests on an app.
pub async fn handle_api_request(
	app: &crate::core::app::App,
	tenant: &AppRecord,
	auth: Option<&crate::core::extract::AuthCtx>,
	req: Request<Body>,
) -> FzResult<Response> {
	let source = match app.meta_adapter.read_file(&tenant.id, HANDLER_PATH).await {
		Ok(source) => source,
		Err(Error::NotFound) => return Err(Error::NotFound),
		Err(err) => return Err(err),
	};

	let started = Instant::now();
	let method = req.method().as_str().to_string();
	let full_path = req.uri().path().to_string();
	let api_path = full_path.strip_prefix("/api").unwrap_or(&full_path).to_string();
	let api_path = if api_path.is_empty() { "/".to_string() } else { api_path };
	let query = req.uri().query().map(str::to_string);
	let headers = req.headers().clone();

	let body = http_body_util::Limited::new(req.into_body(), app.runtime.max_body_bytes)
		.collect()
		.await
		.map_err(|_| Error::PayloadTooLarge)?
		.to_bytes();

	let request_value =
		build_request_value(&method, &api_path, query.as_deref(), &headers, &body);
	let scope = Scope {
		app_id: tenant.id.clone(),
		user_id: auth.map(|a| a.user.id),
	};
	let user = auth.map(|a| a.user.clone());

	let outcome = app
		.runtime
		.execute(&tenant.id, &source, request_value, scope, user)
		.await;
	let duration_ms = started.elapsed().as_millis() as u64;

	match outcome {
		Ok(ExecOutcome { response, storage_ops, error: None }) => {
			// A handler that returns without responding yields 204
			let response = response
				.unwrap_or(HandlerResponse { status: 204, body: Value::Null, raw: true });
			app.runtime.log_ring.push_execution(
				&tenant.id,
				ExecutionRecord {
					method: method.into(),
					path: full_path.into(),
					status: response.status,
					duration_ms,
					storage_ops,
					error: None,
					at: Timestamp::now(),
				},
			);
			response_from_handler(response)
		}
		Ok(ExecOutcome { error: Some(error), storage_ops, .. }) => {
			app.runtime.log_ring.push_error(
				&tenant.id,
				ErrorRecord {
					message: error.message.clone(),
					stack: error.stack.clone(),
					method: method.clone().into(),
					path: full_path.clone().into(),
					at: Timestamp::now(),
				},
			);
			app.runtime.log_ring.push_execution(
				&tenant.id,
				ExecutionRecord {
					method: method.into(),
					path: full_path.into(),
					status: 500,
					duration_ms,
					storage_ops,
					error: Some(error.message.clone()),
					at: Timestamp::now(),
				},
			);
			app.runtime.activity.record(ActivityEntry {
				weight: 5,
				actor: Actor::System,
				actor_id: None,
				resource: format!("app:{}", tenant.id).into(),
				action: "serverless.error".into(),
				result: "error".into(),
				details: Some(json!({ "message": error.message })),
				created_at: Timestamp::now(),
			});
			// Sanitized body; the full stack stays in the error ring
			Err(Error::Internal(error.message.to_string()))
		}
		Err(Error::Timeout) => {
			app.runtime.log_ring.push_execution(
				&tenant.id,
				ExecutionRecord {
					method: method.into(),
					path: full_path.clone().into(),
					status: 504,
					duration_ms,
					storage_ops: 0,
					error: Some("handler timed out".into()),
					at: Timestamp::now(),
				},
			);
			app.runtime.activity.record(ActivityEntry {
				weight: 5,
				actor: Actor::System,
				actor_id: None,
				resource: format!("app:{}", tenant.id).into(),
				action: "serverless.timeout".into(),
				result: "error".into(),
				details: Some(json!({ "path": api_path })),
				created_at: Timestamp::now(),
			});
			Err(Error::Timeout)
		}
		Err(err) => Err(err),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::http::HeaderMap;

	#[test]
	fn request_value_shape() {
		let mut headers = HeaderMap::new();
		headers.insert("x-custom", "1".parse().unwrap());
		let value = build_request_value(
			"POST",
			"/echo",
			Some("a=1&b=two"),
			&headers,
			br#"{"n":1}"#,
		);
		assert_eq!(value["method"], "POST");
		assert_eq!(value["path"], "/echo");
		assert_eq!(value["query"]["a"], "1");
		assert_eq!(value["query"]["b"], "two");
		assert_eq!(value["headers"]["x-custom"], "1");
		assert_eq!(value["body"]["n"], 1);
	}

	#[test]
	fn non_json_body_becomes_string() {
		let value = build_request_value("POST", "/", None, &HeaderMap::new(), b"plain text");
		assert_eq!(value["body"], "plain text");
		let value = build_request_value("GET", "/", None, &HeaderMap::new(), b"");
		assert!(value["body"].is_null());
	}

	#[test]
	fn data_envelope_for_plain_respond() {
		let response = response_from_handler(HandlerResponse {
			status: 200,
			body: json!({"echoed": 2}),
			raw: false,
		})
		.unwrap();
		assert_eq!(response.status(), StatusCode::OK);
	}

	#[test]
	fn raw_respond_sets_status() {
		let response = response_from_handler(HandlerResponse {
			status: 418,
			body: json!({"teapot": true}),
			raw: true,
		})
		.unwrap();
		assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
	}
}

// vim: ts=4
