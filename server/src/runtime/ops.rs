//! The fixed capability table bound into every VM.
//!
//! Exactly the operations of the `fazt` global are exposed; nothing else
//! crosses the host boundary. Each op reads its `(app_id, user_id,
//! deadline, quotas)` from per-job state, so a handler cannot widen its
//! own scope. Fallible ops return `{"ok": ...}` / `{"error": {code,
//! message}}` envelopes; the bootstrap script rethrows error envelopes as
//! catchable `FaztError`s.

use deno_core::{op2, OpState};
use serde_json::{json, Value};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use crate::auth_adapter::UserRecord;
use crate::data_adapter::{DataAdapter, Scope};
use crate::net::fetch::{FetchRequest, NetFetch};
use crate::net::image::{self, Fit, ImageFormat, ResizeOpts};
use crate::prelude::*;
use crate::realtime::HubRegistry;
use crate::storage::query::DocQuery;

/// Outbound fetches allowed per execution.
const MAX_FETCHES_PER_EXEC: u32 = 20;

/// Host components reachable from ops. Component handles only, so the VM
/// layer carries no reference back to the full app state.
#[derive(Clone)]
pub struct HostCaps {
	pub data: Arc<dyn DataAdapter>,
	pub fetch: Arc<NetFetch>,
	pub hub: Arc<HubRegistry>,
	pub worker: Arc<crate::core::worker::WorkerPool>,
}

impl std::fmt::Debug for HostCaps {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("HostCaps").finish()
	}
}

/// Response captured by `respond(...)`. First call wins.
#[derive(Debug, Clone)]
pub struct HandlerResponse {
	pub status: u16,
	pub body: Value,
	/// True when the two-argument form set an explicit status: the body is
	/// then sent raw instead of wrapped in the data envelope.
	pub raw: bool,
}

/// Per-request op context, swapped in before each dispatch.
#[derive(Debug)]
pub struct JobCtx {
	pub scope: Scope,
	pub user: Option<UserRecord>,
	pub deadline_at: Instant,
	pub response: Option<HandlerResponse>,
	pub storage_ops: u32,
	pub fetch_count: u32,
}

impl JobCtx {
	pub fn new(scope: Scope, user: Option<UserRecord>, deadline_at: Instant) -> JobCtx {
		JobCtx { scope, user, deadline_at, response: None, storage_ops: 0, fetch_count: 0 }
	}
}

fn ok(value: Value) -> Value {
	json!({ "ok": value })
}

fn err_envelope(err: &Error) -> Value {
	json!({ "error": { "code": err.code(), "message": err.to_string() } })
}

fn result_envelope(result: FzResult<Value>) -> Value {
	match result {
		Ok(value) => ok(value),
		Err(err) => err_envelope(&err),
	}
}

fn take_caps_and_scope(state: &Rc<RefCell<OpState>>) -> (HostCaps, Scope) {
	let state = state.borrow();
	let caps = state.borrow::<HostCaps>().clone();
	let scope = state.borrow::<JobCtx>().scope.clone();
	(caps, scope)
}

fn count_storage_op(state: &Rc<RefCell<OpState>>) {
	state.borrow_mut().borrow_mut::<JobCtx>().storage_ops += 1;
}

// Response //
//**********//

#[op2]
#[serde]
pub fn op_respond(
	state: &mut OpState,
	#[serde] first: serde_json::Value,
	#[serde] second: Option<serde_json::Value>,
) -> serde_json::Value {
	let ctx = state.borrow_mut::<JobCtx>();
	if ctx.response.is_some() {
		return json!({ "ok": false });
	}
	let response = match (&first, second) {
		(Value::Number(status), Some(body)) => {
			let status = status.as_u64().unwrap_or(200).clamp(100, 599) as u16;
			HandlerResponse { status, body, raw: true }
		}
		(Value::Number(status), None) => {
			let status = status.as_u64().unwrap_or(204).clamp(100, 599) as u16;
			HandlerResponse { status, body: Value::Null, raw: true }
		}
		_ => HandlerResponse { status: 200, body: first, raw: false },
	};
	ctx.response = Some(response);
	json!({ "ok": true })
}

#[op2(fast)]
pub fn op_log(state: &mut OpState, #[string] level: String, #[string] message: String) {
	let app_id = &state.borrow::<JobCtx>().scope.app_id;
	match level.as_str() {
		"error" => warn!("[{}] {}", app_id, message),
		"warn" => warn!("[{}] {}", app_id, message),
		_ => info!("[{}] {}", app_id, message),
	}
}

// Key-value //
//***********//

#[op2(async)]
#[serde]
pub async fn op_kv_get(state: Rc<RefCell<OpState>>, #[string] key: String) -> serde_json::Value {
	count_storage_op(&state);
	let (caps, scope) = take_caps_and_scope(&state);
	result_envelope(
		caps.data
			.kv_get(&scope, &key)
			.await
			.map(|value| value.unwrap_or(Value::Null)),
	)
}

#[op2(async)]
#[serde]
pub async fn op_kv_set(
	state: Rc<RefCell<OpState>>,
	#[string] key: String,
	#[serde] value: serde_json::Value,
	#[serde] ttl_secs: Option<f64>,
) -> serde_json::Value {
	count_storage_op(&state);
	let (caps, scope) = take_caps_and_scope(&state);
	let ttl = ttl_secs.map(|t| t as i64).filter(|t| *t > 0);
	result_envelope(caps.data.kv_set(&scope, &key, &value, ttl).await.map(|()| json!(true)))
}

#[op2(async)]
#[serde]
pub async fn op_kv_del(state: Rc<RefCell<OpState>>, #[string] key: String) -> serde_json::Value {
	count_storage_op(&state);
	let (caps, scope) = take_caps_and_scope(&state);
	result_envelope(caps.data.kv_del(&scope, &key).await.map(|deleted| json!(deleted)))
}

#[op2(async)]
#[serde]
pub async fn op_kv_keys(state: Rc<RefCell<OpState>>, #[serde] prefix: Option<String>) -> serde_json::Value {
	count_storage_op(&state);
	let (caps, scope) = take_caps_and_scope(&state);
	result_envelope(
		caps.data
			.kv_keys(&scope, prefix.as_deref())
			.await
			.map(|keys| json!(keys)),
	)
}

// Documents //
//***********//

#[op2(async)]
#[serde]
pub async fn op_ds_insert(
	state: Rc<RefCell<OpState>>,
	#[string] collection: String,
	#[serde] body: serde_json::Value,
) -> serde_json::Value {
	count_storage_op(&state);
	let (caps, scope) = take_caps_and_scope(&state);
	result_envelope(
		caps.data
			.doc_insert(&scope, &collection, body)
			.await
			.and_then(|doc| serde_json::to_value(&doc).map_err(Error::from)),
	)
}

#[op2(async)]
#[serde]
pub async fn op_ds_get(
	state: Rc<RefCell<OpState>>,
	#[string] collection: String,
	#[string] doc_id: String,
) -> serde_json::Value {
	count_storage_op(&state);
	let (caps, scope) = take_caps_and_scope(&state);
	result_envelope(
		caps.data
			.doc_get(&scope, &collection, &doc_id)
			.await
			.and_then(|doc| serde_json::to_value(&doc).map_err(Error::from)),
	)
}

#[op2(async)]
#[serde]
pub async fn op_ds_query(
	state: Rc<RefCell<OpState>>,
	#[string] collection: String,
	#[serde] query: serde_json::Value,
) -> serde_json::Value {
	count_storage_op(&state);
	let (caps, scope) = take_caps_and_scope(&state);
	let parsed = match DocQuery::from_json(&query) {
		Ok(parsed) => parsed,
		Err(err) => return err_envelope(&err),
	};
	result_envelope(
		caps.data
			.doc_query(&scope, &collection, &parsed)
			.await
			.and_then(|docs| serde_json::to_value(&docs).map_err(Error::from)),
	)
}

#[op2(async)]
#[serde]
pub async fn op_ds_update(
	state: Rc<RefCell<OpState>>,
	#[string] collection: String,
	#[string] doc_id: String,
	#[serde] body: serde_json::Value,
) -> serde_json::Value {
	count_storage_op(&state);
	let (caps, scope) = take_caps_and_scope(&state);
	result_envelope(
		caps.data
			.doc_update(&scope, &collection, &doc_id, body)
			.await
			.and_then(|doc| serde_json::to_value(&doc).map_err(Error::from)),
	)
}

#[op2(async)]
#[serde]
pub async fn op_ds_delete(
	state: Rc<RefCell<OpState>>,
	#[string] collection: String,
	#[string] doc_id: String,
) -> serde_json::Value {
	count_storage_op(&state);
	let (caps, scope) = take_caps_and_scope(&state);
	result_envelope(
		caps.data.doc_delete(&scope, &collection, &doc_id).await.map(|deleted| json!(deleted)),
	)
}

// Blobs //
//*******//

#[op2(async)]
#[serde]
pub async fn op_s3_put(
	state: Rc<RefCell<OpState>>,
	#[string] key: String,
	#[string] data_b64: String,
	#[string] mime: String,
) -> serde_json::Value {
	count_storage_op(&state);
	let (caps, scope) = take_caps_and_scope(&state);
	let bytes = match crate::core::utils::b64_decode(&data_b64) {
		Ok(bytes) => bytes,
		Err(err) => return err_envelope(&err),
	};
	result_envelope(
		caps.data
			.blob_put(&scope, &key, bytes.into(), &mime)
			.await
			.map(|()| json!(true)),
	)
}

#[op2(async)]
#[serde]
pub async fn op_s3_get(state: Rc<RefCell<OpState>>, #[string] key: String) -> serde_json::Value {
	count_storage_op(&state);
	let (caps, scope) = take_caps_and_scope(&state);
	result_envelope(caps.data.blob_get(&scope, &key).await.map(|blob| {
		json!({
			"dataB64": crate::core::utils::b64_encode(&blob.bytes),
			"mime": blob.mime,
			"size": blob.size,
		})
	}))
}

#[op2(async)]
#[serde]
pub async fn op_s3_del(state: Rc<RefCell<OpState>>, #[string] key: String) -> serde_json::Value {
	count_storage_op(&state);
	let (caps, scope) = take_caps_and_scope(&state);
	result_envelope(caps.data.blob_delete(&scope, &key).await.map(|deleted| json!(deleted)))
}

#[op2(async)]
#[serde]
pub async fn op_s3_list(state: Rc<RefCell<OpState>>) -> serde_json::Value {
	count_storage_op(&state);
	let (caps, scope) = take_caps_and_scope(&state);
	result_envelope(
		caps.data
			.blob_list(&scope)
			.await
			.and_then(|blobs| serde_json::to_value(&blobs).map_err(Error::from)),
	)
}

// Outbound fetch //
//****************//

#[op2(async)]
#[serde]
pub async fn op_net_fetch(state: Rc<RefCell<OpState>>, #[serde] request: serde_json::Value) -> serde_json::Value {
	let (caps, scope, remaining) = {
		let mut st = state.borrow_mut();
		let caps = st.borrow::<HostCaps>().clone();
		let ctx = st.borrow_mut::<JobCtx>();
		if ctx.fetch_count >= MAX_FETCHES_PER_EXEC {
			return err_envelope(&Error::CapabilityDenied("fetch count exceeded".into()));
		}
		ctx.fetch_count += 1;
		let remaining = ctx.deadline_at.saturating_duration_since(Instant::now());
		(caps, ctx.scope.clone(), remaining)
	};
	if remaining.is_zero() {
		return err_envelope(&Error::Timeout);
	}

	let Some(url) = request.get("url").and_then(Value::as_str) else {
		return err_envelope(&Error::Validation("fetch requires a url".into()));
	};
	let method = request
		.get("method")
		.and_then(Value::as_str)
		.unwrap_or("GET")
		.to_ascii_uppercase();
	let headers = request
		.get("headers")
		.and_then(Value::as_object)
		.map(|map| {
			map.iter()
				.filter_map(|(name, value)| {
					value.as_str().map(|v| (name.clone(), v.to_string()))
				})
				.collect()
		})
		.unwrap_or_default();
	let body = match request.get("body") {
		None | Some(Value::Null) => None,
		Some(Value::String(s)) => Some(bytes::Bytes::from(s.clone())),
		Some(other) => Some(bytes::Bytes::from(other.to_string())),
	};

	let fetch_request =
		FetchRequest { url: url.to_string(), method, headers, body };
	result_envelope(
		caps.fetch
			.fetch(&scope.app_id, fetch_request, Some(remaining))
			.await
			.map(|response| {
				let body_text = String::from_utf8_lossy(&response.body).to_string();
				json!({
					"status": response.status,
					"headers": response.headers.iter().cloned().collect::<std::collections::HashMap<_, _>>(),
					"body": body_text,
					"bodyB64": crate::core::utils::b64_encode(&response.body),
				})
			}),
	)
}

// Image //
//*******//

fn parse_resize_opts(opts: &Value) -> FzResult<ResizeOpts> {
	let fit = match opts.get("fit").and_then(Value::as_str) {
		None | Some("contain") => Fit::Contain,
		Some("cover") => Fit::Cover,
		Some("fill") => Fit::Fill,
		Some(other) => return Err(Error::Validation(format!("unknown fit: {}", other))),
	};
	let format = match opts.get("format").and_then(Value::as_str) {
		None => None,
		Some(raw) => Some(raw.parse::<ImageFormat>()?),
	};
	Ok(ResizeOpts {
		width: opts.get("width").and_then(Value::as_u64).map(|w| w as u32),
		height: opts.get("height").and_then(Value::as_u64).map(|h| h as u32),
		fit,
		format,
		quality: opts.get("quality").and_then(Value::as_u64).map_or(85, |q| q.clamp(1, 100) as u8),
	})
}

#[op2(async)]
#[serde]
pub async fn op_image_resize(
	state: Rc<RefCell<OpState>>,
	#[string] data_b64: String,
	#[serde] opts: serde_json::Value,
) -> serde_json::Value {
	let (caps, _scope) = take_caps_and_scope(&state);
	let buf = match crate::core::utils::b64_decode(&data_b64) {
		Ok(buf) => buf,
		Err(err) => return err_envelope(&err),
	};
	let opts = match parse_resize_opts(&opts) {
		Ok(opts) => opts,
		Err(err) => return err_envelope(&err),
	};
	result_envelope(image::resize(&caps.worker, buf, opts).await.map(|result| {
		json!({
			"dataB64": crate::core::utils::b64_encode(&result.bytes),
			"width": result.width,
			"height": result.height,
			"mime": result.mime,
		})
	}))
}

#[op2(async)]
#[serde]
pub async fn op_image_thumbnail(
	state: Rc<RefCell<OpState>>,
	#[string] data_b64: String,
	size: u32,
) -> serde_json::Value {
	let (caps, _scope) = take_caps_and_scope(&state);
	let buf = match crate::core::utils::b64_decode(&data_b64) {
		Ok(buf) => buf,
		Err(err) => return err_envelope(&err),
	};
	result_envelope(image::thumbnail(&caps.worker, buf, size.max(1)).await.map(|result| {
		json!({
			"dataB64": crate::core::utils::b64_encode(&result.bytes),
			"width": result.width,
			"height": result.height,
			"mime": result.mime,
		})
	}))
}

// Auth //
//******//

#[op2]
#[serde]
pub fn op_auth_get_user(state: &mut OpState) -> serde_json::Value {
	let ctx = state.borrow::<JobCtx>();
	match &ctx.user {
		Some(user) => serde_json::to_value(user).unwrap_or(Value::Null),
		None => Value::Null,
	}
}

// Realtime //
//**********//

#[op2]
#[serde]
pub fn op_rt_broadcast(
	state: &mut OpState,
	#[string] channel: String,
	#[serde] data: serde_json::Value,
) -> serde_json::Value {
	let caps = state.borrow::<HostCaps>().clone();
	let app_id = state.borrow::<JobCtx>().scope.app_id.clone();
	let delivered = caps.hub.hub(&app_id).broadcast(&channel, data);
	ok(json!(delivered))
}

#[op2]
#[serde]
pub fn op_rt_broadcast_all(state: &mut OpState, #[serde] data: serde_json::Value) -> serde_json::Value {
	let caps = state.borrow::<HostCaps>().clone();
	let app_id = state.borrow::<JobCtx>().scope.app_id.clone();
	let delivered = caps.hub.hub(&app_id).broadcast_all(data);
	ok(json!(delivered))
}

#[op2]
#[serde]
pub fn op_rt_subscribers(state: &mut OpState, #[string] channel: String) -> serde_json::Value {
	let caps = state.borrow::<HostCaps>().clone();
	let app_id = state.borrow::<JobCtx>().scope.app_id.clone();
	let members: Vec<Value> = caps
		.hub
		.hub(&app_id)
		.members(&channel)
		.iter()
		.map(|m| json!({ "clientId": m.client_id, "userId": m.user_id, "name": m.name }))
		.collect();
	ok(Value::Array(members))
}

#[op2]
#[serde]
pub fn op_rt_count(state: &mut OpState, #[string] channel: String) -> serde_json::Value {
	let caps = state.borrow::<HostCaps>().clone();
	let app_id = state.borrow::<JobCtx>().scope.app_id.clone();
	ok(json!(caps.hub.hub(&app_id).subscriber_count(&channel)))
}

#[op2]
#[serde]
pub fn op_rt_kick(state: &mut OpState, #[string] client_id: String) -> serde_json::Value {
	let caps = state.borrow::<HostCaps>().clone();
	let app_id = state.borrow::<JobCtx>().scope.app_id.clone();
	ok(json!(caps.hub.hub(&app_id).kick(&client_id)))
}

deno_core::extension!(
	fazt_runtime,
	ops = [
		op_respond,
		op_log,
		op_kv_get,
		op_kv_set,
		op_kv_del,
		op_kv_keys,
		op_ds_insert,
		op_ds_get,
		op_ds_query,
		op_ds_update,
		op_ds_delete,
		op_s3_put,
		op_s3_get,
		op_s3_del,
		op_s3_list,
		op_net_fetch,
		op_image_resize,
		op_image_thumbnail,
		op_auth_get_user,
		op_rt_broadcast,
		op_rt_broadcast_all,
		op_rt_subscribers,
		op_rt_count,
		op_rt_kick,
	],
	options = { caps: HostCaps },
	state = |state, options| {
		state.put(options.caps);
	},
);

// vim: ts=4
