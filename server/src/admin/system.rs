//! Admin system surface: health, config, limits, caches, capacity.

use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::json;

use crate::core::app::{App, VERSION};
use crate::prelude::*;
use crate::types::ApiResponse;

/// # GET /api/system/health
///
/// Dropped analytics batches are surfaced here: the buffer is lossy by
/// design, and this is where that shows.
pub async fn get_health(State(app): State<App>) -> FzResult<Json<ApiResponse<serde_json::Value>>> {
	Ok(Json(ApiResponse::new(json!({
		"status": "ok",
		"version": VERSION,
		"uptimeSecs": app.started_at.elapsed().as_secs(),
		"analytics": {
			"buffered": app.analytics.buffered(),
			"flushedEvents": app.analytics.flushed_events(),
			"droppedBatches": app.analytics.dropped_batches(),
		},
		"activityDroppedWrites": app.activity.dropped(),
		"connections": {
			"live": app.conn_gauge.live_total(),
			"realtime": app.hub.total_connections(),
		},
	}))))
}

fn is_secret_key(key: &str) -> bool {
	key.contains("secret") || key.contains("token") || key.contains("password")
}

/// # GET /api/system/config (secrets masked)
pub async fn get_config(State(app): State<App>) -> FzResult<Json<ApiResponse<serde_json::Value>>> {
	let entries = app.config.list().await?;
	let masked: Vec<serde_json::Value> = entries
		.iter()
		.map(|(key, value)| {
			let value = if is_secret_key(key) { "••••••" } else { value.as_ref() };
			json!({ "key": key, "value": value })
		})
		.collect();
	Ok(Json(ApiResponse::new(json!(masked))))
}

#[derive(Debug, Deserialize)]
pub struct ConfigWrite {
	pub key: String,
	pub value: Option<String>,
}

/// # PUT /api/system/config
pub async fn put_config(
	State(app): State<App>,
	Json(body): Json<ConfigWrite>,
) -> FzResult<Json<ApiResponse<serde_json::Value>>> {
	if body.key.is_empty() || body.key.len() > 128 {
		return Err(Error::Validation("config key length out of range".into()));
	}
	app.config.set(&body.key, body.value.as_deref()).await?;
	Ok(Json(ApiResponse::new(json!({ "key": body.key }))))
}

/// # GET /api/system/limits
pub async fn get_limits(State(app): State<App>) -> Json<ApiResponse<serde_json::Value>> {
	Json(ApiResponse::new(json!({
		"limits": app.limits,
		"entries": app.limits.entries(),
	})))
}

/// # POST /api/system/cache/clear
pub async fn post_cache_clear(
	State(app): State<App>,
) -> FzResult<Json<ApiResponse<serde_json::Value>>> {
	let (entries, bytes) = app.vfs_cache.stats();
	app.vfs_cache.clear();
	app.router.invalidate_all();
	Ok(Json(ApiResponse::new(json!({ "clearedEntries": entries, "clearedBytes": bytes }))))
}

/// # GET /api/system/db
pub async fn get_db(State(app): State<App>) -> FzResult<Json<ApiResponse<serde_json::Value>>> {
	let apps = app
		.meta_adapter
		.list_apps(&crate::meta_adapter::ListAppsOptions {
			limit: Some(1000),
			..Default::default()
		})
		.await?;
	let events_total = app.meta_adapter.count_events_since(Timestamp(0)).await?;
	Ok(Json(ApiResponse::new(json!({
		"apps": apps.len(),
		"events": events_total,
	}))))
}

/// # GET /api/system/capacity
pub async fn get_capacity(State(app): State<App>) -> Json<ApiResponse<serde_json::Value>> {
	let (vfs_entries, vfs_bytes) = app.vfs_cache.stats();
	Json(ApiResponse::new(json!({
		"connections": {
			"live": app.conn_gauge.live_total(),
			"maxTotal": app.opts.admission.max_total,
			"maxPerIp": app.opts.admission.max_per_ip,
		},
		"realtime": {
			"connections": app.hub.total_connections(),
			"maxTotal": app.hub.limits.max_total,
			"maxPerApp": app.hub.limits.max_per_app,
		},
		"vfsCache": { "entries": vfs_entries, "bytes": vfs_bytes },
		"serverlessConcurrency": app.limits.serverless_concurrency,
	})))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn secret_masking() {
		assert!(is_secret_key("oauth.github.client_secret"));
		assert!(is_secret_key("api_key.token"));
		assert!(is_secret_key("auth.password"));
		assert!(!is_secret_key("server.domain"));
	}
}

// vim: ts=4
