//! Admin stats: node overview and per-app storage/traffic counters.

use axum::{
	extract::{Path, State},
	Json,
};
use serde_json::json;

use crate::core::app::App;
use crate::meta_adapter::ListAppsOptions;
use crate::prelude::*;
use crate::types::ApiResponse;

/// # GET /api/stats/overview
pub async fn get_overview(
	State(app): State<App>,
) -> FzResult<Json<ApiResponse<serde_json::Value>>> {
	let apps = app
		.meta_adapter
		.list_apps(&ListAppsOptions { limit: Some(1000), ..Default::default() })
		.await?;
	let day_ago = Timestamp::from_now(-24 * 3600);
	let events_24h = app.meta_adapter.count_events_since(day_ago).await?;

	Ok(Json(ApiResponse::new(json!({
		"apps": apps.len(),
		"events24h": events_24h,
		"realtimeConnections": app.hub.total_connections(),
		"liveConnections": app.conn_gauge.live_total(),
	}))))
}

/// # GET /api/stats/apps/{id}
pub async fn get_app_stats(
	State(app): State<App>,
	Path(id): Path<String>,
) -> FzResult<Json<ApiResponse<serde_json::Value>>> {
	let id = AppId::parse(&id)
		.ok_or_else(|| Error::Validation(format!("malformed app id: {}", id)))?;
	let record = app.meta_adapter.read_app(&id).await?;
	let usage = app.data_adapter.data_usage(&id).await?;
	let executions = app.runtime.log_ring.executions(&id);

	Ok(Json(ApiResponse::new(json!({
		"app": record,
		"usage": usage,
		"recentExecutions": executions.len(),
		"realtimeConnections": app.hub.hub(&id).connections(),
	}))))
}

// vim: ts=4
