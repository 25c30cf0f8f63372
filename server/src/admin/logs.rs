//! Admin log views: per-app execution/error rings and the weighted
//! activity log (the audit view where private-path denials surface).

use axum::{
	extract::{Path, Query, State},
	Json,
};
use serde_json::json;

use crate::core::app::App;
use crate::meta_adapter::{ActivityEntry, ListActivityOptions};
use crate::prelude::*;
use crate::types::ApiResponse;

/// # GET /api/logs/{app_id}
pub async fn get_app_logs(
	State(app): State<App>,
	Path(id): Path<String>,
) -> FzResult<Json<ApiResponse<serde_json::Value>>> {
	let id = AppId::parse(&id)
		.ok_or_else(|| Error::Validation(format!("malformed app id: {}", id)))?;
	app.meta_adapter.read_app(&id).await?;
	Ok(Json(ApiResponse::new(json!({
		"executions": app.runtime.log_ring.executions(&id),
		"errors": app.runtime.log_ring.errors(&id),
	}))))
}

/// # GET /api/activity
pub async fn list_activity(
	State(app): State<App>,
	Query(opts): Query<ListActivityOptions>,
) -> FzResult<Json<ApiResponse<Vec<ActivityEntry>>>> {
	Ok(Json(ApiResponse::new(app.activity.list(&opts).await?)))
}

// vim: ts=4
