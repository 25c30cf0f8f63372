//! Admin analytics event listing.

use axum::{
	extract::{Query, State},
	Json,
};

use crate::core::app::App;
use crate::meta_adapter::{EventRecord, ListEventsOptions};
use crate::prelude::*;
use crate::types::ApiResponse;

/// # GET /api/events (filters: domain, type, since, limit)
pub async fn list_events(
	State(app): State<App>,
	Query(opts): Query<ListEventsOptions>,
) -> FzResult<Json<ApiResponse<Vec<EventRecord>>>> {
	Ok(Json(ApiResponse::new(app.meta_adapter.list_events(&opts).await?)))
}

// vim: ts=4
