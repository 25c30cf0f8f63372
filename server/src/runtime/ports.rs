//! `/_fazt/*` developer/agent introspection ports: execution logs, error
//! ring, storage dump, snapshot and restore. Gated by an owner session or
//! the app-scoped token.

use axum::{
	extract::{Path, State},
	http::HeaderMap,
	Json,
};
use serde_json::{json, Value};

use crate::core::app::App;
use crate::core::extract::{OptionalAuth, TenantCtx};
use crate::data_adapter::Scope;
use crate::meta_adapter::{ActivityEntry, Actor};
use crate::prelude::*;
use crate::types::ApiResponse;

/// Owner session, or `Authorization: Bearer` matching the app's token
/// (config key `app_token.<app_id>`).
pub async fn authorize_app_access(
	app: &App,
	tenant: &AppId,
	auth: Option<&crate::core::extract::AuthCtx>,
	headers: &HeaderMap,
) -> FzResult<()> {
	if auth.map(|a| a.is_owner()).unwrap_or(false) {
		return Ok(());
	}
	if let Some(bearer) = headers
		.get(axum::http::header::AUTHORIZATION)
		.and_then(|v| v.to_str().ok())
		.and_then(|v| v.strip_prefix("Bearer "))
	{
		let key = format!("app_token.{}", tenant);
		if let Some(expected) = app.config.get(&key).await? {
			if expected.as_ref() == bearer.trim() {
				return Ok(());
			}
		}
	}
	Err(Error::NotFound)
}

/// # GET /_fazt/logs
pub async fn get_logs(
	State(app): State<App>,
	TenantCtx(tenant): TenantCtx,
	OptionalAuth(auth): OptionalAuth,
	headers: HeaderMap,
) -> FzResult<Json<ApiResponse<Value>>> {
	authorize_app_access(&app, &tenant.id, auth.as_ref(), &headers).await?;
	let executions = app.runtime.log_ring.executions(&tenant.id);
	Ok(Json(ApiResponse::new(serde_json::to_value(&executions)?)))
}

/// # GET /_fazt/errors
pub async fn get_errors(
	State(app): State<App>,
	TenantCtx(tenant): TenantCtx,
	OptionalAuth(auth): OptionalAuth,
	headers: HeaderMap,
) -> FzResult<Json<ApiResponse<Value>>> {
	authorize_app_access(&app, &tenant.id, auth.as_ref(), &headers).await?;
	let errors = app.runtime.log_ring.errors(&tenant.id);
	Ok(Json(ApiResponse::new(serde_json::to_value(&errors)?)))
}

/// # GET /_fazt/storage
pub async fn get_storage(
	State(app): State<App>,
	TenantCtx(tenant): TenantCtx,
	OptionalAuth(auth): OptionalAuth,
	headers: HeaderMap,
) -> FzResult<Json<ApiResponse<Value>>> {
	authorize_app_access(&app, &tenant.id, auth.as_ref(), &headers).await?;
	let dump = app.data_adapter.storage_dump(&tenant.id).await?;
	Ok(Json(ApiResponse::new(dump)))
}

/// # GET /_fazt/storage/{key}
pub async fn get_storage_key(
	State(app): State<App>,
	TenantCtx(tenant): TenantCtx,
	OptionalAuth(auth): OptionalAuth,
	headers: HeaderMap,
	Path(key): Path<String>,
) -> FzResult<Json<ApiResponse<Value>>> {
	authorize_app_access(&app, &tenant.id, auth.as_ref(), &headers).await?;
	let value = app
		.data_adapter
		.kv_get(&Scope::shared(tenant.id.clone()), &key)
		.await?
		.ok_or(Error::NotFound)?;
	Ok(Json(ApiResponse::new(json!({ "key": key, "value": value }))))
}

/// # POST /_fazt/snapshot/{name}
pub async fn post_snapshot(
	State(app): State<App>,
	TenantCtx(tenant): TenantCtx,
	OptionalAuth(auth): OptionalAuth,
	headers: HeaderMap,
	Path(name): Path<String>,
) -> FzResult<Json<ApiResponse<Value>>> {
	authorize_app_access(&app, &tenant.id, auth.as_ref(), &headers).await?;
	if name.is_empty() || name.len() > 64 {
		return Err(Error::Validation("snapshot name length out of range".into()));
	}
	let info = app.data_adapter.snapshot_create(&tenant.id, &name).await?;
	app.activity.record(ActivityEntry {
		weight: 4,
		actor: actor_of(auth.as_ref()),
		actor_id: None,
		resource: format!("app:{}", tenant.id).into(),
		action: "snapshot.create".into(),
		result: "ok".into(),
		details: Some(json!({ "name": name })),
		created_at: Timestamp::now(),
	});
	Ok(Json(ApiResponse::new(serde_json::to_value(&info)?)))
}

/// # POST /_fazt/restore/{name}
pub async fn post_restore(
	State(app): State<App>,
	TenantCtx(tenant): TenantCtx,
	OptionalAuth(auth): OptionalAuth,
	headers: HeaderMap,
	Path(name): Path<String>,
) -> FzResult<Json<ApiResponse<Value>>> {
	authorize_app_access(&app, &tenant.id, auth.as_ref(), &headers).await?;
	app.data_adapter.snapshot_restore(&tenant.id, &name).await?;
	app.activity.record(ActivityEntry {
		weight: 5,
		actor: actor_of(auth.as_ref()),
		actor_id: None,
		resource: format!("app:{}", tenant.id).into(),
		action: "snapshot.restore".into(),
		result: "ok".into(),
		details: Some(json!({ "name": name })),
		created_at: Timestamp::now(),
	});
	Ok(Json(ApiResponse::new(json!({ "restored": name }))))
}

fn actor_of(auth: Option<&crate::core::extract::AuthCtx>) -> Actor {
	match auth {
		Some(_) => Actor::User,
		None => Actor::ApiKey,
	}
}

// vim: ts=4
