//! Admin app management: list, inspect, create, deploy files, fork,
//! delete.

use axum::{
	body::Bytes,
	extract::{Path, Query, State},
	http::HeaderMap,
	Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::core::app::App;
use crate::core::router::is_reserved_label;
use crate::core::utils::random_app_id;
use crate::meta_adapter::{
	AppRecord, AppSource, CreateAppOptions, FileInfo, ListAppsOptions, UpdateAppData,
};
use crate::prelude::*;
use crate::runtime::dispatcher::HANDLER_PATH;
use crate::types::{ApiResponse, Manifest};
use crate::vfs::mime;

fn parse_app_id(raw: &str) -> FzResult<AppId> {
	AppId::parse(raw).ok_or_else(|| Error::Validation(format!("malformed app id: {}", raw)))
}

fn validate_label(label: &str) -> FzResult<()> {
	if is_reserved_label(label) {
		return Err(Error::Validation(format!("label '{}' is reserved", label)));
	}
	let ok = !label.is_empty()
		&& label.len() <= 63
		&& label.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
		&& !label.starts_with('-')
		&& !label.ends_with('-');
	if !ok {
		return Err(Error::Validation(format!("invalid label: {}", label)));
	}
	Ok(())
}

/// # GET /api/apps
pub async fn list_apps(
	State(app): State<App>,
	Query(opts): Query<ListAppsOptions>,
) -> FzResult<Json<ApiResponse<Vec<AppRecord>>>> {
	let apps = app.meta_adapter.list_apps(&opts).await?;
	Ok(Json(ApiResponse::new(apps)))
}

/// # GET /api/apps/{id}
pub async fn get_app(
	State(app): State<App>,
	Path(id): Path<String>,
) -> FzResult<Json<ApiResponse<AppRecord>>> {
	let id = parse_app_id(&id)?;
	Ok(Json(ApiResponse::new(app.meta_adapter.read_app(&id).await?)))
}

#[derive(Debug, Deserialize)]
pub struct CreateAppRequest {
	pub label: Option<String>,
	pub source: Option<AppSource>,
	pub manifest: Option<Manifest>,
	pub source_url: Option<String>,
	pub source_ref: Option<String>,
	pub source_commit: Option<String>,
}

/// # POST /api/apps
pub async fn create_app(
	State(app): State<App>,
	Json(body): Json<CreateAppRequest>,
) -> FzResult<Json<ApiResponse<AppRecord>>> {
	if let Some(label) = &body.label {
		validate_label(label)?;
	}
	let id = random_app_id();
	let installed_at = matches!(body.source, Some(AppSource::Git)).then(Timestamp::now);
	let record = app
		.meta_adapter
		.create_app(
			&id,
			CreateAppOptions {
				label: body.label.as_deref().map(Box::from),
				source: body.source,
				manifest: body.manifest,
				source_url: body.source_url.as_deref().map(Box::from),
				source_ref: body.source_ref.as_deref().map(Box::from),
				source_commit: body.source_commit.as_deref().map(Box::from),
				installed_at,
				..Default::default()
			},
		)
		.await?;
	if let Some(label) = &record.label {
		app.router.invalidate(label);
	}
	Ok(Json(ApiResponse::new(record)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateAppRequest {
	#[serde(default)]
	pub label: Patch<String>,
	#[serde(default)]
	pub manifest: Patch<Manifest>,
}

/// # PATCH /api/apps/{id}
pub async fn update_app(
	State(app): State<App>,
	Path(id): Path<String>,
	Json(body): Json<UpdateAppRequest>,
) -> FzResult<Json<ApiResponse<AppRecord>>> {
	let id = parse_app_id(&id)?;
	if let Patch::Value(label) = &body.label {
		validate_label(label)?;
	}

	let before = app.meta_adapter.read_app(&id).await?;
	let record = app
		.meta_adapter
		.update_app(
			&id,
			&UpdateAppData {
				label: body.label.map(|l| Box::from(l.as_str())),
				manifest: body.manifest,
			},
		)
		.await?;

	if let Some(label) = &before.label {
		app.router.invalidate(label);
	}
	if let Some(label) = &record.label {
		app.router.invalidate(label);
	}
	app.router.invalidate(id.as_str());
	Ok(Json(ApiResponse::new(record)))
}

/// # DELETE /api/apps/{id}
pub async fn delete_app(
	State(app): State<App>,
	Path(id): Path<String>,
) -> FzResult<Json<ApiResponse<serde_json::Value>>> {
	let id = parse_app_id(&id)?;
	let record = app.meta_adapter.read_app(&id).await?;
	app.meta_adapter.delete_app(&id).await?;

	if let Some(label) = &record.label {
		app.router.invalidate(label);
	}
	app.router.invalidate(id.as_str());
	app.vfs_cache.invalidate_app(&id);
	app.runtime.flush_app(&id);
	app.runtime.log_ring.forget_app(&id);
	app.fetch.forget_app(&id);

	Ok(Json(ApiResponse::new(json!({ "deleted": id }))))
}

/// # GET /api/apps/{id}/files
pub async fn list_files(
	State(app): State<App>,
	Path(id): Path<String>,
) -> FzResult<Json<ApiResponse<Vec<FileInfo>>>> {
	let id = parse_app_id(&id)?;
	app.meta_adapter.read_app(&id).await?;
	Ok(Json(ApiResponse::new(app.meta_adapter.list_files(&id).await?)))
}

/// # PUT /api/apps/{id}/files/{path} (deploy one file)
pub async fn put_file(
	State(app): State<App>,
	Path((id, path)): Path<(String, String)>,
	headers: HeaderMap,
	body: Bytes,
) -> FzResult<Json<ApiResponse<serde_json::Value>>> {
	let id = parse_app_id(&id)?;
	app.meta_adapter.read_app(&id).await?;
	let path = crate::vfs::serve::normalize_path(&path)?;
	if body.len() as u64 > app.limits.max_upload_bytes {
		return Err(Error::PayloadTooLarge);
	}

	let mime = headers
		.get(axum::http::header::CONTENT_TYPE)
		.and_then(|v| v.to_str().ok())
		.filter(|ct| !ct.starts_with("application/octet-stream"))
		.map(str::to_string)
		.unwrap_or_else(|| mime::for_path(&path).to_string());

	let size = body.len();
	app.meta_adapter.write_file(&id, &path, body, &mime).await?;
	app.vfs_cache.invalidate(&id, &path);
	if path == HANDLER_PATH {
		app.runtime.flush_app(&id);
	}

	Ok(Json(ApiResponse::new(json!({ "path": path, "size": size, "mime": mime }))))
}

/// # DELETE /api/apps/{id}/files/{path}
pub async fn delete_file(
	State(app): State<App>,
	Path((id, path)): Path<(String, String)>,
) -> FzResult<Json<ApiResponse<serde_json::Value>>> {
	let id = parse_app_id(&id)?;
	let path = crate::vfs::serve::normalize_path(&path)?;
	app.meta_adapter.delete_file(&id, &path).await?;
	app.vfs_cache.invalidate(&id, &path);
	if path == HANDLER_PATH {
		app.runtime.flush_app(&id);
	}
	Ok(Json(ApiResponse::new(json!({ "deleted": path }))))
}

#[derive(Debug, Default, Deserialize)]
pub struct ForkRequest {
	pub label: Option<String>,
}

/// # POST /api/apps/{id}/fork
///
/// Copies files and shared data; lineage edges point at the immediate
/// parent and the root ancestor.
pub async fn fork_app(
	State(app): State<App>,
	Path(id): Path<String>,
	body: Option<Json<ForkRequest>>,
) -> FzResult<Json<ApiResponse<AppRecord>>> {
	let src_id = parse_app_id(&id)?;
	let src = app.meta_adapter.read_app(&src_id).await?;
	let label = body.and_then(|Json(b)| b.label);
	if let Some(label) = &label {
		validate_label(label)?;
	}

	let fork_id = random_app_id();
	let record = app
		.meta_adapter
		.create_app(
			&fork_id,
			CreateAppOptions {
				label: label.as_deref().map(Box::from),
				source: Some(AppSource::Fork),
				original_id: Some(src.original_id.clone().unwrap_or_else(|| src.id.clone())),
				forked_from_id: Some(src.id.clone()),
				manifest: Some(src.manifest.clone()),
				..Default::default()
			},
		)
		.await?;

	let copied = app.meta_adapter.copy_files(&src_id, &fork_id).await?;
	app.data_adapter.copy_shared_data(&src_id, &fork_id).await?;
	debug!("forked {} -> {} ({} files)", src_id, fork_id, copied);

	if let Some(label) = &record.label {
		app.router.invalidate(label);
	}
	Ok(Json(ApiResponse::new(record)))
}

// Outbound net allowlist
//************************

/// # GET /api/apps/{id}/net
pub async fn list_net_rules(
	State(app): State<App>,
	Path(id): Path<String>,
) -> FzResult<Json<ApiResponse<Vec<crate::meta_adapter::NetRule>>>> {
	let id = parse_app_id(&id)?;
	app.meta_adapter.read_app(&id).await?;
	Ok(Json(ApiResponse::new(app.meta_adapter.list_net_rules(&id).await?)))
}

/// # PUT /api/apps/{id}/net
pub async fn put_net_rule(
	State(app): State<App>,
	Path(id): Path<String>,
	Json(rule): Json<crate::meta_adapter::NetRule>,
) -> FzResult<Json<ApiResponse<serde_json::Value>>> {
	let id = parse_app_id(&id)?;
	app.meta_adapter.read_app(&id).await?;
	if rule.domain.is_empty() || rule.domain.contains('/') {
		return Err(Error::Validation(format!("invalid allowlist domain: {}", rule.domain)));
	}
	app.meta_adapter.upsert_net_rule(&id, &rule).await?;
	Ok(Json(ApiResponse::new(json!({ "domain": rule.domain }))))
}

/// # DELETE /api/apps/{id}/net/{domain}
pub async fn delete_net_rule(
	State(app): State<App>,
	Path((id, domain)): Path<(String, String)>,
) -> FzResult<Json<ApiResponse<serde_json::Value>>> {
	let id = parse_app_id(&id)?;
	app.meta_adapter.delete_net_rule(&id, &domain).await?;
	app.fetch.forget_app(&id);
	Ok(Json(ApiResponse::new(json!({ "deleted": domain }))))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn label_validation() {
		assert!(validate_label("blog").is_ok());
		assert!(validate_label("my-app-2").is_ok());
		assert!(validate_label("admin").is_err());
		assert!(validate_label("root").is_err());
		assert!(validate_label("404").is_err());
		assert!(validate_label("").is_err());
		assert!(validate_label("-bad").is_err());
		assert!(validate_label("Bad").is_err());
		assert!(validate_label("has.dot").is_err());
	}
}

// vim: ts=4
