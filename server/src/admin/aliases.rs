//! Admin alias management: proxy/redirect/split/reserved mappings and the
//! atomic label swap.

use axum::{
	extract::{Path, State},
	Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::core::app::App;
use crate::core::router::is_reserved_label;
use crate::meta_adapter::{AliasKind, AliasRecord, SplitTarget};
use crate::prelude::*;
use crate::types::ApiResponse;

fn validate_subdomain(subdomain: &str) -> FzResult<()> {
	if is_reserved_label(subdomain) {
		return Err(Error::Validation(format!("subdomain '{}' is reserved", subdomain)));
	}
	let ok = !subdomain.is_empty()
		&& subdomain.len() <= 63
		&& subdomain
			.chars()
			.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
	if !ok {
		return Err(Error::Validation(format!("invalid subdomain: {}", subdomain)));
	}
	Ok(())
}

/// # GET /api/aliases
pub async fn list_aliases(
	State(app): State<App>,
) -> FzResult<Json<ApiResponse<Vec<AliasRecord>>>> {
	Ok(Json(ApiResponse::new(app.meta_adapter.list_aliases().await?)))
}

/// # GET /api/aliases/{subdomain}
pub async fn get_alias(
	State(app): State<App>,
	Path(subdomain): Path<String>,
) -> FzResult<Json<ApiResponse<AliasRecord>>> {
	Ok(Json(ApiResponse::new(app.meta_adapter.read_alias(&subdomain).await?)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AliasRequest {
	pub subdomain: String,
	#[serde(rename = "type")]
	pub kind: AliasKind,
	pub target: Option<String>,
	#[serde(default)]
	pub permanent: bool,
	#[serde(default)]
	pub split_targets: Vec<SplitTarget>,
}

fn validate_alias(body: &AliasRequest) -> FzResult<()> {
	validate_subdomain(&body.subdomain)?;
	match body.kind {
		AliasKind::Proxy => {
			if body.target.is_none() {
				return Err(Error::Validation("proxy alias requires a target".into()));
			}
		}
		AliasKind::Redirect => {
			let Some(target) = &body.target else {
				return Err(Error::Validation("redirect alias requires a target URL".into()));
			};
			url::Url::parse(target)
				.map_err(|_| Error::Validation("redirect target is not a URL".into()))?;
		}
		AliasKind::Split => {
			if body.split_targets.is_empty() {
				return Err(Error::Validation("split alias requires targets".into()));
			}
			if body.split_targets.iter().map(|t| u64::from(t.weight)).sum::<u64>() == 0 {
				return Err(Error::Validation("split weights sum to zero".into()));
			}
		}
		AliasKind::Reserved => {}
	}
	Ok(())
}

/// # POST /api/aliases (create or replace)
pub async fn create_alias(
	State(app): State<App>,
	Json(body): Json<AliasRequest>,
) -> FzResult<Json<ApiResponse<AliasRecord>>> {
	validate_alias(&body)?;
	let record = AliasRecord {
		subdomain: body.subdomain.clone().into(),
		kind: body.kind,
		target: body.target.map(Into::into),
		permanent: body.permanent,
		split_targets: body.split_targets,
		created_at: Timestamp::now(),
	};
	app.meta_adapter.upsert_alias(&record).await?;
	app.router.invalidate(&record.subdomain);
	Ok(Json(ApiResponse::new(app.meta_adapter.read_alias(&body.subdomain).await?)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAliasRequest {
	#[serde(rename = "type")]
	pub kind: Option<AliasKind>,
	pub target: Option<String>,
	pub permanent: Option<bool>,
	pub split_targets: Option<Vec<SplitTarget>>,
}

/// # PATCH /api/aliases/{subdomain}
pub async fn update_alias(
	State(app): State<App>,
	Path(subdomain): Path<String>,
	Json(body): Json<UpdateAliasRequest>,
) -> FzResult<Json<ApiResponse<AliasRecord>>> {
	let mut record = app.meta_adapter.read_alias(&subdomain).await?;
	if let Some(kind) = body.kind {
		record.kind = kind;
	}
	if let Some(target) = body.target {
		record.target = Some(target.into());
	}
	if let Some(permanent) = body.permanent {
		record.permanent = permanent;
	}
	if let Some(split_targets) = body.split_targets {
		record.split_targets = split_targets;
	}
	app.meta_adapter.upsert_alias(&record).await?;
	app.router.invalidate(&subdomain);
	Ok(Json(ApiResponse::new(app.meta_adapter.read_alias(&subdomain).await?)))
}

/// # DELETE /api/aliases/{subdomain}
pub async fn delete_alias(
	State(app): State<App>,
	Path(subdomain): Path<String>,
) -> FzResult<Json<ApiResponse<serde_json::Value>>> {
	app.meta_adapter.delete_alias(&subdomain).await?;
	app.router.invalidate(&subdomain);
	Ok(Json(ApiResponse::new(json!({ "deleted": subdomain }))))
}

/// # POST /api/aliases/{subdomain}/reserve
pub async fn reserve_alias(
	State(app): State<App>,
	Path(subdomain): Path<String>,
) -> FzResult<Json<ApiResponse<AliasRecord>>> {
	validate_subdomain(&subdomain)?;
	let record = AliasRecord {
		subdomain: subdomain.clone().into(),
		kind: AliasKind::Reserved,
		target: None,
		permanent: false,
		split_targets: Vec::new(),
		created_at: Timestamp::now(),
	};
	app.meta_adapter.upsert_alias(&record).await?;
	app.router.invalidate(&subdomain);
	Ok(Json(ApiResponse::new(app.meta_adapter.read_alias(&subdomain).await?)))
}

#[derive(Debug, Deserialize)]
pub struct SwapRequest {
	pub a: String,
	pub b: String,
}

/// # POST /api/aliases/swap
///
/// Exchanges the labels of two apps in one write transaction; both old
/// labels are invalidated from the host cache right after commit.
pub async fn swap_labels(
	State(app): State<App>,
	Json(body): Json<SwapRequest>,
) -> FzResult<Json<ApiResponse<serde_json::Value>>> {
	let a = AppId::parse(&body.a)
		.ok_or_else(|| Error::Validation(format!("malformed app id: {}", body.a)))?;
	let b = AppId::parse(&body.b)
		.ok_or_else(|| Error::Validation(format!("malformed app id: {}", body.b)))?;

	let record_a = app.meta_adapter.read_app(&a).await?;
	let record_b = app.meta_adapter.read_app(&b).await?;

	app.meta_adapter.swap_labels(&a, &b).await?;

	for label in [&record_a.label, &record_b.label].into_iter().flatten() {
		app.router.invalidate(label);
	}
	app.router.invalidate(a.as_str());
	app.router.invalidate(b.as_str());

	Ok(Json(ApiResponse::new(json!({
		"a": { "id": a, "label": record_b.label },
		"b": { "id": b, "label": record_a.label },
	}))))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitRequest {
	pub split_targets: Vec<SplitTarget>,
}

/// # POST /api/aliases/{subdomain}/split
pub async fn set_split(
	State(app): State<App>,
	Path(subdomain): Path<String>,
	Json(body): Json<SplitRequest>,
) -> FzResult<Json<ApiResponse<AliasRecord>>> {
	validate_subdomain(&subdomain)?;
	if body.split_targets.iter().map(|t| u64::from(t.weight)).sum::<u64>() == 0 {
		return Err(Error::Validation("split weights sum to zero".into()));
	}
	let record = AliasRecord {
		subdomain: subdomain.clone().into(),
		kind: AliasKind::Split,
		target: None,
		permanent: false,
		split_targets: body.split_targets,
		created_at: Timestamp::now(),
	};
	app.meta_adapter.upsert_alias(&record).await?;
	app.router.invalidate(&subdomain);
	Ok(Json(ApiResponse::new(app.meta_adapter.read_alias(&subdomain).await?)))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn subdomain_validation() {
		assert!(validate_subdomain("shop").is_ok());
		assert!(validate_subdomain("admin").is_err());
		assert!(validate_subdomain("UPPER").is_err());
		assert!(validate_subdomain("").is_err());
	}

	#[test]
	fn alias_request_validation() {
		let mut request = AliasRequest {
			subdomain: "shop".to_string(),
			kind: AliasKind::Proxy,
			target: None,
			permanent: false,
			split_targets: Vec::new(),
		};
		assert!(validate_alias(&request).is_err()); // proxy without target

		request.target = Some("app_a1b2c3d4".to_string());
		assert!(validate_alias(&request).is_ok());

		request.kind = AliasKind::Redirect;
		request.target = Some("not a url".to_string());
		assert!(validate_alias(&request).is_err());

		request.target = Some("https://example.org/landing".to_string());
		assert!(validate_alias(&request).is_ok());

		request.kind = AliasKind::Split;
		request.split_targets = vec![];
		assert!(validate_alias(&request).is_err());
		request.split_targets =
			vec![SplitTarget { target: "app_a1b2c3d4".into(), weight: 0 }];
		assert!(validate_alias(&request).is_err());
		request.split_targets =
			vec![SplitTarget { target: "app_a1b2c3d4".into(), weight: 1 }];
		assert!(validate_alias(&request).is_ok());
	}
}

// vim: ts=4
