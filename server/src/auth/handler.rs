//! `/auth/*` endpoints: login, OAuth callback, session introspection and
//! logout. Available on every host; the cookie they set always belongs to
//! the root domain.

use axum::{
	extract::{ConnectInfo, Path, Query, State},
	http::{header, StatusCode},
	response::{IntoResponse, Response},
	Json,
};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;

use crate::auth::oauth::{validate_redirect, Provider};
use crate::auth::session::{clear_cookie, session_cookie, SESSION_TTL_SECS};
use crate::core::app::App;
use crate::core::extract::OptionalAuth;
use crate::core::utils::random_session_token;
use crate::meta_adapter::{ActivityEntry, Actor};
use crate::prelude::*;
use crate::types::ApiResponse;

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
	pub redirect: Option<String>,
}

/// # GET /auth/login/{provider}
pub async fn get_login(
	State(app): State<App>,
	ConnectInfo(addr): ConnectInfo<SocketAddr>,
	Path(provider): Path<String>,
	Query(query): Query<LoginQuery>,
) -> FzResult<Response> {
	app.login_limiter.check(addr.ip())?;
	let provider = Provider::parse(&provider)
		.ok_or_else(|| Error::Validation(format!("unknown provider: {}", provider)))?;

	if let Some(redirect) = &query.redirect {
		validate_redirect(redirect, app.router.base_domain())?;
	}

	let authorize_url = app
		.oauth
		.begin(provider, app.router.base_domain(), app.opts.https, query.redirect.as_deref())
		.await?;

	Ok(Response::builder()
		.status(StatusCode::FOUND)
		.header(header::LOCATION, authorize_url)
		.body(axum::body::Body::empty())?)
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
	pub code: Option<String>,
	pub state: Option<String>,
	pub error: Option<String>,
}

/// # GET /auth/callback/{provider}
pub async fn get_callback(
	State(app): State<App>,
	ConnectInfo(addr): ConnectInfo<SocketAddr>,
	Path(provider): Path<String>,
	Query(query): Query<CallbackQuery>,
) -> FzResult<Response> {
	app.login_limiter.check(addr.ip())?;
	let provider = Provider::parse(&provider)
		.ok_or_else(|| Error::Validation(format!("unknown provider: {}", provider)))?;

	if let Some(error) = &query.error {
		warn!("oauth provider error: {}", error);
		app.login_limiter.record_failure(addr.ip());
		return Err(Error::InvalidCredentials);
	}
	let (Some(code), Some(state)) = (&query.code, &query.state) else {
		app.login_limiter.record_failure(addr.ip());
		return Err(Error::InvalidCredentials);
	};

	let redirect = match app.oauth.take_state(provider, state) {
		Ok(redirect) => redirect,
		Err(err) => {
			app.login_limiter.record_failure(addr.ip());
			return Err(err);
		}
	};

	let profile = match app
		.oauth
		.exchange(provider, app.router.base_domain(), app.opts.https, code)
		.await
	{
		Ok(profile) => profile,
		Err(err) => {
			app.login_limiter.record_failure(addr.ip());
			return Err(err);
		}
	};

	let user = app.auth_adapter.upsert_oauth_user(&profile).await?;
	let token = random_session_token();
	app.auth_adapter.create_session(user.id, &token, SESSION_TTL_SECS).await?;
	app.login_limiter.record_success(addr.ip());

	app.activity.record(ActivityEntry {
		weight: 4,
		actor: Actor::User,
		actor_id: Some(user.id.to_string().into()),
		resource: "auth".into(),
		action: "login".into(),
		result: "ok".into(),
		details: Some(json!({ "provider": provider.name() })),
		created_at: Timestamp::now(),
	});

	let location = match redirect {
		Some(redirect) => redirect.to_string(),
		None => {
			let scheme = if app.opts.https { "https" } else { "http" };
			format!("{}://{}/", scheme, app.router.base_domain())
		}
	};

	Ok(Response::builder()
		.status(StatusCode::FOUND)
		.header(header::SET_COOKIE, session_cookie(&app, &token))
		.header(header::LOCATION, location)
		.body(axum::body::Body::empty())?)
}

/// # GET /auth/session
pub async fn get_session(
	OptionalAuth(auth): OptionalAuth,
) -> Json<ApiResponse<serde_json::Value>> {
	let user = auth.map(|a| serde_json::to_value(&a.user).unwrap_or(serde_json::Value::Null));
	Json(ApiResponse::new(json!({ "user": user })))
}

/// # POST /auth/logout
pub async fn post_logout(
	State(app): State<App>,
	OptionalAuth(auth): OptionalAuth,
) -> FzResult<Response> {
	if let Some(auth) = &auth {
		app.auth_adapter.delete_session(&auth.session.token).await?;
	}
	let mut response =
		Json(ApiResponse::new(json!({ "ok": true }))).into_response();
	response
		.headers_mut()
		.insert(header::SET_COOKIE, clear_cookie(&app).parse().map_err(|_| Error::Parse)?);
	Ok(response)
}

// vim: ts=4
