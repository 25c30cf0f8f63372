//! Custom middlewares.

use axum::{
	body::Body,
	extract::State,
	http::{header, Request},
	middleware::Next,
	response::Response,
};

use crate::core::extract::AuthCtx;
use crate::meta_adapter::{ActivityEntry, Actor};
use crate::prelude::*;

/// Owner gate for the admin API: an owner session, or the node API key
/// (`api_key.token`) as a bearer token. Every admin call lands in the
/// activity log at weight 4 (mutations) with the response status.
pub async fn require_owner(
	State(app): State<App>,
	req: Request<Body>,
	next: Next,
) -> FzResult<Response> {
	let (actor, actor_id) = match req.extensions().get::<AuthCtx>() {
		Some(auth) if auth.is_owner() => {
			(Actor::User, Some(Box::from(auth.user.id.to_string().as_str())))
		}
		Some(_) => return Err(Error::Forbidden),
		None => {
			let bearer = req
				.headers()
				.get(header::AUTHORIZATION)
				.and_then(|v| v.to_str().ok())
				.and_then(|v| v.strip_prefix("Bearer "))
				.map(str::trim)
				.ok_or(Error::Unauthorized)?;
			let expected = app.config.get("api_key.token").await?.ok_or(Error::Unauthorized)?;
			if expected.as_ref() != bearer {
				return Err(Error::Unauthorized);
			}
			(Actor::ApiKey, None)
		}
	};

	let method = req.method().clone();
	let path = req.uri().path().to_string();
	let mutation = method != axum::http::Method::GET && method != axum::http::Method::HEAD;

	let response = next.run(req).await;

	app.activity.record(ActivityEntry {
		weight: if mutation { 5 } else { 4 },
		actor,
		actor_id,
		resource: "admin".into(),
		action: format!("{} {}", method, path).into(),
		result: response.status().as_u16().to_string().into(),
		details: None,
		created_at: Timestamp::now(),
	});

	Ok(response)
}

// vim: ts=4
