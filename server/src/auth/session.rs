//! Session cookies and the middleware resolving them into request context.
//!
//! One cookie, scoped to the registered root domain so every subdomain
//! shares it; only the `/auth/*` endpoints on the root ever set it.
//! Sessions are opaque random tokens mapped server-side; renewal is
//! sliding (expiry pushed out once past half-life).

use axum::{
	body::Body,
	extract::State,
	http::{header, Request},
	middleware::Next,
	response::Response,
};
use cookie::{Cookie, SameSite};

use crate::core::app::App;
use crate::core::extract::AuthCtx;
use crate::prelude::*;

pub const SESSION_COOKIE: &str = "fazt_session";
/// 30 days
pub const SESSION_TTL_SECS: i64 = 30 * 24 * 3600;

/// Extract the session token from a Cookie header.
pub fn token_from_headers(headers: &axum::http::HeaderMap) -> Option<String> {
	let raw = headers.get(header::COOKIE)?.to_str().ok()?;
	for pair in Cookie::split_parse(raw.to_string()) {
		if let Ok(cookie) = pair {
			if cookie.name() == SESSION_COOKIE {
				return Some(cookie.value().to_string());
			}
		}
	}
	None
}

/// Build the Set-Cookie value establishing a session on the root domain.
pub fn session_cookie(app: &App, token: &str) -> String {
	let mut cookie = Cookie::new(SESSION_COOKIE, token.to_string());
	cookie.set_domain(app.router.base_domain().to_string());
	cookie.set_path("/");
	cookie.set_http_only(true);
	cookie.set_same_site(SameSite::Lax);
	cookie.set_secure(app.opts.https);
	cookie.set_max_age(cookie::time::Duration::seconds(SESSION_TTL_SECS));
	cookie.to_string()
}

/// Expired cookie clearing the session.
pub fn clear_cookie(app: &App) -> String {
	let mut cookie = Cookie::new(SESSION_COOKIE, "");
	cookie.set_domain(app.router.base_domain().to_string());
	cookie.set_path("/");
	cookie.set_http_only(true);
	cookie.set_same_site(SameSite::Lax);
	cookie.set_secure(app.opts.https);
	cookie.set_max_age(cookie::time::Duration::seconds(0));
	cookie.to_string()
}

/// Resolve the session cookie into an `AuthCtx` extension. Missing or
/// invalid sessions pass through without context; expiry is surfaced by
/// the handlers that demand auth.
pub async fn resolve_session(
	State(app): State<App>,
	mut req: Request<Body>,
	next: Next,
) -> Response {
	if let Some(token) = token_from_headers(req.headers()) {
		match app.auth_adapter.read_session(&token).await {
			Ok((session, user)) => {
				// Sliding renewal past half-life
				let remaining = session.expires_at.0 - Timestamp::now().0;
				if remaining < SESSION_TTL_SECS / 2 {
					let auth_adapter = app.auth_adapter.clone();
					let token = token.clone();
					tokio::spawn(async move {
						if let Err(err) =
							auth_adapter.renew_session(&token, SESSION_TTL_SECS).await
						{
							debug!("session renewal failed: {}", err);
						}
					});
				}
				req.extensions_mut().insert(AuthCtx { session, user });
			}
			Err(Error::SessionExpired) => {
				debug!("expired session cookie");
			}
			Err(Error::NotFound) => {}
			Err(err) => {
				warn!("session lookup failed: {}", err);
			}
		}
	}
	next.run(req).await
}

/// Periodic sweep deleting expired sessions.
pub fn start_session_cleanup(app: &App) {
	let auth_adapter = app.auth_adapter.clone();
	tokio::spawn(async move {
		let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
		interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		loop {
			interval.tick().await;
			match auth_adapter.purge_expired_sessions().await {
				Ok(0) => {}
				Ok(purged) => debug!("purged {} expired sessions", purged),
				Err(err) => warn!("session purge failed: {}", err),
			}
		}
	});
}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::http::{HeaderMap, HeaderValue};

	#[test]
	fn token_extraction() {
		let mut headers = HeaderMap::new();
		headers.insert(
			header::COOKIE,
			HeaderValue::from_static("theme=dark; fazt_session=tok123; lang=en"),
		);
		assert_eq!(token_from_headers(&headers).as_deref(), Some("tok123"));

		let mut headers = HeaderMap::new();
		headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark"));
		assert_eq!(token_from_headers(&headers), None);
	}
}

// vim: ts=4
