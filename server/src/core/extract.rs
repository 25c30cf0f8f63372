//! Custom extractors for request-scoped context.

use axum::{extract::FromRequestParts, http::request::Parts};
use std::sync::Arc;

use crate::auth_adapter::{SessionRecord, UserRecord};
use crate::meta_adapter::AppRecord;
use crate::prelude::*;

// TenantCtx //
//***********//
/// The app resolved from the Host header, injected by the webserver
/// dispatch before the per-app routers run.
#[derive(Clone, Debug)]
pub struct TenantCtx(pub Arc<AppRecord>);

impl<S> FromRequestParts<S> for TenantCtx
where
	S: Send + Sync,
{
	type Rejection = Error;

	async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
		parts.extensions.get::<TenantCtx>().cloned().ok_or(Error::NotFound)
	}
}

// Auth //
//******//
#[derive(Clone, Debug)]
pub struct AuthCtx {
	pub session: SessionRecord,
	pub user: UserRecord,
}

impl AuthCtx {
	pub fn is_owner(&self) -> bool {
		matches!(self.user.role, crate::auth_adapter::Role::Owner)
	}
}

/// Required session extractor.
#[derive(Clone, Debug)]
pub struct Auth(pub AuthCtx);

impl<S> FromRequestParts<S> for Auth
where
	S: Send + Sync,
{
	type Rejection = Error;

	async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
		parts
			.extensions
			.get::<AuthCtx>()
			.cloned()
			.map(Auth)
			.ok_or(Error::Unauthorized)
	}
}

/// Optional session extractor: never fails.
#[derive(Clone, Debug)]
pub struct OptionalAuth(pub Option<AuthCtx>);

impl<S> FromRequestParts<S> for OptionalAuth
where
	S: Send + Sync,
{
	type Rejection = Error;

	async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
		Ok(OptionalAuth(parts.extensions.get::<AuthCtx>().cloned()))
	}
}

// RequestId //
//***********//
#[derive(Clone, Debug)]
pub struct RequestId(pub Box<str>);

// vim: ts=4
