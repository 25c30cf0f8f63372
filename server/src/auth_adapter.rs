//! Adapter for end users, sessions and the TLS certificate store.
//!
//! Sessions are opaque random tokens mapped server-side; the certificate
//! store is the narrow load/store/delete/lock interface handed to the
//! external TLS manager's storage callbacks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fmt::Debug;

use crate::prelude::*;
use crate::types::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
	/// Single administrative principal of the node
	#[serde(rename = "owner")]
	Owner,
	#[serde(rename = "user")]
	User,
}

impl Role {
	pub fn as_str(&self) -> &'static str {
		match self {
			Role::Owner => "owner",
			Role::User => "user",
		}
	}
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
	pub id: UserId,
	pub provider: Box<str>,
	pub provider_id: Box<str>,
	pub email: Option<Box<str>>,
	pub name: Option<Box<str>>,
	pub avatar_url: Option<Box<str>>,
	pub role: Role,
	pub created_at: Timestamp,
}

/// Profile fields handed back by an OAuth provider after code exchange
#[derive(Debug, Clone)]
pub struct OAuthProfile {
	pub provider: Box<str>,
	pub provider_id: Box<str>,
	pub email: Option<Box<str>>,
	pub name: Option<Box<str>>,
	pub avatar_url: Option<Box<str>>,
}

#[derive(Debug, Clone)]
pub struct SessionRecord {
	pub token: Box<str>,
	pub user_id: UserId,
	pub created_at: Timestamp,
	pub expires_at: Timestamp,
}

/// Certificate material for one domain, PEM-encoded and opaque to the core
#[derive(Debug, Clone)]
pub struct CertData {
	pub domain: Box<str>,
	pub cert_pem: Box<str>,
	pub key_pem: Box<str>,
}

#[async_trait]
pub trait AuthAdapter: Send + Sync + Debug {
	// Users. The first user ever created becomes the owner; everyone after
	// is a plain user.
	async fn upsert_oauth_user(&self, profile: &OAuthProfile) -> FzResult<UserRecord>;
	async fn read_user(&self, id: UserId) -> FzResult<UserRecord>;
	async fn count_users(&self) -> FzResult<u64>;

	// Sessions
	async fn create_session(&self, user_id: UserId, token: &str, ttl_secs: i64)
		-> FzResult<SessionRecord>;
	/// Returns the session and its user; expired sessions come back as
	/// `Error::SessionExpired` so the handler can set the right code.
	async fn read_session(&self, token: &str) -> FzResult<(SessionRecord, UserRecord)>;
	/// Sliding renewal: push expiry out to `ttl_secs` from now.
	async fn renew_session(&self, token: &str, ttl_secs: i64) -> FzResult<()>;
	async fn delete_session(&self, token: &str) -> FzResult<()>;
	async fn purge_expired_sessions(&self) -> FzResult<u64>;

	// Certificate store callbacks (load / store / delete / lock)
	async fn read_cert(&self, domain: &str) -> FzResult<CertData>;
	async fn store_cert(&self, cert: &CertData) -> FzResult<()>;
	async fn delete_cert(&self, domain: &str) -> FzResult<()>;
	async fn list_certs(&self) -> FzResult<Vec<CertData>>;
	/// Best-effort advisory lock with expiry; returns false when held.
	async fn acquire_cert_lock(&self, name: &str, ttl_secs: i64) -> FzResult<bool>;
	async fn release_cert_lock(&self, name: &str) -> FzResult<()>;
}

// vim: ts=4
