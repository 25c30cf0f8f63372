//! Adapter for per-tenant data: key-value, documents, blobs and snapshots.
//!
//! Every method takes a [`Scope`] and filters by `(app_id, user_id)`; the
//! capability surface never hands a handler a way to name another app's
//! rows. Mutations run through the store's write serializer.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Debug;

use crate::prelude::*;
use crate::storage::query::DocQuery;
use crate::types::Timestamp;

/// Capability scope: the current app, and the current end user when the
/// request carries a session. `user_id = None` addresses shared app data.
#[derive(Debug, Clone)]
pub struct Scope {
	pub app_id: AppId,
	pub user_id: Option<UserId>,
}

impl Scope {
	pub fn shared(app_id: AppId) -> Scope {
		Scope { app_id, user_id: None }
	}

	pub fn for_user(app_id: AppId, user_id: UserId) -> Scope {
		Scope { app_id, user_id: Some(user_id) }
	}
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocRecord {
	pub doc_id: Box<str>,
	pub collection: Box<str>,
	pub body: Value,
	pub created_at: Timestamp,
	pub updated_at: Timestamp,
}

#[derive(Debug, Clone)]
pub struct BlobRecord {
	pub key: Box<str>,
	pub bytes: Bytes,
	pub mime: Box<str>,
	pub size: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobInfo {
	pub key: Box<str>,
	pub mime: Box<str>,
	pub size: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotInfo {
	pub name: Box<str>,
	pub created_at: Timestamp,
	pub size: u64,
}

/// Storage counters for the admin stats surface
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataUsage {
	pub kv_count: u64,
	pub doc_count: u64,
	pub blob_count: u64,
	pub blob_bytes: u64,
	pub file_count: u64,
	pub file_bytes: u64,
}

#[async_trait]
pub trait DataAdapter: Send + Sync + Debug {
	// Key-value. Values are arbitrary JSON; expired rows read as absent.
	async fn kv_get(&self, scope: &Scope, key: &str) -> FzResult<Option<Value>>;
	async fn kv_set(
		&self,
		scope: &Scope,
		key: &str,
		value: &Value,
		ttl_secs: Option<i64>,
	) -> FzResult<()>;
	async fn kv_del(&self, scope: &Scope, key: &str) -> FzResult<bool>;
	async fn kv_keys(&self, scope: &Scope, prefix: Option<&str>) -> FzResult<Vec<Box<str>>>;
	async fn kv_purge_expired(&self) -> FzResult<u64>;

	// Documents
	async fn doc_insert(&self, scope: &Scope, collection: &str, body: Value)
		-> FzResult<DocRecord>;
	async fn doc_get(&self, scope: &Scope, collection: &str, doc_id: &str)
		-> FzResult<DocRecord>;
	async fn doc_query(
		&self,
		scope: &Scope,
		collection: &str,
		query: &DocQuery,
	) -> FzResult<Vec<DocRecord>>;
	async fn doc_update(
		&self,
		scope: &Scope,
		collection: &str,
		doc_id: &str,
		body: Value,
	) -> FzResult<DocRecord>;
	async fn doc_delete(&self, scope: &Scope, collection: &str, doc_id: &str) -> FzResult<bool>;

	// Blobs
	async fn blob_put(&self, scope: &Scope, key: &str, bytes: Bytes, mime: &str) -> FzResult<()>;
	async fn blob_get(&self, scope: &Scope, key: &str) -> FzResult<BlobRecord>;
	async fn blob_delete(&self, scope: &Scope, key: &str) -> FzResult<bool>;
	async fn blob_list(&self, scope: &Scope) -> FzResult<Vec<BlobInfo>>;

	// Snapshots: named JSON dumps of the app's whole KV + docs state.
	// Restore replaces both in a single transaction.
	async fn snapshot_create(&self, app: &AppId, name: &str) -> FzResult<SnapshotInfo>;
	async fn snapshot_restore(&self, app: &AppId, name: &str) -> FzResult<()>;
	async fn snapshot_list(&self, app: &AppId) -> FzResult<Vec<SnapshotInfo>>;

	/// Full dump of the app's shared + per-user KV and docs (`/_fazt/storage`)
	async fn storage_dump(&self, app: &AppId) -> FzResult<Value>;

	// Stats
	async fn data_usage(&self, app: &AppId) -> FzResult<DataUsage>;

	/// Copy shared KV and docs of `src` into `dst` (fork support)
	async fn copy_shared_data(&self, src: &AppId, dst: &AppId) -> FzResult<()>;
}

// vim: ts=4
