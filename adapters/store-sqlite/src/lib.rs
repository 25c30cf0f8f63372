//! SQLite-backed store adapter for Fazt.
//!
//! One database file holds everything: apps, VFS rows, tenant KV/docs/
//! blobs, users, sessions, aliases, analytics, the activity log and
//! configuration. Two pools share the file: a 1-connection write pool
//! drained exclusively by the [`write::WriteSerializer`], and a read-only
//! pool for queries. WAL mode keeps readers unblocked while the writer
//! commits.

use sqlx::sqlite::{self, SqlitePool};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use fazt::auth_adapter::{self, AuthAdapter};
use fazt::data_adapter::{self, DataAdapter, Scope};
use fazt::meta_adapter::{self, MetaAdapter};
use fazt::prelude::*;
use fazt::storage::query::DocQuery;

mod activity;
mod alias;
mod app;
mod blob;
mod cert;
mod config;
mod data;
mod doc;
mod event;
mod file;
mod job;
mod kv;
mod net;
mod peer;
mod schema;
mod snapshot;
mod user;
mod utils;
pub mod write;

pub use write::WriteSerializer;

use schema::init_db;

#[derive(Debug)]
pub struct StoreSqlite {
	dbr: SqlitePool,
	writer: Arc<WriteSerializer>,
	path: PathBuf,
}

/// Restrict a database file to its owner. WAL and SHM side files get the
/// same treatment when they exist.
fn restrict_permissions(path: &Path) {
	#[cfg(unix)]
	{
		use std::fs::Permissions;
		use std::os::unix::fs::PermissionsExt;

		for suffix in ["", "-wal", "-shm"] {
			let mut candidate = path.as_os_str().to_owned();
			candidate.push(suffix);
			let candidate = PathBuf::from(candidate);
			if candidate.exists() {
				if let Err(err) =
					std::fs::set_permissions(&candidate, Permissions::from_mode(0o600))
				{
					warn!("cannot chmod {}: {}", candidate.display(), err);
				}
			}
		}
	}
	#[cfg(not(unix))]
	{
		let _ = path;
	}
}

impl StoreSqlite {
	pub async fn new(db_path: impl AsRef<Path>) -> FzResult<StoreSqlite> {
		let db_path = db_path.as_ref().to_path_buf();
		if let Some(parent) = db_path.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}

		let opts = sqlite::SqliteConnectOptions::new()
			.filename(&db_path)
			.create_if_missing(true)
			.journal_mode(sqlite::SqliteJournalMode::Wal)
			.busy_timeout(std::time::Duration::from_secs(5));

		let db = sqlite::SqlitePoolOptions::new()
			.max_connections(1)
			.connect_with(opts.clone())
			.await
			.inspect_err(|err| warn!("DbError: {:#?}", err))
			.or(Err(Error::DbError))?;
		let dbr = sqlite::SqlitePoolOptions::new()
			.max_connections(5)
			.connect_with(opts.read_only(true))
			.await
			.inspect_err(|err| warn!("DbError: {:#?}", err))
			.or(Err(Error::DbError))?;

		init_db(&db)
			.await
			.inspect_err(|err| warn!("DbError: {:#?}", err))
			.or(Err(Error::DbError))?;

		restrict_permissions(&db_path);
		info!("store opened at {}", db_path.display());

		let writer = Arc::new(WriteSerializer::new(db));
		Ok(StoreSqlite { dbr, writer, path: db_path })
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Direct access to the serializer for batch submitters.
	pub fn writer(&self) -> Arc<WriteSerializer> {
		self.writer.clone()
	}

	/// Stop the write serializer (draining queued jobs) and close pools.
	/// Call after the HTTP server has stopped and buffers are flushed.
	pub async fn shutdown(&self) {
		self.writer.close();
		self.writer.join().await;
		self.dbr.close().await;
		info!("store closed");
	}
}

#[async_trait]
impl MetaAdapter for StoreSqlite {
	// Apps
	//******
	async fn create_app(
		&self,
		id: &AppId,
		opts: meta_adapter::CreateAppOptions,
	) -> FzResult<meta_adapter::AppRecord> {
		let id = id.clone();
		self.writer.submit(move |db| async move { app::create(&db, &id, opts).await }).await
	}

	async fn read_app(&self, id: &AppId) -> FzResult<meta_adapter::AppRecord> {
		app::read(&self.dbr, id).await
	}

	async fn read_app_by_label(&self, label: &str) -> FzResult<meta_adapter::AppRecord> {
		app::read_by_label(&self.dbr, label).await
	}

	async fn list_apps(
		&self,
		opts: &meta_adapter::ListAppsOptions,
	) -> FzResult<Vec<meta_adapter::AppRecord>> {
		app::list(&self.dbr, opts).await
	}

	async fn update_app(
		&self,
		id: &AppId,
		data: &meta_adapter::UpdateAppData,
	) -> FzResult<meta_adapter::AppRecord> {
		let id = id.clone();
		let data = meta_adapter::UpdateAppData {
			label: data.label.clone(),
			manifest: data.manifest.clone(),
		};
		self.writer.submit(move |db| async move { app::update(&db, &id, &data).await }).await
	}

	async fn swap_labels(&self, a: &AppId, b: &AppId) -> FzResult<()> {
		let (a, b) = (a.clone(), b.clone());
		self.writer.submit(move |db| async move { app::swap_labels(&db, &a, &b).await }).await
	}

	async fn delete_app(&self, id: &AppId) -> FzResult<()> {
		let id = id.clone();
		self.writer.submit(move |db| async move { app::delete(&db, &id).await }).await
	}

	// App files
	//***********
	async fn write_file(
		&self,
		app: &AppId,
		path: &str,
		bytes: Bytes,
		mime: &str,
	) -> FzResult<()> {
		let (app, path, mime) = (app.clone(), path.to_owned(), mime.to_owned());
		self.writer
			.submit(move |db| async move { file::write(&db, &app, &path, bytes, &mime).await })
			.await
	}

	async fn read_file(&self, app: &AppId, path: &str) -> FzResult<meta_adapter::FileRecord> {
		file::read(&self.dbr, app, path).await
	}

	async fn list_files(&self, app: &AppId) -> FzResult<Vec<meta_adapter::FileInfo>> {
		file::list(&self.dbr, app).await
	}

	async fn delete_file(&self, app: &AppId, path: &str) -> FzResult<()> {
		let (app, path) = (app.clone(), path.to_owned());
		self.writer.submit(move |db| async move { file::delete(&db, &app, &path).await }).await
	}

	async fn copy_files(&self, src: &AppId, dst: &AppId) -> FzResult<u64> {
		let (src, dst) = (src.clone(), dst.clone());
		self.writer.submit(move |db| async move { file::copy_all(&db, &src, &dst).await }).await
	}

	// Aliases
	//*********
	async fn upsert_alias(&self, alias: &meta_adapter::AliasRecord) -> FzResult<()> {
		let alias = alias.clone();
		self.writer.submit(move |db| async move { alias::upsert(&db, &alias).await }).await
	}

	async fn read_alias(&self, subdomain: &str) -> FzResult<meta_adapter::AliasRecord> {
		alias::read(&self.dbr, subdomain).await
	}

	async fn list_aliases(&self) -> FzResult<Vec<meta_adapter::AliasRecord>> {
		alias::list(&self.dbr).await
	}

	async fn delete_alias(&self, subdomain: &str) -> FzResult<()> {
		let subdomain = subdomain.to_owned();
		self.writer.submit(move |db| async move { alias::delete(&db, &subdomain).await }).await
	}

	// Analytics events
	//******************
	async fn insert_events(&self, events: Vec<meta_adapter::EventRecord>) -> FzResult<()> {
		self.writer.submit(move |db| async move { event::insert_batch(&db, events).await }).await
	}

	async fn list_events(
		&self,
		opts: &meta_adapter::ListEventsOptions,
	) -> FzResult<Vec<meta_adapter::EventRecord>> {
		event::list(&self.dbr, opts).await
	}

	async fn count_events_since(&self, since: Timestamp) -> FzResult<u64> {
		event::count_since(&self.dbr, since).await
	}

	// Activity log
	//**************
	async fn append_activity(&self, entry: meta_adapter::ActivityEntry) -> FzResult<()> {
		self.writer.submit(move |db| async move { activity::append(&db, entry).await }).await
	}

	async fn list_activity(
		&self,
		opts: &meta_adapter::ListActivityOptions,
	) -> FzResult<Vec<meta_adapter::ActivityEntry>> {
		activity::list(&self.dbr, opts).await
	}

	async fn prune_activity(&self, keep_rows: u64) -> FzResult<u64> {
		self.writer.submit(move |db| async move { activity::prune(&db, keep_rows).await }).await
	}

	// Configuration
	//***************
	async fn read_config(&self, key: &str) -> FzResult<Option<Box<str>>> {
		config::read(&self.dbr, key).await
	}

	async fn read_config_all(&self) -> FzResult<Vec<(Box<str>, Box<str>)>> {
		config::read_all(&self.dbr).await
	}

	async fn write_config(&self, key: &str, value: Option<&str>) -> FzResult<()> {
		let key = key.to_owned();
		let value = value.map(ToOwned::to_owned);
		self.writer
			.submit(move |db| async move { config::write(&db, &key, value.as_deref()).await })
			.await
	}

	// Net allowlist
	//***************
	async fn list_net_rules(&self, app: &AppId) -> FzResult<Vec<meta_adapter::NetRule>> {
		net::list(&self.dbr, app).await
	}

	async fn upsert_net_rule(&self, app: &AppId, rule: &meta_adapter::NetRule) -> FzResult<()> {
		let (app, rule) = (app.clone(), rule.clone());
		self.writer.submit(move |db| async move { net::upsert(&db, &app, &rule).await }).await
	}

	async fn delete_net_rule(&self, app: &AppId, domain: &str) -> FzResult<()> {
		let (app, domain) = (app.clone(), domain.to_owned());
		self.writer.submit(move |db| async move { net::delete(&db, &app, &domain).await }).await
	}

	// Worker jobs
	//*************
	async fn create_job(
		&self,
		app: &AppId,
		handler: &str,
		config: Option<Value>,
	) -> FzResult<meta_adapter::JobRecord> {
		let (app, handler) = (app.clone(), handler.to_owned());
		self.writer
			.submit(move |db| async move { job::create(&db, &app, &handler, config).await })
			.await
	}

	async fn read_job(&self, id: &str) -> FzResult<meta_adapter::JobRecord> {
		job::read(&self.dbr, id).await
	}

	async fn list_jobs(
		&self,
		app: &AppId,
		status: Option<meta_adapter::JobStatus>,
	) -> FzResult<Vec<meta_adapter::JobRecord>> {
		job::list(&self.dbr, app, status).await
	}

	async fn claim_pending_job(&self) -> FzResult<Option<meta_adapter::JobRecord>> {
		self.writer.submit(move |db| async move { job::claim_pending(&db).await }).await
	}

	async fn update_job(&self, id: &str, data: meta_adapter::UpdateJobData) -> FzResult<()> {
		let id = id.to_owned();
		self.writer.submit(move |db| async move { job::update(&db, &id, data).await }).await
	}

	// Peers
	//*******
	async fn upsert_peer(&self, peer: &meta_adapter::PeerRecord) -> FzResult<()> {
		let peer = peer.clone();
		self.writer.submit(move |db| async move { peer::upsert(&db, &peer).await }).await
	}

	async fn list_peers(&self) -> FzResult<Vec<meta_adapter::PeerRecord>> {
		peer::list(&self.dbr).await
	}

	async fn delete_peer(&self, name: &str) -> FzResult<()> {
		let name = name.to_owned();
		self.writer.submit(move |db| async move { peer::delete(&db, &name).await }).await
	}

	async fn set_default_peer(&self, name: &str) -> FzResult<()> {
		let name = name.to_owned();
		self.writer.submit(move |db| async move { peer::set_default(&db, &name).await }).await
	}
}

#[async_trait]
impl AuthAdapter for StoreSqlite {
	async fn upsert_oauth_user(
		&self,
		profile: &auth_adapter::OAuthProfile,
	) -> FzResult<auth_adapter::UserRecord> {
		let profile = profile.clone();
		self.writer.submit(move |db| async move { user::upsert_oauth(&db, &profile).await }).await
	}

	async fn read_user(&self, id: UserId) -> FzResult<auth_adapter::UserRecord> {
		user::read(&self.dbr, id).await
	}

	async fn count_users(&self) -> FzResult<u64> {
		user::count(&self.dbr).await
	}

	async fn create_session(
		&self,
		user_id: UserId,
		token: &str,
		ttl_secs: i64,
	) -> FzResult<auth_adapter::SessionRecord> {
		let token = token.to_owned();
		self.writer
			.submit(move |db| async move { user::create_session(&db, user_id, &token, ttl_secs).await })
			.await
	}

	async fn read_session(
		&self,
		token: &str,
	) -> FzResult<(auth_adapter::SessionRecord, auth_adapter::UserRecord)> {
		user::read_session(&self.dbr, token).await
	}

	async fn renew_session(&self, token: &str, ttl_secs: i64) -> FzResult<()> {
		let token = token.to_owned();
		self.writer
			.submit(move |db| async move { user::renew_session(&db, &token, ttl_secs).await })
			.await
	}

	async fn delete_session(&self, token: &str) -> FzResult<()> {
		let token = token.to_owned();
		self.writer.submit(move |db| async move { user::delete_session(&db, &token).await }).await
	}

	async fn purge_expired_sessions(&self) -> FzResult<u64> {
		self.writer.submit(move |db| async move { user::purge_expired_sessions(&db).await }).await
	}

	// Certificate store
	//*******************
	async fn read_cert(&self, domain: &str) -> FzResult<auth_adapter::CertData> {
		cert::read(&self.dbr, domain).await
	}

	async fn store_cert(&self, data: &auth_adapter::CertData) -> FzResult<()> {
		let data = data.clone();
		self.writer.submit(move |db| async move { cert::store(&db, &data).await }).await
	}

	async fn delete_cert(&self, domain: &str) -> FzResult<()> {
		let domain = domain.to_owned();
		self.writer.submit(move |db| async move { cert::delete(&db, &domain).await }).await
	}

	async fn list_certs(&self) -> FzResult<Vec<auth_adapter::CertData>> {
		cert::list(&self.dbr).await
	}

	async fn acquire_cert_lock(&self, name: &str, ttl_secs: i64) -> FzResult<bool> {
		let name = name.to_owned();
		self.writer
			.submit(move |db| async move { cert::acquire_lock(&db, &name, ttl_secs).await })
			.await
	}

	async fn release_cert_lock(&self, name: &str) -> FzResult<()> {
		let name = name.to_owned();
		self.writer.submit(move |db| async move { cert::release_lock(&db, &name).await }).await
	}
}

#[async_trait]
impl DataAdapter for StoreSqlite {
	// Key-value
	//***********
	async fn kv_get(&self, scope: &Scope, key: &str) -> FzResult<Option<Value>> {
		kv::get(&self.dbr, scope, key).await
	}

	async fn kv_set(
		&self,
		scope: &Scope,
		key: &str,
		value: &Value,
		ttl_secs: Option<i64>,
	) -> FzResult<()> {
		let (scope, key, value) = (scope.clone(), key.to_owned(), value.clone());
		self.writer
			.submit(move |db| async move { kv::set(&db, &scope, &key, &value, ttl_secs).await })
			.await
	}

	async fn kv_del(&self, scope: &Scope, key: &str) -> FzResult<bool> {
		let (scope, key) = (scope.clone(), key.to_owned());
		self.writer.submit(move |db| async move { kv::del(&db, &scope, &key).await }).await
	}

	async fn kv_keys(&self, scope: &Scope, prefix: Option<&str>) -> FzResult<Vec<Box<str>>> {
		kv::keys(&self.dbr, scope, prefix).await
	}

	async fn kv_purge_expired(&self) -> FzResult<u64> {
		self.writer.submit(move |db| async move { kv::purge_expired(&db).await }).await
	}

	// Documents
	//***********
	async fn doc_insert(
		&self,
		scope: &Scope,
		collection: &str,
		body: Value,
	) -> FzResult<data_adapter::DocRecord> {
		let (scope, collection) = (scope.clone(), collection.to_owned());
		self.writer
			.submit(move |db| async move { doc::insert(&db, &scope, &collection, body).await })
			.await
	}

	async fn doc_get(
		&self,
		scope: &Scope,
		collection: &str,
		doc_id: &str,
	) -> FzResult<data_adapter::DocRecord> {
		doc::get(&self.dbr, scope, collection, doc_id).await
	}

	async fn doc_query(
		&self,
		scope: &Scope,
		collection: &str,
		query: &DocQuery,
	) -> FzResult<Vec<data_adapter::DocRecord>> {
		doc::query(&self.dbr, scope, collection, query).await
	}

	async fn doc_update(
		&self,
		scope: &Scope,
		collection: &str,
		doc_id: &str,
		body: Value,
	) -> FzResult<data_adapter::DocRecord> {
		let (scope, collection, doc_id) = (scope.clone(), collection.to_owned(), doc_id.to_owned());
		self.writer
			.submit(move |db| async move { doc::update(&db, &scope, &collection, &doc_id, body).await })
			.await
	}

	async fn doc_delete(&self, scope: &Scope, collection: &str, doc_id: &str) -> FzResult<bool> {
		let (scope, collection, doc_id) = (scope.clone(), collection.to_owned(), doc_id.to_owned());
		self.writer
			.submit(move |db| async move { doc::delete(&db, &scope, &collection, &doc_id).await })
			.await
	}

	// Blobs
	//*******
	async fn blob_put(&self, scope: &Scope, key: &str, bytes: Bytes, mime: &str) -> FzResult<()> {
		let (scope, key, mime) = (scope.clone(), key.to_owned(), mime.to_owned());
		self.writer
			.submit(move |db| async move { blob::put(&db, &scope, &key, bytes, &mime).await })
			.await
	}

	async fn blob_get(&self, scope: &Scope, key: &str) -> FzResult<data_adapter::BlobRecord> {
		blob::get(&self.dbr, scope, key).await
	}

	async fn blob_delete(&self, scope: &Scope, key: &str) -> FzResult<bool> {
		let (scope, key) = (scope.clone(), key.to_owned());
		self.writer.submit(move |db| async move { blob::delete(&db, &scope, &key).await }).await
	}

	async fn blob_list(&self, scope: &Scope) -> FzResult<Vec<data_adapter::BlobInfo>> {
		blob::list(&self.dbr, scope).await
	}

	// Snapshots
	//***********
	async fn snapshot_create(
		&self,
		app: &AppId,
		name: &str,
	) -> FzResult<data_adapter::SnapshotInfo> {
		let (app, name) = (app.clone(), name.to_owned());
		self.writer
			.submit(move |db| async move { snapshot::create(&db, &app, &name).await })
			.await
	}

	async fn snapshot_restore(&self, app: &AppId, name: &str) -> FzResult<()> {
		let (app, name) = (app.clone(), name.to_owned());
		self.writer
			.submit(move |db| async move { snapshot::restore(&db, &app, &name).await })
			.await
	}

	async fn snapshot_list(&self, app: &AppId) -> FzResult<Vec<data_adapter::SnapshotInfo>> {
		snapshot::list(&self.dbr, app).await
	}

	async fn storage_dump(&self, app: &AppId) -> FzResult<Value> {
		snapshot::storage_dump(&self.dbr, app).await
	}

	// Stats & fork support
	//**********************
	async fn data_usage(&self, app: &AppId) -> FzResult<data_adapter::DataUsage> {
		data::usage(&self.dbr, app).await
	}

	async fn copy_shared_data(&self, src: &AppId, dst: &AppId) -> FzResult<()> {
		let (src, dst) = (src.clone(), dst.clone());
		self.writer.submit(move |db| async move { data::copy_shared(&db, &src, &dst).await }).await
	}
}

// vim: ts=4
