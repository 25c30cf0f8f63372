//! Database schema initialization.
//!
//! Creates tables and indexes on startup. Indexes are typed to the
//! dominant query shapes: `(weight, created_at)` on the activity log for
//! weight-first retention, a partial `(status, created_at)` index for
//! pending-job claims, `(app_id, user_id, collection)` on app data, and a
//! partial index over git-sourced apps.

use sqlx::SqlitePool;

pub(crate) async fn init_db(db: &SqlitePool) -> Result<(), sqlx::Error> {
	let mut tx = db.begin().await?;

	// Apps
	//******
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS apps (
		app_id text NOT NULL,
		label text,
		original_id text,
		forked_from_id text,
		source text NOT NULL DEFAULT 'deploy',
		manifest json NOT NULL DEFAULT '{}',
		source_url text,
		source_ref text,
		source_commit text,
		installed_at datetime,
		created_at datetime DEFAULT (unixepoch()),
		PRIMARY KEY(app_id)
	)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_apps_label ON apps(label) WHERE label IS NOT NULL")
		.execute(&mut *tx)
		.await?;
	sqlx::query("CREATE INDEX IF NOT EXISTS idx_apps_git ON apps(source) WHERE source='git'")
		.execute(&mut *tx)
		.await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS app_files (
		app_id text NOT NULL,
		path text NOT NULL,
		bytes blob NOT NULL,
		mime text NOT NULL,
		modified_at datetime DEFAULT (unixepoch()),
		PRIMARY KEY(app_id, path)
	)",
	)
	.execute(&mut *tx)
	.await?;

	// Tenant data
	//*************
	// user_id 0 means shared app data (NULL would break PK uniqueness)
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS app_kv (
		app_id text NOT NULL,
		user_id integer NOT NULL DEFAULT 0,
		key text NOT NULL,
		value json NOT NULL,
		expires_at datetime,
		PRIMARY KEY(app_id, user_id, key)
	)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS app_docs (
		app_id text NOT NULL,
		user_id integer NOT NULL DEFAULT 0,
		collection text NOT NULL,
		doc_id text NOT NULL,
		body json NOT NULL,
		created_at datetime DEFAULT (unixepoch()),
		updated_at datetime DEFAULT (unixepoch()),
		PRIMARY KEY(app_id, user_id, collection, doc_id)
	)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query(
		"CREATE INDEX IF NOT EXISTS idx_app_docs_coll ON app_docs(app_id, user_id, collection)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS app_blobs (
		app_id text NOT NULL,
		user_id integer NOT NULL DEFAULT 0,
		key text NOT NULL,
		bytes blob NOT NULL,
		mime text NOT NULL,
		size integer NOT NULL,
		created_at datetime DEFAULT (unixepoch()),
		PRIMARY KEY(app_id, user_id, key)
	)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS app_snapshots (
		app_id text NOT NULL,
		name text NOT NULL,
		dump json NOT NULL,
		created_at datetime DEFAULT (unixepoch()),
		PRIMARY KEY(app_id, name)
	)",
	)
	.execute(&mut *tx)
	.await?;

	// Users & sessions
	//******************
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS users (
		user_id integer PRIMARY KEY AUTOINCREMENT,
		provider text NOT NULL,
		provider_id text NOT NULL,
		email text,
		name text,
		avatar_url text,
		role text NOT NULL DEFAULT 'user',
		created_at datetime DEFAULT (unixepoch())
	)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query(
		"CREATE UNIQUE INDEX IF NOT EXISTS idx_users_provider ON users(provider, provider_id)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS sessions (
		token text NOT NULL,
		user_id integer NOT NULL,
		created_at datetime DEFAULT (unixepoch()),
		expires_at datetime NOT NULL,
		PRIMARY KEY(token)
	)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_expiry ON sessions(expires_at)")
		.execute(&mut *tx)
		.await?;

	// Aliases
	//*********
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS aliases (
		subdomain text NOT NULL,
		type text NOT NULL,
		target text,
		permanent boolean NOT NULL DEFAULT 0,
		split_targets json NOT NULL DEFAULT '[]',
		created_at datetime DEFAULT (unixepoch()),
		PRIMARY KEY(subdomain)
	)",
	)
	.execute(&mut *tx)
	.await?;

	// Analytics events (append-only)
	//********************************
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS events (
		event_id integer PRIMARY KEY AUTOINCREMENT,
		domain text NOT NULL,
		tags text,
		source_type text,
		event_type text NOT NULL,
		path text,
		referrer text,
		user_agent text,
		ip text,
		query_params text,
		created_at datetime DEFAULT (unixepoch())
	)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_created ON events(created_at)")
		.execute(&mut *tx)
		.await?;
	sqlx::query(
		"CREATE INDEX IF NOT EXISTS idx_events_domain ON events(domain, created_at)",
	)
	.execute(&mut *tx)
	.await?;

	// Activity log
	//**************
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS activity_log (
		log_id integer PRIMARY KEY AUTOINCREMENT,
		weight integer NOT NULL DEFAULT 0,
		actor text NOT NULL,
		actor_id text,
		resource text NOT NULL,
		action text NOT NULL,
		result text NOT NULL,
		details json,
		created_at datetime DEFAULT (unixepoch())
	)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query("CREATE INDEX IF NOT EXISTS idx_activity_created ON activity_log(created_at)")
		.execute(&mut *tx)
		.await?;
	sqlx::query(
		"CREATE INDEX IF NOT EXISTS idx_activity_weight ON activity_log(weight, created_at)",
	)
	.execute(&mut *tx)
	.await?;

	// Configuration
	//***************
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS config (
		key text NOT NULL,
		value text,
		PRIMARY KEY(key)
	)",
	)
	.execute(&mut *tx)
	.await?;

	// Outbound net allowlist
	//************************
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS net_allowlist (
		app_id text NOT NULL,
		domain text NOT NULL,
		https_only boolean NOT NULL DEFAULT 1,
		rate_per_min integer NOT NULL DEFAULT 60,
		burst integer NOT NULL DEFAULT 10,
		max_response_bytes integer NOT NULL DEFAULT 5242880,
		timeout_ms integer NOT NULL DEFAULT 10000,
		cache_ttl_secs integer NOT NULL DEFAULT 0,
		PRIMARY KEY(app_id, domain)
	)",
	)
	.execute(&mut *tx)
	.await?;

	// Worker jobs
	//*************
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS worker_jobs (
		job_id text NOT NULL,
		app_id text NOT NULL,
		handler text NOT NULL,
		status text NOT NULL DEFAULT 'pending',
		config json,
		progress json,
		result json,
		error text,
		logs text,
		checkpoint json,
		attempt integer NOT NULL DEFAULT 0,
		restart_count integer NOT NULL DEFAULT 0,
		created_at datetime DEFAULT (unixepoch()),
		started_at datetime,
		done_at datetime,
		last_healthy_at datetime,
		PRIMARY KEY(job_id)
	)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query(
		"CREATE INDEX IF NOT EXISTS idx_jobs_pending ON worker_jobs(status, created_at) WHERE status='pending'",
	)
	.execute(&mut *tx)
	.await?;

	// Peers
	//*******
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS peers (
		name text NOT NULL,
		admin_url text NOT NULL,
		token text NOT NULL,
		last_seen_at datetime,
		is_default boolean NOT NULL DEFAULT 0,
		PRIMARY KEY(name)
	)",
	)
	.execute(&mut *tx)
	.await?;

	// Certificate store
	//*******************
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS certs (
		domain text NOT NULL,
		cert_pem text NOT NULL,
		key_pem text NOT NULL,
		updated_at datetime DEFAULT (unixepoch()),
		PRIMARY KEY(domain)
	)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS locks (
		name text NOT NULL,
		acquired_at datetime DEFAULT (unixepoch()),
		expires_at datetime NOT NULL,
		PRIMARY KEY(name)
	)",
	)
	.execute(&mut *tx)
	.await?;

	tx.commit().await?;
	Ok(())
}

// vim: ts=4
