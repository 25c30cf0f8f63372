//! App records: creation, label routing lookups, label swap and the
//! delete cascade.

use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::utils::*;
use fazt::meta_adapter::*;
use fazt::prelude::*;
use fazt::types::Manifest;

fn map_app(row: &sqlx::sqlite::SqliteRow) -> Result<AppRecord, sqlx::Error> {
	let manifest_raw: &str = row.try_get("manifest")?;
	let manifest: Manifest = serde_json::from_str(manifest_raw).unwrap_or_default();
	let source_raw: &str = row.try_get("source")?;
	Ok(AppRecord {
		id: AppId(row.try_get::<String, _>("app_id")?.into()),
		label: row.try_get::<Option<String>, _>("label")?.map(Into::into),
		original_id: row
			.try_get::<Option<String>, _>("original_id")?
			.map(|s| AppId(s.into())),
		forked_from_id: row
			.try_get::<Option<String>, _>("forked_from_id")?
			.map(|s| AppId(s.into())),
		source: AppSource::from_str(source_raw).unwrap_or(AppSource::Deploy),
		manifest,
		source_url: row.try_get::<Option<String>, _>("source_url")?.map(Into::into),
		source_ref: row.try_get::<Option<String>, _>("source_ref")?.map(Into::into),
		source_commit: row.try_get::<Option<String>, _>("source_commit")?.map(Into::into),
		installed_at: row.try_get::<Option<i64>, _>("installed_at")?.map(Timestamp),
		created_at: Timestamp(row.try_get("created_at")?),
	})
}

const APP_COLS: &str = "app_id, label, original_id, forked_from_id, source, manifest, \
	source_url, source_ref, source_commit, installed_at, created_at";

pub(crate) async fn create(
	db: &SqlitePool,
	id: &AppId,
	opts: CreateAppOptions,
) -> FzResult<AppRecord> {
	let manifest = serde_json::to_string(&opts.manifest.clone().unwrap_or_default())?;
	sqlx::query(
		"INSERT INTO apps (app_id, label, original_id, forked_from_id, source, manifest,
			source_url, source_ref, source_commit, installed_at, created_at)
		VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, unixepoch())",
	)
	.bind(id.as_str())
	.bind(opts.label.as_deref())
	.bind(opts.original_id.as_ref().map(AppId::as_str))
	.bind(opts.forked_from_id.as_ref().map(AppId::as_str))
	.bind(opts.source.unwrap_or(AppSource::Deploy).as_str())
	.bind(&manifest)
	.bind(opts.source_url.as_deref())
	.bind(opts.source_ref.as_deref())
	.bind(opts.source_commit.as_deref())
	.bind(opts.installed_at.map(|t| t.0))
	.execute(db)
	.await
	.map_err(|err| exec_err(err, "app id or label already exists"))?;

	read(db, id).await
}

pub(crate) async fn read(dbr: &SqlitePool, id: &AppId) -> FzResult<AppRecord> {
	let res = sqlx::query(&format!("SELECT {} FROM apps WHERE app_id = ?", APP_COLS))
		.bind(id.as_str())
		.fetch_one(dbr)
		.await;
	map_res(res, map_app)
}

pub(crate) async fn read_by_label(dbr: &SqlitePool, label: &str) -> FzResult<AppRecord> {
	let res = sqlx::query(&format!("SELECT {} FROM apps WHERE label = ?", APP_COLS))
		.bind(label)
		.fetch_one(dbr)
		.await;
	map_res(res, map_app)
}

pub(crate) async fn list(dbr: &SqlitePool, opts: &ListAppsOptions) -> FzResult<Vec<AppRecord>> {
	let mut query =
		sqlx::QueryBuilder::new(format!("SELECT {} FROM apps WHERE 1=1", APP_COLS));
	if let Some(source) = &opts.source {
		query.push(" AND source=").push_bind(source.as_str());
	}
	if let Some(q) = &opts.q {
		query.push(" AND (label LIKE ").push_bind(format!("%{}%", q));
		query.push(" OR app_id LIKE ").push_bind(format!("%{}%", q));
		query.push(")");
	}
	query.push(" ORDER BY created_at DESC");
	query.push(" LIMIT ").push_bind(i64::from(opts.limit.unwrap_or(100).min(1000)));
	query.push(" OFFSET ").push_bind(i64::from(opts.offset.unwrap_or(0)));

	let rows = query.build().fetch_all(dbr).await;
	collect_rows(rows, map_app)
}

pub(crate) async fn update(
	db: &SqlitePool,
	id: &AppId,
	data: &UpdateAppData,
) -> FzResult<AppRecord> {
	let mut query = sqlx::QueryBuilder::new("UPDATE apps SET ");
	let mut has_updates = false;

	match &data.label {
		Patch::Undefined => {}
		Patch::Null => {
			query.push("label=NULL");
			has_updates = true;
		}
		Patch::Value(label) => {
			query.push("label=").push_bind(label.as_ref());
			has_updates = true;
		}
	}
	match &data.manifest {
		Patch::Undefined => {}
		Patch::Null | Patch::Value(_) => {
			if has_updates {
				query.push(", ");
			}
			let manifest = match &data.manifest {
				Patch::Value(m) => serde_json::to_string(m)?,
				_ => "{}".to_string(),
			};
			query.push("manifest=").push_bind(manifest);
			has_updates = true;
		}
	}

	if has_updates {
		query.push(" WHERE app_id=").push_bind(id.as_str());
		let res = query
			.build()
			.execute(db)
			.await
			.map_err(|err| exec_err(err, "label already in use"))?;
		if res.rows_affected() == 0 {
			return Err(Error::NotFound);
		}
	}

	read(db, id).await
}

/// Atomically exchange two labels. Both rows are detached to NULL inside
/// the transaction so the partial unique index never sees a collision.
pub(crate) async fn swap_labels(db: &SqlitePool, a: &AppId, b: &AppId) -> FzResult<()> {
	let mut tx = db.begin().await.map_err(|_| Error::DbError)?;

	let label_a: Option<String> = sqlx::query_scalar("SELECT label FROM apps WHERE app_id=?")
		.bind(a.as_str())
		.fetch_optional(&mut *tx)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?
		.ok_or(Error::NotFound)?;
	let label_b: Option<String> = sqlx::query_scalar("SELECT label FROM apps WHERE app_id=?")
		.bind(b.as_str())
		.fetch_optional(&mut *tx)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?
		.ok_or(Error::NotFound)?;

	sqlx::query("UPDATE apps SET label=NULL WHERE app_id IN (?, ?)")
		.bind(a.as_str())
		.bind(b.as_str())
		.execute(&mut *tx)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;
	sqlx::query("UPDATE apps SET label=? WHERE app_id=?")
		.bind(&label_b)
		.bind(a.as_str())
		.execute(&mut *tx)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;
	sqlx::query("UPDATE apps SET label=? WHERE app_id=?")
		.bind(&label_a)
		.bind(b.as_str())
		.execute(&mut *tx)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;

	tx.commit().await.map_err(|_| Error::DbError)?;
	Ok(())
}

/// Delete an app and everything keyed by its id. Lineage columns on
/// surviving forks are left dangling on purpose.
pub(crate) async fn delete(db: &SqlitePool, id: &AppId) -> FzResult<()> {
	let mut tx = db.begin().await.map_err(|_| Error::DbError)?;

	let label: Option<String> = sqlx::query_scalar("SELECT label FROM apps WHERE app_id=?")
		.bind(id.as_str())
		.fetch_optional(&mut *tx)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?
		.ok_or(Error::NotFound)?;

	for table in
		["app_files", "app_kv", "app_docs", "app_blobs", "app_snapshots", "net_allowlist", "worker_jobs"]
	{
		sqlx::query(&format!("DELETE FROM {} WHERE app_id=?", table))
			.bind(id.as_str())
			.execute(&mut *tx)
			.await
			.inspect_err(inspect)
			.map_err(|_| Error::DbError)?;
	}

	// Analytics rows are keyed by domain: both the id-form and the label
	// host belong to this app.
	sqlx::query("DELETE FROM events WHERE domain=? OR domain=?")
		.bind(id.as_str())
		.bind(label.as_deref().unwrap_or(""))
		.execute(&mut *tx)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;

	sqlx::query("DELETE FROM apps WHERE app_id=?")
		.bind(id.as_str())
		.execute(&mut *tx)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;

	tx.commit().await.map_err(|_| Error::DbError)?;
	Ok(())
}

// vim: ts=4
