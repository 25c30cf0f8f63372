//! Cross-table tenant-data helpers: usage counters and fork copies.

use sqlx::SqlitePool;

use crate::utils::*;
use fazt::data_adapter::DataUsage;
use fazt::prelude::*;

async fn count_scalar(dbr: &SqlitePool, sql: &str, app: &AppId) -> FzResult<i64> {
	sqlx::query_scalar(sql)
		.bind(app.as_str())
		.fetch_one(dbr)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)
}

pub(crate) async fn usage(dbr: &SqlitePool, app: &AppId) -> FzResult<DataUsage> {
	Ok(DataUsage {
		kv_count: count_scalar(dbr, "SELECT count(*) FROM app_kv WHERE app_id=?", app).await?
			as u64,
		doc_count: count_scalar(dbr, "SELECT count(*) FROM app_docs WHERE app_id=?", app).await?
			as u64,
		blob_count: count_scalar(dbr, "SELECT count(*) FROM app_blobs WHERE app_id=?", app)
			.await? as u64,
		blob_bytes: count_scalar(
			dbr,
			"SELECT coalesce(sum(size), 0) FROM app_blobs WHERE app_id=?",
			app,
		)
		.await? as u64,
		file_count: count_scalar(dbr, "SELECT count(*) FROM app_files WHERE app_id=?", app)
			.await? as u64,
		file_bytes: count_scalar(
			dbr,
			"SELECT coalesce(sum(length(bytes)), 0) FROM app_files WHERE app_id=?",
			app,
		)
		.await? as u64,
	})
}

/// Copy shared (user_id = 0) KV and docs of `src` into `dst`. Used by fork.
pub(crate) async fn copy_shared(db: &SqlitePool, src: &AppId, dst: &AppId) -> FzResult<()> {
	let mut tx = db.begin().await.map_err(|_| Error::DbError)?;

	sqlx::query(
		"INSERT INTO app_kv (app_id, user_id, key, value, expires_at)
		SELECT ?, 0, key, value, expires_at FROM app_kv WHERE app_id=? AND user_id=0",
	)
	.bind(dst.as_str())
	.bind(src.as_str())
	.execute(&mut *tx)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;

	sqlx::query(
		"INSERT INTO app_docs (app_id, user_id, collection, doc_id, body, created_at, updated_at)
		SELECT ?, 0, collection, doc_id, body, created_at, updated_at
		FROM app_docs WHERE app_id=? AND user_id=0",
	)
	.bind(dst.as_str())
	.bind(src.as_str())
	.execute(&mut *tx)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;

	tx.commit().await.map_err(|_| Error::DbError)?;
	Ok(())
}

// vim: ts=4
