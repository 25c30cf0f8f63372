//! Tenant blob rows: content bytes + MIME, keyed `(app, user?, key)`.

use bytes::Bytes;
use sqlx::{Row, SqlitePool};

use crate::utils::*;
use fazt::data_adapter::{BlobInfo, BlobRecord, Scope};
use fazt::prelude::*;

pub(crate) async fn put(
	db: &SqlitePool,
	scope: &Scope,
	key: &str,
	bytes: Bytes,
	mime: &str,
) -> FzResult<()> {
	sqlx::query(
		"INSERT INTO app_blobs (app_id, user_id, key, bytes, mime, size, created_at)
		VALUES (?, ?, ?, ?, ?, ?, unixepoch())
		ON CONFLICT(app_id, user_id, key) DO UPDATE SET
			bytes=excluded.bytes, mime=excluded.mime, size=excluded.size",
	)
	.bind(scope.app_id.as_str())
	.bind(uid(scope.user_id))
	.bind(key)
	.bind(bytes.as_ref())
	.bind(mime)
	.bind(bytes.len() as i64)
	.execute(db)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;
	Ok(())
}

pub(crate) async fn get(dbr: &SqlitePool, scope: &Scope, key: &str) -> FzResult<BlobRecord> {
	let res = sqlx::query(
		"SELECT key, bytes, mime, size FROM app_blobs WHERE app_id=? AND user_id=? AND key=?",
	)
	.bind(scope.app_id.as_str())
	.bind(uid(scope.user_id))
	.bind(key)
	.fetch_one(dbr)
	.await;
	map_res(res, |row| {
		Ok(BlobRecord {
			key: row.try_get::<String, _>("key")?.into(),
			bytes: Bytes::from(row.try_get::<Vec<u8>, _>("bytes")?),
			mime: row.try_get::<String, _>("mime")?.into(),
			size: row.try_get::<i64, _>("size")? as u64,
		})
	})
}

pub(crate) async fn delete(db: &SqlitePool, scope: &Scope, key: &str) -> FzResult<bool> {
	let res = sqlx::query("DELETE FROM app_blobs WHERE app_id=? AND user_id=? AND key=?")
		.bind(scope.app_id.as_str())
		.bind(uid(scope.user_id))
		.bind(key)
		.execute(db)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;
	Ok(res.rows_affected() > 0)
}

pub(crate) async fn list(dbr: &SqlitePool, scope: &Scope) -> FzResult<Vec<BlobInfo>> {
	let rows = sqlx::query(
		"SELECT key, mime, size FROM app_blobs WHERE app_id=? AND user_id=? ORDER BY key",
	)
	.bind(scope.app_id.as_str())
	.bind(uid(scope.user_id))
	.fetch_all(dbr)
	.await;
	collect_rows(rows, |row| {
		Ok(BlobInfo {
			key: row.try_get::<String, _>("key")?.into(),
			mime: row.try_get::<String, _>("mime")?.into(),
			size: row.try_get::<i64, _>("size")? as u64,
		})
	})
}

// vim: ts=4
