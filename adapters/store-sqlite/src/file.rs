//! VFS rows: app files stored as blobs with their MIME type.

use bytes::Bytes;
use sqlx::{Row, SqlitePool};

use crate::utils::*;
use fazt::meta_adapter::{FileInfo, FileRecord};
use fazt::prelude::*;

pub(crate) async fn write(
	db: &SqlitePool,
	app: &AppId,
	path: &str,
	bytes: Bytes,
	mime: &str,
) -> FzResult<()> {
	sqlx::query(
		"INSERT INTO app_files (app_id, path, bytes, mime, modified_at)
		VALUES (?, ?, ?, ?, unixepoch())
		ON CONFLICT(app_id, path) DO UPDATE SET
			bytes=excluded.bytes, mime=excluded.mime, modified_at=unixepoch()",
	)
	.bind(app.as_str())
	.bind(path)
	.bind(bytes.as_ref())
	.bind(mime)
	.execute(db)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;
	Ok(())
}

pub(crate) async fn read(dbr: &SqlitePool, app: &AppId, path: &str) -> FzResult<FileRecord> {
	let res = sqlx::query(
		"SELECT path, bytes, mime, modified_at FROM app_files WHERE app_id=? AND path=?",
	)
	.bind(app.as_str())
	.bind(path)
	.fetch_one(dbr)
	.await;
	map_res(res, |row| {
		Ok(FileRecord {
			path: row.try_get::<String, _>("path")?.into(),
			bytes: Bytes::from(row.try_get::<Vec<u8>, _>("bytes")?),
			mime: row.try_get::<String, _>("mime")?.into(),
			modified_at: Timestamp(row.try_get("modified_at")?),
		})
	})
}

pub(crate) async fn list(dbr: &SqlitePool, app: &AppId) -> FzResult<Vec<FileInfo>> {
	let rows = sqlx::query(
		"SELECT path, mime, length(bytes) AS size, modified_at
		FROM app_files WHERE app_id=? ORDER BY path",
	)
	.bind(app.as_str())
	.fetch_all(dbr)
	.await;
	collect_rows(rows, |row| {
		Ok(FileInfo {
			path: row.try_get::<String, _>("path")?.into(),
			mime: row.try_get::<String, _>("mime")?.into(),
			size: row.try_get::<i64, _>("size")? as u64,
			modified_at: Timestamp(row.try_get("modified_at")?),
		})
	})
}

pub(crate) async fn delete(db: &SqlitePool, app: &AppId, path: &str) -> FzResult<()> {
	let res = sqlx::query("DELETE FROM app_files WHERE app_id=? AND path=?")
		.bind(app.as_str())
		.bind(path)
		.execute(db)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;
	if res.rows_affected() == 0 {
		return Err(Error::NotFound);
	}
	Ok(())
}

pub(crate) async fn copy_all(db: &SqlitePool, src: &AppId, dst: &AppId) -> FzResult<u64> {
	let res = sqlx::query(
		"INSERT INTO app_files (app_id, path, bytes, mime, modified_at)
		SELECT ?, path, bytes, mime, unixepoch() FROM app_files WHERE app_id=?",
	)
	.bind(dst.as_str())
	.bind(src.as_str())
	.execute(db)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;
	Ok(res.rows_affected())
}

// vim: ts=4
