//! Named snapshots: a JSON dump of an app's whole KV + docs state, and the
//! transactional restore that replaces both.

use serde_json::{json, Value};
use sqlx::{Row, SqlitePool};

use crate::utils::*;
use fazt::data_adapter::SnapshotInfo;
use fazt::prelude::*;

async fn dump_app<'c>(
	tx: &mut sqlx::Transaction<'c, sqlx::Sqlite>,
	app: &AppId,
) -> FzResult<Value> {
	let kv_rows = sqlx::query(
		"SELECT user_id, key, value, expires_at FROM app_kv WHERE app_id=? ORDER BY user_id, key",
	)
	.bind(app.as_str())
	.fetch_all(&mut **tx)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;

	let mut kv = Vec::with_capacity(kv_rows.len());
	for row in &kv_rows {
		let value: Value =
			serde_json::from_str(row.try_get::<&str, _>("value").map_err(|_| Error::DbError)?)?;
		kv.push(json!({
			"userId": row.try_get::<i64, _>("user_id").map_err(|_| Error::DbError)?,
			"key": row.try_get::<String, _>("key").map_err(|_| Error::DbError)?,
			"value": value,
			"expiresAt": row.try_get::<Option<i64>, _>("expires_at").map_err(|_| Error::DbError)?,
		}));
	}

	let doc_rows = sqlx::query(
		"SELECT user_id, collection, doc_id, body, created_at, updated_at
		FROM app_docs WHERE app_id=? ORDER BY user_id, collection, doc_id",
	)
	.bind(app.as_str())
	.fetch_all(&mut **tx)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;

	let mut docs = Vec::with_capacity(doc_rows.len());
	for row in &doc_rows {
		let body: Value =
			serde_json::from_str(row.try_get::<&str, _>("body").map_err(|_| Error::DbError)?)?;
		docs.push(json!({
			"userId": row.try_get::<i64, _>("user_id").map_err(|_| Error::DbError)?,
			"collection": row.try_get::<String, _>("collection").map_err(|_| Error::DbError)?,
			"docId": row.try_get::<String, _>("doc_id").map_err(|_| Error::DbError)?,
			"body": body,
			"createdAt": row.try_get::<i64, _>("created_at").map_err(|_| Error::DbError)?,
			"updatedAt": row.try_get::<i64, _>("updated_at").map_err(|_| Error::DbError)?,
		}));
	}

	Ok(json!({ "kv": kv, "docs": docs }))
}

pub(crate) async fn create(db: &SqlitePool, app: &AppId, name: &str) -> FzResult<SnapshotInfo> {
	let mut tx = db.begin().await.map_err(|_| Error::DbError)?;
	let dump = dump_app(&mut tx, app).await?;
	let raw = serde_json::to_string(&dump)?;
	let size = raw.len() as u64;

	sqlx::query(
		"INSERT INTO app_snapshots (app_id, name, dump, created_at)
		VALUES (?, ?, ?, unixepoch())
		ON CONFLICT(app_id, name) DO UPDATE SET dump=excluded.dump, created_at=unixepoch()",
	)
	.bind(app.as_str())
	.bind(name)
	.bind(&raw)
	.execute(&mut *tx)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;

	tx.commit().await.map_err(|_| Error::DbError)?;
	Ok(SnapshotInfo { name: name.into(), created_at: Timestamp::now(), size })
}

pub(crate) async fn restore(db: &SqlitePool, app: &AppId, name: &str) -> FzResult<()> {
	let mut tx = db.begin().await.map_err(|_| Error::DbError)?;

	let raw: String = sqlx::query_scalar("SELECT dump FROM app_snapshots WHERE app_id=? AND name=?")
		.bind(app.as_str())
		.bind(name)
		.fetch_optional(&mut *tx)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?
		.ok_or(Error::NotFound)?;
	let dump: Value = serde_json::from_str(&raw)?;

	sqlx::query("DELETE FROM app_kv WHERE app_id=?")
		.bind(app.as_str())
		.execute(&mut *tx)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;
	sqlx::query("DELETE FROM app_docs WHERE app_id=?")
		.bind(app.as_str())
		.execute(&mut *tx)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;

	for entry in dump.get("kv").and_then(Value::as_array).into_iter().flatten() {
		let value = entry.get("value").cloned().unwrap_or(Value::Null);
		sqlx::query(
			"INSERT INTO app_kv (app_id, user_id, key, value, expires_at) VALUES (?, ?, ?, ?, ?)",
		)
		.bind(app.as_str())
		.bind(entry.get("userId").and_then(Value::as_i64).unwrap_or(0))
		.bind(entry.get("key").and_then(Value::as_str).unwrap_or_default())
		.bind(serde_json::to_string(&value)?)
		.bind(entry.get("expiresAt").and_then(Value::as_i64))
		.execute(&mut *tx)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;
	}

	for entry in dump.get("docs").and_then(Value::as_array).into_iter().flatten() {
		let body = entry.get("body").cloned().unwrap_or(Value::Null);
		sqlx::query(
			"INSERT INTO app_docs (app_id, user_id, collection, doc_id, body, created_at, updated_at)
			VALUES (?, ?, ?, ?, ?, ?, ?)",
		)
		.bind(app.as_str())
		.bind(entry.get("userId").and_then(Value::as_i64).unwrap_or(0))
		.bind(entry.get("collection").and_then(Value::as_str).unwrap_or_default())
		.bind(entry.get("docId").and_then(Value::as_str).unwrap_or_default())
		.bind(serde_json::to_string(&body)?)
		.bind(entry.get("createdAt").and_then(Value::as_i64).unwrap_or_else(|| Timestamp::now().0))
		.bind(entry.get("updatedAt").and_then(Value::as_i64).unwrap_or_else(|| Timestamp::now().0))
		.execute(&mut *tx)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;
	}

	tx.commit().await.map_err(|_| Error::DbError)?;
	Ok(())
}

pub(crate) async fn list(dbr: &SqlitePool, app: &AppId) -> FzResult<Vec<SnapshotInfo>> {
	let rows = sqlx::query(
		"SELECT name, length(dump) AS size, created_at FROM app_snapshots
		WHERE app_id=? ORDER BY created_at DESC",
	)
	.bind(app.as_str())
	.fetch_all(dbr)
	.await;
	collect_rows(rows, |row| {
		Ok(SnapshotInfo {
			name: row.try_get::<String, _>("name")?.into(),
			created_at: Timestamp(row.try_get("created_at")?),
			size: row.try_get::<i64, _>("size")? as u64,
		})
	})
}

/// Read-only variant of the snapshot dump for `/_fazt/storage`.
pub(crate) async fn storage_dump(db: &SqlitePool, app: &AppId) -> FzResult<Value> {
	let mut tx = db.begin().await.map_err(|_| Error::DbError)?;
	let dump = dump_app(&mut tx, app).await?;
	tx.commit().await.map_err(|_| Error::DbError)?;
	Ok(dump)
}

// vim: ts=4
