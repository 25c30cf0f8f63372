//! Tenant key-value rows. Values are JSON text; expired rows read as
//! absent and are swept out of band.

use serde_json::Value;
use sqlx::{Row, SqlitePool};

use crate::utils::*;
use fazt::data_adapter::Scope;
use fazt::prelude::*;

pub(crate) async fn get(dbr: &SqlitePool, scope: &Scope, key: &str) -> FzResult<Option<Value>> {
	let res = sqlx::query(
		"SELECT value FROM app_kv
		WHERE app_id=? AND user_id=? AND key=?
			AND (expires_at IS NULL OR expires_at > unixepoch())",
	)
	.bind(scope.app_id.as_str())
	.bind(uid(scope.user_id))
	.bind(key)
	.fetch_optional(dbr)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;

	match res {
		None => Ok(None),
		Some(row) => {
			let raw: &str = row.try_get("value").map_err(|_| Error::DbError)?;
			Ok(Some(serde_json::from_str(raw)?))
		}
	}
}

pub(crate) async fn set(
	db: &SqlitePool,
	scope: &Scope,
	key: &str,
	value: &Value,
	ttl_secs: Option<i64>,
) -> FzResult<()> {
	let raw = serde_json::to_string(value)?;
	let expires_at = ttl_secs.map(|ttl| Timestamp::from_now(ttl).0);
	sqlx::query(
		"INSERT INTO app_kv (app_id, user_id, key, value, expires_at)
		VALUES (?, ?, ?, ?, ?)
		ON CONFLICT(app_id, user_id, key) DO UPDATE SET
			value=excluded.value, expires_at=excluded.expires_at",
	)
	.bind(scope.app_id.as_str())
	.bind(uid(scope.user_id))
	.bind(key)
	.bind(&raw)
	.bind(expires_at)
	.execute(db)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;
	Ok(())
}

pub(crate) async fn del(db: &SqlitePool, scope: &Scope, key: &str) -> FzResult<bool> {
	let res = sqlx::query("DELETE FROM app_kv WHERE app_id=? AND user_id=? AND key=?")
		.bind(scope.app_id.as_str())
		.bind(uid(scope.user_id))
		.bind(key)
		.execute(db)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;
	Ok(res.rows_affected() > 0)
}

pub(crate) async fn keys(
	dbr: &SqlitePool,
	scope: &Scope,
	prefix: Option<&str>,
) -> FzResult<Vec<Box<str>>> {
	let mut query = sqlx::QueryBuilder::new(
		"SELECT key FROM app_kv
		WHERE app_id=",
	);
	query.push_bind(scope.app_id.as_str());
	query.push(" AND user_id=").push_bind(uid(scope.user_id));
	query.push(" AND (expires_at IS NULL OR expires_at > unixepoch())");
	if let Some(prefix) = prefix {
		// Escape LIKE wildcards so a prefix of "a%b" matches literally
		let escaped = prefix.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
		query.push(" AND key LIKE ").push_bind(format!("{}%", escaped));
		query.push(" ESCAPE '\\'");
	}
	query.push(" ORDER BY key");

	let rows = query.build().fetch_all(dbr).await;
	collect_rows(rows, |row| Ok(row.try_get::<String, _>("key")?.into()))
}

pub(crate) async fn purge_expired(db: &SqlitePool) -> FzResult<u64> {
	let res = sqlx::query(
		"DELETE FROM app_kv WHERE expires_at IS NOT NULL AND expires_at <= unixepoch()",
	)
	.execute(db)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;
	Ok(res.rows_affected())
}

// vim: ts=4
