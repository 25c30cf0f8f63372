//! Known remote fazt nodes. At most one peer is the default.

use sqlx::{Row, SqlitePool};

use crate::utils::*;
use fazt::meta_adapter::PeerRecord;
use fazt::prelude::*;

pub(crate) async fn upsert(db: &SqlitePool, peer: &PeerRecord) -> FzResult<()> {
	let mut tx = db.begin().await.map_err(|_| Error::DbError)?;
	if peer.is_default {
		sqlx::query("UPDATE peers SET is_default=0")
			.execute(&mut *tx)
			.await
			.inspect_err(inspect)
			.map_err(|_| Error::DbError)?;
	}
	sqlx::query(
		"INSERT INTO peers (name, admin_url, token, last_seen_at, is_default)
		VALUES (?, ?, ?, ?, ?)
		ON CONFLICT(name) DO UPDATE SET
			admin_url=excluded.admin_url, token=excluded.token,
			last_seen_at=excluded.last_seen_at, is_default=excluded.is_default",
	)
	.bind(peer.name.as_ref())
	.bind(peer.admin_url.as_ref())
	.bind(peer.token.as_ref())
	.bind(peer.last_seen_at.map(|t| t.0))
	.bind(peer.is_default)
	.execute(&mut *tx)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;
	tx.commit().await.map_err(|_| Error::DbError)?;
	Ok(())
}

pub(crate) async fn list(dbr: &SqlitePool) -> FzResult<Vec<PeerRecord>> {
	let rows = sqlx::query(
		"SELECT name, admin_url, token, last_seen_at, is_default FROM peers ORDER BY name",
	)
	.fetch_all(dbr)
	.await;
	collect_rows(rows, |row| {
		Ok(PeerRecord {
			name: row.try_get::<String, _>("name")?.into(),
			admin_url: row.try_get::<String, _>("admin_url")?.into(),
			token: row.try_get::<String, _>("token")?.into(),
			last_seen_at: row.try_get::<Option<i64>, _>("last_seen_at")?.map(Timestamp),
			is_default: row.try_get("is_default")?,
		})
	})
}

pub(crate) async fn delete(db: &SqlitePool, name: &str) -> FzResult<()> {
	let res = sqlx::query("DELETE FROM peers WHERE name=?")
		.bind(name)
		.execute(db)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;
	if res.rows_affected() == 0 {
		return Err(Error::NotFound);
	}
	Ok(())
}

pub(crate) async fn set_default(db: &SqlitePool, name: &str) -> FzResult<()> {
	let mut tx = db.begin().await.map_err(|_| Error::DbError)?;
	sqlx::query("UPDATE peers SET is_default=0")
		.execute(&mut *tx)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;
	let res = sqlx::query("UPDATE peers SET is_default=1 WHERE name=?")
		.bind(name)
		.execute(&mut *tx)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;
	if res.rows_affected() == 0 {
		return Err(Error::NotFound);
	}
	tx.commit().await.map_err(|_| Error::DbError)?;
	Ok(())
}

// vim: ts=4
