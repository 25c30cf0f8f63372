//! Flat key/value configuration rows.

use sqlx::{Row, SqlitePool};

use crate::utils::*;
use fazt::prelude::*;

pub(crate) async fn read(dbr: &SqlitePool, key: &str) -> FzResult<Option<Box<str>>> {
	let res: Option<String> = sqlx::query_scalar("SELECT value FROM config WHERE key=?")
		.bind(key)
		.fetch_optional(dbr)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;
	Ok(res.map(Into::into))
}

pub(crate) async fn read_all(dbr: &SqlitePool) -> FzResult<Vec<(Box<str>, Box<str>)>> {
	let rows = sqlx::query("SELECT key, value FROM config ORDER BY key").fetch_all(dbr).await;
	collect_rows(rows, |row| {
		Ok((
			row.try_get::<String, _>("key")?.into(),
			row.try_get::<Option<String>, _>("value")?.unwrap_or_default().into(),
		))
	})
}

pub(crate) async fn write(db: &SqlitePool, key: &str, value: Option<&str>) -> FzResult<()> {
	match value {
		Some(value) => {
			sqlx::query(
				"INSERT INTO config (key, value) VALUES (?, ?)
				ON CONFLICT(key) DO UPDATE SET value=excluded.value",
			)
			.bind(key)
			.bind(value)
			.execute(db)
			.await
			.inspect_err(inspect)
			.map_err(|_| Error::DbError)?;
		}
		None => {
			sqlx::query("DELETE FROM config WHERE key=?")
				.bind(key)
				.execute(db)
				.await
				.inspect_err(inspect)
				.map_err(|_| Error::DbError)?;
		}
	}
	Ok(())
}

// vim: ts=4
