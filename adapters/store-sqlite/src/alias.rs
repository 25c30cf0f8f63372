//! Alias rows: subdomain -> target mappings (proxy / redirect / split /
//! reserved).

use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::utils::*;
use fazt::meta_adapter::{AliasKind, AliasRecord, SplitTarget};
use fazt::prelude::*;

fn map_alias(row: &sqlx::sqlite::SqliteRow) -> Result<AliasRecord, sqlx::Error> {
	let kind_raw: &str = row.try_get("type")?;
	let split_raw: &str = row.try_get("split_targets")?;
	let split_targets: Vec<SplitTarget> = serde_json::from_str(split_raw).unwrap_or_default();
	Ok(AliasRecord {
		subdomain: row.try_get::<String, _>("subdomain")?.into(),
		kind: AliasKind::from_str(kind_raw).unwrap_or(AliasKind::Reserved),
		target: row.try_get::<Option<String>, _>("target")?.map(Into::into),
		permanent: row.try_get("permanent")?,
		split_targets,
		created_at: Timestamp(row.try_get("created_at")?),
	})
}

const ALIAS_COLS: &str = "subdomain, type, target, permanent, split_targets, created_at";

pub(crate) async fn upsert(db: &SqlitePool, alias: &AliasRecord) -> FzResult<()> {
	let split = serde_json::to_string(&alias.split_targets)?;
	sqlx::query(
		"INSERT INTO aliases (subdomain, type, target, permanent, split_targets, created_at)
		VALUES (?, ?, ?, ?, ?, unixepoch())
		ON CONFLICT(subdomain) DO UPDATE SET
			type=excluded.type, target=excluded.target,
			permanent=excluded.permanent, split_targets=excluded.split_targets",
	)
	.bind(alias.subdomain.as_ref())
	.bind(alias.kind.as_str())
	.bind(alias.target.as_deref())
	.bind(alias.permanent)
	.bind(&split)
	.execute(db)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;
	Ok(())
}

pub(crate) async fn read(dbr: &SqlitePool, subdomain: &str) -> FzResult<AliasRecord> {
	let res = sqlx::query(&format!("SELECT {} FROM aliases WHERE subdomain=?", ALIAS_COLS))
		.bind(subdomain)
		.fetch_one(dbr)
		.await;
	map_res(res, map_alias)
}

pub(crate) async fn list(dbr: &SqlitePool) -> FzResult<Vec<AliasRecord>> {
	let rows = sqlx::query(&format!("SELECT {} FROM aliases ORDER BY subdomain", ALIAS_COLS))
		.fetch_all(dbr)
		.await;
	collect_rows(rows, map_alias)
}

pub(crate) async fn delete(db: &SqlitePool, subdomain: &str) -> FzResult<()> {
	let res = sqlx::query("DELETE FROM aliases WHERE subdomain=?")
		.bind(subdomain)
		.execute(db)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;
	if res.rows_affected() == 0 {
		return Err(Error::NotFound);
	}
	Ok(())
}

// vim: ts=4
