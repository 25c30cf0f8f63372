//! Per-app outbound HTTP allowlist rows.

use sqlx::{Row, SqlitePool};

use crate::utils::*;
use fazt::meta_adapter::NetRule;
use fazt::prelude::*;

fn map_rule(row: &sqlx::sqlite::SqliteRow) -> Result<NetRule, sqlx::Error> {
	Ok(NetRule {
		domain: row.try_get::<String, _>("domain")?.into(),
		https_only: row.try_get("https_only")?,
		rate_per_min: row.try_get::<i64, _>("rate_per_min")? as u32,
		burst: row.try_get::<i64, _>("burst")? as u32,
		max_response_bytes: row.try_get::<i64, _>("max_response_bytes")? as u64,
		timeout_ms: row.try_get::<i64, _>("timeout_ms")? as u64,
		cache_ttl_secs: row.try_get::<i64, _>("cache_ttl_secs")? as u64,
	})
}

pub(crate) async fn list(dbr: &SqlitePool, app: &AppId) -> FzResult<Vec<NetRule>> {
	let rows = sqlx::query(
		"SELECT domain, https_only, rate_per_min, burst, max_response_bytes, timeout_ms,
			cache_ttl_secs
		FROM net_allowlist WHERE app_id=? ORDER BY domain",
	)
	.bind(app.as_str())
	.fetch_all(dbr)
	.await;
	collect_rows(rows, map_rule)
}

pub(crate) async fn upsert(db: &SqlitePool, app: &AppId, rule: &NetRule) -> FzResult<()> {
	sqlx::query(
		"INSERT INTO net_allowlist (app_id, domain, https_only, rate_per_min, burst,
			max_response_bytes, timeout_ms, cache_ttl_secs)
		VALUES (?, ?, ?, ?, ?, ?, ?, ?)
		ON CONFLICT(app_id, domain) DO UPDATE SET
			https_only=excluded.https_only, rate_per_min=excluded.rate_per_min,
			burst=excluded.burst, max_response_bytes=excluded.max_response_bytes,
			timeout_ms=excluded.timeout_ms, cache_ttl_secs=excluded.cache_ttl_secs",
	)
	.bind(app.as_str())
	.bind(rule.domain.as_ref())
	.bind(rule.https_only)
	.bind(i64::from(rule.rate_per_min))
	.bind(i64::from(rule.burst))
	.bind(rule.max_response_bytes as i64)
	.bind(rule.timeout_ms as i64)
	.bind(rule.cache_ttl_secs as i64)
	.execute(db)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;
	Ok(())
}

pub(crate) async fn delete(db: &SqlitePool, app: &AppId, domain: &str) -> FzResult<()> {
	let res = sqlx::query("DELETE FROM net_allowlist WHERE app_id=? AND domain=?")
		.bind(app.as_str())
		.bind(domain)
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
