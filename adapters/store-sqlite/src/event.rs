//! Analytics events: append-only, inserted batch-at-a-time with a single
//! prepared statement per row inside one transaction.

use sqlx::{Row, SqlitePool};

use crate::utils::*;
use fazt::meta_adapter::{EventRecord, ListEventsOptions};
use fazt::prelude::*;

pub(crate) async fn insert_batch(db: &SqlitePool, events: Vec<EventRecord>) -> FzResult<()> {
	if events.is_empty() {
		return Ok(());
	}
	let mut tx = db.begin().await.map_err(|_| Error::DbError)?;
	for event in &events {
		sqlx::query(
			"INSERT INTO events (domain, tags, source_type, event_type, path, referrer,
				user_agent, ip, query_params, created_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
		)
		.bind(event.domain.as_ref())
		.bind(event.tags.as_deref())
		.bind(event.source_type.as_deref())
		.bind(event.event_type.as_ref())
		.bind(event.path.as_deref())
		.bind(event.referrer.as_deref())
		.bind(event.user_agent.as_deref())
		.bind(event.ip.as_deref())
		.bind(event.query_params.as_deref())
		.bind(event.created_at.0)
		.execute(&mut *tx)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;
	}
	tx.commit().await.map_err(|_| Error::DbError)?;
	Ok(())
}

pub(crate) async fn list(
	dbr: &SqlitePool,
	opts: &ListEventsOptions,
) -> FzResult<Vec<EventRecord>> {
	let mut query = sqlx::QueryBuilder::new(
		"SELECT domain, tags, source_type, event_type, path, referrer, user_agent, ip,
			query_params, created_at
		FROM events WHERE 1=1",
	);
	if let Some(domain) = &opts.domain {
		query.push(" AND domain=").push_bind(domain.as_ref());
	}
	if let Some(event_type) = &opts.event_type {
		query.push(" AND event_type=").push_bind(event_type.as_ref());
	}
	if let Some(since) = opts.since {
		query.push(" AND created_at >= ").push_bind(since.0);
	}
	query.push(" ORDER BY created_at DESC");
	query.push(" LIMIT ").push_bind(i64::from(opts.limit.unwrap_or(100).min(1000)));

	let rows = query.build().fetch_all(dbr).await;
	collect_rows(rows, |row| {
		Ok(EventRecord {
			domain: row.try_get::<String, _>("domain")?.into(),
			tags: row.try_get::<Option<String>, _>("tags")?.map(Into::into),
			source_type: row.try_get::<Option<String>, _>("source_type")?.map(Into::into),
			event_type: row.try_get::<String, _>("event_type")?.into(),
			path: row.try_get::<Option<String>, _>("path")?.map(Into::into),
			referrer: row.try_get::<Option<String>, _>("referrer")?.map(Into::into),
			user_agent: row.try_get::<Option<String>, _>("user_agent")?.map(Into::into),
			ip: row.try_get::<Option<String>, _>("ip")?.map(Into::into),
			query_params: row.try_get::<Option<String>, _>("query_params")?.map(Into::into),
			created_at: Timestamp(row.try_get("created_at")?),
		})
	})
}

pub(crate) async fn count_since(dbr: &SqlitePool, since: Timestamp) -> FzResult<u64> {
	let count: i64 = sqlx::query_scalar("SELECT count(*) FROM events WHERE created_at >= ?")
		.bind(since.0)
		.fetch_one(dbr)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;
	Ok(count as u64)
}

// vim: ts=4
