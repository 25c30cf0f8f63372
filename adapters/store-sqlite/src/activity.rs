//! Activity log rows with weight-first retention.

use sqlx::{Row, SqlitePool};

use crate::utils::*;
use fazt::meta_adapter::{ActivityEntry, Actor, ListActivityOptions};
use fazt::prelude::*;

pub(crate) async fn append(db: &SqlitePool, entry: ActivityEntry) -> FzResult<()> {
	let details = match &entry.details {
		Some(details) => Some(serde_json::to_string(details)?),
		None => None,
	};
	sqlx::query(
		"INSERT INTO activity_log (weight, actor, actor_id, resource, action, result, details, created_at)
		VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
	)
	.bind(i64::from(entry.weight.min(9)))
	.bind(entry.actor.as_str())
	.bind(entry.actor_id.as_deref())
	.bind(entry.resource.as_ref())
	.bind(entry.action.as_ref())
	.bind(entry.result.as_ref())
	.bind(details)
	.bind(entry.created_at.0)
	.execute(db)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;
	Ok(())
}

pub(crate) async fn list(
	dbr: &SqlitePool,
	opts: &ListActivityOptions,
) -> FzResult<Vec<ActivityEntry>> {
	let mut query = sqlx::QueryBuilder::new(
		"SELECT weight, actor, actor_id, resource, action, result, details, created_at
		FROM activity_log WHERE 1=1",
	);
	if let Some(min_weight) = opts.min_weight {
		query.push(" AND weight >= ").push_bind(i64::from(min_weight));
	}
	if let Some(resource) = &opts.resource {
		query.push(" AND resource=").push_bind(resource.as_ref());
	}
	if let Some(since) = opts.since {
		query.push(" AND created_at >= ").push_bind(since.0);
	}
	query.push(" ORDER BY created_at DESC");
	query.push(" LIMIT ").push_bind(i64::from(opts.limit.unwrap_or(100).min(1000)));

	let rows = query.build().fetch_all(dbr).await;
	collect_rows(rows, |row| {
		let actor: &str = row.try_get("actor")?;
		let details: Option<String> = row.try_get("details")?;
		Ok(ActivityEntry {
			weight: row.try_get::<i64, _>("weight")? as u8,
			actor: match actor {
				"user" => Actor::User,
				"api_key" => Actor::ApiKey,
				"anonymous" => Actor::Anonymous,
				_ => Actor::System,
			},
			actor_id: row.try_get::<Option<String>, _>("actor_id")?.map(Into::into),
			resource: row.try_get::<String, _>("resource")?.into(),
			action: row.try_get::<String, _>("action")?.into(),
			result: row.try_get::<String, _>("result")?.into(),
			details: details.and_then(|raw| serde_json::from_str(&raw).ok()),
			created_at: Timestamp(row.try_get("created_at")?),
		})
	})
}

/// Keep at most `keep_rows` entries; noise (low weight, old) ages out first
/// so signal survives the longest.
pub(crate) async fn prune(db: &SqlitePool, keep_rows: u64) -> FzResult<u64> {
	let res = sqlx::query(
		"DELETE FROM activity_log WHERE log_id IN (
			SELECT log_id FROM activity_log
			ORDER BY weight ASC, created_at ASC
			LIMIT max(0, (SELECT count(*) FROM activity_log) - ?)
		)",
	)
	.bind(keep_rows as i64)
	.execute(db)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;
	Ok(res.rows_affected())
}

// vim: ts=4
