//! Background worker jobs: persisted state machine rows with an atomic
//! pending -> running claim.

use sqlx::{Row, SqlitePool};

use crate::utils::*;
use fazt::meta_adapter::{JobRecord, JobStatus, UpdateJobData};
use fazt::prelude::*;

fn map_job(row: &sqlx::sqlite::SqliteRow) -> Result<JobRecord, sqlx::Error> {
	let status: &str = row.try_get("status")?;
	let parse_json = |raw: Option<String>| raw.and_then(|s| serde_json::from_str(&s).ok());
	Ok(JobRecord {
		id: row.try_get::<String, _>("job_id")?.into(),
		app_id: AppId(row.try_get::<String, _>("app_id")?.into()),
		handler: row.try_get::<String, _>("handler")?.into(),
		status: match status {
			"running" => JobStatus::Running,
			"done" => JobStatus::Done,
			"failed" => JobStatus::Failed,
			_ => JobStatus::Pending,
		},
		config: parse_json(row.try_get("config")?),
		progress: parse_json(row.try_get("progress")?),
		result: parse_json(row.try_get("result")?),
		error: row.try_get::<Option<String>, _>("error")?.map(Into::into),
		logs: row.try_get::<Option<String>, _>("logs")?.map(Into::into),
		checkpoint: parse_json(row.try_get("checkpoint")?),
		attempt: row.try_get::<i64, _>("attempt")? as u32,
		restart_count: row.try_get::<i64, _>("restart_count")? as u32,
		created_at: Timestamp(row.try_get("created_at")?),
		started_at: row.try_get::<Option<i64>, _>("started_at")?.map(Timestamp),
		done_at: row.try_get::<Option<i64>, _>("done_at")?.map(Timestamp),
		last_healthy_at: row.try_get::<Option<i64>, _>("last_healthy_at")?.map(Timestamp),
	})
}

const JOB_COLS: &str = "job_id, app_id, handler, status, config, progress, result, error, \
	logs, checkpoint, attempt, restart_count, created_at, started_at, done_at, last_healthy_at";

pub(crate) async fn create(
	db: &SqlitePool,
	app: &AppId,
	handler: &str,
	config: Option<serde_json::Value>,
) -> FzResult<JobRecord> {
	let config_raw = match &config {
		Some(config) => Some(serde_json::to_string(config)?),
		None => None,
	};
	let res = sqlx::query(&format!(
		"INSERT INTO worker_jobs (job_id, app_id, handler, status, config, created_at)
		VALUES (lower(hex(randomblob(8))), ?, ?, 'pending', ?, unixepoch())
		RETURNING {}",
		JOB_COLS
	))
	.bind(app.as_str())
	.bind(handler)
	.bind(config_raw)
	.fetch_one(db)
	.await;
	map_res(res, map_job)
}

pub(crate) async fn read(dbr: &SqlitePool, id: &str) -> FzResult<JobRecord> {
	let res = sqlx::query(&format!("SELECT {} FROM worker_jobs WHERE job_id=?", JOB_COLS))
		.bind(id)
		.fetch_one(dbr)
		.await;
	map_res(res, map_job)
}

pub(crate) async fn list(
	dbr: &SqlitePool,
	app: &AppId,
	status: Option<JobStatus>,
) -> FzResult<Vec<JobRecord>> {
	let mut query = sqlx::QueryBuilder::new(format!(
		"SELECT {} FROM worker_jobs WHERE app_id=",
		JOB_COLS
	));
	query.push_bind(app.as_str());
	if let Some(status) = status {
		query.push(" AND status=").push_bind(status.as_str());
	}
	query.push(" ORDER BY created_at DESC LIMIT 100");

	let rows = query.build().fetch_all(dbr).await;
	collect_rows(rows, map_job)
}

/// Claim the oldest pending job; the UPDATE doubles as the mutual-exclusion
/// point (it only wins when the row is still pending).
pub(crate) async fn claim_pending(db: &SqlitePool) -> FzResult<Option<JobRecord>> {
	let res = sqlx::query(&format!(
		"UPDATE worker_jobs SET status='running', started_at=unixepoch(),
			attempt=attempt+1, last_healthy_at=unixepoch()
		WHERE job_id = (
			SELECT job_id FROM worker_jobs WHERE status='pending'
			ORDER BY created_at ASC LIMIT 1
		) AND status='pending'
		RETURNING {}",
		JOB_COLS
	))
	.fetch_optional(db)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;

	match res {
		None => Ok(None),
		Some(row) => Ok(Some(map_job(&row).map_err(|_| Error::DbError)?)),
	}
}

pub(crate) async fn update(db: &SqlitePool, id: &str, data: UpdateJobData) -> FzResult<()> {
	let mut query = sqlx::QueryBuilder::new("UPDATE worker_jobs SET ");
	let mut sep = false;
	let mut push_comma = |query: &mut sqlx::QueryBuilder<'_, sqlx::Sqlite>, sep: &mut bool| {
		if *sep {
			query.push(", ");
		}
		*sep = true;
	};

	if let Some(status) = data.status {
		push_comma(&mut query, &mut sep);
		query.push("status=").push_bind(status.as_str());
		if matches!(status, JobStatus::Done | JobStatus::Failed) {
			query.push(", done_at=unixepoch()");
		}
	}
	match &data.progress {
		Patch::Undefined => {}
		Patch::Null => {
			push_comma(&mut query, &mut sep);
			query.push("progress=NULL");
		}
		Patch::Value(v) => {
			push_comma(&mut query, &mut sep);
			query.push("progress=").push_bind(serde_json::to_string(v)?);
		}
	}
	match &data.result {
		Patch::Undefined => {}
		Patch::Null => {
			push_comma(&mut query, &mut sep);
			query.push("result=NULL");
		}
		Patch::Value(v) => {
			push_comma(&mut query, &mut sep);
			query.push("result=").push_bind(serde_json::to_string(v)?);
		}
	}
	match &data.error {
		Patch::Undefined => {}
		Patch::Null => {
			push_comma(&mut query, &mut sep);
			query.push("error=NULL");
		}
		Patch::Value(v) => {
			push_comma(&mut query, &mut sep);
			query.push("error=").push_bind(v.to_string());
		}
	}
	match &data.checkpoint {
		Patch::Undefined => {}
		Patch::Null => {
			push_comma(&mut query, &mut sep);
			query.push("checkpoint=NULL");
		}
		Patch::Value(v) => {
			push_comma(&mut query, &mut sep);
			query.push("checkpoint=").push_bind(serde_json::to_string(v)?);
		}
	}
	if let Some(log_line) = &data.log_append {
		push_comma(&mut query, &mut sep);
		query.push("logs=coalesce(logs, '') || ").push_bind(format!("{}\n", log_line));
	}
	if data.mark_healthy {
		push_comma(&mut query, &mut sep);
		query.push("last_healthy_at=unixepoch()");
	}

	if !sep {
		return Ok(());
	}

	query.push(" WHERE job_id=").push_bind(id.to_string());
	let res = query
		.build()
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
