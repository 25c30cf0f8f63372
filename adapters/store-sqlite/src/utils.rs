//! Row-mapping helpers shared by the entity modules.

use sqlx::sqlite::SqliteRow;
use tracing::warn;

use fazt::error::{Error, FzResult};
use fazt::types::UserId;

pub(crate) fn inspect(err: &sqlx::Error) {
	warn!("DB: {:#?}", err);
}

/// SQLITE_BUSY / SQLITE_LOCKED. With WAL and the serializer these only
/// appear past the busy timeout; they surface as 503, not 500.
fn is_transient(err: &sqlx::Error) -> bool {
	if let sqlx::Error::Database(db_err) = err {
		if let Some(code) = db_err.code() {
			return code == "5" || code == "6";
		}
	}
	false
}

fn query_err(err: sqlx::Error) -> Error {
	inspect(&err);
	if is_transient(&err) {
		Error::ServiceUnavailable("database busy".into())
	} else {
		Error::DbError
	}
}

/// Map a fetch_one result; RowNotFound becomes `Error::NotFound`.
pub(crate) fn map_res<T, F>(row: Result<SqliteRow, sqlx::Error>, f: F) -> FzResult<T>
where
	F: FnOnce(&SqliteRow) -> Result<T, sqlx::Error>,
{
	match row {
		Ok(row) => f(&row).inspect_err(inspect).map_err(|_| Error::DbError),
		Err(sqlx::Error::RowNotFound) => Err(Error::NotFound),
		Err(err) => Err(query_err(err)),
	}
}

/// Map a fetch_all result through a row mapper.
pub(crate) fn collect_rows<T, F>(
	rows: Result<Vec<SqliteRow>, sqlx::Error>,
	f: F,
) -> FzResult<Vec<T>>
where
	F: Fn(&SqliteRow) -> Result<T, sqlx::Error>,
{
	let rows = rows.map_err(query_err)?;
	let mut items = Vec::with_capacity(rows.len());
	for row in &rows {
		items.push(f(row).inspect_err(inspect).map_err(|_| Error::DbError)?);
	}
	Ok(items)
}

/// Map an execute error; unique-constraint violations become `Conflict` so
/// callers can surface label/key collisions as 409 instead of 500.
pub(crate) fn exec_err(err: sqlx::Error, what: &str) -> Error {
	if let sqlx::Error::Database(db_err) = &err {
		if db_err.is_unique_violation() {
			return Error::Conflict(what.to_string());
		}
	}
	inspect(&err);
	Error::DbError
}

/// Storage encoding of the optional per-user scope: 0 means shared app data.
pub(crate) fn uid(user: Option<UserId>) -> i64 {
	user.map_or(0, |u| u.0)
}

// vim: ts=4
