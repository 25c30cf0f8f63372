//! Tenant document store: JSON bodies addressed by collection + doc id,
//! queried through the typed expression AST.

use serde_json::Value;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::utils::*;
use fazt::data_adapter::{DocRecord, Scope};
use fazt::prelude::*;
use fazt::storage::query::{DocQuery, Order, Where};

fn map_doc(row: &sqlx::sqlite::SqliteRow) -> Result<DocRecord, sqlx::Error> {
	let raw: &str = row.try_get("body")?;
	let body: Value = serde_json::from_str(raw).unwrap_or(Value::Null);
	Ok(DocRecord {
		doc_id: row.try_get::<String, _>("doc_id")?.into(),
		collection: row.try_get::<String, _>("collection")?.into(),
		body,
		created_at: Timestamp(row.try_get("created_at")?),
		updated_at: Timestamp(row.try_get("updated_at")?),
	})
}

fn push_value(query: &mut QueryBuilder<'_, Sqlite>, value: &Value) {
	match value {
		Value::Null => {
			query.push("NULL");
		}
		Value::Bool(b) => {
			query.push_bind(i64::from(*b));
		}
		Value::Number(n) => {
			if let Some(i) = n.as_i64() {
				query.push_bind(i);
			} else {
				query.push_bind(n.as_f64().unwrap_or(0.0));
			}
		}
		Value::String(s) => {
			query.push_bind(s.clone());
		}
		other => {
			query.push_bind(other.to_string());
		}
	}
}

fn push_where(query: &mut QueryBuilder<'_, Sqlite>, filter: &Where) {
	match filter {
		Where::Eq(field, value) | Where::Lt(field, value) | Where::Gt(field, value) => {
			let op = match filter {
				Where::Eq(..) => " = ",
				Where::Lt(..) => " < ",
				_ => " > ",
			};
			query.push("json_extract(body, ");
			query.push_bind(DocQuery::json_path(field));
			query.push(")");
			query.push(op);
			push_value(query, value);
		}
		Where::In(field, values) => {
			query.push("json_extract(body, ");
			query.push_bind(DocQuery::json_path(field));
			query.push(") IN (");
			for (i, value) in values.iter().enumerate() {
				if i > 0 {
					query.push(", ");
				}
				push_value(query, value);
			}
			query.push(")");
		}
		Where::And(exprs) | Where::Or(exprs) => {
			let joiner = if matches!(filter, Where::And(_)) { " AND " } else { " OR " };
			query.push("(");
			for (i, expr) in exprs.iter().enumerate() {
				if i > 0 {
					query.push(joiner);
				}
				push_where(query, expr);
			}
			query.push(")");
		}
	}
}

pub(crate) async fn insert(
	db: &SqlitePool,
	scope: &Scope,
	collection: &str,
	body: Value,
) -> FzResult<DocRecord> {
	let raw = serde_json::to_string(&body)?;
	let res = sqlx::query(
		"INSERT INTO app_docs (app_id, user_id, collection, doc_id, body, created_at, updated_at)
		VALUES (?, ?, ?, lower(hex(randomblob(8))), ?, unixepoch(), unixepoch())
		RETURNING doc_id, collection, body, created_at, updated_at",
	)
	.bind(scope.app_id.as_str())
	.bind(uid(scope.user_id))
	.bind(collection)
	.bind(&raw)
	.fetch_one(db)
	.await;
	map_res(res, map_doc)
}

pub(crate) async fn get(
	dbr: &SqlitePool,
	scope: &Scope,
	collection: &str,
	doc_id: &str,
) -> FzResult<DocRecord> {
	let res = sqlx::query(
		"SELECT doc_id, collection, body, created_at, updated_at FROM app_docs
		WHERE app_id=? AND user_id=? AND collection=? AND doc_id=?",
	)
	.bind(scope.app_id.as_str())
	.bind(uid(scope.user_id))
	.bind(collection)
	.bind(doc_id)
	.fetch_one(dbr)
	.await;
	map_res(res, map_doc)
}

pub(crate) async fn query(
	dbr: &SqlitePool,
	scope: &Scope,
	collection: &str,
	doc_query: &DocQuery,
) -> FzResult<Vec<DocRecord>> {
	let mut query = QueryBuilder::new(
		"SELECT doc_id, collection, body, created_at, updated_at FROM app_docs WHERE app_id=",
	);
	query.push_bind(scope.app_id.as_str());
	query.push(" AND user_id=").push_bind(uid(scope.user_id));
	query.push(" AND collection=").push_bind(collection);
	if let Some(filter) = &doc_query.filter {
		query.push(" AND ");
		push_where(&mut query, filter);
	}
	match &doc_query.order {
		Some((field, dir)) => {
			query.push(" ORDER BY json_extract(body, ");
			query.push_bind(DocQuery::json_path(field));
			query.push(")");
			query.push(if *dir == Order::Desc { " DESC" } else { " ASC" });
		}
		None => {
			query.push(" ORDER BY created_at ASC");
		}
	}
	query.push(" LIMIT ").push_bind(i64::from(doc_query.limit.unwrap_or(100)));
	query.push(" OFFSET ").push_bind(i64::from(doc_query.offset.unwrap_or(0)));

	let rows = query.build().fetch_all(dbr).await;
	collect_rows(rows, map_doc)
}

pub(crate) async fn update(
	db: &SqlitePool,
	scope: &Scope,
	collection: &str,
	doc_id: &str,
	body: Value,
) -> FzResult<DocRecord> {
	let raw = serde_json::to_string(&body)?;
	let res = sqlx::query(
		"UPDATE app_docs SET body=?, updated_at=unixepoch()
		WHERE app_id=? AND user_id=? AND collection=? AND doc_id=?
		RETURNING doc_id, collection, body, created_at, updated_at",
	)
	.bind(&raw)
	.bind(scope.app_id.as_str())
	.bind(uid(scope.user_id))
	.bind(collection)
	.bind(doc_id)
	.fetch_one(db)
	.await;
	map_res(res, map_doc)
}

pub(crate) async fn delete(
	db: &SqlitePool,
	scope: &Scope,
	collection: &str,
	doc_id: &str,
) -> FzResult<bool> {
	let res = sqlx::query(
		"DELETE FROM app_docs WHERE app_id=? AND user_id=? AND collection=? AND doc_id=?",
	)
	.bind(scope.app_id.as_str())
	.bind(uid(scope.user_id))
	.bind(collection)
	.bind(doc_id)
	.execute(db)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;
	Ok(res.rows_affected() > 0)
}

// vim: ts=4
