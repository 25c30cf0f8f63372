//! Certificate store: the narrow load/store/delete/lock surface backing
//! the external TLS manager's storage callbacks.

use sqlx::{Row, SqlitePool};

use crate::utils::*;
use fazt::auth_adapter::CertData;
use fazt::prelude::*;

fn map_cert(row: &sqlx::sqlite::SqliteRow) -> Result<CertData, sqlx::Error> {
	Ok(CertData {
		domain: row.try_get::<String, _>("domain")?.into(),
		cert_pem: row.try_get::<String, _>("cert_pem")?.into(),
		key_pem: row.try_get::<String, _>("key_pem")?.into(),
	})
}

pub(crate) async fn read(dbr: &SqlitePool, domain: &str) -> FzResult<CertData> {
	let res = sqlx::query("SELECT domain, cert_pem, key_pem FROM certs WHERE domain=?")
		.bind(domain)
		.fetch_one(dbr)
		.await;
	map_res(res, map_cert)
}

pub(crate) async fn store(db: &SqlitePool, cert: &CertData) -> FzResult<()> {
	sqlx::query(
		"INSERT INTO certs (domain, cert_pem, key_pem, updated_at)
		VALUES (?, ?, ?, unixepoch())
		ON CONFLICT(domain) DO UPDATE SET
			cert_pem=excluded.cert_pem, key_pem=excluded.key_pem, updated_at=unixepoch()",
	)
	.bind(cert.domain.as_ref())
	.bind(cert.cert_pem.as_ref())
	.bind(cert.key_pem.as_ref())
	.execute(db)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;
	Ok(())
}

pub(crate) async fn delete(db: &SqlitePool, domain: &str) -> FzResult<()> {
	sqlx::query("DELETE FROM certs WHERE domain=?")
		.bind(domain)
		.execute(db)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;
	Ok(())
}

pub(crate) async fn list(dbr: &SqlitePool) -> FzResult<Vec<CertData>> {
	let rows =
		sqlx::query("SELECT domain, cert_pem, key_pem FROM certs ORDER BY domain").fetch_all(dbr).await;
	collect_rows(rows, map_cert)
}

/// Take the advisory lock unless a live one is held by someone else.
pub(crate) async fn acquire_lock(db: &SqlitePool, name: &str, ttl_secs: i64) -> FzResult<bool> {
	let mut tx = db.begin().await.map_err(|_| Error::DbError)?;

	sqlx::query("DELETE FROM locks WHERE name=? AND expires_at <= unixepoch()")
		.bind(name)
		.execute(&mut *tx)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;

	let res = sqlx::query(
		"INSERT INTO locks (name, acquired_at, expires_at) VALUES (?, unixepoch(), ?)
		ON CONFLICT(name) DO NOTHING",
	)
	.bind(name)
	.bind(Timestamp::from_now(ttl_secs).0)
	.execute(&mut *tx)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;

	tx.commit().await.map_err(|_| Error::DbError)?;
	Ok(res.rows_affected() > 0)
}

pub(crate) async fn release_lock(db: &SqlitePool, name: &str) -> FzResult<()> {
	sqlx::query("DELETE FROM locks WHERE name=?")
		.bind(name)
		.execute(db)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;
	Ok(())
}

// vim: ts=4
