//! End users and their sessions.

use sqlx::{Row, SqlitePool};

use crate::utils::*;
use fazt::auth_adapter::{OAuthProfile, Role, SessionRecord, UserRecord};
use fazt::prelude::*;

fn map_user(row: &sqlx::sqlite::SqliteRow) -> Result<UserRecord, sqlx::Error> {
	let role: &str = row.try_get("role")?;
	Ok(UserRecord {
		id: UserId(row.try_get("user_id")?),
		provider: row.try_get::<String, _>("provider")?.into(),
		provider_id: row.try_get::<String, _>("provider_id")?.into(),
		email: row.try_get::<Option<String>, _>("email")?.map(Into::into),
		name: row.try_get::<Option<String>, _>("name")?.map(Into::into),
		avatar_url: row.try_get::<Option<String>, _>("avatar_url")?.map(Into::into),
		role: if role == "owner" { Role::Owner } else { Role::User },
		created_at: Timestamp(row.try_get("created_at")?),
	})
}

const USER_COLS: &str =
	"user_id, provider, provider_id, email, name, avatar_url, role, created_at";

/// Create-or-refresh a user from an OAuth callback. The very first user of
/// the node becomes the owner.
pub(crate) async fn upsert_oauth(db: &SqlitePool, profile: &OAuthProfile) -> FzResult<UserRecord> {
	let mut tx = db.begin().await.map_err(|_| Error::DbError)?;

	let existing: Option<i64> =
		sqlx::query_scalar("SELECT user_id FROM users WHERE provider=? AND provider_id=?")
			.bind(profile.provider.as_ref())
			.bind(profile.provider_id.as_ref())
			.fetch_optional(&mut *tx)
			.await
			.inspect_err(inspect)
			.map_err(|_| Error::DbError)?;

	let user_id = match existing {
		Some(user_id) => {
			sqlx::query("UPDATE users SET email=?, name=?, avatar_url=? WHERE user_id=?")
				.bind(profile.email.as_deref())
				.bind(profile.name.as_deref())
				.bind(profile.avatar_url.as_deref())
				.bind(user_id)
				.execute(&mut *tx)
				.await
				.inspect_err(inspect)
				.map_err(|_| Error::DbError)?;
			user_id
		}
		None => {
			let count: i64 = sqlx::query_scalar("SELECT count(*) FROM users")
				.fetch_one(&mut *tx)
				.await
				.inspect_err(inspect)
				.map_err(|_| Error::DbError)?;
			let role = if count == 0 { "owner" } else { "user" };
			let res = sqlx::query(
				"INSERT INTO users (provider, provider_id, email, name, avatar_url, role, created_at)
				VALUES (?, ?, ?, ?, ?, ?, unixepoch())",
			)
			.bind(profile.provider.as_ref())
			.bind(profile.provider_id.as_ref())
			.bind(profile.email.as_deref())
			.bind(profile.name.as_deref())
			.bind(profile.avatar_url.as_deref())
			.bind(role)
			.execute(&mut *tx)
			.await
			.inspect_err(inspect)
			.map_err(|_| Error::DbError)?;
			res.last_insert_rowid()
		}
	};

	let res = sqlx::query(&format!("SELECT {} FROM users WHERE user_id=?", USER_COLS))
		.bind(user_id)
		.fetch_one(&mut *tx)
		.await;
	let user = map_res(res, map_user)?;
	tx.commit().await.map_err(|_| Error::DbError)?;
	Ok(user)
}

pub(crate) async fn read(dbr: &SqlitePool, id: UserId) -> FzResult<UserRecord> {
	let res = sqlx::query(&format!("SELECT {} FROM users WHERE user_id=?", USER_COLS))
		.bind(id.0)
		.fetch_one(dbr)
		.await;
	map_res(res, map_user)
}

pub(crate) async fn count(dbr: &SqlitePool) -> FzResult<u64> {
	let count: i64 = sqlx::query_scalar("SELECT count(*) FROM users")
		.fetch_one(dbr)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;
	Ok(count as u64)
}

// Sessions
//**********

pub(crate) async fn create_session(
	db: &SqlitePool,
	user_id: UserId,
	token: &str,
	ttl_secs: i64,
) -> FzResult<SessionRecord> {
	let expires_at = Timestamp::from_now(ttl_secs);
	sqlx::query(
		"INSERT INTO sessions (token, user_id, created_at, expires_at)
		VALUES (?, ?, unixepoch(), ?)",
	)
	.bind(token)
	.bind(user_id.0)
	.bind(expires_at.0)
	.execute(db)
	.await
	.map_err(|err| exec_err(err, "session token collision"))?;
	Ok(SessionRecord { token: token.into(), user_id, created_at: Timestamp::now(), expires_at })
}

pub(crate) async fn read_session(
	dbr: &SqlitePool,
	token: &str,
) -> FzResult<(SessionRecord, UserRecord)> {
	let res = sqlx::query(&format!(
		"SELECT s.token, s.user_id AS session_user, s.created_at AS session_created,
			s.expires_at, {}
		FROM sessions s JOIN users USING (user_id) WHERE s.token=?",
		USER_COLS
	))
	.bind(token)
	.fetch_one(dbr)
	.await;

	let (session, user) = map_res(res, |row| {
		let session = SessionRecord {
			token: row.try_get::<String, _>("token")?.into(),
			user_id: UserId(row.try_get("session_user")?),
			created_at: Timestamp(row.try_get("session_created")?),
			expires_at: Timestamp(row.try_get("expires_at")?),
		};
		Ok((session, map_user(row)?))
	})?;

	if session.expires_at < Timestamp::now() {
		return Err(Error::SessionExpired);
	}
	Ok((session, user))
}

pub(crate) async fn renew_session(db: &SqlitePool, token: &str, ttl_secs: i64) -> FzResult<()> {
	let res = sqlx::query("UPDATE sessions SET expires_at=? WHERE token=?")
		.bind(Timestamp::from_now(ttl_secs).0)
		.bind(token)
		.execute(db)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;
	if res.rows_affected() == 0 {
		return Err(Error::NotFound);
	}
	Ok(())
}

pub(crate) async fn delete_session(db: &SqlitePool, token: &str) -> FzResult<()> {
	sqlx::query("DELETE FROM sessions WHERE token=?")
		.bind(token)
		.execute(db)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;
	Ok(())
}

pub(crate) async fn purge_expired_sessions(db: &SqlitePool) -> FzResult<u64> {
	let res = sqlx::query("DELETE FROM sessions WHERE expires_at <= unixepoch()")
		.execute(db)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;
	Ok(res.rows_affected())
}

// vim: ts=4
