use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{AuthError, AuthResult, ConflictField};
use crate::models::{NewRefreshToken, NewUser, RefreshTokenRecord, Role, User, UserStatus};
use crate::store::{RefreshTokenLookup, RefreshTokenStore, UserStore};

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const UNIQUE_VIOLATION: &str = "23505";

/// Revoked rows are kept this long for audit before `purge_expired`
/// deletes them.
const REVOKED_RETENTION_DAYS: i64 = 30;

#[derive(Debug, Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_one(&self, sql: &str, bind: &str) -> AuthResult<Option<User>> {
        let row = sqlx::query(sql).bind(bind).fetch_optional(&self.pool).await?;
        row.map(|row| user_from_row(&row)).transpose()
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> AuthResult<Option<User>> {
        self.find_one(
            &format!("{USER_COLUMNS} WHERE lower(email) = lower($1)"),
            email,
        )
        .await
    }

    async fn find_by_phone(&self, phone: &str) -> AuthResult<Option<User>> {
        self.find_one(&format!("{USER_COLUMNS} WHERE phone = $1"), phone)
            .await
    }

    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<User>> {
        let row = sqlx::query(&format!("{USER_COLUMNS} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| user_from_row(&row)).transpose()
    }

    async fn create(&self, user: NewUser) -> AuthResult<User> {
        let id = Uuid::new_v4();
        let roles: Vec<String> = user.roles.iter().map(|r| r.as_str().to_string()).collect();

        let result = sqlx::query(
            "INSERT INTO users (id, email, password_hash, name, phone, roles, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING id, email, password_hash, name, phone, roles, status, \
                       email_verified_at, phone_verified_at, last_login_at, created_at",
        )
        .bind(id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.name)
        .bind(&user.phone)
        .bind(&roles)
        .bind(user.status.as_str())
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => user_from_row(&row),
            Err(err) => Err(map_unique_violation(err)),
        }
    }

    async fn update_last_login(&self, id: Uuid, at: DateTime<Utc>) -> AuthResult<()> {
        sqlx::query("UPDATE users SET last_login_at = $1 WHERE id = $2")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_status(&self, id: Uuid, status: UserStatus) -> AuthResult<()> {
        sqlx::query("UPDATE users SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PgRefreshTokenStore {
    pool: PgPool,
}

impl PgRefreshTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefreshTokenStore for PgRefreshTokenStore {
    async fn create(&self, token: NewRefreshToken) -> AuthResult<RefreshTokenRecord> {
        let id = Uuid::new_v4();
        let row = sqlx::query(
            "INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at, issued_ip, issued_user_agent) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id, user_id, token_hash, expires_at, revoked_at, issued_ip, issued_user_agent, created_at",
        )
        .bind(id)
        .bind(token.user_id)
        .bind(&token.token_hash)
        .bind(token.expires_at)
        .bind(&token.issued_ip)
        .bind(&token.issued_user_agent)
        .fetch_one(&self.pool)
        .await?;

        token_from_row(&row)
    }

    async fn find_by_hash(&self, token_hash: &str) -> AuthResult<Option<RefreshTokenLookup>> {
        let row = sqlx::query(
            "SELECT t.id, t.user_id, t.token_hash, t.expires_at, t.revoked_at, \
                    t.issued_ip, t.issued_user_agent, t.created_at, \
                    u.id AS u_id, u.email, u.password_hash, u.name, u.phone, u.roles, \
                    u.status, u.email_verified_at, u.phone_verified_at, u.last_login_at, \
                    u.created_at AS u_created_at \
             FROM refresh_tokens t \
             JOIN users u ON u.id = t.user_id \
             WHERE t.token_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        Ok(Some(RefreshTokenLookup {
            token: token_from_row(&row)?,
            user: User {
                id: row.try_get("u_id")?,
                email: row.try_get("email")?,
                password_hash: row.try_get("password_hash")?,
                name: row.try_get("name")?,
                phone: row.try_get("phone")?,
                roles: roles_from_row(&row)?,
                status: UserStatus::from_str(row.try_get::<String, _>("status")?.as_str()),
                email_verified_at: row.try_get("email_verified_at")?,
                phone_verified_at: row.try_get("phone_verified_at")?,
                last_login_at: row.try_get("last_login_at")?,
                created_at: row.try_get("u_created_at")?,
            },
        }))
    }

    async fn revoke(&self, token_id: Uuid, now: DateTime<Utc>) -> AuthResult<bool> {
        // The affected-row count is the compare-and-swap signal: exactly
        // one concurrent caller observes a transition.
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = $1 WHERE id = $2 AND revoked_at IS NULL",
        )
        .bind(now)
        .bind(token_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn revoke_all_for_user(&self, user_id: Uuid, now: DateTime<Utc>) -> AuthResult<u64> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = $1 WHERE user_id = $2 AND revoked_at IS NULL",
        )
        .bind(now)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> AuthResult<u64> {
        let result = sqlx::query(
            "DELETE FROM refresh_tokens WHERE expires_at <= $1 OR (revoked_at IS NOT NULL AND revoked_at <= $2)",
        )
        .bind(now)
        .bind(now - Duration::days(REVOKED_RETENTION_DAYS))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

const USER_COLUMNS: &str = "SELECT id, email, password_hash, name, phone, roles, status, \
                            email_verified_at, phone_verified_at, last_login_at, created_at \
                            FROM users";

fn user_from_row(row: &PgRow) -> AuthResult<User> {
    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        name: row.try_get("name")?,
        phone: row.try_get("phone")?,
        roles: roles_from_row(row)?,
        status: UserStatus::from_str(row.try_get::<String, _>("status")?.as_str()),
        email_verified_at: row.try_get("email_verified_at")?,
        phone_verified_at: row.try_get("phone_verified_at")?,
        last_login_at: row.try_get("last_login_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn roles_from_row(row: &PgRow) -> AuthResult<Vec<Role>> {
    let raw: Vec<String> = row.try_get("roles")?;
    Ok(raw.iter().map(|r| Role::from_str(r)).collect())
}

fn token_from_row(row: &PgRow) -> AuthResult<RefreshTokenRecord> {
    Ok(RefreshTokenRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        token_hash: row.try_get("token_hash")?,
        expires_at: row.try_get("expires_at")?,
        revoked_at: row.try_get("revoked_at")?,
        issued_ip: row.try_get("issued_ip")?,
        issued_user_agent: row.try_get("issued_user_agent")?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_unique_violation(err: sqlx::Error) -> AuthError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
            let field = if db_err
                .constraint()
                .map(|name| name.contains("phone"))
                .unwrap_or(false)
            {
                ConflictField::Phone
            } else {
                ConflictField::Email
            };
            return AuthError::Conflict(field);
        }
    }
    AuthError::from(err)
}
