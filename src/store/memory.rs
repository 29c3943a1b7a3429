//! In-process store implementations with the same transition semantics
//! as the Postgres layer. Used by the test suite and by embedded setups
//! that do not need durable sessions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{AuthError, AuthResult, ConflictField};
use crate::models::{NewRefreshToken, NewUser, RefreshTokenRecord, User, UserStatus};
use crate::store::{RefreshTokenLookup, RefreshTokenStore, UserStore};

const REVOKED_RETENTION_DAYS: i64 = 30;

#[derive(Clone, Default)]
pub struct MemoryUserStore {
    users: Arc<Mutex<HashMap<Uuid, User>>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_email(&self, email: &str) -> AuthResult<Option<User>> {
        let users = self.users.lock();
        Ok(users
            .values()
            .find(|user| user.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_by_phone(&self, phone: &str) -> AuthResult<Option<User>> {
        let users = self.users.lock();
        Ok(users
            .values()
            .find(|user| user.phone.as_deref() == Some(phone))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<User>> {
        Ok(self.users.lock().get(&id).cloned())
    }

    async fn create(&self, user: NewUser) -> AuthResult<User> {
        let mut users = self.users.lock();
        if users
            .values()
            .any(|existing| existing.email.eq_ignore_ascii_case(&user.email))
        {
            return Err(AuthError::Conflict(ConflictField::Email));
        }
        if let Some(phone) = &user.phone {
            if users
                .values()
                .any(|existing| existing.phone.as_deref() == Some(phone.as_str()))
            {
                return Err(AuthError::Conflict(ConflictField::Phone));
            }
        }

        let created = User {
            id: Uuid::new_v4(),
            email: user.email,
            password_hash: user.password_hash,
            name: user.name,
            phone: user.phone,
            roles: user.roles,
            status: user.status,
            email_verified_at: None,
            phone_verified_at: None,
            last_login_at: None,
            created_at: Utc::now(),
        };
        users.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_last_login(&self, id: Uuid, at: DateTime<Utc>) -> AuthResult<()> {
        if let Some(user) = self.users.lock().get_mut(&id) {
            user.last_login_at = Some(at);
        }
        Ok(())
    }

    async fn update_status(&self, id: Uuid, status: UserStatus) -> AuthResult<()> {
        if let Some(user) = self.users.lock().get_mut(&id) {
            user.status = status;
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct MemoryRefreshTokenStore {
    tokens: Arc<Mutex<HashMap<Uuid, RefreshTokenRecord>>>,
    users: MemoryUserStore,
}

impl MemoryRefreshTokenStore {
    /// The store shares the user map so `find_by_hash` can resolve the
    /// owning user, mirroring the relational join.
    pub fn new(users: MemoryUserStore) -> Self {
        Self {
            tokens: Arc::new(Mutex::new(HashMap::new())),
            users,
        }
    }

    pub fn token_count(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn active_token_count(&self, user_id: Uuid, now: DateTime<Utc>) -> usize {
        self.tokens
            .lock()
            .values()
            .filter(|record| record.user_id == user_id && record.is_valid(now))
            .count()
    }

    /// Rewrites every stored expiry, letting tests age tokens without
    /// waiting out a real TTL.
    pub fn expire_all(&self, expires_at: DateTime<Utc>) {
        for record in self.tokens.lock().values_mut() {
            record.expires_at = expires_at;
        }
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryRefreshTokenStore {
    async fn create(&self, token: NewRefreshToken) -> AuthResult<RefreshTokenRecord> {
        let mut tokens = self.tokens.lock();
        if tokens
            .values()
            .any(|existing| existing.token_hash == token.token_hash)
        {
            return Err(AuthError::StoreUnavailable(
                "duplicate refresh token hash".into(),
            ));
        }

        let record = RefreshTokenRecord {
            id: Uuid::new_v4(),
            user_id: token.user_id,
            token_hash: token.token_hash,
            expires_at: token.expires_at,
            revoked_at: None,
            issued_ip: token.issued_ip,
            issued_user_agent: token.issued_user_agent,
            created_at: Utc::now(),
        };
        tokens.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_by_hash(&self, token_hash: &str) -> AuthResult<Option<RefreshTokenLookup>> {
        let record = {
            let tokens = self.tokens.lock();
            tokens
                .values()
                .find(|record| record.token_hash == token_hash)
                .cloned()
        };

        let record = match record {
            Some(record) => record,
            None => return Ok(None),
        };

        let user = self
            .users
            .find_by_id(record.user_id)
            .await?
            .ok_or_else(|| AuthError::StoreUnavailable("token owner missing".into()))?;

        Ok(Some(RefreshTokenLookup {
            token: record,
            user,
        }))
    }

    async fn revoke(&self, token_id: Uuid, now: DateTime<Utc>) -> AuthResult<bool> {
        let mut tokens = self.tokens.lock();
        match tokens.get_mut(&token_id) {
            Some(record) if record.revoked_at.is_none() => {
                record.revoked_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_for_user(&self, user_id: Uuid, now: DateTime<Utc>) -> AuthResult<u64> {
        let mut tokens = self.tokens.lock();
        let mut revoked = 0;
        for record in tokens.values_mut() {
            if record.user_id == user_id && record.revoked_at.is_none() {
                record.revoked_at = Some(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> AuthResult<u64> {
        let cutoff = now - Duration::days(REVOKED_RETENTION_DAYS);
        let mut tokens = self.tokens.lock();
        let before = tokens.len();
        tokens.retain(|_, record| {
            record.expires_at > now && record.revoked_at.map(|at| at > cutoff).unwrap_or(true)
        });
        Ok((before - tokens.len()) as u64)
    }
}
