//! Persistence seams consumed by the session manager. The durable store
//! is the single source of truth; no in-process locking sits above it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AuthResult;
use crate::models::{NewRefreshToken, NewUser, RefreshTokenRecord, User, UserStatus};

pub mod memory;
pub mod postgres;

pub use memory::{MemoryRefreshTokenStore, MemoryUserStore};
pub use postgres::{PgRefreshTokenStore, PgUserStore};

/// A refresh-token row together with its eagerly resolved owner.
#[derive(Debug, Clone)]
pub struct RefreshTokenLookup {
    pub token: RefreshTokenRecord,
    pub user: User,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> AuthResult<Option<User>>;
    async fn find_by_phone(&self, phone: &str) -> AuthResult<Option<User>>;
    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<User>>;
    /// Inserts the user; unique-constraint collisions surface as
    /// `AuthError::Conflict`.
    async fn create(&self, user: NewUser) -> AuthResult<User>;
    async fn update_last_login(&self, id: Uuid, at: DateTime<Utc>) -> AuthResult<()>;
    async fn update_status(&self, id: Uuid, status: UserStatus) -> AuthResult<()>;
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn create(&self, token: NewRefreshToken) -> AuthResult<RefreshTokenRecord>;
    async fn find_by_hash(&self, token_hash: &str) -> AuthResult<Option<RefreshTokenLookup>>;
    /// Conditionally revokes the token. Returns `true` only when this
    /// call performed the transition; a token that was already revoked
    /// leaves the row untouched and returns `false`. Rotation safety
    /// under concurrency hangs on this compare-and-swap.
    async fn revoke(&self, token_id: Uuid, now: DateTime<Utc>) -> AuthResult<bool>;
    /// Revokes every active token for the user, returning how many were
    /// transitioned.
    async fn revoke_all_for_user(&self, user_id: Uuid, now: DateTime<Utc>) -> AuthResult<u64>;
    /// Housekeeping: drops rows that expired, or were revoked long ago.
    /// Correctness never depends on this running.
    async fn purge_expired(&self, now: DateTime<Utc>) -> AuthResult<u64>;
}
