use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};

// ===== Users =====

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Volunteer,
    Public,
}

impl Role {
    pub fn from_str(role: &str) -> Self {
        match role {
            "admin" => Role::Admin,
            "public" => Role::Public,
            _ => Role::Volunteer,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Volunteer => "volunteer",
            Role::Public => "public",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Inactive,
    Suspended,
}

impl UserStatus {
    pub fn from_str(status: &str) -> Self {
        match status {
            "inactive" => UserStatus::Inactive,
            "suspended" => UserStatus::Suspended,
            _ => UserStatus::Active,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Inactive => "inactive",
            UserStatus::Suspended => "suspended",
        }
    }
}

/// Immutable snapshot of a user row. Mutations go through the
/// `UserStore`; nothing here writes back to persistence.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: Option<String>,
    pub name: String,
    pub phone: Option<String>,
    pub roles: Vec<Role>,
    pub status: UserStatus,
    pub email_verified_at: Option<DateTime<Utc>>,
    pub phone_verified_at: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

/// Fields required to insert a user; the store assigns the id and
/// creation timestamp.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: Option<String>,
    pub name: String,
    pub phone: Option<String>,
    pub roles: Vec<Role>,
    pub status: UserStatus,
}

// ===== Refresh tokens =====

/// Snapshot of a persisted refresh token. Only the SHA-256 digest of the
/// secret ever reaches the store; the raw secret is handed to the client
/// once and discarded.
#[derive(Debug, Clone)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub issued_ip: Option<String>,
    pub issued_user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && !self.is_expired(now)
    }
}

#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub issued_ip: Option<String>,
    pub issued_user_agent: Option<String>,
}

// ===== Requests and responses =====

/// Client-reported context attached to issued refresh tokens.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub password_confirmation: String,
    pub name: String,
    pub phone: Option<String>,
}

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex compiles"));
static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[1-9]\d{1,14}$").expect("phone regex compiles"));

impl RegisterRequest {
    pub fn validate(&self) -> AuthResult<()> {
        if self.password != self.password_confirmation {
            return Err(AuthError::Validation(
                "password and confirmation do not match".into(),
            ));
        }
        if !EMAIL_RE.is_match(self.email.trim()) {
            return Err(AuthError::Validation("invalid email address".into()));
        }
        if self.password.len() < 8 {
            return Err(AuthError::Validation(
                "password must be at least 8 characters long".into(),
            ));
        }
        if !self.password.chars().any(|c| c.is_ascii_lowercase()) {
            return Err(AuthError::Validation(
                "password must contain a lowercase letter".into(),
            ));
        }
        let name = self.name.trim();
        if name.is_empty() || name.len() > 255 {
            return Err(AuthError::Validation(
                "name must be between 1 and 255 characters".into(),
            ));
        }
        if let Some(phone) = &self.phone {
            if !PHONE_RE.is_match(phone.trim()) {
                return Err(AuthError::Validation(
                    "phone number must be in E.164 format".into(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// User representation returned to callers; never carries the password
/// hash.
#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub roles: Vec<Role>,
    pub status: UserStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_verified_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
            phone: user.phone.clone(),
            roles: user.roles.clone(),
            status: user.status,
            email_verified_at: user.email_verified_at,
            phone_verified_at: user.phone_verified_at,
            last_login_at: user.last_login_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthSession {
    pub tokens: SessionTokens,
    pub user: UserProfile,
}
