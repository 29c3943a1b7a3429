//! Session lifecycle orchestration: registration, login, refresh-token
//! rotation, logout, and access-token resolution. All state transitions
//! for refresh tokens happen here, on top of the store seams.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult, ConflictField};
use crate::jwt::{AccessTokenClaims, JwtService};
use crate::models::{
    AuthSession, ClientInfo, LoginRequest, NewRefreshToken, NewUser, RegisterRequest,
    SessionTokens, User, UserProfile,
};
use crate::passwords::PasswordService;
use crate::store::{RefreshTokenStore, UserStore};

const REFRESH_SECRET_LEN: usize = 40;

pub struct SessionManager {
    config: AuthConfig,
    users: Arc<dyn UserStore>,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    passwords: PasswordService,
    jwt: JwtService,
}

impl SessionManager {
    /// Validates the configuration and builds the credential services
    /// before anything can be served.
    pub fn new(
        config: AuthConfig,
        users: Arc<dyn UserStore>,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
    ) -> AuthResult<Self> {
        config.validate()?;
        let passwords = PasswordService::from_config(&config)?;
        let jwt = JwtService::from_config(&config)?;
        Ok(Self {
            config,
            users,
            refresh_tokens,
            passwords,
            jwt,
        })
    }

    pub async fn register(
        &self,
        request: RegisterRequest,
        client: ClientInfo,
    ) -> AuthResult<AuthSession> {
        request.validate()?;
        let email = request.email.trim().to_lowercase();

        if self.users.find_by_email(&email).await?.is_some() {
            return Err(AuthError::Conflict(ConflictField::Email));
        }
        if let Some(phone) = &request.phone {
            if self.users.find_by_phone(phone.trim()).await?.is_some() {
                return Err(AuthError::Conflict(ConflictField::Phone));
            }
        }

        let password_hash = self.passwords.hash_password(&request.password)?;

        // The store's unique constraints back-stop the pre-checks above
        // under concurrent registrations.
        let user = self
            .users
            .create(NewUser {
                email,
                password_hash: Some(password_hash),
                name: request.name.trim().to_string(),
                phone: request.phone.map(|p| p.trim().to_string()),
                roles: vec![self.config.default_registration_role],
                status: crate::models::UserStatus::Active,
            })
            .await?;

        let now = Utc::now();
        let tokens = self.issue_session(&user, &client, now).await?;
        info!("registered user {} ({})", user.id, user.email);

        Ok(AuthSession {
            tokens,
            user: UserProfile::from(&user),
        })
    }

    pub async fn login(
        &self,
        request: LoginRequest,
        client: ClientInfo,
    ) -> AuthResult<AuthSession> {
        let email = request.email.trim().to_lowercase();
        let password = request.password.trim();
        if email.is_empty() || password.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }

        // A missing user and a wrong password are indistinguishable to
        // the caller.
        let mut user = self
            .users
            .find_by_email(&email)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if !user.is_active() {
            return Err(AuthError::AccountInactive);
        }

        // Accounts without a password hash (public sign-ins provisioned
        // elsewhere) cannot log in with a password.
        let password_hash = user
            .password_hash
            .as_deref()
            .ok_or(AuthError::InvalidCredentials)?;

        if !self.passwords.verify_password(password, password_hash)? {
            debug!("failed login attempt for {}", user.id);
            return Err(AuthError::InvalidCredentials);
        }

        let now = Utc::now();
        self.users.update_last_login(user.id, now).await?;
        user.last_login_at = Some(now);

        let tokens = self.issue_session(&user, &client, now).await?;
        info!("user {} logged in", user.id);

        Ok(AuthSession {
            tokens,
            user: UserProfile::from(&user),
        })
    }

    /// Rotates the presented refresh token: the old token is revoked and
    /// a replacement issued as one logical unit. Under concurrent calls
    /// with the same token, the store's conditional update lets exactly
    /// one caller through.
    pub async fn refresh(&self, raw_token: &str, client: ClientInfo) -> AuthResult<AuthSession> {
        let token_hash = hash_refresh_token(raw_token);
        let now = Utc::now();

        let lookup = match self.refresh_tokens.find_by_hash(&token_hash).await? {
            Some(lookup) => lookup,
            None => {
                debug!("refresh with unknown token");
                return Err(AuthError::InvalidRefreshToken);
            }
        };

        if lookup.token.revoked_at.is_some() {
            // Replay of a rotated-away token: assume the family is
            // compromised and revoke everything the owner holds. The
            // caller still sees the undifferentiated error.
            let revoked = self
                .refresh_tokens
                .revoke_all_for_user(lookup.token.user_id, now)
                .await?;
            warn!(
                "refresh token reuse for user {}; revoked {} active tokens",
                lookup.token.user_id, revoked
            );
            return Err(AuthError::InvalidRefreshToken);
        }

        if lookup.token.is_expired(now) {
            return Err(AuthError::InvalidRefreshToken);
        }

        if !lookup.user.is_active() {
            return Err(AuthError::AccountInactive);
        }

        // Compare-and-swap: losing a concurrent rotation of the same
        // token means it is already revoked, which is exactly what the
        // uniform error reports.
        if !self.refresh_tokens.revoke(lookup.token.id, now).await? {
            return Err(AuthError::InvalidRefreshToken);
        }

        let tokens = self.issue_session(&lookup.user, &client, now).await?;
        debug!("rotated refresh token for user {}", lookup.user.id);

        Ok(AuthSession {
            tokens,
            user: UserProfile::from(&lookup.user),
        })
    }

    /// With a token: revokes that token if it belongs to the user, and
    /// succeeds even when it is absent or already revoked. Without one:
    /// revokes every token the user holds.
    pub async fn logout(&self, user_id: Uuid, raw_token: Option<&str>) -> AuthResult<()> {
        let now = Utc::now();
        match raw_token {
            Some(raw) => {
                let token_hash = hash_refresh_token(raw);
                if let Some(lookup) = self.refresh_tokens.find_by_hash(&token_hash).await? {
                    if lookup.token.user_id == user_id {
                        self.refresh_tokens.revoke(lookup.token.id, now).await?;
                    }
                }
            }
            None => {
                self.refresh_tokens.revoke_all_for_user(user_id, now).await?;
            }
        }
        info!("user {} logged out", user_id);
        Ok(())
    }

    pub async fn logout_all(&self, user_id: Uuid) -> AuthResult<()> {
        let now = Utc::now();
        let revoked = self.refresh_tokens.revoke_all_for_user(user_id, now).await?;
        info!("revoked {} sessions for user {}", revoked, user_id);
        Ok(())
    }

    /// Stateless signature and expiry check; no store access.
    pub fn validate_access_token(&self, token: &str) -> AuthResult<AccessTokenClaims> {
        self.jwt.decode_access_token(token)
    }

    /// Maps verified claims back to a live user. Status is re-checked
    /// here because an account can be suspended after the token was
    /// minted.
    pub async fn resolve_user(&self, claims: &AccessTokenClaims) -> AuthResult<User> {
        let user_id = claims.subject_id()?;
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::InvalidAccessToken)?;

        if !user.is_active() {
            return Err(AuthError::AccountInactive);
        }

        Ok(user)
    }

    /// Bearer-token authentication in one step: decode, then resolve.
    pub async fn authenticate(&self, token: &str) -> AuthResult<User> {
        let claims = self.validate_access_token(token)?;
        self.resolve_user(&claims).await
    }

    async fn issue_session(
        &self,
        user: &User,
        client: &ClientInfo,
        now: DateTime<Utc>,
    ) -> AuthResult<SessionTokens> {
        let access = self.jwt.issue_access_token(user)?;

        let secret = generate_refresh_secret();
        self.refresh_tokens
            .create(NewRefreshToken {
                user_id: user.id,
                token_hash: hash_refresh_token(&secret),
                expires_at: now + Duration::seconds(self.config.refresh_token_ttl_secs),
                issued_ip: client.ip.clone(),
                issued_user_agent: client.user_agent.clone(),
            })
            .await?;

        Ok(SessionTokens {
            access_token: access.token,
            refresh_token: secret,
            token_type: "Bearer".to_string(),
            expires_in: access.expires_in_secs,
        })
    }
}

fn generate_refresh_secret() -> String {
    let mut bytes = [0u8; REFRESH_SECRET_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn hash_refresh_token(raw: &str) -> String {
    let digest = Sha256::digest(raw.as_bytes());
    STANDARD_NO_PAD.encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_secrets_are_high_entropy_and_unique() {
        let a = generate_refresh_secret();
        let b = generate_refresh_secret();
        assert_ne!(a, b);
        // 40 raw bytes come out longer than 50 base64 characters.
        assert!(a.len() > 50);
    }

    #[test]
    fn token_hash_is_deterministic_and_opaque() {
        let secret = generate_refresh_secret();
        assert_eq!(hash_refresh_token(&secret), hash_refresh_token(&secret));
        assert_ne!(hash_refresh_token(&secret), secret);
        assert_ne!(hash_refresh_token(&secret), hash_refresh_token("other"));
    }
}
