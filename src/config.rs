use crate::error::{AuthError, AuthResult};
use crate::models::Role;

const MIN_JWT_SECRET_LEN: usize = 16;

/// Authentication configuration, loaded once at startup and validated
/// before any service is constructed.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub issuer: String,
    pub audience: String,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
    pub argon2_memory_kib: u32,
    pub argon2_iterations: u32,
    pub argon2_parallelism: u32,
    pub default_registration_role: Role,
}

impl AuthConfig {
    pub fn from_env() -> AuthResult<Self> {
        let jwt_secret = std::env::var("VHUB_JWT_SECRET")
            .map_err(|_| AuthError::Config("VHUB_JWT_SECRET is required".into()))?;
        let issuer =
            std::env::var("VHUB_JWT_ISSUER").unwrap_or_else(|_| "http://localhost".into());
        let audience =
            std::env::var("VHUB_JWT_AUDIENCE").unwrap_or_else(|_| "volunteer-hub-api".into());
        let access_token_ttl_secs = std::env::var("VHUB_ACCESS_TOKEN_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(900);
        let refresh_token_ttl_secs = std::env::var("VHUB_REFRESH_TOKEN_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(7 * 24 * 60 * 60);
        let argon2_memory_kib = std::env::var("VHUB_ARGON2_MEMORY_KIB")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(19 * 1024);
        let argon2_iterations = std::env::var("VHUB_ARGON2_ITERATIONS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(2);
        let argon2_parallelism = std::env::var("VHUB_ARGON2_PARALLELISM")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(1);
        let default_registration_role = std::env::var("VHUB_DEFAULT_ROLE")
            .map(|v| Role::from_str(&v))
            .unwrap_or(Role::Volunteer);

        let config = Self {
            jwt_secret,
            issuer,
            audience,
            access_token_ttl_secs,
            refresh_token_ttl_secs,
            argon2_memory_kib,
            argon2_iterations,
            argon2_parallelism,
            default_registration_role,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would weaken credential handling or
    /// produce unusable tokens.
    pub fn validate(&self) -> AuthResult<()> {
        if self.jwt_secret.trim().len() < MIN_JWT_SECRET_LEN {
            return Err(AuthError::Config(format!(
                "jwt secret must be at least {} characters",
                MIN_JWT_SECRET_LEN
            )));
        }
        if self.access_token_ttl_secs <= 0 || self.refresh_token_ttl_secs <= 0 {
            return Err(AuthError::Config("token TTLs must be positive".into()));
        }
        if !(8 * 1024..=1024 * 1024).contains(&self.argon2_memory_kib) {
            return Err(AuthError::Config(
                "argon2 memory must be between 8 MiB and 1 GiB".into(),
            ));
        }
        if !(1..=16).contains(&self.argon2_iterations) {
            return Err(AuthError::Config(
                "argon2 iterations must be between 1 and 16".into(),
            ));
        }
        if !(1..=8).contains(&self.argon2_parallelism) {
            return Err(AuthError::Config(
                "argon2 parallelism must be between 1 and 8".into(),
            ));
        }
        Ok(())
    }
}
