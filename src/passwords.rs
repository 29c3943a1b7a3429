use argon2::{
    Algorithm, Argon2, ParamsBuilder, PasswordHash, PasswordHasher, PasswordVerifier, Version,
    password_hash::SaltString,
};
use rand::RngCore;

use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult};

const SALT_LEN: usize = 16;

/// One-way credential hashing with an adaptive work factor taken from
/// configuration.
#[derive(Clone)]
pub struct PasswordService {
    argon2: Argon2<'static>,
}

impl PasswordService {
    pub fn from_config(config: &AuthConfig) -> AuthResult<Self> {
        let mut builder = ParamsBuilder::new();
        builder.m_cost(config.argon2_memory_kib);
        builder.t_cost(config.argon2_iterations);
        builder.p_cost(config.argon2_parallelism);
        let params = builder.build().map_err(AuthError::from)?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        Ok(Self { argon2 })
    }

    pub fn hash_password(&self, password: &str) -> AuthResult<String> {
        let mut salt_bytes = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt_bytes);
        let salt = SaltString::encode_b64(&salt_bytes).map_err(AuthError::from)?;
        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(AuthError::from)?
            .to_string();
        Ok(hash)
    }

    /// A mismatch is an `Ok(false)`, never an error; only malformed
    /// stored hashes or parameter problems surface as failures.
    pub fn verify_password(&self, password: &str, encoded: &str) -> AuthResult<bool> {
        let parsed = PasswordHash::new(encoded)?;
        match self.argon2.verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(err) => Err(AuthError::from(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use crate::models::Role;

    fn test_config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "super-secret-test-key".into(),
            issuer: "https://hub.test".into(),
            audience: "volunteer-hub-api".into(),
            access_token_ttl_secs: 900,
            refresh_token_ttl_secs: 604800,
            // Minimum allowed cost keeps the test fast.
            argon2_memory_kib: 8 * 1024,
            argon2_iterations: 1,
            argon2_parallelism: 1,
            default_registration_role: Role::Volunteer,
        }
    }

    #[test]
    fn hashes_and_verifies_passwords() {
        let service = PasswordService::from_config(&test_config()).expect("password service");
        let hash = service
            .hash_password("super-secret")
            .expect("hash generation");
        assert!(
            service
                .verify_password("super-secret", &hash)
                .expect("verify succeeds")
        );
        assert!(
            !service
                .verify_password("wrong-password", &hash)
                .expect("verify runs")
        );
    }

    #[test]
    fn rejects_malformed_stored_hash() {
        let service = PasswordService::from_config(&test_config()).expect("password service");
        assert!(service.verify_password("anything", "not-a-phc-hash").is_err());
    }
}
