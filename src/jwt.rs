use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult};
use crate::models::{Role, User};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AccessTokenClaims {
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    pub email: String,
    pub roles: Vec<Role>,
}

impl AccessTokenClaims {
    pub fn subject_id(&self) -> AuthResult<Uuid> {
        self.sub.parse().map_err(|_| AuthError::InvalidAccessToken)
    }
}

#[derive(Debug, Clone)]
pub struct SignedAccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub expires_in_secs: i64,
}

/// Stateless access-token minting and verification. The signing key is
/// loaded once at construction; there is no rotation during the process
/// lifetime.
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    audience: String,
    access_token_ttl: Duration,
}

impl JwtService {
    pub fn from_config(config: &AuthConfig) -> AuthResult<Self> {
        let secret_bytes = config.jwt_secret.as_bytes();
        let encoding_key = EncodingKey::from_secret(secret_bytes);
        let decoding_key = DecodingKey::from_secret(secret_bytes);

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[config.audience.clone()]);
        validation.set_issuer(&[config.issuer.clone()]);
        validation.leeway = 30;

        Ok(Self {
            encoding_key,
            decoding_key,
            validation,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            access_token_ttl: Duration::seconds(config.access_token_ttl_secs),
        })
    }

    pub fn issue_access_token(&self, user: &User) -> AuthResult<SignedAccessToken> {
        let now = Utc::now();
        let expires_at = now + self.access_token_ttl;
        let jti = Uuid::new_v4().to_string();

        let claims = AccessTokenClaims {
            sub: user.id.to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
            jti,
            email: user.email.clone(),
            roles: user.roles.clone(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;

        Ok(SignedAccessToken {
            token,
            expires_at,
            expires_in_secs: self.access_token_ttl.num_seconds(),
        })
    }

    /// Tampered, expired, and malformed tokens all map to the same error
    /// kind so callers learn nothing about why verification failed.
    pub fn decode_access_token(&self, token: &str) -> AuthResult<AccessTokenClaims> {
        let token_data = decode::<AccessTokenClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|_| AuthError::InvalidAccessToken)?;
        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserStatus;

    const TEST_JWT_SECRET: &str = "super-secret-test-key";

    fn make_test_config() -> AuthConfig {
        AuthConfig {
            jwt_secret: TEST_JWT_SECRET.into(),
            issuer: "https://hub.test".into(),
            audience: "volunteer-hub-api".into(),
            access_token_ttl_secs: 900,
            refresh_token_ttl_secs: 604800,
            argon2_memory_kib: 19 * 1024,
            argon2_iterations: 2,
            argon2_parallelism: 1,
            default_registration_role: Role::Volunteer,
        }
    }

    fn make_user() -> User {
        User {
            id: Uuid::new_v4(),
            email: "user@example.com".into(),
            password_hash: None,
            name: "User".into(),
            phone: None,
            roles: vec![Role::Volunteer],
            status: UserStatus::Active,
            email_verified_at: None,
            phone_verified_at: None,
            last_login_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn issues_and_decodes_access_tokens() {
        let service = JwtService::from_config(&make_test_config()).expect("jwt service");
        let user = make_user();

        let signed = service.issue_access_token(&user).expect("issue token");
        assert_eq!(signed.expires_in_secs, 900);

        let claims = service
            .decode_access_token(&signed.token)
            .expect("decode token");

        assert_eq!(claims.subject_id().expect("uuid subject"), user.id);
        assert_eq!(claims.email, "user@example.com");
        assert_eq!(claims.roles, vec![Role::Volunteer]);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn claim_names_match_the_wire_format() {
        let service = JwtService::from_config(&make_test_config()).expect("jwt service");
        let signed = service.issue_access_token(&make_user()).expect("issue token");

        let payload_b64 = signed.token.split('.').nth(1).expect("payload segment");
        let payload = base64::Engine::decode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            payload_b64,
        )
        .expect("base64 payload");
        let value: serde_json::Value = serde_json::from_slice(&payload).expect("json payload");

        for claim in ["sub", "email", "roles", "iat", "exp", "iss", "aud", "jti"] {
            assert!(value.get(claim).is_some(), "missing claim {claim}");
        }
        assert_eq!(value["roles"][0], "volunteer");
    }

    #[test]
    fn tampered_and_garbage_tokens_fail_uniformly() {
        let service = JwtService::from_config(&make_test_config()).expect("jwt service");
        let signed = service.issue_access_token(&make_user()).expect("issue token");

        let mut tampered = signed.token.clone();
        tampered.push('x');
        assert!(matches!(
            service.decode_access_token(&tampered),
            Err(AuthError::InvalidAccessToken)
        ));
        assert!(matches!(
            service.decode_access_token("not-a-jwt"),
            Err(AuthError::InvalidAccessToken)
        ));
    }

    #[test]
    fn rejects_tokens_signed_with_a_different_key() {
        let service = JwtService::from_config(&make_test_config()).expect("jwt service");
        let mut other_config = make_test_config();
        other_config.jwt_secret = "a-completely-different-key".into();
        let other = JwtService::from_config(&other_config).expect("jwt service");

        let signed = other.issue_access_token(&make_user()).expect("issue token");
        assert!(matches!(
            service.decode_access_token(&signed.token),
            Err(AuthError::InvalidAccessToken)
        ));
    }
}
