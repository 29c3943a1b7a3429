//! Authentication and session-lifecycle core for the volunteer hub:
//! credential verification, stateless access-token issuance, and
//! refresh-token rotation/revocation behind pluggable store interfaces.
//! Transport and the surrounding CRUD domain live elsewhere.

pub mod config;
pub mod error;
pub mod jwt;
pub mod models;
pub mod passwords;
pub mod session;
pub mod store;

pub use config::AuthConfig;
pub use error::{AuthError, AuthResult, ConflictField};
pub use jwt::JwtService;
pub use passwords::PasswordService;
pub use session::SessionManager;
pub use store::{RefreshTokenStore, UserStore};

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use sqlx::PgPool;
    use sqlx::postgres::PgPoolOptions;
    use testcontainers::ContainerAsync;
    use testcontainers::core::error::TestcontainersError;
    use testcontainers::runners::AsyncRunner;
    use testcontainers_modules::postgres::Postgres;
    use thiserror::Error;

    use crate::store::postgres::MIGRATOR;

    #[derive(Debug, Error)]
    pub enum TestDatabaseError {
        #[error("database error: {0}")]
        Sqlx(#[from] sqlx::Error),
        #[error("migration error: {0}")]
        Migration(#[from] sqlx::migrate::MigrateError),
        #[error("container error: {0}")]
        Container(#[from] TestcontainersError),
    }

    /// Disposable Postgres instance for store integration tests.
    /// Requires a local container runtime; callers are expected to skip
    /// when provisioning fails.
    pub struct TestDatabase {
        pool: PgPool,
        _container: ContainerAsync<Postgres>,
    }

    impl TestDatabase {
        pub async fn new() -> Result<Self, TestDatabaseError> {
            let container = Postgres::default().start().await?;
            let host = container.get_host().await?;
            let port = container.get_host_port_ipv4(5432).await?;
            let url = format!("postgres://postgres:postgres@{host}:{port}/postgres");

            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(&url)
                .await?;
            MIGRATOR.run(&pool).await?;

            Ok(Self {
                pool,
                _container: container,
            })
        }

        pub fn pool(&self) -> &PgPool {
            &self.pool
        }

        pub fn pool_clone(&self) -> PgPool {
            self.pool.clone()
        }
    }
}
