use std::sync::Arc;

use redis::aio::ConnectionManager;
use sqlx::PgPool;

use crate::config::Settings;
use crate::services::email::DynEmailService;

/// Application state shared across all request handlers.
///
/// Cheaply cloneable (inner types are Arc or handle-like), suitable for
/// Axum's state extraction.
#[derive(Clone)]
pub struct AppState {
    /// PostgreSQL connection pool
    db: PgPool,
    /// Redis connection manager for async operations
    redis: ConnectionManager,
    /// Application configuration
    config: Arc<Settings>,
    /// Thank-you mail sender (NoOp when SMTP is unconfigured)
    email: DynEmailService,
}

impl AppState {
    pub fn new(
        db: PgPool,
        redis: ConnectionManager,
        config: Settings,
        email: DynEmailService,
    ) -> Self {
        Self {
            db,
            redis,
            config: Arc::new(config),
            email,
        }
    }

    /// Returns a reference to the database connection pool.
    #[inline]
    pub fn db(&self) -> &PgPool {
        &self.db
    }

    /// Returns a clone of the Redis connection manager. Each clone shares
    /// the same underlying connection and reconnects automatically.
    #[inline]
    pub fn redis(&self) -> ConnectionManager {
        self.redis.clone()
    }

    /// Returns a reference to the application configuration.
    #[inline]
    pub fn config(&self) -> &Settings {
        &self.config
    }

    #[inline]
    pub fn email(&self) -> &DynEmailService {
        &self.email
    }

    #[inline]
    pub fn is_production(&self) -> bool {
        self.config.is_production()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_state_is_send_and_sync() {
        // AppState must be shareable across request tasks
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AppState>();
    }
}
