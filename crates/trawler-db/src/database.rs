use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use trawler_core::AppError;
use trawler_core::config::QueueConfig;

use crate::config::DatabaseConfig;
use crate::queue::PgQueue;

/// Owns the connection pool and runs migrations; vends queue handles.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect: {e}")))?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Queue handle configured from the pipeline's queue settings.
    pub fn queue(&self, config: &QueueConfig) -> PgQueue {
        PgQueue::new(self.pool.clone(), config.name.clone())
            .with_visibility_timeout(config.visibility_timeout)
            .with_max_receives(config.max_receives)
            .with_region(config.region.clone())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
