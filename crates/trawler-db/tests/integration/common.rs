use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};
use trawler_db::{Database, PgQueue};

/// Spins up PostgreSQL 16, applies the migrations and returns a pool.
///
/// Keep the container in scope for the whole test: dropping it stops Postgres.
pub async fn setup_test_db() -> (PgPool, ContainerAsync<GenericImage>) {
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "trawler_test")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");
    let url = format!("postgresql://postgres:postgres@{host}:{port}/trawler_test");

    // The first "ready" line is logged by the init server; retry until the real one accepts.
    let mut attempts = 0;
    let pool = loop {
        match PgPoolOptions::new().max_connections(5).connect(&url).await {
            Ok(pool) => break pool,
            Err(e) => {
                attempts += 1;
                if attempts >= 30 {
                    panic!("Failed to connect to database after {attempts} attempts: {e}");
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    };

    Database::from_pool(pool.clone())
        .migrate()
        .await
        .expect("Failed to run migrations");

    (pool, container)
}

pub fn queue(pool: &PgPool) -> PgQueue {
    PgQueue::new(pool.clone(), "jobs").with_visibility_timeout(Duration::from_secs(30))
}
