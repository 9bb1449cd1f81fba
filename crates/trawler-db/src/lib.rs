pub mod config;
pub mod database;
pub mod queue;

pub use config::DatabaseConfig;
pub use database::Database;
pub use queue::{PgQueue, QueueStats};
