//! Database connection pool and migration management.
//!
//! Everything the shop persists (catalog, card pool, orders, payments and
//! settings) lives in one PostgreSQL database reached through [`DbPool`].

use sqlx::{Pool, Postgres};

/// Type alias for the PostgreSQL connection pool shared by every request.
///
/// Handlers receive it through `State<DbPool>`, services take `&DbPool`.
pub type DbPool = Pool<Postgres>;

/// Create a new PostgreSQL connection pool.
///
/// Payment callbacks, the USDT watcher and buyer requests all draw from this
/// pool. A dispense holds its connection for the whole claim transaction,
/// so the pool is sized a little above the default.
///
/// # Arguments
///
/// * `database_url` - PostgreSQL connection string, usually `DATABASE_URL`
///
/// # Configuration
///
/// - Maximum connections: 10
/// - Connections are opened on demand and reused while idle
///
/// # Errors
///
/// Returns an error if:
/// - The connection string cannot be parsed
/// - The server is unreachable or rejects the credentials
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    sqlx::postgres::PgPoolOptions::new()
        // Room for the watcher and concurrent dispense transactions
        .max_connections(10)
        .connect(database_url)
        .await
}

/// Run the embedded migrations from `migrations/`.
///
/// Applied migrations are tracked in `_sqlx_migrations`, so each file runs
/// once per database. The settings migration seeds every store setting with
/// its default, with all payment methods switched off.
///
/// # Arguments
///
/// * `pool` - Database connection pool
///
/// # Errors
///
/// Returns an error if a migration file is malformed, a statement fails, or
/// an already applied migration was edited since it ran.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    // Embedded at compile time
    sqlx::migrate!("./migrations").run(pool).await
}
