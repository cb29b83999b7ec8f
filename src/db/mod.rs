use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

pub mod enums;
pub mod models;
pub mod registry;
pub mod schedule_store;

/// Connects the allocator's shared pool and applies embedded migrations.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}
