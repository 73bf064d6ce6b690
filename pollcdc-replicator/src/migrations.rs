use pollcdc_config::shared::{IntoConnectOptions, PgConnectionConfig};
use sqlx::{
    Executor,
    postgres::{PgConnectOptions, PgPoolOptions},
};

const NUM_POOL_CONNECTIONS: u32 = 1;

/// Creates the `pollcdc` schema and runs the migrations of the watermark table.
pub async fn migrate_state_store(config: &PgConnectionConfig) -> Result<(), sqlx::Error> {
    let options: PgConnectOptions = config.with_db();

    let pool = PgPoolOptions::new()
        .max_connections(NUM_POOL_CONNECTIONS)
        .min_connections(NUM_POOL_CONNECTIONS)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("create schema if not exists pollcdc;").await?;
                // Keeps the `_sqlx_migrations` table inside the pollcdc schema.
                conn.execute("set search_path = 'pollcdc';").await?;
                Ok(())
            })
        })
        .connect_with(options)
        .await?;

    let migrator = sqlx::migrate!("./migrations");
    migrator.run(&pool).await?;

    pool.close().await;

    Ok(())
}
