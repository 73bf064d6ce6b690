use pollcdc::error::ErrorKind;
use pollcdc::store::watermark::{PostgresWatermarkStore, WatermarkStore};
use pollcdc::types::{ChangeValue, Watermark};
use pollcdc_config::SerializableSecretString;
use pollcdc_config::shared::{IntoConnectOptions, PgConnectionConfig, TlsConfig};
use pollcdc_telemetry::init_test_tracing;
use sqlx::postgres::PgPoolOptions;
use sqlx::Executor;

/// Connection to the Postgres database used by these tests, overridable through
/// `TESTS_DATABASE_HOST`, `TESTS_DATABASE_PORT`, `TESTS_DATABASE_USERNAME` and
/// `TESTS_DATABASE_PASSWORD`.
fn pg_connection_config() -> PgConnectionConfig {
    PgConnectionConfig {
        host: std::env::var("TESTS_DATABASE_HOST").unwrap_or_else(|_| "localhost".to_string()),
        port: std::env::var("TESTS_DATABASE_PORT")
            .ok()
            .and_then(|port| port.parse().ok())
            .unwrap_or(5432),
        name: "postgres".to_string(),
        username: std::env::var("TESTS_DATABASE_USERNAME")
            .unwrap_or_else(|_| "postgres".to_string()),
        password: Some(SerializableSecretString::from(
            std::env::var("TESTS_DATABASE_PASSWORD").unwrap_or_else(|_| "postgres".to_string()),
        )),
        tls: TlsConfig::default(),
    }
}

async fn setup_watermarks_table(config: &PgConnectionConfig, pipeline_id: i64) {
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect_with(config.with_db())
        .await
        .unwrap();

    pool.execute("create schema if not exists pollcdc").await.unwrap();
    pool.execute(
        r#"
        create table if not exists pollcdc.watermarks (
            pipeline_id bigint primary key,
            last_change_value_ms bigint null,
            first_poll_done boolean not null default false,
            updated_at timestamptz not null default now()
        )
        "#,
    )
    .await
    .unwrap();
    sqlx::query("delete from pollcdc.watermarks where pipeline_id = $1")
        .bind(pipeline_id)
        .execute(&pool)
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "requires a Postgres database"]
async fn watermark_survives_a_new_store() {
    init_test_tracing();

    let config = pg_connection_config();
    setup_watermarks_table(&config, 4242).await;

    let store = PostgresWatermarkStore::new(4242, config.clone());
    assert_eq!(store.load().await.unwrap(), Watermark::default());

    store.commit(ChangeValue::from_millis(100), true).await.unwrap();
    store.commit(ChangeValue::from_millis(150), false).await.unwrap();

    let restarted = PostgresWatermarkStore::new(4242, config);
    assert_eq!(
        restarted.load().await.unwrap(),
        Watermark::new(Some(ChangeValue::from_millis(150)), true)
    );
}

#[tokio::test]
#[ignore = "requires a Postgres database"]
async fn persisted_watermark_rejects_regressions() {
    init_test_tracing();

    let config = pg_connection_config();
    setup_watermarks_table(&config, 4243).await;

    let store = PostgresWatermarkStore::new(4243, config.clone());
    store.load().await.unwrap();
    store.commit(ChangeValue::from_millis(100), true).await.unwrap();

    // A second store with a stale cache must not move the row backward.
    let stale = PostgresWatermarkStore::new(4243, config);
    let err = stale
        .commit(ChangeValue::from_millis(50), true)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(
        store.load().await.unwrap(),
        Watermark::new(Some(ChangeValue::from_millis(100)), true)
    );
}
