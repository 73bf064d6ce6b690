use std::sync::Arc;

use pollcdc_config::shared::{IntoConnectOptions, PgConnectionConfig};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::bail;
use crate::error::{CdcError, CdcResult, ErrorKind};
use crate::store::watermark::{WatermarkStore, advance_watermark};
use crate::types::{ChangeValue, PipelineId, Watermark};

const NUM_POOL_CONNECTIONS: u32 = 1;

fn state_store_error(description: &'static str, err: sqlx::Error) -> CdcError {
    CdcError::from((ErrorKind::StateStoreFailed, description, err.to_string()))
}

/// Watermark store persisting the state in the `pollcdc.watermarks` table of a Postgres
/// database, one row per pipeline.
///
/// The table is created by the replicator migrations.
#[derive(Debug, Clone)]
pub struct PostgresWatermarkStore {
    pipeline_id: PipelineId,
    config: PgConnectionConfig,
    cache: Arc<Mutex<Watermark>>,
}

impl PostgresWatermarkStore {
    pub fn new(pipeline_id: PipelineId, config: PgConnectionConfig) -> Self {
        Self {
            pipeline_id,
            config,
            cache: Arc::new(Mutex::new(Watermark::default())),
        }
    }

    /// Opens a single connection pool for one operation.
    ///
    /// Commits happen at most once per poll interval, so no connection is kept open between them.
    async fn connect(&self) -> CdcResult<PgPool> {
        PgPoolOptions::new()
            .min_connections(NUM_POOL_CONNECTIONS)
            .max_connections(NUM_POOL_CONNECTIONS)
            .connect_with(self.config.with_db())
            .await
            .map_err(|err| state_store_error("Failed to connect to the state store", err))
    }

    fn pipeline_key(&self) -> CdcResult<i64> {
        i64::try_from(self.pipeline_id).map_err(|_| {
            CdcError::from((
                ErrorKind::ConfigError,
                "Pipeline id out of range",
                format!("Pipeline id {} does not fit in a bigint", self.pipeline_id),
            ))
        })
    }
}

impl WatermarkStore for PostgresWatermarkStore {
    async fn load(&self) -> CdcResult<Watermark> {
        debug!("loading watermark from postgres state store");

        let pool = self.connect().await?;
        let row = sqlx::query(
            r#"
            select last_change_value_ms, first_poll_done
            from pollcdc.watermarks
            where pipeline_id = $1
            "#,
        )
        .bind(self.pipeline_key()?)
        .fetch_optional(&pool)
        .await
        .map_err(|err| state_store_error("Failed to load the watermark", err))?;

        let watermark = match row {
            Some(row) => {
                let last_change_value: Option<i64> = row
                    .try_get("last_change_value_ms")
                    .map_err(|err| state_store_error("Failed to decode the watermark", err))?;
                let first_poll_done: bool = row
                    .try_get("first_poll_done")
                    .map_err(|err| state_store_error("Failed to decode the watermark", err))?;

                Watermark::new(
                    last_change_value.map(ChangeValue::from_millis),
                    first_poll_done,
                )
            }
            None => Watermark::default(),
        };

        *self.cache.lock().await = watermark;

        info!(%watermark, "loaded watermark from postgres state store");

        Ok(watermark)
    }

    async fn get(&self) -> CdcResult<Watermark> {
        Ok(*self.cache.lock().await)
    }

    async fn commit(&self, value: ChangeValue, mark_first_poll_done: bool) -> CdcResult<Watermark> {
        // The cache stays locked during the update so that `get` never observes a watermark which
        // is not yet persisted.
        let mut cache = self.cache.lock().await;
        let watermark = advance_watermark(*cache, value, mark_first_poll_done)?;

        let pool = self.connect().await?;
        let result = sqlx::query(
            r#"
            insert into pollcdc.watermarks (pipeline_id, last_change_value_ms, first_poll_done)
            values ($1, $2, $3)
            on conflict (pipeline_id) do update
            set last_change_value_ms = excluded.last_change_value_ms,
                first_poll_done = excluded.first_poll_done,
                updated_at = now()
            where pollcdc.watermarks.last_change_value_ms is null
                or pollcdc.watermarks.last_change_value_ms <= excluded.last_change_value_ms
            "#,
        )
        .bind(self.pipeline_key()?)
        .bind(value.as_millis())
        .bind(watermark.first_poll_done)
        .execute(&pool)
        .await
        .map_err(|err| state_store_error("Failed to commit the watermark", err))?;

        if result.rows_affected() == 0 {
            bail!(
                ErrorKind::InvalidState,
                "Watermark regression",
                format!(
                    "The persisted watermark of pipeline {} is ahead of {value}",
                    self.pipeline_id
                )
            );
        }

        *cache = watermark;

        Ok(watermark)
    }
}
