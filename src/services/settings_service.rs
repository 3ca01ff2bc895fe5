//! Loading and updating the settings table.

use std::collections::HashMap;

use crate::db::DbPool;
use crate::error::AppError;
use crate::models::setting::{StoreSettings, merge_pairs, validate_key};

async fn load_pairs<'e, E>(executor: E) -> Result<Vec<(String, String)>, AppError>
where
    E: sqlx::PgExecutor<'e>,
{
    let rows = sqlx::query_as::<_, (String, String)>("SELECT key, value FROM settings")
        .fetch_all(executor)
        .await?;
    Ok(rows)
}

/// Load and parse the store settings.
///
/// Called once per request that needs them; nothing is cached, so operator
/// changes take effect on the next request.
pub async fn load(pool: &DbPool) -> Result<StoreSettings, AppError> {
    let pairs = load_pairs(pool).await?;
    StoreSettings::from_pairs(pairs).map_err(|e| AppError::Configuration(e.to_string()))
}

/// Apply operator changes.
///
/// The merged result must parse before anything is written, so a bad value
/// never reaches the table.
pub async fn update(
    pool: &DbPool,
    updates: HashMap<String, String>,
) -> Result<StoreSettings, AppError> {
    for key in updates.keys() {
        validate_key(key).map_err(|e| AppError::InvalidRequest(e.to_string()))?;
    }

    let mut tx = pool.begin().await?;

    let current = load_pairs(&mut *tx).await?;
    let settings = StoreSettings::from_pairs(merge_pairs(current, &updates))
        .map_err(|e| AppError::InvalidRequest(e.to_string()))?;

    for (key, value) in &updates {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value)
            VALUES ($1, $2)
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value.trim())
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    tracing::info!("Updated settings: {:?}", updates.keys().collect::<Vec<_>>());
    Ok(settings)
}
