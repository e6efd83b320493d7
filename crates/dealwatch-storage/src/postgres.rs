use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dealwatch_core::{Listing, Subscriber};
use serde::de::DeserializeOwned;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::info;

use crate::{ListingStore, StoreError, SubscriberDirectory};

/// Postgres-backed listing store and subscriber directory.
///
/// Documents live in `data_json`; the scalar columns beside it exist for
/// indexing and are rewritten on every upsert.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }
}

fn decode<T: DeserializeOwned>(row: &PgRow) -> Result<T, StoreError> {
    let value: serde_json::Value = row.try_get("data_json")?;
    Ok(serde_json::from_value(value)?)
}

fn decode_all<T: DeserializeOwned>(rows: &[PgRow]) -> Result<Vec<T>, StoreError> {
    rows.iter().map(decode).collect()
}

#[async_trait]
impl ListingStore for PgStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Listing>, StoreError> {
        let row = sqlx::query("SELECT data_json FROM listings WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn upsert(&self, listing: &Listing) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query("SELECT data_json FROM listings WHERE id = $1 FOR UPDATE")
            .bind(&listing.id)
            .fetch_optional(&mut *tx)
            .await?;
        let mut merged = listing.clone();
        if let Some(row) = existing {
            let stored: Listing = decode(&row)?;
            merged.merge_broadcast_flags(&stored.broadcast_to);
        }

        sqlx::query(
            r#"
            INSERT INTO listings (id, category, active, discount_percentage, score, last_updated, data_json)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE
               SET category = EXCLUDED.category,
                   active = EXCLUDED.active,
                   discount_percentage = EXCLUDED.discount_percentage,
                   score = EXCLUDED.score,
                   last_updated = EXCLUDED.last_updated,
                   data_json = EXCLUDED.data_json
            "#,
        )
        .bind(&merged.id)
        .bind(&merged.category)
        .bind(merged.active)
        .bind(merged.discount_percentage as i32)
        .bind(merged.score)
        .bind(merged.last_updated)
        .bind(serde_json::to_value(&merged)?)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn mark_inactive_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE listings
               SET active = FALSE,
                   data_json = jsonb_set(data_json, '{active}', 'false'::jsonb, true)
             WHERE active
               AND last_updated < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn set_broadcast_flag(&self, id: &str, platform: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE listings
               SET data_json = jsonb_set(
                       jsonb_set(data_json, '{broadcast_to}', COALESCE(data_json->'broadcast_to', '{}'::jsonb), true),
                       ARRAY['broadcast_to', $2::text],
                       'true'::jsonb,
                       true)
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(platform)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::ListingNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<Listing>, StoreError> {
        let rows = sqlx::query("SELECT data_json FROM listings WHERE active ORDER BY score DESC, id")
            .fetch_all(&self.pool)
            .await?;
        decode_all(&rows)
    }
}

#[async_trait]
impl SubscriberDirectory for PgStore {
    async fn find_watching(&self, listing_id: &str) -> Result<Vec<Subscriber>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT data_json
              FROM subscribers
             WHERE active
               AND data_json->'watched_listings' @> jsonb_build_array($1::text)
             ORDER BY id
            "#,
        )
        .bind(listing_id)
        .fetch_all(&self.pool)
        .await?;
        decode_all(&rows)
    }

    async fn find_watching_category(&self, category: &str) -> Result<Vec<Subscriber>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT data_json
              FROM subscribers
             WHERE active
               AND data_json->'watched_categories' @> jsonb_build_array($1::text)
             ORDER BY id
            "#,
        )
        .bind(category)
        .fetch_all(&self.pool)
        .await?;
        decode_all(&rows)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Subscriber>, StoreError> {
        let row = sqlx::query("SELECT data_json FROM subscribers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn disable_push(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE subscribers
               SET data_json = jsonb_set(data_json, '{push}', '{"enabled": false, "endpoint": null}'::jsonb, true)
             WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::SubscriberNotFound(id.to_string()));
        }
        Ok(())
    }
}
