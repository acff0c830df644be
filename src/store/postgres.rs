use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use super::{PendingDelivery, SlaveSite, SyncStore};

/// PostgreSQL implementation of [`SyncStore`].
pub struct PostgresSyncStore {
    pool: PgPool,
}

impl PostgresSyncStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SyncStore for PostgresSyncStore {
    async fn upsert_slave(&self, url: &str, secret: &str) -> Result<SlaveSite> {
        let site = sqlx::query_as::<_, SlaveSite>(
            r#"
            INSERT INTO slave_sites (id, url, secret, enabled, last_access, created_at)
            VALUES ($1, $2, $3, TRUE, NOW(), NOW())
            ON CONFLICT (url) DO UPDATE
                SET secret = EXCLUDED.secret,
                    enabled = TRUE,
                    last_access = NOW()
            RETURNING id, url, secret, enabled, last_access, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(url)
        .bind(secret)
        .fetch_one(&self.pool)
        .await
        .context("Failed to upsert slave site")?;

        Ok(site)
    }

    async fn slave_by_url(&self, url: &str) -> Result<Option<SlaveSite>> {
        sqlx::query_as::<_, SlaveSite>(
            r#"
            SELECT id, url, secret, enabled, last_access, created_at
            FROM slave_sites
            WHERE url = $1
            "#,
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load slave site")
    }

    async fn slave_by_id(&self, id: Uuid) -> Result<Option<SlaveSite>> {
        sqlx::query_as::<_, SlaveSite>(
            r#"
            SELECT id, url, secret, enabled, last_access, created_at
            FROM slave_sites
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load slave site by id")
    }

    async fn list_enabled(&self) -> Result<Vec<SlaveSite>> {
        sqlx::query_as::<_, SlaveSite>(
            r#"
            SELECT id, url, secret, enabled, last_access, created_at
            FROM slave_sites
            WHERE enabled
            ORDER BY created_at, id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list enabled slave sites")
    }

    async fn set_enabled(&self, url: &str, enabled: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE slave_sites SET enabled = $2 WHERE url = $1")
            .bind(url)
            .bind(enabled)
            .execute(&self.pool)
            .await
            .context("Failed to update slave enabled flag")?;
        Ok(result.rows_affected() > 0)
    }

    async fn recount_enabled(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            UPDATE sync_state
            SET enabled_count = (SELECT COUNT(*) FROM slave_sites WHERE enabled)
            RETURNING enabled_count
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to recount enabled slaves")?;
        Ok(count)
    }

    async fn enabled_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT enabled_count FROM sync_state")
            .fetch_one(&self.pool)
            .await
            .context("Failed to read cached enabled count")?;
        Ok(count)
    }

    async fn touch_last_access(&self, url: &str) -> Result<()> {
        sqlx::query("UPDATE slave_sites SET last_access = NOW() WHERE url = $1")
            .bind(url)
            .execute(&self.pool)
            .await
            .context("Failed to touch slave last_access")?;
        Ok(())
    }

    async fn enqueue_pending(&self, slave_id: Uuid, payload: serde_json::Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pending_deliveries (id, slave_id, payload, created_at)
            VALUES ($1, $2, $3, NOW())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(slave_id)
        .bind(payload)
        .execute(&self.pool)
        .await
        .context("Failed to enqueue pending delivery")?;
        Ok(())
    }

    async fn pending_oldest(&self, limit: i64) -> Result<Vec<PendingDelivery>> {
        sqlx::query_as::<_, PendingDelivery>(
            r#"
            SELECT id, slave_id, payload, created_at
            FROM pending_deliveries
            ORDER BY created_at, id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load pending deliveries")
    }

    async fn delete_pending(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM pending_deliveries WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete pending delivery")?;
        Ok(())
    }

    async fn delete_pending_for_slave(&self, slave_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM pending_deliveries WHERE slave_id = $1")
            .bind(slave_id)
            .execute(&self.pool)
            .await
            .context("Failed to drop pending deliveries for slave")?;
        Ok(result.rows_affected())
    }

    async fn set_retry_enabled(&self, enabled: bool) -> Result<()> {
        sqlx::query("UPDATE sync_state SET retry_enabled = $1")
            .bind(enabled)
            .execute(&self.pool)
            .await
            .context("Failed to update retry flag")?;
        Ok(())
    }

    async fn retry_enabled(&self) -> Result<bool> {
        let enabled: bool = sqlx::query_scalar("SELECT retry_enabled FROM sync_state")
            .fetch_one(&self.pool)
            .await
            .context("Failed to read retry flag")?;
        Ok(enabled)
    }
}
