use sqlx::PgPool;
use tracing::info;

use crate::models::{NotificationLog, UserDevice};

/// PostgreSQL access for devices and notification logs. The pool tolerates
/// the concurrent use generated by simultaneously running handlers.
#[derive(Clone)]
pub struct PushRepository {
    pool: PgPool,
}

impl PushRepository {
    pub fn new(pool: PgPool) -> Self {
        PushRepository { pool }
    }

    /// Creates the tables on startup when they are missing.
    pub async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        // raw_sql: several statements in one round trip
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS user_devices (
                id BIGSERIAL PRIMARY KEY,
                user_id TEXT NOT NULL,
                player_id TEXT NOT NULL UNIQUE,
                platform VARCHAR(50) NOT NULL DEFAULT '',
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            CREATE INDEX IF NOT EXISTS idx_user_devices_user_id ON user_devices (user_id);
            CREATE TABLE IF NOT EXISTS notification_logs (
                id BIGSERIAL PRIMARY KEY,
                notification_id TEXT NOT NULL UNIQUE,
                user_id TEXT NOT NULL,
                status TEXT NOT NULL,
                recipients INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            CREATE INDEX IF NOT EXISTS idx_notification_logs_user_id ON notification_logs (user_id);
            "#,
        )
        .execute(&self.pool)
        .await?;
        info!("Successfully performed migrations");
        Ok(())
    }

    pub async fn active_devices_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<UserDevice>, sqlx::Error> {
        sqlx::query_as::<_, UserDevice>(
            "SELECT id, user_id, player_id, platform, is_active, created_at, updated_at \
             FROM user_devices WHERE user_id = $1 AND is_active",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }

    /// Registers a device, or re-activates and re-binds it when the player id
    /// is already known.
    pub async fn upsert_device(
        &self,
        user_id: &str,
        player_id: &str,
        platform: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO user_devices (user_id, player_id, platform) VALUES ($1, $2, $3) \
             ON CONFLICT (player_id) DO UPDATE \
             SET user_id = EXCLUDED.user_id, platform = EXCLUDED.platform, \
                 is_active = TRUE, updated_at = now()",
        )
        .bind(user_id)
        .bind(player_id)
        .bind(platform)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn record_notification(
        &self,
        notification_id: &str,
        user_id: &str,
        status: &str,
        recipients: i32,
        error: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO notification_logs (notification_id, user_id, status, recipients, error) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (notification_id) DO UPDATE \
             SET status = EXCLUDED.status, recipients = EXCLUDED.recipients, \
                 error = EXCLUDED.error, updated_at = now()",
        )
        .bind(notification_id)
        .bind(user_id)
        .bind(status)
        .bind(recipients)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_notification_status(
        &self,
        notification_id: &str,
        status: &str,
        recipients: i32,
        error: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE notification_logs \
             SET status = $2, recipients = $3, error = $4, updated_at = now() \
             WHERE notification_id = $1",
        )
        .bind(notification_id)
        .bind(status)
        .bind(recipients)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn notification_by_id(
        &self,
        notification_id: &str,
    ) -> Result<Option<NotificationLog>, sqlx::Error> {
        sqlx::query_as::<_, NotificationLog>(
            "SELECT id, notification_id, user_id, status, recipients, error, created_at, updated_at \
             FROM notification_logs WHERE notification_id = $1",
        )
        .bind(notification_id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
