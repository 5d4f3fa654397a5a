use chrono::{DateTime, Utc};
use serde::Serialize;

/// A user's subscribed device for push notifications.
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct UserDevice {
    pub id: i64,
    pub user_id: String,
    pub player_id: String,
    pub platform: String, // web, ios, android
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Delivery status of a dispatched notification.
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct NotificationLog {
    pub id: i64,
    pub notification_id: String,
    pub user_id: String,
    pub status: String, // pending, delivered, failed
    pub recipients: i32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
