use async_trait::async_trait;
use chrono::Utc;
use lapin::Connection;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::messages::{DependenciesStatus, GetHealthResponse, SendMessage, TokenUpdate};
use crate::models::NotificationLog;
use crate::onesignal::{GatewayError, OneSignalClient};
use crate::queue::MessageProcessor;
use crate::repository::PushRepository;

/// Handler failures. The display strings double as the consumer's retry
/// classification surface, so the phrasings are load-bearing: the first three
/// hit the permanent table, the database variant hits the transient one.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("invalid message format: {0}")]
    InvalidFormat(#[from] serde_json::Error),

    #[error("no active devices for user: {0}")]
    NoActiveDevices(String),

    #[error("invalid player id: player id must not be empty")]
    InvalidPlayerId,

    #[error("database connection error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("push gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

/// Business logic behind both queue handlers and the HTTP endpoints.
pub struct PushService {
    repo: PushRepository,
    gateway: OneSignalClient,
    broker: Arc<Connection>,
    service_name: String,
}

impl PushService {
    pub fn new(
        repo: PushRepository,
        gateway: OneSignalClient,
        broker: Arc<Connection>,
        service_name: &str,
    ) -> Self {
        PushService {
            repo,
            gateway,
            broker,
            service_name: service_name.to_string(),
        }
    }

    /// Resolves the user's active devices and dispatches through OneSignal,
    /// recording the outcome in the notification log.
    async fn dispatch_send(&self, req: &SendMessage) -> Result<(), ProcessError> {
        let devices = self.repo.active_devices_for_user(&req.user_id).await?;
        if devices.is_empty() {
            // Best effort, the log row must not mask the business error
            let _ = self
                .repo
                .record_notification(
                    &req.notification_id,
                    &req.user_id,
                    "failed",
                    0,
                    Some("no active devices"),
                )
                .await;
            return Err(ProcessError::NoActiveDevices(req.user_id.clone()));
        }

        let player_ids: Vec<String> = devices.into_iter().map(|d| d.player_id).collect();
        let title = req.title.as_deref().unwrap_or("");

        self.repo
            .record_notification(&req.notification_id, &req.user_id, "pending", 0, None)
            .await?;

        match self
            .gateway
            .send_to_players(&player_ids, title, &req.message, gateway_data(req))
            .await
        {
            Ok(res) => {
                info!(
                    "[{}] Dispatched notification {} to {} recipients",
                    req.correlation_id, req.notification_id, res.recipients
                );
                self.repo
                    .update_notification_status(
                        &req.notification_id,
                        "delivered",
                        res.recipients,
                        None,
                    )
                    .await?;
                Ok(())
            }
            Err(err) => {
                warn!(
                    "[{}] Gateway rejected notification {}: {}",
                    req.correlation_id, req.notification_id, err
                );
                let _ = self
                    .repo
                    .update_notification_status(
                        &req.notification_id,
                        "failed",
                        0,
                        Some(&err.to_string()),
                    )
                    .await;
                Err(err.into())
            }
        }
    }

    /// Registers or re-binds a device. The OneSignal player id keys the
    /// registration; the raw device token is the fallback key when the
    /// client did not register with OneSignal yet.
    pub async fn register_token(&self, update: &TokenUpdate) -> Result<(), ProcessError> {
        let player_id = update
            .onesignal_player_id
            .as_deref()
            .unwrap_or(&update.device_token);
        if player_id.is_empty() {
            return Err(ProcessError::InvalidPlayerId);
        }

        self.repo
            .upsert_device(&update.user_id, player_id, &update.platform)
            .await?;
        info!(
            "Registered device {} for user {} ({})",
            player_id, update.user_id, update.platform
        );
        Ok(())
    }

    pub async fn notification_status(
        &self,
        notification_id: &str,
    ) -> Result<Option<NotificationLog>, ProcessError> {
        Ok(self.repo.notification_by_id(notification_id).await?)
    }

    pub async fn update_notification_status(
        &self,
        notification_id: &str,
        status: &str,
        error: Option<&str>,
    ) -> Result<(), ProcessError> {
        self.repo
            .update_notification_status(notification_id, status, 0, error)
            .await?;
        Ok(())
    }

    pub async fn get_health(&self) -> GetHealthResponse {
        let rabbitmq = if self.broker.status().connected() {
            "up"
        } else {
            "down"
        };
        let postgresql = match self.repo.ping().await {
            Ok(()) => "up",
            Err(_) => "down",
        };
        let status = if rabbitmq == "up" && postgresql == "up" {
            "ok"
        } else {
            "degraded"
        };

        GetHealthResponse {
            status: status.to_string(),
            timestamp: Utc::now(),
            service: self.service_name.clone(),
            dependencies: DependenciesStatus {
                rabbitmq: rabbitmq.to_string(),
                postgresql: postgresql.to_string(),
            },
        }
    }
}

/// Extra payload forwarded to the gateway: caller data merged with the
/// template fields, which are carried through but rendered client-side.
fn gateway_data(req: &SendMessage) -> Option<serde_json::Value> {
    let mut data = serde_json::Map::new();
    if let Some(extra) = &req.data {
        match extra.as_object() {
            Some(obj) => data.extend(obj.clone()),
            None => {
                data.insert("data".to_string(), extra.clone());
            }
        }
    }
    if let Some(template_id) = &req.template_id {
        data.insert("template_id".to_string(), json!(template_id));
    }
    if let Some(vars) = &req.template_variables {
        data.insert("template_variables".to_string(), json!(vars));
    }
    if data.is_empty() {
        None
    } else {
        Some(serde_json::Value::Object(data))
    }
}

#[async_trait]
impl MessageProcessor for PushService {
    async fn process_send_message(&self, payload: &[u8]) -> anyhow::Result<()> {
        let req: SendMessage =
            serde_json::from_slice(payload).map_err(ProcessError::InvalidFormat)?;
        info!(
            "[{}] Parsed send request for user {} (notification {})",
            req.correlation_id, req.user_id, req.notification_id
        );
        self.dispatch_send(&req).await?;
        Ok(())
    }

    async fn process_token_message(&self, payload: &[u8]) -> anyhow::Result<()> {
        let update: TokenUpdate =
            serde_json::from_slice(payload).map_err(ProcessError::InvalidFormat)?;
        self.register_token(&update).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{classify, RetryClass};

    #[test]
    fn error_texts_stay_aligned_with_the_keyword_tables() {
        let err = ProcessError::NoActiveDevices("42".to_string());
        assert_eq!(err.to_string(), "no active devices for user: 42");
        assert_eq!(classify(&err.to_string()), RetryClass::Permanent);

        let err = ProcessError::InvalidPlayerId;
        assert_eq!(classify(&err.to_string()), RetryClass::Permanent);

        let parse_err = serde_json::from_slice::<SendMessage>(b"not json").unwrap_err();
        let err = ProcessError::InvalidFormat(parse_err);
        assert!(err.to_string().starts_with("invalid message format"));
        assert_eq!(classify(&err.to_string()), RetryClass::Permanent);

        let db_err = ProcessError::Database(sqlx::Error::PoolClosed);
        assert!(db_err.to_string().starts_with("database connection"));
        assert_eq!(classify(&db_err.to_string()), RetryClass::Retryable);
    }

    #[test]
    fn gateway_data_merges_caller_data_and_template_fields() {
        let req: SendMessage = serde_json::from_str(
            r#"{
                "notification_id": "n",
                "user_id": "u",
                "message": "m",
                "template_id": "welcome",
                "template_variables": {"name": "Ada"},
                "data": {"deep_link": "/home"},
                "correlation_id": "c"
            }"#,
        )
        .unwrap();

        let data = gateway_data(&req).unwrap();
        assert_eq!(data["deep_link"], "/home");
        assert_eq!(data["template_id"], "welcome");
        assert_eq!(data["template_variables"]["name"], "Ada");
    }

    #[test]
    fn gateway_data_is_absent_when_nothing_to_forward() {
        let req: SendMessage =
            serde_json::from_str(r#"{"user_id": "u", "message": "m"}"#).unwrap();
        assert!(gateway_data(&req).is_none());
    }
}
