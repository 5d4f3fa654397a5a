use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::info;

const NOTIFICATIONS_URL: &str = "https://api.onesignal.com/notifications?c=push";

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("failed to send request: {0}")]
    Http(#[from] reqwest::Error),

    #[error("onesignal API error (status {status}): {body}")]
    Api { status: u16, body: String },
}

/// REST client for the OneSignal push gateway.
pub struct OneSignalClient {
    http: reqwest::Client,
    app_id: String,
    api_key: String,
}

#[derive(Debug, Default, Serialize)]
pub struct OneSignalNotification {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_player_ids: Option<Vec<String>>,
    pub contents: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headings: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct OneSignalResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub recipients: i32,
    /// Can be an array of strings or an object, depending on the failure.
    #[serde(default)]
    pub errors: Option<serde_json::Value>,
}

impl OneSignalClient {
    pub fn new(app_id: &str, api_key: &str) -> Self {
        OneSignalClient {
            http: reqwest::Client::new(),
            app_id: app_id.to_string(),
            api_key: api_key.to_string(),
        }
    }

    pub async fn send(
        &self,
        notification: &OneSignalNotification,
    ) -> Result<OneSignalResponse, GatewayError> {
        let res = self
            .http
            .post(NOTIFICATIONS_URL)
            .header("Authorization", format!("Basic {}", self.api_key))
            .json(notification)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(GatewayError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: OneSignalResponse = res.json().await?;
        info!(
            "OneSignal accepted notification {} for {} recipients",
            parsed.id, parsed.recipients
        );
        Ok(parsed)
    }

    pub async fn send_to_players(
        &self,
        player_ids: &[String],
        title: &str,
        message: &str,
        data: Option<serde_json::Value>,
    ) -> Result<OneSignalResponse, GatewayError> {
        let notification = OneSignalNotification {
            app_id: Some(self.app_id.clone()),
            include_player_ids: Some(player_ids.to_vec()),
            contents: HashMap::from([("en".to_string(), message.to_string())]),
            headings: Some(HashMap::from([("en".to_string(), title.to_string())])),
            data,
        };
        self.send(&notification).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_payload_omits_empty_fields() {
        let notification = OneSignalNotification {
            app_id: Some("app".to_string()),
            include_player_ids: Some(vec!["p-1".to_string()]),
            contents: HashMap::from([("en".to_string(), "hi".to_string())]),
            headings: None,
            data: None,
        };
        let encoded = serde_json::to_value(&notification).unwrap();
        assert_eq!(encoded["app_id"], "app");
        assert_eq!(encoded["include_player_ids"][0], "p-1");
        assert!(encoded.get("headings").is_none());
        assert!(encoded.get("data").is_none());
    }

    #[test]
    fn response_tolerates_error_shapes() {
        let as_list: OneSignalResponse =
            serde_json::from_str(r#"{"id": "n", "recipients": 0, "errors": ["bad id"]}"#).unwrap();
        assert!(as_list.errors.is_some());

        let as_object: OneSignalResponse =
            serde_json::from_str(r#"{"errors": {"invalid_player_ids": ["x"]}}"#).unwrap();
        assert!(as_object.errors.is_some());
        assert_eq!(as_object.recipients, 0);
    }
}
