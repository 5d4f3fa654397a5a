use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A push send request, both the queue wire shape and the HTTP request body.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SendMessage {
    #[serde(default)]
    pub notification_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_variables: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default)]
    pub correlation_id: String,
}

/// A device-token registration or update.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TokenUpdate {
    pub user_id: String,
    pub device_token: String,
    pub platform: String, // web, ios, android
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub onesignal_player_id: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct StatusUpdateRequest {
    pub notification_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct GetHealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub dependencies: DependenciesStatus,
}

#[derive(Clone, Debug, Serialize)]
pub struct DependenciesStatus {
    pub rabbitmq: String,
    pub postgresql: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_message_round_trips_with_optional_fields_absent() {
        let raw = r#"{
            "notification_id": "n-1",
            "user_id": "u-1",
            "message": "hello",
            "correlation_id": "c-1"
        }"#;
        let msg: SendMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.notification_id, "n-1");
        assert_eq!(msg.user_id, "u-1");
        assert_eq!(msg.message, "hello");
        assert!(msg.title.is_none());
        assert!(msg.template_id.is_none());
        assert!(msg.data.is_none());

        // Absent optionals stay off the wire
        let encoded = serde_json::to_value(&msg).unwrap();
        assert!(encoded.get("title").is_none());
        assert!(encoded.get("priority").is_none());
        assert_eq!(encoded["correlation_id"], "c-1");
    }

    #[test]
    fn send_message_tolerates_missing_ids() {
        // HTTP clients may omit notification_id/correlation_id, the handler
        // fills them in.
        let raw = r#"{"user_id": "u-2", "message": "hi"}"#;
        let msg: SendMessage = serde_json::from_str(raw).unwrap();
        assert!(msg.notification_id.is_empty());
        assert!(msg.correlation_id.is_empty());
    }

    #[test]
    fn token_update_round_trips() {
        let raw = r#"{
            "user_id": "u-3",
            "device_token": "tok-abc",
            "platform": "ios",
            "onesignal_player_id": "p-9"
        }"#;
        let update: TokenUpdate = serde_json::from_str(raw).unwrap();
        assert_eq!(update.onesignal_player_id.as_deref(), Some("p-9"));

        let without_player = r#"{"user_id": "u", "device_token": "t", "platform": "web"}"#;
        let update: TokenUpdate = serde_json::from_str(without_player).unwrap();
        assert!(update.onesignal_player_id.is_none());
    }
}
