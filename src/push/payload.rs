//! Push notification payload shape.
//!
//! This is the only wire format the scheduling core owns: the JSON document
//! handed to the delivery channel and interpreted by the receiving client's
//! service worker.

use serde::{Deserialize, Serialize};

/// An action button offered by the notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadAction {
    pub action: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// The notification document sent to each device.
///
/// `tag` doubles as the receiver-side dedup key: two payloads with the same
/// tag collapse into one visible notification on the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub tag: String,
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<PayloadAction>,
}

impl PushPayload {
    pub fn new(
        title: impl Into<String>,
        body: impl Into<String>,
        tag: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            icon: "/icons/notification.png".to_string(),
            tag: tag.into(),
            data,
            actions: Vec::new(),
        }
    }

    pub fn with_actions(mut self, actions: Vec<PayloadAction>) -> Self {
        self.actions = actions;
        self
    }
}
