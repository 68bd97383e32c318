//! Outbound chat transport (Graph-API style messaging).
//!
//! All sends go through the [`ChatTransport`] trait so engines and jobs can
//! be tested against a recording stub. The HTTP implementation talks to the
//! `/{phone_id}/messages` endpoint and retries transient failures.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tracing::debug;

use crate::config::Config;
use crate::error::TransportError;
use crate::retry::{RetryPolicy, with_backoff};

/// One interactive reply button (a message carries at most three).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub id: String,
    pub title: String,
}

impl Button {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }
}

/// A titled section of an interactive list message.
#[derive(Debug, Clone)]
pub struct ListSection {
    pub title: String,
    pub rows: Vec<ListRow>,
}

/// One selectable row of a list message.
#[derive(Debug, Clone)]
pub struct ListRow {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
}

impl ListRow {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Outbound messaging operations used by the engines.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a plain text message.
    async fn send_text(&self, to: &str, body: &str) -> Result<(), TransportError>;

    /// Send a message with up to three reply buttons.
    async fn send_buttons(
        &self,
        to: &str,
        body: &str,
        buttons: &[Button],
    ) -> Result<(), TransportError>;

    /// Send an interactive list message.
    async fn send_list(
        &self,
        to: &str,
        body: &str,
        button_label: &str,
        sections: &[ListSection],
    ) -> Result<(), TransportError>;

    /// Send a pre-approved template message with body parameters.
    async fn send_template(
        &self,
        to: &str,
        template_name: &str,
        params: &[String],
    ) -> Result<(), TransportError>;

    /// Resolve a media id and download its bytes.
    async fn download_media(&self, media_id: &str) -> Result<Vec<u8>, TransportError>;
}

/// HTTP chat transport over the Graph-style messaging API.
pub struct HttpChatTransport {
    http: reqwest::Client,
    api_base: String,
    phone_id: String,
    access_token: SecretString,
    retry: RetryPolicy,
}

impl HttpChatTransport {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: config.chat_api_base.clone(),
            phone_id: config.phone_id.clone(),
            access_token: config.access_token.clone(),
            retry: RetryPolicy::default(),
        }
    }

    fn messages_url(&self) -> String {
        format!("{}/{}/messages", self.api_base, self.phone_id)
    }

    async fn post_message(&self, payload: Value) -> Result<(), TransportError> {
        with_backoff(&self.retry, || {
            let payload = payload.clone();
            async move {
                let response = self
                    .http
                    .post(self.messages_url())
                    .bearer_auth(self.access_token.expose_secret())
                    .json(&payload)
                    .send()
                    .await
                    .map_err(|e| TransportError::Request(e.to_string()))?;

                let status = response.status();
                if !status.is_success() {
                    let detail = response.text().await.unwrap_or_default();
                    return Err(TransportError::Api {
                        status: status.as_u16(),
                        detail,
                    });
                }
                Ok(())
            }
        })
        .await
    }
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn send_text(&self, to: &str, body: &str) -> Result<(), TransportError> {
        debug!(to, len = body.len(), "Sending text message");
        self.post_message(text_payload(to, body)).await
    }

    async fn send_buttons(
        &self,
        to: &str,
        body: &str,
        buttons: &[Button],
    ) -> Result<(), TransportError> {
        debug!(to, count = buttons.len(), "Sending button message");
        self.post_message(buttons_payload(to, body, buttons)).await
    }

    async fn send_list(
        &self,
        to: &str,
        body: &str,
        button_label: &str,
        sections: &[ListSection],
    ) -> Result<(), TransportError> {
        debug!(to, "Sending list message");
        self.post_message(list_payload(to, body, button_label, sections))
            .await
    }

    async fn send_template(
        &self,
        to: &str,
        template_name: &str,
        params: &[String],
    ) -> Result<(), TransportError> {
        debug!(to, template_name, "Sending template message");
        self.post_message(template_payload(to, template_name, params))
            .await
    }

    async fn download_media(&self, media_id: &str) -> Result<Vec<u8>, TransportError> {
        // Two steps: resolve the media id to a short-lived URL, then fetch
        // the bytes with the same bearer token.
        let meta: Value = self
            .http
            .get(format!("{}/{}", self.api_base, media_id))
            .bearer_auth(self.access_token.expose_secret())
            .send()
            .await
            .map_err(|e| TransportError::Media(e.to_string()))?
            .error_for_status()
            .map_err(|e| TransportError::Media(e.to_string()))?
            .json()
            .await
            .map_err(|e| TransportError::Media(e.to_string()))?;

        let url = meta
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| TransportError::Media(format!("No url for media {media_id}")))?;

        let bytes = self
            .http
            .get(url)
            .bearer_auth(self.access_token.expose_secret())
            .send()
            .await
            .map_err(|e| TransportError::Media(e.to_string()))?
            .error_for_status()
            .map_err(|e| TransportError::Media(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| TransportError::Media(e.to_string()))?;

        Ok(bytes.to_vec())
    }
}

fn text_payload(to: &str, body: &str) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "to": to,
        "type": "text",
        "text": { "body": body },
    })
}

fn buttons_payload(to: &str, body: &str, buttons: &[Button]) -> Value {
    debug_assert!(buttons.len() <= 3, "transport supports at most 3 buttons");
    let buttons: Vec<Value> = buttons
        .iter()
        .map(|b| {
            json!({
                "type": "reply",
                "reply": { "id": b.id, "title": b.title },
            })
        })
        .collect();

    json!({
        "messaging_product": "whatsapp",
        "to": to,
        "type": "interactive",
        "interactive": {
            "type": "button",
            "body": { "text": body },
            "action": { "buttons": buttons },
        },
    })
}

fn list_payload(to: &str, body: &str, button_label: &str, sections: &[ListSection]) -> Value {
    let sections: Vec<Value> = sections
        .iter()
        .map(|section| {
            let rows: Vec<Value> = section
                .rows
                .iter()
                .map(|row| {
                    let mut value = json!({ "id": row.id, "title": row.title });
                    if let Some(description) = &row.description {
                        value["description"] = json!(description);
                    }
                    value
                })
                .collect();
            json!({ "title": section.title, "rows": rows })
        })
        .collect();

    json!({
        "messaging_product": "whatsapp",
        "to": to,
        "type": "interactive",
        "interactive": {
            "type": "list",
            "body": { "text": body },
            "action": {
                "button": button_label,
                "sections": sections,
            },
        },
    })
}

fn template_payload(to: &str, template_name: &str, params: &[String]) -> Value {
    let parameters: Vec<Value> = params
        .iter()
        .map(|p| json!({ "type": "text", "text": p }))
        .collect();

    json!({
        "messaging_product": "whatsapp",
        "to": to,
        "type": "template",
        "template": {
            "name": template_name,
            "language": { "code": "en" },
            "components": [{ "type": "body", "parameters": parameters }],
        },
    })
}

/// Truncate to at most `max` characters, appending an ellipsis when cut.
///
/// Operates on char boundaries so multi-byte text never splits a codepoint.
pub fn truncate_preview(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_preview_short_text_unchanged() {
        assert_eq!(truncate_preview("hello", 900), "hello");
        assert_eq!(truncate_preview("", 10), "");
    }

    #[test]
    fn truncate_preview_cuts_with_ellipsis() {
        let long = "a".repeat(1000);
        let cut = truncate_preview(&long, 900);
        assert_eq!(cut.chars().count(), 900);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn truncate_preview_respects_char_boundaries() {
        let text = "é".repeat(20);
        let cut = truncate_preview(&text, 10);
        assert_eq!(cut.chars().count(), 10);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn text_payload_shape() {
        let payload = text_payload("353871234567", "hello");
        assert_eq!(payload["to"], "353871234567");
        assert_eq!(payload["type"], "text");
        assert_eq!(payload["text"]["body"], "hello");
    }

    #[test]
    fn buttons_payload_shape() {
        let buttons = [
            Button::new("post_approve_1", "Post It"),
            Button::new("post_edit_1", "Edit"),
            Button::new("post_skip_1", "Skip"),
        ];
        let payload = buttons_payload("353871234567", "Here's your post:", &buttons);
        assert_eq!(payload["interactive"]["type"], "button");
        let sent = payload["interactive"]["action"]["buttons"]
            .as_array()
            .unwrap();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0]["reply"]["id"], "post_approve_1");
        assert_eq!(sent[2]["reply"]["title"], "Skip");
    }

    #[test]
    fn list_payload_shape() {
        let sections = [ListSection {
            title: "Google Profile".to_string(),
            rows: vec![
                ListRow::new("menu_post", "Create a Post").with_description("Share an update"),
                ListRow::new("menu_offer", "Create an Offer"),
            ],
        }];
        let payload = list_payload("353871234567", "Hi!", "Menu", &sections);
        assert_eq!(payload["interactive"]["type"], "list");
        assert_eq!(payload["interactive"]["action"]["button"], "Menu");
        let rows = payload["interactive"]["action"]["sections"][0]["rows"]
            .as_array()
            .unwrap();
        assert_eq!(rows[0]["description"], "Share an update");
        assert!(rows[1].get("description").is_none());
    }

    #[test]
    fn template_payload_shape() {
        let payload = template_payload(
            "353871234567",
            "weekly_performance_digest",
            &["Murphy Electrical".to_string(), "digest body".to_string()],
        );
        assert_eq!(payload["template"]["name"], "weekly_performance_digest");
        let params = payload["template"]["components"][0]["parameters"]
            .as_array()
            .unwrap();
        assert_eq!(params.len(), 2);
        assert_eq!(params[0]["text"], "Murphy Electrical");
    }
}
