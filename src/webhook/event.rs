//! Inbound webhook payload parsing.
//!
//! The transport wraps every message in the Graph webhook envelope
//! (`entry[].changes[].value`). Only user messages become events; status
//! callbacks (sent/delivered/read) carry no `messages` array and are
//! dropped here.

use serde::Deserialize;

use crate::error::WebhookError;

/// A normalized inbound event handed to the router.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    /// Transport-assigned message id, unique per message and stable
    /// across redeliveries.
    pub event_id: String,
    /// Raw sender address as the transport reports it.
    pub from: String,
    pub body: EventBody,
}

/// What the message carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventBody {
    Text(String),
    Image {
        media_id: String,
        caption: Option<String>,
    },
    /// A reply-button press (decision actions).
    Button { id: String },
    /// A list-row selection (menu).
    List { id: String },
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(default)]
    changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
struct Change {
    value: ChangeValue,
}

#[derive(Debug, Default, Deserialize)]
struct ChangeValue {
    #[serde(default)]
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    id: String,
    from: String,
    #[serde(rename = "type")]
    kind: String,
    text: Option<TextBody>,
    image: Option<MediaBody>,
    interactive: Option<Interactive>,
}

#[derive(Debug, Deserialize)]
struct TextBody {
    body: String,
}

#[derive(Debug, Deserialize)]
struct MediaBody {
    id: String,
    caption: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Interactive {
    button_reply: Option<Reply>,
    list_reply: Option<Reply>,
}

#[derive(Debug, Deserialize)]
struct Reply {
    id: String,
}

/// Parse a verified webhook body into at most one inbound event.
///
/// `Ok(None)` means a structurally valid payload with nothing to route
/// (status callbacks, unsupported message types).
pub fn parse_payload(body: &[u8]) -> Result<Option<InboundEvent>, WebhookError> {
    let payload: WebhookPayload =
        serde_json::from_slice(body).map_err(|e| WebhookError::BadPayload(e.to_string()))?;

    let message = payload
        .entry
        .into_iter()
        .flat_map(|entry| entry.changes)
        .flat_map(|change| change.value.messages)
        .next();
    let Some(message) = message else {
        return Ok(None);
    };

    let body = match message.kind.as_str() {
        "text" => match message.text {
            Some(text) => EventBody::Text(text.body),
            None => return Ok(None),
        },
        "image" => match message.image {
            Some(media) => EventBody::Image {
                media_id: media.id,
                caption: media.caption,
            },
            None => return Ok(None),
        },
        "interactive" => match message.interactive {
            Some(Interactive {
                button_reply: Some(reply),
                ..
            }) => EventBody::Button { id: reply.id },
            Some(Interactive {
                list_reply: Some(reply),
                ..
            }) => EventBody::List { id: reply.id },
            _ => return Ok(None),
        },
        _ => return Ok(None),
    };

    Ok(Some(InboundEvent {
        event_id: message.id,
        from: message.from,
        body,
    }))
}
