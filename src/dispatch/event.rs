//! Inbound event records handed to the dispatcher.

use serde::{Deserialize, Serialize};

/// Reference to a photo held by the messaging platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoRef {
    /// Platform file id used to download the photo.
    pub file_id: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

impl PhotoRef {
    pub fn new(file_id: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            width: 0,
            height: 0,
        }
    }
}

/// One message delivered by the messaging collaborator. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Unique delivery id (Telegram `update_id`).
    pub event_id: String,
    /// Message id within the conversation, when the platform provides one.
    pub message_id: Option<i64>,
    /// Conversation to reply to.
    pub chat_id: String,
    pub text: Option<String>,
    pub photo: Option<PhotoRef>,
    pub caption: Option<String>,
    /// Set when the photo belongs to a multi-photo submission.
    pub group_id: Option<String>,
}

impl InboundEvent {
    /// A text-only event.
    pub fn text(
        event_id: impl Into<String>,
        chat_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            message_id: None,
            chat_id: chat_id.into(),
            text: Some(text.into()),
            photo: None,
            caption: None,
            group_id: None,
        }
    }

    /// A photo event with no caption.
    pub fn photo(event_id: impl Into<String>, chat_id: impl Into<String>, photo: PhotoRef) -> Self {
        Self {
            event_id: event_id.into(),
            message_id: None,
            chat_id: chat_id.into(),
            text: None,
            photo: Some(photo),
            caption: None,
            group_id: None,
        }
    }

    pub fn with_message_id(mut self, message_id: i64) -> Self {
        self.message_id = Some(message_id);
        self
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Caption with surrounding whitespace removed, if non-empty.
    pub fn caption_text(&self) -> Option<&str> {
        self.caption
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}
