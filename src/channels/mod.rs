//! Messaging collaborator: how the dispatcher talks back to users.

pub mod telegram;
pub mod webhook;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::dispatch::event::{InboundEvent, PhotoRef};
use crate::error::ChannelError;

pub use telegram::TelegramChannel;
pub use webhook::{WebhookState, webhook_routes};

/// Stream of inbound events from a channel.
pub type EventStream = Pin<Box<dyn Stream<Item = InboundEvent> + Send>>;

/// Photo to send back to a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingPhoto {
    /// Encoded image bytes.
    Bytes { data: Vec<u8>, file_name: String },
    /// Publicly reachable URL the platform fetches itself.
    Url(String),
}

impl OutgoingPhoto {
    pub fn png(data: Vec<u8>, file_name: impl Into<String>) -> Self {
        Self::Bytes {
            data,
            file_name: file_name.into(),
        }
    }
}

/// Outbound side of the messaging platform.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<(), ChannelError>;

    async fn send_photo(&self, chat_id: &str, photo: OutgoingPhoto) -> Result<(), ChannelError>;

    /// Fetch the bytes of a photo the user sent.
    async fn download_photo(&self, photo: &PhotoRef) -> Result<Vec<u8>, ChannelError>;
}
