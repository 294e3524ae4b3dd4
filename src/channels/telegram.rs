//! Telegram channel: Bot API client for the photo relay.
//!
//! Inbound updates arrive either through the webhook route
//! ([`super::webhook`]) or by long-polling `getUpdates`; both go through
//! [`TelegramChannel::parse_update`]. Outbound replies use `sendMessage`
//! and `sendPhoto`, photos are fetched with `getFile`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::channels::{EventStream, Messenger, OutgoingPhoto};
use crate::dispatch::event::{InboundEvent, PhotoRef};
use crate::error::ChannelError;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Long-poll timeout passed to getUpdates, in seconds.
const POLL_TIMEOUT_SECS: u64 = 30;

// ── Bot API update types ────────────────────────────────────────────

/// One update as delivered by webhook or getUpdates.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<User>,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub photo: Option<Vec<PhotoSize>>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub media_group_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileInfo {
    #[serde(default)]
    file_path: Option<String>,
}

// ── Channel ─────────────────────────────────────────────────────────

/// Telegram Bot API client.
#[derive(Clone)]
pub struct TelegramChannel {
    bot_token: SecretString,
    allowed_users: Vec<String>,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(bot_token: SecretString, allowed_users: Vec<String>) -> Self {
        Self {
            bot_token,
            allowed_users,
            api_base: DEFAULT_API_BASE.to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    /// Point the client at another Bot API server.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.api_base,
            self.bot_token.expose_secret()
        )
    }

    fn file_url(&self, file_path: &str) -> String {
        format!(
            "{}/file/bot{}/{file_path}",
            self.api_base,
            self.bot_token.expose_secret()
        )
    }

    /// Check if any of the provided identities is allowed.
    pub fn is_any_user_allowed<'a, I>(&self, identities: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        check_user_allowed(&self.allowed_users, identities)
    }

    /// Convert an update into an [`InboundEvent`].
    ///
    /// Returns `None` for updates without a message and for senders outside
    /// the allowlist.
    pub fn parse_update(&self, update: Update) -> Option<InboundEvent> {
        let message = update.message?;

        let user_id = message.from.as_ref().map(|f| f.id.to_string());
        let username = message
            .from
            .as_ref()
            .and_then(|f| f.username.as_deref())
            .unwrap_or("unknown");

        let is_allowed = {
            let mut identities = vec![username];
            if let Some(ref id) = user_id {
                identities.push(id.as_str());
            }
            self.is_any_user_allowed(identities.iter().copied())
        };
        if !is_allowed {
            tracing::warn!(
                "Telegram: ignoring message from unauthorized user: \
                 username={username}, user_id={}",
                user_id.as_deref().unwrap_or("unknown")
            );
            return None;
        }

        // Telegram lists sizes smallest first.
        let photo = message
            .photo
            .as_ref()
            .and_then(|sizes| sizes.last())
            .map(|p| PhotoRef {
                file_id: p.file_id.clone(),
                width: p.width,
                height: p.height,
            });

        Some(InboundEvent {
            event_id: update.update_id.to_string(),
            message_id: Some(message.message_id),
            chat_id: message.chat.id.to_string(),
            text: message.text,
            photo,
            caption: message.caption,
            group_id: message.media_group_id,
        })
    }

    /// Send a text message as plain text. Replies echo captions and
    /// detection labels, so no parse mode is set.
    /// Splits long messages that exceed Telegram's 4096 char limit.
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        let chunks = split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH);

        for chunk in &chunks {
            self.send_message_chunk(chat_id, chunk).await?;
        }
        Ok(())
    }

    /// Send a single message chunk (≤4096 chars).
    async fn send_message_chunk(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&message_body(chat_id, text))
            .send()
            .await
            .map_err(send_failed)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason: format!("sendMessage returned {status}: {body}"),
            });
        }

        Ok(())
    }

    /// Send a photo from bytes (in-memory).
    pub async fn send_photo_bytes(
        &self,
        chat_id: &str,
        file_bytes: Vec<u8>,
        file_name: &str,
        caption: Option<&str>,
    ) -> Result<(), ChannelError> {
        let part = Part::bytes(file_bytes).file_name(file_name.to_string());

        let mut form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part("photo", part);

        if let Some(cap) = caption {
            form = form.text("caption", cap.to_string());
        }

        let resp = self
            .client
            .post(self.api_url("sendPhoto"))
            .multipart(form)
            .send()
            .await
            .map_err(send_failed)?;

        if !resp.status().is_success() {
            let err = resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason: format!("sendPhoto failed: {err}"),
            });
        }

        tracing::info!("Telegram photo sent to {chat_id}: {file_name}");
        Ok(())
    }

    /// Send a photo by URL (Telegram downloads it).
    pub async fn send_photo_by_url(
        &self,
        chat_id: &str,
        url: &str,
        caption: Option<&str>,
    ) -> Result<(), ChannelError> {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "photo": url
        });

        if let Some(cap) = caption {
            body["caption"] = serde_json::Value::String(cap.to_string());
        }

        let resp = self
            .client
            .post(self.api_url("sendPhoto"))
            .json(&body)
            .send()
            .await
            .map_err(send_failed)?;

        if !resp.status().is_success() {
            let err = resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason: format!("sendPhoto by URL failed: {err}"),
            });
        }

        tracing::info!("Telegram photo (URL) sent to {chat_id}: {url}");
        Ok(())
    }

    /// Resolve a file id to its download path via getFile.
    async fn get_file_path(&self, file_id: &str) -> Result<String, ChannelError> {
        let download_failed = |reason: String| ChannelError::DownloadFailed {
            name: "telegram".into(),
            file_id: file_id.to_string(),
            reason,
        };

        let resp: ApiResponse<FileInfo> = self
            .client
            .post(self.api_url("getFile"))
            .json(&serde_json::json!({ "file_id": file_id }))
            .send()
            .await
            .map_err(|e| download_failed(e.to_string()))?
            .json()
            .await
            .map_err(|e| download_failed(e.to_string()))?;

        if !resp.ok {
            return Err(download_failed(
                resp.description.unwrap_or_else(|| "getFile failed".into()),
            ));
        }

        resp.result
            .and_then(|f| f.file_path)
            .ok_or_else(|| download_failed("getFile returned no file_path".into()))
    }

    /// Register the webhook, replacing any previous one.
    pub async fn set_webhook(&self, url: &str, secret_token: &str) -> Result<(), ChannelError> {
        self.call_api(
            "setWebhook",
            serde_json::json!({
                "url": url,
                "secret_token": secret_token,
                "allowed_updates": ["message"],
                "drop_pending_updates": false,
            }),
        )
        .await?;
        tracing::info!(url = %url, "Telegram webhook registered");
        Ok(())
    }

    /// Remove the webhook so getUpdates can be used.
    pub async fn delete_webhook(&self) -> Result<(), ChannelError> {
        self.call_api("deleteWebhook", serde_json::json!({})).await
    }

    async fn call_api(&self, method: &str, body: serde_json::Value) -> Result<(), ChannelError> {
        let resp: ApiResponse<serde_json::Value> = self
            .client
            .post(self.api_url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?
            .json()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?;

        if resp.ok {
            Ok(())
        } else {
            Err(ChannelError::Http(format!(
                "{method} failed: {}",
                resp.description.unwrap_or_default()
            )))
        }
    }

    /// Verify the token against getMe. Failure here is fatal at startup.
    pub async fn health_check(&self) -> Result<(), ChannelError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: format!("getMe returned {}", resp.status()),
            })
        }
    }

    /// Long-poll getUpdates and yield parsed events.
    pub fn start_polling(&self) -> EventStream {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let url = self.api_url("getUpdates");
        let client = self.client.clone();
        let parser = self.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;

            tracing::info!("Telegram channel listening for messages...");

            loop {
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": POLL_TIMEOUT_SECS,
                    "allowed_updates": ["message"]
                });

                let resp = match client.post(&url).json(&body).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {e}");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let data: ApiResponse<Vec<Update>> = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!("Telegram parse error: {e}");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                };

                for update in data.result.unwrap_or_default() {
                    // Advance offset past this update
                    offset = offset.max(update.update_id + 1);

                    let Some(event) = parser.parse_update(update) else {
                        continue;
                    };

                    if tx.send(event).is_err() {
                        tracing::info!("Telegram listener channel closed");
                        return;
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });

        Box::pin(stream)
    }
}

// ── Messenger implementation ────────────────────────────────────────

#[async_trait]
impl Messenger for TelegramChannel {
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        self.send_message(chat_id, text).await
    }

    async fn send_photo(&self, chat_id: &str, photo: OutgoingPhoto) -> Result<(), ChannelError> {
        match photo {
            OutgoingPhoto::Bytes { data, file_name } => {
                self.send_photo_bytes(chat_id, data, &file_name, None).await
            }
            OutgoingPhoto::Url(url) => self.send_photo_by_url(chat_id, &url, None).await,
        }
    }

    async fn download_photo(&self, photo: &PhotoRef) -> Result<Vec<u8>, ChannelError> {
        let file_path = self.get_file_path(&photo.file_id).await?;
        let download_failed = |reason: String| ChannelError::DownloadFailed {
            name: "telegram".into(),
            file_id: photo.file_id.clone(),
            reason,
        };

        let resp = self
            .client
            .get(self.file_url(&file_path))
            .send()
            .await
            .map_err(|e| download_failed(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(download_failed(format!("file download returned {}", resp.status())));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| download_failed(e.to_string()))?;
        tracing::debug!(file_id = %photo.file_id, bytes = bytes.len(), "Downloaded photo");
        Ok(bytes.to_vec())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn send_failed(e: reqwest::Error) -> ChannelError {
    ChannelError::SendFailed {
        name: "telegram".into(),
        reason: e.to_string(),
    }
}

/// `sendMessage` payload. Text goes out verbatim, without a parse mode.
fn message_body(chat_id: &str, text: &str) -> serde_json::Value {
    serde_json::json!({
        "chat_id": chat_id,
        "text": text,
    })
}

/// Check if any identity in the iterator matches the allowed users list.
fn check_user_allowed<'a>(
    allowed_users: &[String],
    identities: impl IntoIterator<Item = &'a str>,
) -> bool {
    let ids: Vec<&str> = identities.into_iter().collect();
    allowed_users
        .iter()
        .any(|u| u == "*" || ids.contains(&u.as_str()))
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        // Largest char boundary within the limit.
        let mut limit = max_len;
        while !remaining.is_char_boundary(limit) {
            limit -= 1;
        }

        let chunk = &remaining[..limit];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(limit);

        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { limit } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(allowed: &[&str]) -> TelegramChannel {
        TelegramChannel::new(
            SecretString::from("123:ABC".to_string()),
            allowed.iter().map(|s| s.to_string()).collect(),
        )
    }

    fn update(json: serde_json::Value) -> Update {
        serde_json::from_value(json).unwrap()
    }

    fn photo_update() -> Update {
        update(serde_json::json!({
            "update_id": 1001,
            "message": {
                "message_id": 349,
                "from": {"id": 5957525411i64, "is_bot": false, "username": "alice"},
                "chat": {"id": 1243002838i64, "type": "private"},
                "date": 1690105468,
                "photo": [
                    {"file_id": "small", "file_unique_id": "s", "width": 90, "height": 90},
                    {"file_id": "large", "file_unique_id": "l", "width": 660, "height": 660}
                ],
                "caption": "Rotate"
            }
        }))
    }

    #[test]
    fn message_body_is_plain_text() {
        let body = message_body("42", "Unknown filter 'a_b_c *x*'.");
        assert_eq!(body["text"], "Unknown filter 'a_b_c *x*'.");
        assert_eq!(body["chat_id"], "42");
        assert!(body.get("parse_mode").is_none());
    }

    #[test]
    fn telegram_api_url() {
        let ch = channel(&[]);
        assert_eq!(
            ch.api_url("getMe"),
            "https://api.telegram.org/bot123:ABC/getMe"
        );
        assert_eq!(
            ch.file_url("photos/file_1.jpg"),
            "https://api.telegram.org/file/bot123:ABC/photos/file_1.jpg"
        );
    }

    #[test]
    fn telegram_api_base_override() {
        let ch = channel(&[]).with_api_base("http://localhost:9000/");
        assert_eq!(ch.api_url("sendPhoto"), "http://localhost:9000/bot123:ABC/sendPhoto");
    }

    // ── User allowlist tests ────────────────────────────────────────

    #[test]
    fn telegram_user_allowed_wildcard() {
        assert!(channel(&["*"]).is_any_user_allowed(["anyone"]));
    }

    #[test]
    fn telegram_user_allowed_specific() {
        let ch = channel(&["alice", "bob"]);
        assert!(ch.is_any_user_allowed(["alice"]));
        assert!(!ch.is_any_user_allowed(["eve"]));
    }

    #[test]
    fn telegram_user_denied_empty() {
        assert!(!channel(&[]).is_any_user_allowed(["anyone"]));
    }

    #[test]
    fn telegram_user_exact_match_not_substring() {
        let ch = channel(&["alice"]);
        assert!(!ch.is_any_user_allowed(["alice_bot"]));
        assert!(!ch.is_any_user_allowed(["malice"]));
    }

    #[test]
    fn telegram_user_allowed_by_numeric_id_identity() {
        let ch = channel(&["123456789"]);
        assert!(ch.is_any_user_allowed(["unknown", "123456789"]));
    }

    // ── Update parsing ──────────────────────────────────────────────

    #[test]
    fn parse_photo_update_uses_largest_size() {
        let event = channel(&["*"]).parse_update(photo_update()).unwrap();
        assert_eq!(event.event_id, "1001");
        assert_eq!(event.message_id, Some(349));
        assert_eq!(event.chat_id, "1243002838");
        assert_eq!(event.caption.as_deref(), Some("Rotate"));
        let photo = event.photo.unwrap();
        assert_eq!(photo.file_id, "large");
        assert_eq!((photo.width, photo.height), (660, 660));
        assert!(event.group_id.is_none());
    }

    #[test]
    fn parse_media_group_id() {
        let ev = channel(&["*"])
            .parse_update(update(serde_json::json!({
                "update_id": 5,
                "message": {
                    "message_id": 1,
                    "chat": {"id": 7},
                    "photo": [{"file_id": "a", "width": 1, "height": 1}],
                    "media_group_id": "1357"
                }
            })))
            .unwrap();
        assert_eq!(ev.group_id.as_deref(), Some("1357"));
        assert!(ev.caption.is_none());
    }

    #[test]
    fn parse_text_update() {
        let ev = channel(&["*"])
            .parse_update(update(serde_json::json!({
                "update_id": 6,
                "message": {"message_id": 2, "chat": {"id": 7}, "text": "Hi"}
            })))
            .unwrap();
        assert_eq!(ev.text.as_deref(), Some("Hi"));
        assert!(ev.photo.is_none());
    }

    #[test]
    fn parse_skips_unauthorized_sender() {
        assert!(channel(&["bob"]).parse_update(photo_update()).is_none());
        assert!(channel(&["5957525411"]).parse_update(photo_update()).is_some());
    }

    #[test]
    fn parse_skips_updates_without_message() {
        let u = update(serde_json::json!({"update_id": 9, "edited_message": {}}));
        assert!(channel(&["*"]).parse_update(u).is_none());
    }

    // ── Network error tests (expected to fail with no server) ───────

    #[tokio::test]
    async fn send_photo_bytes_unreachable_server() {
        let ch = channel(&["*"]).with_api_base("http://127.0.0.1:1");
        let result = ch
            .send_photo_bytes("123456", vec![0x89, 0x50, 0x4E, 0x47], "test.png", None)
            .await;
        assert!(matches!(result, Err(ChannelError::SendFailed { .. })));
    }

    #[tokio::test]
    async fn download_photo_unreachable_server() {
        let ch = channel(&["*"]).with_api_base("http://127.0.0.1:1");
        let result = ch.download_photo(&PhotoRef::new("abc")).await;
        assert!(matches!(result, Err(ChannelError::DownloadFailed { .. })));
    }

    #[tokio::test]
    async fn health_check_unreachable_server() {
        let ch = channel(&["*"]).with_api_base("http://127.0.0.1:1");
        assert!(matches!(
            ch.health_check().await,
            Err(ChannelError::StartupFailed { .. })
        ));
    }

    // ── Message splitting tests ─────────────────────────────────────

    #[test]
    fn split_message_short() {
        assert_eq!(split_message("Hello", 4096), vec!["Hello"]);
    }

    #[test]
    fn split_message_over_limit_on_newline() {
        let msg = format!("{}\n{}", "a".repeat(2000), "b".repeat(3000));
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks, vec!["a".repeat(2000), "b".repeat(3000)]);
    }

    #[test]
    fn split_message_no_good_split_point() {
        let chunks = split_message(&"a".repeat(5000), 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 4096);
        assert_eq!(chunks[1].len(), 904);
    }

    #[test]
    fn split_message_respects_char_boundaries() {
        let msg = "é".repeat(10);
        let chunks = split_message(&msg, 5);
        assert!(chunks.iter().all(|c| c.len() <= 5));
        assert_eq!(chunks.concat(), msg);
    }
}
