//! Integration tests for the webhook HTTP surface.
//!
//! Each test spins up an Axum server on a random port and exercises the
//! real HTTP contract with reqwest.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

use photo_relay::channels::webhook::SECRET_HEADER;
use photo_relay::channels::{
    Messenger, OutgoingPhoto, TelegramChannel, WebhookState, webhook_routes,
};
use photo_relay::detection::{DetectionReply, DetectionRequest, Detector};
use photo_relay::dispatch::{Dispatcher, DispatcherConfig, PhotoRef};
use photo_relay::error::{ChannelError, DetectionError};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

const SECRET: &str = "test-secret";

#[derive(Debug, PartialEq)]
enum Sent {
    Text { chat_id: String, text: String },
    Photo { chat_id: String, photo: OutgoingPhoto },
}

/// Records replies; never has photos to download.
struct RecordingMessenger {
    tx: mpsc::UnboundedSender<Sent>,
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        let _ = self.tx.send(Sent::Text {
            chat_id: chat_id.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_photo(&self, chat_id: &str, photo: OutgoingPhoto) -> Result<(), ChannelError> {
        let _ = self.tx.send(Sent::Photo {
            chat_id: chat_id.to_string(),
            photo,
        });
        Ok(())
    }

    async fn download_photo(&self, photo: &PhotoRef) -> Result<Vec<u8>, ChannelError> {
        Err(ChannelError::DownloadFailed {
            name: "recording".into(),
            file_id: photo.file_id.clone(),
            reason: "no photos in this test".into(),
        })
    }
}

struct UnusedDetector;

#[async_trait]
impl Detector for UnusedDetector {
    async fn detect(&self, _request: DetectionRequest) -> Result<DetectionReply, DetectionError> {
        Err(DetectionError::Unavailable {
            reason: "not used in webhook tests".into(),
        })
    }
}

/// Start an Axum server on a random port, return (base url, reply receiver).
async fn start_server(allowed_users: &[&str]) -> (String, mpsc::UnboundedReceiver<Sent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(RecordingMessenger { tx }),
        Arc::new(UnusedDetector),
        None,
        DispatcherConfig::default(),
    ));
    let telegram = Arc::new(TelegramChannel::new(
        SecretString::from("123:TEST"),
        allowed_users.iter().map(|u| u.to_string()).collect(),
    ));

    let app = webhook_routes(WebhookState::new(dispatcher, telegram, SECRET));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    (format!("http://127.0.0.1:{port}"), rx)
}

fn text_update(update_id: i64, username: &str, text: &str) -> Value {
    json!({
        "update_id": update_id,
        "message": {
            "message_id": update_id * 10,
            "from": {"id": 5957525411i64, "is_bot": false, "username": username},
            "chat": {"id": 1243002838i64, "type": "private"},
            "date": 1690105468,
            "text": text
        }
    })
}

async fn next_sent(rx: &mut mpsc::UnboundedReceiver<Sent>) -> Sent {
    timeout(TEST_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for a reply")
        .expect("messenger dropped")
}

#[tokio::test]
async fn liveness_routes() {
    let (base, _rx) = start_server(&["*"]).await;
    let client = reqwest::Client::new();

    let index = client.get(format!("{base}/")).send().await.unwrap();
    assert_eq!(index.status(), 200);
    assert_eq!(index.text().await.unwrap(), "Ok");

    let health: Value = client
        .get(format!("{base}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
}

#[tokio::test]
async fn webhook_rejects_missing_or_wrong_secret() {
    let (base, mut rx) = start_server(&["*"]).await;
    let client = reqwest::Client::new();
    let url = format!("{base}/webhook/telegram");

    let missing = client
        .post(&url)
        .json(&text_update(1, "alice", "hi"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 401);

    let wrong = client
        .post(&url)
        .header(SECRET_HEADER, "nope")
        .json(&text_update(2, "alice", "hi"))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), 401);

    assert!(
        timeout(Duration::from_millis(200), rx.recv()).await.is_err(),
        "rejected updates must not be dispatched"
    );
}

#[tokio::test]
async fn webhook_dispatches_greeting() {
    let (base, mut rx) = start_server(&["*"]).await;
    let resp = reqwest::Client::new()
        .post(format!("{base}/webhook/telegram"))
        .header(SECRET_HEADER, SECRET)
        .json(&text_update(1, "alice", "Hi"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "Ok");

    assert_eq!(
        next_sent(&mut rx).await,
        Sent::Text {
            chat_id: "1243002838".into(),
            text: "Hi, how can I help you?".into()
        }
    );
}

#[tokio::test]
async fn webhook_redelivery_is_deduplicated() {
    let (base, mut rx) = start_server(&["*"]).await;
    let client = reqwest::Client::new();

    for _ in 0..3 {
        let resp = client
            .post(format!("{base}/webhook/telegram"))
            .header(SECRET_HEADER, SECRET)
            .json(&text_update(7, "alice", "hi"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    next_sent(&mut rx).await;
    assert!(timeout(Duration::from_millis(300), rx.recv()).await.is_err());
}

#[tokio::test]
async fn webhook_drops_unauthorized_sender() {
    let (base, mut rx) = start_server(&["bob"]).await;
    let resp = reqwest::Client::new()
        .post(format!("{base}/webhook/telegram"))
        .header(SECRET_HEADER, SECRET)
        .json(&text_update(1, "mallory", "hi"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(timeout(Duration::from_millis(200), rx.recv()).await.is_err());
}

#[tokio::test]
async fn webhook_rejects_malformed_body() {
    let (base, _rx) = start_server(&["*"]).await;
    let resp = reqwest::Client::new()
        .post(format!("{base}/webhook/telegram"))
        .header(SECRET_HEADER, SECRET)
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn detection_callback_is_delivered_without_classification() {
    let (base, mut rx) = start_server(&["*"]).await;
    let resp = reqwest::Client::new()
        .post(format!("{base}/detections/callback?token={SECRET}"))
        .json(&json!({
            "chat_id": "1243002838",
            "labels": ["person", "bicycle"],
            "predicted_s3_url": "https://bucket.example/predicted/1.jpg"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "delivered");

    assert_eq!(
        next_sent(&mut rx).await,
        Sent::Text {
            chat_id: "1243002838".into(),
            text: "Objects detected:\nbicycle\nperson".into()
        }
    );
    assert_eq!(
        next_sent(&mut rx).await,
        Sent::Photo {
            chat_id: "1243002838".into(),
            photo: OutgoingPhoto::Url("https://bucket.example/predicted/1.jpg".into())
        }
    );
}

#[tokio::test]
async fn detection_callback_requires_shared_secret() {
    let (base, mut rx) = start_server(&["*"]).await;
    let client = reqwest::Client::new();
    let body = json!({
        "chat_id": "999",
        "labels": ["person"],
        "image_url": "https://elsewhere.example/x.jpg"
    });

    let missing = client
        .post(format!("{base}/detections/callback"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 401);

    let wrong = client
        .post(format!("{base}/detections/callback?token=nope"))
        .header(SECRET_HEADER, "nope")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), 401);

    assert!(
        timeout(Duration::from_millis(200), rx.recv()).await.is_err(),
        "rejected callbacks must not reach the chat"
    );
}
