//! The dispatcher state machine.
//!
//! Every inbound event is classified from scratch by [`classify`]; the
//! dispatcher then runs the terminal state and reports what it did as an
//! [`Outcome`]. The only state carried between events lives in the
//! [`SessionRegistry`], the [`DebounceScheduler`] and the
//! [`SingleFlightGuard`].

use std::sync::{Arc, Weak};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::channels::{Messenger, OutgoingPhoto};
use crate::detection::{DetectionReply, DetectionRequest, DetectionResult, Detector, ResultImage};
use crate::dispatch::event::{InboundEvent, PhotoRef};
use crate::error::DispatchError;
use crate::imaging::{CaptionCommand, Filter, FilterSettings, PixelMatrix, apply_filter, concat_all};
use crate::session::{
    DEFAULT_DEDUP_CAPACITY, DebounceScheduler, DedupKey, GroupSession, ResourceClass,
    SessionRegistry, SingleFlightGuard, TimerHandle,
};
use crate::storage::{ObjectStore, object_key};

/// Quiet period before a photo group is processed.
pub const DEFAULT_GROUP_DEBOUNCE: Duration = Duration::from_millis(1500);

const GREETING_KEYWORD: &str = "hi";
const GREETING_REPLY: &str = "Hi, how can I help you?";
const PHOTO_PROMPT: &str = "Please send a photo with a caption indicating the filter to apply.";
const FILTER_PROMPT: &str =
    "Please add a filter name like 'blur', 'rotate', 'contour', 'segment', 'salt and pepper' or 'yolo'.";
const DETECTION_SUBMITTED: &str = "Image submitted for object detection. Results will follow.";

/// Dispatcher tunables.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub group_debounce: Duration,
    pub dedup_capacity: usize,
    pub filters: FilterSettings,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            group_debounce: DEFAULT_GROUP_DEBOUNCE,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            filters: FilterSettings::default(),
        }
    }
}

/// Which terminal state an event lands in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Duplicate,
    Greeting,
    NoPhotoNoText,
    GroupedPhoto,
    SinglePhotoNoCaption,
    SinglePhotoDetectionRequested,
    SinglePhotoFilterRequested(Filter),
    /// Carries the normalised caption.
    UnknownFilter(String),
}

/// What handling an event (or finishing a group) did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Duplicate,
    Greeted,
    PromptedForPhoto,
    /// Photo added to a group; processing is deferred to the group timer.
    Grouped { group_id: String, photos: usize },
    PromptedForFilter,
    Detected { labels: usize },
    DetectionSubmitted,
    /// Another detection call was in flight.
    Busy,
    Filtered(Filter),
    GroupProcessed { group_id: String, photos: usize },
    UnknownFilter(String),
    /// The user was sent an error reply.
    Failed { reason: String },
}

/// Classify an event. `duplicate` is the dedup window's verdict.
pub fn classify(event: &InboundEvent, duplicate: bool) -> Classification {
    if duplicate {
        return Classification::Duplicate;
    }

    let is_greeting = event
        .text
        .as_deref()
        .is_some_and(|t| t.trim().eq_ignore_ascii_case(GREETING_KEYWORD));
    if is_greeting {
        return Classification::Greeting;
    }

    if event.photo.is_none() {
        return Classification::NoPhotoNoText;
    }

    if event.group_id.is_some() {
        return Classification::GroupedPhoto;
    }

    match CaptionCommand::parse(event.caption.as_deref()) {
        CaptionCommand::Empty => Classification::SinglePhotoNoCaption,
        CaptionCommand::Detect => Classification::SinglePhotoDetectionRequested,
        CaptionCommand::Filter(filter) => Classification::SinglePhotoFilterRequested(filter),
        CaptionCommand::Unknown(caption) => Classification::UnknownFilter(caption),
    }
}

/// Routes inbound events to the transform engine or the detector.
pub struct Dispatcher {
    messenger: Arc<dyn Messenger>,
    detector: Arc<dyn Detector>,
    store: Option<Arc<dyn ObjectStore>>,
    registry: SessionRegistry,
    scheduler: DebounceScheduler,
    flights: SingleFlightGuard,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        messenger: Arc<dyn Messenger>,
        detector: Arc<dyn Detector>,
        store: Option<Arc<dyn ObjectStore>>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            messenger,
            detector,
            store,
            registry: SessionRegistry::new(config.dedup_capacity),
            scheduler: DebounceScheduler::new(),
            flights: SingleFlightGuard::new(),
            config,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Groups still waiting for their quiet period to end.
    pub fn pending_groups(&self) -> usize {
        self.scheduler.pending()
    }

    /// Handle one inbound event to completion.
    pub async fn handle(self: &Arc<Self>, event: InboundEvent) -> Outcome {
        let duplicate = self.registry.seen(DedupKey::for_event(&event));
        let classification = classify(&event, duplicate);
        debug!(
            event_id = %event.event_id,
            chat_id = %event.chat_id,
            ?classification,
            "Classified event"
        );

        let chat_id = event.chat_id.as_str();
        match classification {
            Classification::Duplicate => {
                info!(event_id = %event.event_id, "Duplicate event skipped");
                Outcome::Duplicate
            }
            Classification::Greeting => {
                self.reply(chat_id, GREETING_REPLY).await;
                Outcome::Greeted
            }
            Classification::NoPhotoNoText => {
                self.reply(chat_id, PHOTO_PROMPT).await;
                Outcome::PromptedForPhoto
            }
            Classification::GroupedPhoto => self.enqueue_group(&event),
            Classification::SinglePhotoNoCaption => {
                self.reply(chat_id, FILTER_PROMPT).await;
                Outcome::PromptedForFilter
            }
            Classification::SinglePhotoDetectionRequested => {
                let Some(photo) = event.photo.as_ref() else {
                    return Outcome::PromptedForPhoto;
                };
                self.run_detection(chat_id, photo).await
            }
            Classification::SinglePhotoFilterRequested(filter) => {
                let Some(photo) = event.photo.as_ref() else {
                    return Outcome::PromptedForPhoto;
                };
                match self.run_filter(chat_id, photo, filter).await {
                    Ok(()) => Outcome::Filtered(filter),
                    Err(e) => self.fail(chat_id, e).await,
                }
            }
            Classification::UnknownFilter(caption) => {
                let shown = event.caption_text().unwrap_or(&caption);
                self.reply(chat_id, &format!("Unknown filter '{shown}'.")).await;
                Outcome::UnknownFilter(caption)
            }
        }
    }

    /// Deliver a detection result that arrived out of band.
    pub async fn deliver_detection(&self, chat_id: &str, result: DetectionResult) -> Outcome {
        let labels = result.labels.len();
        match self.send_detection_result(chat_id, result).await {
            Ok(()) => Outcome::Detected { labels },
            Err(e) => {
                warn!(chat_id = %chat_id, error = %e, "Failed to deliver detection result");
                Outcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    // ── Photo groups ────────────────────────────────────────────────

    fn enqueue_group(self: &Arc<Self>, event: &InboundEvent) -> Outcome {
        let (Some(group_id), Some(photo)) = (event.group_id.as_deref(), event.photo.clone()) else {
            return Outcome::PromptedForPhoto;
        };

        let dispatcher: Weak<Self> = Arc::downgrade(self);
        let delay = self.config.group_debounce;
        let update = self.registry.upsert_group(
            group_id,
            &event.chat_id,
            photo,
            event.caption.as_deref(),
            |key| {
                self.scheduler.arm(key, delay, move |group_id, timer| async move {
                    if let Some(dispatcher) = dispatcher.upgrade() {
                        dispatcher.finish_group(&group_id, timer).await;
                    }
                })
            },
        );

        info!(
            group_id = %group_id,
            photos = update.photo_count,
            created = update.created,
            "Photo queued in group"
        );

        Outcome::Grouped {
            group_id: group_id.to_string(),
            photos: update.photo_count,
        }
    }

    /// Called by the group's timer once the quiet period has elapsed.
    /// Returns `None` when the timer was superseded.
    pub async fn finish_group(&self, group_id: &str, timer: TimerHandle) -> Option<Outcome> {
        let session = self.registry.take_group(group_id, timer)?;
        let open_ms = (chrono::Utc::now() - session.opened_at).num_milliseconds();
        info!(
            group_id = %group_id,
            photos = session.photos.len(),
            caption = ?session.caption,
            open_ms,
            "Processing photo group"
        );

        let outcome = match self.process_group(&session).await {
            Ok(()) => Outcome::GroupProcessed {
                group_id: session.group_id.clone(),
                photos: session.photos.len(),
            },
            Err(e) => self.fail(&session.chat_id, e).await,
        };
        Some(outcome)
    }

    async fn process_group(&self, session: &GroupSession) -> Result<(), DispatchError> {
        let caption = session
            .caption
            .as_deref()
            .ok_or_else(|| DispatchError::GroupIncomplete {
                group_id: session.group_id.clone(),
            })?;

        match CaptionCommand::parse(Some(caption)) {
            CaptionCommand::Filter(Filter::Concat) => {}
            CaptionCommand::Empty => {
                return Err(DispatchError::GroupIncomplete {
                    group_id: session.group_id.clone(),
                });
            }
            _ => {
                return Err(DispatchError::UnknownGroupFilter {
                    filter: caption.to_string(),
                });
            }
        }

        if session.photos.len() < 2 {
            return Err(DispatchError::NotEnoughPhotos {
                filter: Filter::Concat.name(),
                needed: 2,
                got: session.photos.len(),
            });
        }

        let mut downloads = Vec::with_capacity(session.photos.len());
        for photo in &session.photos {
            downloads.push(self.messenger.download_photo(photo).await?);
        }

        let png = run_blocking(move || {
            let images = downloads
                .iter()
                .map(|bytes| PixelMatrix::decode(bytes))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(concat_all(&images)?.encode_png()?)
        })
        .await?;

        let file_name = format!("{}_concat.png", session.group_id);
        self.store_best_effort(&object_key("filtered", &session.chat_id, &file_name), &png)
            .await;
        self.messenger
            .send_photo(&session.chat_id, OutgoingPhoto::png(png, file_name))
            .await?;
        Ok(())
    }

    // ── Single photos ───────────────────────────────────────────────

    async fn run_filter(
        &self,
        chat_id: &str,
        photo: &PhotoRef,
        filter: Filter,
    ) -> Result<(), DispatchError> {
        let bytes = self.messenger.download_photo(photo).await?;
        let settings = self.config.filters;

        let png = run_blocking(move || {
            let image = PixelMatrix::decode(&bytes)?;
            Ok(apply_filter(&image, filter, settings)?.encode_png()?)
        })
        .await?;

        info!(chat_id = %chat_id, filter = %filter, bytes = png.len(), "Filter applied");

        let file_name = format!("{}_filtered.png", photo.file_id);
        self.store_best_effort(&object_key("filtered", chat_id, &file_name), &png)
            .await;
        self.messenger
            .send_photo(chat_id, OutgoingPhoto::png(png, file_name))
            .await?;
        Ok(())
    }

    async fn run_detection(&self, chat_id: &str, photo: &PhotoRef) -> Outcome {
        let Some(_permit) = self.flights.try_acquire(ResourceClass::Detection) else {
            let busy = DispatchError::ResourceBusy {
                resource: ResourceClass::Detection.name(),
            };
            info!(chat_id = %chat_id, "Detection already in flight, rejecting");
            self.reply(chat_id, &busy.user_message()).await;
            return Outcome::Busy;
        };

        match self.detect(chat_id, photo).await {
            Ok(outcome) => outcome,
            Err(e) => self.fail(chat_id, e).await,
        }
    }

    async fn detect(&self, chat_id: &str, photo: &PhotoRef) -> Result<Outcome, DispatchError> {
        let image = self.messenger.download_photo(photo).await?;
        let file_name = format!("{}.jpg", photo.file_id);
        self.store_best_effort(&object_key("uploads", chat_id, &file_name), &image)
            .await;

        let reply = self
            .detector
            .detect(DetectionRequest {
                image,
                file_name,
                user_id: chat_id.to_string(),
                chat_id: chat_id.to_string(),
            })
            .await?;

        match reply {
            DetectionReply::Completed(result) => {
                let labels = result.labels.len();
                self.send_detection_result(chat_id, result).await?;
                Ok(Outcome::Detected { labels })
            }
            DetectionReply::Submitted { job_id } => {
                info!(chat_id = %chat_id, job_id = ?job_id, "Detection submitted");
                self.reply(chat_id, DETECTION_SUBMITTED).await;
                Ok(Outcome::DetectionSubmitted)
            }
        }
    }

    async fn send_detection_result(
        &self,
        chat_id: &str,
        result: DetectionResult,
    ) -> Result<(), DispatchError> {
        self.messenger.send_text(chat_id, &result.summary()).await?;

        match result.image {
            Some(ResultImage::Bytes(bytes)) => {
                let file_name = format!("predicted_{}.jpg", uuid::Uuid::new_v4());
                self.store_best_effort(&object_key("predicted", chat_id, &file_name), &bytes)
                    .await;
                self.messenger
                    .send_photo(
                        chat_id,
                        OutgoingPhoto::Bytes {
                            data: bytes,
                            file_name,
                        },
                    )
                    .await?;
            }
            Some(ResultImage::Url(url)) => {
                self.messenger
                    .send_photo(chat_id, OutgoingPhoto::Url(url))
                    .await?;
            }
            None => {}
        }
        Ok(())
    }

    // ── Helpers ─────────────────────────────────────────────────────

    async fn reply(&self, chat_id: &str, text: &str) {
        if let Err(e) = self.messenger.send_text(chat_id, text).await {
            warn!(chat_id = %chat_id, error = %e, "Failed to send reply");
        }
    }

    async fn fail(&self, chat_id: &str, error: DispatchError) -> Outcome {
        warn!(chat_id = %chat_id, error = %error, "Event failed");
        self.reply(chat_id, &error.user_message()).await;
        Outcome::Failed {
            reason: error.to_string(),
        }
    }

    async fn store_best_effort(&self, key: &str, bytes: &[u8]) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.upload(bytes, key).await {
            warn!(backend = store.name(), key = %key, error = %e, "Upload failed");
        }
    }
}

/// Run CPU-bound image work off the async workers.
async fn run_blocking<T, F>(f: F) -> Result<T, DispatchError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, DispatchError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DispatchError::Task(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn photo(id: &str) -> InboundEvent {
        InboundEvent::photo(id, "42", PhotoRef::new(format!("file-{id}")))
    }

    #[test]
    fn duplicate_wins_over_everything() {
        let event = InboundEvent::text("1", "42", "hi");
        assert_eq!(classify(&event, true), Classification::Duplicate);
    }

    #[test]
    fn greeting_is_trimmed_and_case_insensitive() {
        for text in ["hi", "Hi", "  HI  "] {
            let event = InboundEvent::text("1", "42", text);
            assert_eq!(classify(&event, false), Classification::Greeting, "{text}");
        }
        let event = InboundEvent::text("1", "42", "hippo");
        assert_eq!(classify(&event, false), Classification::NoPhotoNoText);
    }

    #[test]
    fn grouped_photo_ignores_caption() {
        let event = photo("1").with_group("g").with_caption("nonsense");
        assert_eq!(classify(&event, false), Classification::GroupedPhoto);
    }

    #[test]
    fn single_photo_states() {
        assert_eq!(
            classify(&photo("1"), false),
            Classification::SinglePhotoNoCaption
        );
        assert_eq!(
            classify(&photo("1").with_caption("  "), false),
            Classification::SinglePhotoNoCaption
        );
        assert_eq!(
            classify(&photo("1").with_caption("YOLO"), false),
            Classification::SinglePhotoDetectionRequested
        );
        assert_eq!(
            classify(&photo("1").with_caption("Segment"), false),
            Classification::SinglePhotoFilterRequested(Filter::Segment)
        );
        assert_eq!(
            classify(&photo("1").with_caption("sepia!"), false),
            Classification::UnknownFilter("sepia".into())
        );
    }

    #[test]
    fn default_config_matches_constants() {
        let config = DispatcherConfig::default();
        assert_eq!(config.group_debounce, Duration::from_millis(1500));
        assert_eq!(config.dedup_capacity, DEFAULT_DEDUP_CAPACITY);
        assert_eq!(config.filters.blur_kernel, 16);
    }
}
