//! In-flight photo groups and the dedup window, behind one lock.
//!
//! The registry is the only shared mutable state the dispatcher touches
//! besides the single-flight guard. Critical sections are synchronous and
//! short; nothing here is held across an `.await`.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::debug;

use super::debounce::TimerHandle;
use super::dedup::{DedupKey, DedupWindow};
use crate::dispatch::event::PhotoRef;
use crate::imaging::normalize_caption;

/// Accumulated state for one multi-photo submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSession {
    pub group_id: String,
    pub chat_id: String,
    /// Photos in arrival order.
    pub photos: Vec<PhotoRef>,
    /// Last caption seen in the group that normalises to something.
    pub caption: Option<String>,
    /// Timer that will finalize the group.
    pub timer: Option<TimerHandle>,
    /// When the first photo arrived.
    pub opened_at: DateTime<Utc>,
}

/// What the caller learns from [`SessionRegistry::upsert_group`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupUpdate {
    pub created: bool,
    pub photo_count: usize,
    pub caption: Option<String>,
    pub timer: TimerHandle,
}

#[derive(Debug)]
struct RegistryInner {
    dedup: DedupWindow,
    groups: HashMap<String, GroupSession>,
}

/// Group sessions plus the dedup window.
#[derive(Debug)]
pub struct SessionRegistry {
    inner: Mutex<RegistryInner>,
}

impl SessionRegistry {
    pub fn new(dedup_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                dedup: DedupWindow::new(dedup_capacity),
                groups: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomic test-and-set against the dedup window. `true` means the key
    /// was already processed.
    pub fn seen(&self, key: DedupKey) -> bool {
        self.lock().dedup.seen(key)
    }

    /// Add a photo to its group, creating the group on first sighting.
    ///
    /// A `caption` replaces the declared filter unless it normalises to
    /// nothing (emoji, punctuation). `arm` runs while
    /// the registry lock is held, so the group's timer is always the one
    /// armed by the latest photo.
    pub fn upsert_group(
        &self,
        group_id: &str,
        chat_id: &str,
        photo: PhotoRef,
        caption: Option<&str>,
        arm: impl FnOnce(&str) -> TimerHandle,
    ) -> GroupUpdate {
        let mut inner = self.lock();
        let created = !inner.groups.contains_key(group_id);
        let session = inner
            .groups
            .entry(group_id.to_string())
            .or_insert_with(|| GroupSession {
                group_id: group_id.to_string(),
                chat_id: chat_id.to_string(),
                photos: Vec::new(),
                caption: None,
                timer: None,
                opened_at: Utc::now(),
            });

        session.photos.push(photo);
        if let Some(caption) = caption
            .map(str::trim)
            .filter(|c| !normalize_caption(c).is_empty())
        {
            session.caption = Some(caption.to_string());
        }

        let timer = arm(group_id);
        session.timer = Some(timer);

        debug!(
            group_id = %group_id,
            photos = session.photos.len(),
            caption = ?session.caption,
            created,
            "Group session updated"
        );

        GroupUpdate {
            created,
            photo_count: session.photos.len(),
            caption: session.caption.clone(),
            timer,
        }
    }

    /// Remove and return the group if `timer` is still its current timer.
    pub fn take_group(&self, group_id: &str, timer: TimerHandle) -> Option<GroupSession> {
        let mut inner = self.lock();
        match inner.groups.get(group_id) {
            Some(session) if session.timer == Some(timer) => inner.groups.remove(group_id),
            Some(_) => {
                debug!(group_id = %group_id, "Stale group timer ignored");
                None
            }
            None => None,
        }
    }

    /// Copy of a group's current state.
    pub fn group(&self, group_id: &str) -> Option<GroupSession> {
        self.lock().groups.get(group_id).cloned()
    }

    pub fn group_count(&self) -> usize {
        self.lock().groups.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::debounce::DebounceScheduler;

    fn photo(id: &str) -> PhotoRef {
        PhotoRef::new(id)
    }

    #[test]
    fn seen_is_test_and_set() {
        let registry = SessionRegistry::new(8);
        let key = DedupKey::Event("1".into());
        assert!(!registry.seen(key.clone()));
        assert!(registry.seen(key));
    }

    #[tokio::test(start_paused = true)]
    async fn upsert_creates_then_appends() {
        let registry = SessionRegistry::new(8);
        let scheduler = DebounceScheduler::new();
        let arm = |g: &str| scheduler.arm(g, std::time::Duration::from_secs(60), |_, _| async {});

        let first = registry.upsert_group("g", "42", photo("a"), None, arm);
        assert!(first.created);
        assert_eq!(first.photo_count, 1);

        let arm = |g: &str| scheduler.arm(g, std::time::Duration::from_secs(60), |_, _| async {});
        let second = registry.upsert_group("g", "42", photo("b"), Some(""), arm);
        assert!(!second.created);
        assert_eq!(second.photo_count, 2);

        let session = registry.group("g").unwrap();
        assert_eq!(session.photos, vec![photo("a"), photo("b")]);
        assert_eq!(session.timer, Some(second.timer));
        assert_eq!(registry.group_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn last_non_empty_caption_wins() {
        let registry = SessionRegistry::new(8);
        let scheduler = DebounceScheduler::new();
        let delay = std::time::Duration::from_secs(60);

        for caption in [Some("blur"), None, Some("concat"), Some("  ")] {
            registry.upsert_group("g", "42", photo("x"), caption, |g| {
                scheduler.arm(g, delay, |_, _| async {})
            });
        }
        assert_eq!(registry.group("g").unwrap().caption.as_deref(), Some("concat"));
    }

    #[tokio::test(start_paused = true)]
    async fn caption_without_letters_keeps_declared_filter() {
        let registry = SessionRegistry::new(8);
        let scheduler = DebounceScheduler::new();
        let delay = std::time::Duration::from_secs(60);

        for caption in [Some("concat"), Some("🔥"), Some("!!!"), Some("…")] {
            registry.upsert_group("g", "42", photo("x"), caption, |g| {
                scheduler.arm(g, delay, |_, _| async {})
            });
        }
        let session = registry.group("g").unwrap();
        assert_eq!(session.caption.as_deref(), Some("concat"));
        assert_eq!(session.photos.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn take_group_requires_current_timer() {
        let registry = SessionRegistry::new(8);
        let scheduler = DebounceScheduler::new();
        let delay = std::time::Duration::from_secs(60);

        let old = registry
            .upsert_group("g", "42", photo("a"), None, |g| {
                scheduler.arm(g, delay, |_, _| async {})
            })
            .timer;
        let current = registry
            .upsert_group("g", "42", photo("b"), None, |g| {
                scheduler.arm(g, delay, |_, _| async {})
            })
            .timer;

        assert!(registry.take_group("g", old).is_none());
        let session = registry.take_group("g", current).unwrap();
        assert_eq!(session.photos.len(), 2);
        assert!(registry.take_group("g", current).is_none());
        assert_eq!(registry.group_count(), 0);
    }
}
