//! Optimistic read tracking.
//!
//! Opening a conversation writes a read watermark to the store, but list
//! refreshes triggered in the meantime may still see the old watermark. For
//! a short window after the write settles the partner's unread count is
//! forced to zero so the conversation does not flash back to unread.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::error::Result;
use crate::message::message_dto::ConversationSummary;
use crate::message::message_store::SharedMessageStore;

pub const DEFAULT_SUPPRESSION_WINDOW: Duration = Duration::from_secs(2);

/// Suppression state of one (user, partner) pair. Pairs without an entry
/// report the computed count unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMark {
    /// Read-mark writes still in flight.
    Pending { in_flight: u32 },
    /// All writes settled; suppression lasts until `until`.
    Suppressed { until: Instant },
}

/// Unread count to display given the suppression state of the pair.
pub fn effective_unread_count(mark: Option<ReadMark>, computed: u32, now: Instant) -> u32 {
    match mark {
        Some(ReadMark::Pending { .. }) => 0,
        Some(ReadMark::Suppressed { until }) if now < until => 0,
        _ => computed,
    }
}

type PairKey = (String, String);

#[derive(Clone)]
pub struct ReadTracker {
    store: SharedMessageStore,
    marks: Arc<DashMap<PairKey, ReadMark>>,
    window: Duration,
}

impl ReadTracker {
    pub fn new(store: SharedMessageStore, window: Duration) -> Self {
        Self {
            store,
            marks: Arc::new(DashMap::new()),
            window,
        }
    }

    /// Writes the read watermark for `partner_id`, suppressing its unread
    /// count from now until `window` after the write settles.
    pub async fn mark_read(&self, user_id: &str, partner_id: &str) -> Result<()> {
        let key = (user_id.to_string(), partner_id.to_string());
        self.begin(&key);

        let result = self
            .store
            .upsert_read_status(user_id, partner_id, Utc::now())
            .await;

        self.settle(&key, Instant::now());
        result
    }

    /// Fire-and-forget variant of [`mark_read`](Self::mark_read). Suppression
    /// starts before this returns; a failed write is only logged.
    pub fn spawn_mark_read(&self, user_id: &str, partner_id: &str) {
        let key = (user_id.to_string(), partner_id.to_string());
        self.begin(&key);

        let tracker = self.clone();
        tokio::spawn(async move {
            let (user_id, partner_id) = &key;
            if let Err(e) = tracker
                .store
                .upsert_read_status(user_id, partner_id, Utc::now())
                .await
            {
                tracing::warn!(
                    "Failed to mark conversation {} read for {}: {}",
                    partner_id,
                    user_id,
                    e
                );
            }
            tracker.settle(&key, Instant::now());
        });
    }

    pub fn mark(&self, user_id: &str, partner_id: &str, now: Instant) -> Option<ReadMark> {
        let key = (user_id.to_string(), partner_id.to_string());
        let mark = self.marks.get(&key).map(|entry| *entry.value());

        if let Some(ReadMark::Suppressed { until }) = mark {
            if now >= until {
                self.marks
                    .remove_if(&key, |_, current| *current == ReadMark::Suppressed { until });
                return None;
            }
        }
        mark
    }

    /// Overrides unread counts of suppressed partners in `summaries`.
    pub fn apply(&self, user_id: &str, summaries: &mut [ConversationSummary]) {
        let now = Instant::now();
        self.sweep_expired(now);
        for summary in summaries.iter_mut() {
            let mark = self.mark(user_id, &summary.id, now);
            summary.unread_count = effective_unread_count(mark, summary.unread_count, now);
        }
    }

    /// Drops settled marks whose window has passed, for every pair.
    fn sweep_expired(&self, now: Instant) {
        self.marks
            .retain(|_, mark| !matches!(mark, ReadMark::Suppressed { until } if *until <= now));
    }

    fn begin(&self, key: &PairKey) {
        self.marks
            .entry(key.clone())
            .and_modify(|mark| {
                *mark = match *mark {
                    ReadMark::Pending { in_flight } => ReadMark::Pending {
                        in_flight: in_flight + 1,
                    },
                    ReadMark::Suppressed { .. } => ReadMark::Pending { in_flight: 1 },
                }
            })
            .or_insert(ReadMark::Pending { in_flight: 1 });
    }

    fn settle(&self, key: &PairKey, now: Instant) {
        let until = now + self.window;
        self.marks
            .entry(key.clone())
            .and_modify(|mark| {
                *mark = match *mark {
                    ReadMark::Pending { in_flight } if in_flight > 1 => ReadMark::Pending {
                        in_flight: in_flight - 1,
                    },
                    _ => ReadMark::Suppressed { until },
                }
            })
            .or_insert(ReadMark::Suppressed { until });
    }
}
