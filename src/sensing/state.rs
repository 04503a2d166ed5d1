use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CollectionStatus {
    #[default]
    Idle,
    Running,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionState {
    pub status: CollectionStatus,
    pub subject_id: Option<String>,
    pub started_at: Option<DateTime<Local>>,
    /// Rows written since the session started, header excluded.
    pub total_samples: u64,
    #[serde(skip)]
    pub running_anchor: Option<Instant>,
}

impl CollectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.status == CollectionStatus::Running
    }

    pub fn begin(&mut self, subject_id: String, started_at: DateTime<Local>, now: Instant) {
        *self = Self {
            status: CollectionStatus::Running,
            subject_id: Some(subject_id),
            started_at: Some(started_at),
            total_samples: 0,
            running_anchor: Some(now),
        };
    }

    /// Back to idle. The subject and counters stay readable until the next
    /// `begin`.
    pub fn finish(&mut self) {
        self.status = CollectionStatus::Idle;
        self.running_anchor = None;
    }

    pub fn record_sample(&mut self) {
        self.total_samples += 1;
    }

    pub fn elapsed(&self) -> Duration {
        self.running_anchor
            .map(|anchor| anchor.elapsed())
            .unwrap_or_default()
    }
}
