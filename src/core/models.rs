use serde::{Deserialize, Serialize};

/// Progress of a server-side job (staging batch, video render).
///
/// The four unit counters are expected to partition `total`, but the server
/// owns that invariant and nothing here enforces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: String,
    pub percentage_completed: f64,
    pub total: u32,
    #[serde(default)]
    pub completed: u32,
    #[serde(default)]
    pub in_progress: u32,
    #[serde(default)]
    pub failed: u32,
    #[serde(default)]
    pub waiting: u32,
}

impl JobStatus {
    /// True when the unit counters add up to `total`.
    pub fn is_consistent(&self) -> bool {
        let accounted = self.completed as u64
            + self.in_progress as u64
            + self.failed as u64
            + self.waiting as u64;
        accounted == self.total as u64
    }

    /// Percentage clamped into `0..=100` for display.
    pub fn display_percentage(&self) -> u16 {
        self.percentage_completed.clamp(0.0, 100.0).round() as u16
    }
}

/// Result of the video-creation submission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionStatus {
    pub success: bool,
}

/// Terminal-state check shared by everything the poller can observe.
pub trait Completion {
    fn is_complete(&self) -> bool;
}

impl Completion for JobStatus {
    fn is_complete(&self) -> bool {
        self.percentage_completed >= 100.0
    }
}

impl Completion for SubmissionStatus {
    fn is_complete(&self) -> bool {
        self.success
    }
}

/// A list element with a stable identity and a sort key.
///
/// `order` values need not be contiguous.
pub trait OrderedItem: Clone {
    fn id(&self) -> &str;
    fn order(&self) -> i64;
}

/// One scene of a property video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub id: String,
    pub order: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub duration_secs: Option<f64>,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl OrderedItem for Scene {
    fn id(&self) -> &str {
        &self.id
    }

    fn order(&self) -> i64 {
        self.order
    }
}
