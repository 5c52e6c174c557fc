pub mod models;
pub mod notifications;
pub mod poller;
pub mod progress;
pub mod reorder;
pub mod visitor;

pub use models::{Completion, JobStatus, OrderedItem, Scene, SubmissionStatus};
pub use notifications::{JobEvent, NotificationChannel, create_notifier};
pub use poller::{JobPoller, PollEvent, PollHandle, PollOutcome, PollState, StatusSource};
pub use progress::{ProgressTracker, TrackedJob};
pub use reorder::{DragEnd, DragResult, OrderStore, PersistResolution, SceneList};
pub use visitor::{VisitorIdStore, VisitorIdentity};
