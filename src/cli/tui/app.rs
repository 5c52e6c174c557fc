//! Editor state and logic.

use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::mpsc;

use crate::context::AppContext;
use crate::core::models::{JobStatus, Scene};
use crate::core::poller::{JobPoller, PollEvent, PollHandle, PollState};
use crate::core::reorder::{self, DragEnd, DragResult, PersistResolution, PersistTicket, SceneList};

const NOTICE_TTL: Duration = Duration::from_secs(4);

/// Current view being displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    /// Waiting for the render/staging job to finish.
    Progress,
    /// Scene list with drag-and-drop reordering.
    Scenes,
}

/// Actions that can be triggered by user input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Quit,
    Up,
    Down,
    /// Pick up the scene under the cursor.
    Grab,
    /// Drop the carried scene at the cursor.
    Drop,
    /// Abandon the drag without moving anything.
    Cancel,
    Reload,
}

/// Short-lived message shown in the footer.
#[derive(Debug, Clone)]
pub struct Notice {
    pub text: String,
    pub is_error: bool,
    expires_at: Instant,
}

/// Main editor state.
pub struct EditorApp {
    ctx: AppContext,
    pub video_id: String,
    pub job_id: Option<String>,
    pub view: View,
    pub job: Option<JobStatus>,
    pub scenes: Option<SceneList<Scene>>,
    pub cursor: usize,
    /// Index the carried scene was picked up from.
    pub dragging: Option<usize>,
    pub visitor_id: Option<String>,
    pub notice: Option<Notice>,
    pub running: bool,
    poll: Option<PollHandle<JobStatus>>,
    poll_rx: Option<mpsc::Receiver<PollEvent<JobStatus>>>,
    persist_tx: mpsc::Sender<(PersistTicket, bool)>,
    persist_rx: mpsc::Receiver<(PersistTicket, bool)>,
}

impl EditorApp {
    pub fn new(ctx: AppContext, video_id: String, job_id: Option<String>) -> Self {
        let (persist_tx, persist_rx) = mpsc::channel(16);
        let view = if job_id.is_some() {
            View::Progress
        } else {
            View::Scenes
        };

        Self {
            ctx,
            video_id,
            job_id,
            view,
            job: None,
            scenes: None,
            cursor: 0,
            dragging: None,
            visitor_id: None,
            notice: None,
            running: true,
            poll: None,
            poll_rx: None,
            persist_tx,
            persist_rx,
        }
    }

    /// Start polling (when a job was given) or load the scene list.
    pub async fn init(&mut self) -> Result<()> {
        self.visitor_id = self.ctx.visitor.get().await.ok();

        match self.job_id.clone() {
            Some(job_id) => self.start_polling(job_id),
            None => self.load_scenes().await,
        }
        Ok(())
    }

    fn start_polling(&mut self, job_id: String) {
        let (tx, rx) = mpsc::channel(16);
        let poller = JobPoller::<JobStatus>::new(
            self.ctx.config.staging_poll_interval(),
            self.ctx.notifier.clone(),
        )
        .with_retry(self.ctx.config.retry)
        .with_events(tx);

        self.poll = Some(poller.spawn(job_id, std::sync::Arc::new(self.ctx.api.clone())));
        self.poll_rx = Some(rx);
    }

    async fn load_scenes(&mut self) {
        match self.ctx.api.list_scenes(&self.video_id).await {
            Ok(scenes) => {
                self.scenes = Some(SceneList::new(scenes, self.ctx.config.reorder));
                self.cursor = 0;
            }
            Err(e) => self.set_notice(format!("Failed to load scenes: {e}"), true),
        }
    }

    /// Apply background results: poll updates and persist answers.
    pub async fn tick(&mut self) {
        // Read the state before draining so the final update is never lost.
        let poll_state = self.poll.as_ref().map(|poll| poll.state());
        self.drain_poll_events();
        self.drain_persist_results();

        match poll_state {
            Some(PollState::Completed) => {
                self.poll = None;
                self.poll_rx = None;
                self.view = View::Scenes;
                self.load_scenes().await;
                self.set_notice("Job complete".to_string(), false);
            }
            Some(PollState::GaveUp) => {
                self.poll = None;
                self.poll_rx = None;
                self.set_notice("Stopped checking the job after repeated failures".to_string(), true);
            }
            _ => {}
        }

        if let Some(notice) = &self.notice {
            if notice.expires_at <= Instant::now() {
                self.notice = None;
            }
        }
    }

    fn drain_poll_events(&mut self) {
        let mut events = Vec::new();
        if let Some(rx) = self.poll_rx.as_mut() {
            while let Ok(event) = rx.try_recv() {
                events.push(event);
            }
        }

        for event in events {
            match event {
                PollEvent::Update(status) => self.job = Some(status),
                PollEvent::FetchFailed { attempt, error } => {
                    self.set_notice(format!("Status check {attempt} failed: {error}"), true)
                }
            }
        }
    }

    fn drain_persist_results(&mut self) {
        while let Ok((ticket, saved)) = self.persist_rx.try_recv() {
            let Some(scenes) = self.scenes.as_mut() else {
                continue;
            };
            match scenes.finish_persist(&ticket, saved) {
                PersistResolution::Confirmed => self.set_notice("Order saved".to_string(), false),
                PersistResolution::Kept => {
                    self.set_notice("Order not saved; showing local order".to_string(), true)
                }
                PersistResolution::Reverted => {
                    self.set_notice("Order not saved; reverted".to_string(), true)
                }
                PersistResolution::Stale => {}
            }
        }
    }

    /// Stop background polling. Called when the editor closes.
    pub fn teardown(&mut self) {
        if let Some(poll) = self.poll.take() {
            poll.teardown();
        }
        self.poll_rx = None;
    }

    /// Handle an action and update state accordingly.
    pub async fn handle_action(&mut self, action: Action) {
        match action {
            Action::Quit => self.running = false,
            Action::Up => self.cursor = self.cursor.saturating_sub(1),
            Action::Down => {
                if self.cursor + 1 < self.scene_count() {
                    self.cursor += 1;
                }
            }
            Action::Grab => self.grab(),
            Action::Drop => self.drop_at_cursor(),
            Action::Cancel => self.cancel_drag(),
            Action::Reload => self.reload().await,
        }
    }

    pub fn scene_count(&self) -> usize {
        self.scenes.as_ref().map_or(0, |scenes| scenes.len())
    }

    pub fn is_saving(&self) -> bool {
        self.scenes
            .as_ref()
            .is_some_and(|scenes| scenes.is_reordering())
    }

    fn grab(&mut self) {
        if self.view != View::Scenes || self.dragging.is_some() {
            return;
        }
        if self.cursor < self.scene_count() {
            self.dragging = Some(self.cursor);
        }
    }

    fn drop_at_cursor(&mut self) {
        let Some(source) = self.dragging.take() else {
            return;
        };
        let Some(scenes) = self.scenes.as_mut() else {
            return;
        };

        let drag = DragEnd {
            source,
            destination: Some(self.cursor),
        };
        match scenes.apply_drag(drag) {
            DragResult::Moved(ticket) => self.spawn_persist(ticket),
            DragResult::Busy => {
                self.set_notice("Still saving the previous order".to_string(), true)
            }
            DragResult::Unchanged => {}
        }
    }

    fn cancel_drag(&mut self) {
        if let (Some(source), Some(scenes)) = (self.dragging.take(), self.scenes.as_mut()) {
            // An absent destination never moves anything.
            let result = scenes.apply_drag(DragEnd {
                source,
                destination: None,
            });
            debug_assert_eq!(result, DragResult::Unchanged);
        }
    }

    fn spawn_persist(&self, ticket: PersistTicket) {
        let api = self.ctx.api.clone();
        let notifier = self.ctx.notifier.clone();
        let video_id = self.video_id.clone();
        let tx = self.persist_tx.clone();

        tokio::spawn(async move {
            let saved = reorder::persist_ticket(&api, notifier.as_ref(), &video_id, &ticket).await;
            let _ = tx.send((ticket, saved)).await;
        });
    }

    async fn reload(&mut self) {
        if self.view != View::Scenes {
            return;
        }
        let fetched = match self.ctx.api.list_scenes(&self.video_id).await {
            Ok(fetched) => fetched,
            Err(e) => {
                self.set_notice(format!("Reload failed: {e}"), true);
                return;
            }
        };

        match self.scenes.as_mut() {
            Some(scenes) => {
                if scenes.reconcile(fetched) {
                    self.dragging = None;
                    self.cursor = self.cursor.min(scenes.len().saturating_sub(1));
                    self.set_notice("Scenes changed on the server; reloaded".to_string(), false);
                } else {
                    self.set_notice("No new scenes; keeping local order".to_string(), false);
                }
            }
            None => {
                self.scenes = Some(SceneList::new(fetched, self.ctx.config.reorder));
                self.cursor = 0;
            }
        }
    }

    fn set_notice(&mut self, text: String, is_error: bool) {
        self.notice = Some(Notice {
            text,
            is_error,
            expires_at: Instant::now() + NOTICE_TTL,
        });
    }
}
