//! Sequential status polling for long-running server-side jobs.
//!
//! A poller issues one status request at a time: the next fetch starts only
//! after the previous one resolved and the interval elapsed. It stops when the
//! observed status reports completion or when its owner cancels it. Fetch
//! errors are surfaced as notifications and polling carries on.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::config::{Backoff, RetryPolicy};
use crate::core::models::Completion;
use crate::core::notifications::{self, JobEvent, NotificationChannel};

/// Anything that can report the current status of a job.
#[async_trait]
pub trait StatusSource<T>: Send + Sync {
    async fn fetch_status(&self, job_id: &str) -> Result<T>;
}

/// Observable progress of a poll loop.
#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent<T> {
    Update(T),
    FetchFailed { attempt: u32, error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T> {
    Completed(T),
    Cancelled,
    /// Only reachable when `RetryPolicy::max_consecutive_failures` is set.
    GaveUp { attempts: u32, last_error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Polling,
    Completed,
    Cancelled,
    GaveUp,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PollError {
    #[error("job id must not be empty")]
    EmptyJobId,
}

/// Polls a single job until it completes or is cancelled.
pub struct JobPoller<T> {
    interval: Duration,
    retry: RetryPolicy,
    notifier: Arc<dyn NotificationChannel>,
    events: Option<mpsc::Sender<PollEvent<T>>>,
    state: watch::Sender<PollState>,
}

impl<T> JobPoller<T>
where
    T: Completion + Clone + Send + Sync + std::fmt::Debug + 'static,
{
    pub fn new(interval: Duration, notifier: Arc<dyn NotificationChannel>) -> Self {
        let (state, _) = watch::channel(PollState::Idle);
        Self {
            interval,
            retry: RetryPolicy::default(),
            notifier,
            events: None,
            state,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Publish every response and failure to `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<PollEvent<T>>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn state(&self) -> watch::Receiver<PollState> {
        self.state.subscribe()
    }

    /// Run the poll loop on the current task.
    ///
    /// Cancellation is checked before each fetch, raced against the fetch
    /// itself (a late response is dropped), checked again before the wait and
    /// raced against the wait.
    pub async fn run<S>(
        &self,
        job_id: &str,
        source: &S,
        cancel: &CancellationToken,
    ) -> Result<PollOutcome<T>, PollError>
    where
        S: StatusSource<T> + ?Sized,
    {
        if job_id.trim().is_empty() {
            return Err(PollError::EmptyJobId);
        }

        self.state.send_replace(PollState::Polling);
        debug!(job_id = %job_id, interval_secs = self.interval.as_secs_f64(), "Polling started");

        let mut attempt: u32 = 0;
        let mut consecutive_failures: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Ok(self.cancelled(job_id));
            }

            attempt += 1;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(self.cancelled(job_id)),
                result = source.fetch_status(job_id) => result,
            };

            match result {
                Ok(status) => {
                    consecutive_failures = 0;
                    let complete = status.is_complete();
                    debug!(job_id = %job_id, attempt, ?status, "Status received");
                    self.emit(PollEvent::Update(status.clone())).await;

                    if complete {
                        info!(job_id = %job_id, attempts = attempt, "Job reached completion");
                        self.state.send_replace(PollState::Completed);
                        return Ok(PollOutcome::Completed(status));
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    let error = format!("{e:#}");
                    self.emit(PollEvent::FetchFailed {
                        attempt,
                        error: error.clone(),
                    })
                    .await;
                    notifications::deliver(
                        self.notifier.as_ref(),
                        JobEvent::PollFailed {
                            job_id: job_id.to_string(),
                            attempt,
                            error: error.clone(),
                        },
                    )
                    .await;

                    if let Some(max) = self.retry.max_consecutive_failures {
                        if consecutive_failures >= max {
                            warn!(job_id = %job_id, attempts = attempt, "Giving up after repeated failures");
                            self.state.send_replace(PollState::GaveUp);
                            return Ok(PollOutcome::GaveUp {
                                attempts: attempt,
                                last_error: error,
                            });
                        }
                    }
                }
            }

            if cancel.is_cancelled() {
                return Ok(self.cancelled(job_id));
            }

            let delay = self.delay_after(consecutive_failures);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(self.cancelled(job_id)),
                _ = sleep(delay) => {}
            }
        }
    }

    /// Move the loop onto its own task. Dropping the handle cancels it.
    pub fn spawn<S>(self, job_id: impl Into<String>, source: Arc<S>) -> PollHandle<T>
    where
        S: StatusSource<T> + ?Sized + 'static,
    {
        let job_id = job_id.into();
        let cancel = CancellationToken::new();
        let state = self.state();
        let token = cancel.clone();
        let join = tokio::spawn(async move { self.run(&job_id, source.as_ref(), &token).await });

        PollHandle {
            guard: cancel.clone().drop_guard(),
            cancel,
            state,
            join,
        }
    }

    fn delay_after(&self, consecutive_failures: u32) -> Duration {
        match self.retry.backoff {
            Backoff::Fixed => self.interval,
            Backoff::Exponential { .. } if consecutive_failures == 0 => self.interval,
            Backoff::Exponential { max_secs } => {
                let factor = 2u32.saturating_pow(consecutive_failures - 1);
                let cap = Duration::from_secs(max_secs).max(self.interval);
                self.interval.saturating_mul(factor).min(cap)
            }
        }
    }

    async fn emit(&self, event: PollEvent<T>) {
        if let Some(tx) = &self.events {
            // A closed receiver only means nobody is watching any more.
            let _ = tx.send(event).await;
        }
    }

    fn cancelled(&self, job_id: &str) -> PollOutcome<T> {
        debug!(job_id = %job_id, "Polling cancelled");
        self.state.send_replace(PollState::Cancelled);
        PollOutcome::Cancelled
    }
}

/// Owner side of a spawned poller.
pub struct PollHandle<T> {
    cancel: CancellationToken,
    guard: DropGuard,
    state: watch::Receiver<PollState>,
    join: JoinHandle<Result<PollOutcome<T>, PollError>>,
}

impl<T> PollHandle<T> {
    /// Stop polling. No fetch starts after this returns.
    pub fn teardown(&self) {
        self.cancel.cancel();
    }

    pub fn state(&self) -> PollState {
        *self.state.borrow()
    }

    /// Wait for the loop to finish.
    pub async fn outcome(self) -> anyhow::Result<PollOutcome<T>> {
        let PollHandle { guard, join, .. } = self;
        let outcome = join.await?;
        drop(guard);
        Ok(outcome?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{JobStatus, SubmissionStatus};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::time::Instant;

    const STAGING: Duration = Duration::from_secs(15);

    fn job(percentage: f64) -> JobStatus {
        JobStatus {
            id: "job-1".to_string(),
            percentage_completed: percentage,
            total: 10,
            completed: (percentage / 10.0) as u32,
            in_progress: 0,
            failed: 0,
            waiting: 10 - (percentage / 10.0) as u32,
        }
    }

    /// Replays scripted responses; repeats the last one when the script runs out.
    struct ScriptedSource<T> {
        script: Mutex<VecDeque<Result<T, String>>>,
        last: Mutex<Option<Result<T, String>>>,
        latency: Duration,
        hang: bool,
        in_flight: AtomicBool,
        calls: Mutex<Vec<Instant>>,
    }

    impl<T: Clone> ScriptedSource<T> {
        fn new(script: Vec<Result<T, String>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                last: Mutex::new(None),
                latency: Duration::ZERO,
                hang: false,
                in_flight: AtomicBool::new(false),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = latency;
            self
        }

        fn hanging() -> Self {
            let mut source = Self::new(Vec::new());
            source.hang = true;
            source
        }

        fn calls(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl<T: Clone + Send + Sync> StatusSource<T> for ScriptedSource<T> {
        async fn fetch_status(&self, _job_id: &str) -> Result<T> {
            assert!(
                !self.in_flight.swap(true, Ordering::SeqCst),
                "overlapping status requests"
            );
            self.calls.lock().unwrap().push(Instant::now());

            if self.hang {
                std::future::pending::<()>().await;
            }
            if !self.latency.is_zero() {
                sleep(self.latency).await;
            }

            let next = self.script.lock().unwrap().pop_front();
            let response = match next {
                Some(response) => {
                    *self.last.lock().unwrap() = Some(response.clone());
                    response
                }
                None => self
                    .last
                    .lock()
                    .unwrap()
                    .clone()
                    .unwrap_or_else(|| Err("no scripted response".to_string())),
            };

            self.in_flight.store(false, Ordering::SeqCst);
            response.map_err(|e| anyhow::anyhow!(e))
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        events: Mutex<Vec<JobEvent>>,
    }

    #[async_trait]
    impl NotificationChannel for RecordingNotifier {
        async fn notify(&self, event: JobEvent) -> Result<()> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    fn drain<T>(rx: &mut mpsc::Receiver<PollEvent<T>>) -> Vec<PollEvent<T>> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_scenario_stops_after_completion() {
        let source = ScriptedSource::new(vec![Ok(job(0.0)), Ok(job(40.0)), Ok(job(100.0))]);
        let notifier = Arc::new(RecordingNotifier::default());
        let (tx, mut rx) = mpsc::channel(16);
        let poller = JobPoller::new(STAGING, notifier.clone()).with_events(tx);
        let cancel = CancellationToken::new();

        let start = Instant::now();
        let outcome = poller.run("job-1", &source, &cancel).await.unwrap();

        assert_eq!(outcome, PollOutcome::Completed(job(100.0)));
        assert_eq!(*poller.state().borrow(), PollState::Completed);

        let offsets: Vec<u64> = source
            .calls()
            .into_iter()
            .map(|at| (at - start).as_secs())
            .collect();
        assert_eq!(offsets, vec![0, 15, 30]);

        let percentages: Vec<f64> = drain(&mut rx)
            .into_iter()
            .map(|event| match event {
                PollEvent::Update(status) => status.percentage_completed,
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(percentages, vec![0.0, 40.0, 100.0]);
        assert!(notifier.events.lock().unwrap().is_empty());

        // Nothing else is issued once the loop has returned.
        sleep(STAGING * 4).await;
        assert_eq!(source.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_fetch_waits_for_previous_response_and_interval() {
        let latency = Duration::from_secs(4);
        let source =
            ScriptedSource::new(vec![Ok(job(10.0)), Ok(job(20.0)), Ok(job(100.0))]).with_latency(latency);
        let notifier = Arc::new(RecordingNotifier::default());
        let poller = JobPoller::new(STAGING, notifier);
        let cancel = CancellationToken::new();

        poller.run("job-1", &source, &cancel).await.unwrap();

        let calls = source.calls();
        assert_eq!(calls.len(), 3);
        for pair in calls.windows(2) {
            assert_eq!((pair[1] - pair[0]).as_secs(), (latency + STAGING).as_secs());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_failure_is_notified_once_and_polling_continues() {
        let source = ScriptedSource::new(vec![
            Ok(job(0.0)),
            Err("503 Service Unavailable".to_string()),
            Ok(job(50.0)),
            Ok(job(75.0)),
            Ok(job(100.0)),
        ]);
        let notifier = Arc::new(RecordingNotifier::default());
        let (tx, mut rx) = mpsc::channel(16);
        let poller = JobPoller::new(STAGING, notifier.clone()).with_events(tx);
        let cancel = CancellationToken::new();

        let outcome = poller.run("job-1", &source, &cancel).await.unwrap();

        assert_eq!(outcome, PollOutcome::Completed(job(100.0)));
        assert_eq!(source.call_count(), 5);

        let notices = notifier.events.lock().unwrap().clone();
        assert_eq!(
            notices,
            vec![JobEvent::PollFailed {
                job_id: "job-1".to_string(),
                attempt: 2,
                error: "503 Service Unavailable".to_string(),
            }]
        );

        let events = drain(&mut rx);
        assert_eq!(events.len(), 5);
        assert!(matches!(events[1], PollEvent::FetchFailed { attempt: 2, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_stops_scheduled_polls() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(job(10.0))]));
        let notifier = Arc::new(RecordingNotifier::default());
        let handle = JobPoller::new(STAGING, notifier).spawn("job-1", source.clone());

        // Polls at t=0 and t=15, then sits in the wait for t=30.
        sleep(Duration::from_secs(20)).await;
        assert_eq!(source.call_count(), 2);
        assert_eq!(handle.state(), PollState::Polling);

        handle.teardown();
        sleep(STAGING * 10).await;

        assert_eq!(source.call_count(), 2);
        assert_eq!(handle.outcome().await.unwrap(), PollOutcome::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_discards_hung_request() {
        let source = Arc::new(ScriptedSource::<JobStatus>::hanging());
        let notifier = Arc::new(RecordingNotifier::default());
        let handle = JobPoller::new(STAGING, notifier).spawn("job-1", source.clone());

        sleep(Duration::from_secs(60)).await;
        assert_eq!(source.call_count(), 1);

        handle.teardown();
        assert_eq!(handle.outcome().await.unwrap(), PollOutcome::Cancelled);
        assert_eq!(source.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_cancels_loop() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(job(10.0))]));
        let notifier = Arc::new(RecordingNotifier::default());
        let handle = JobPoller::new(STAGING, notifier).spawn("job-1", source.clone());

        sleep(Duration::from_secs(1)).await;
        drop(handle);
        sleep(STAGING * 5).await;

        assert_eq!(source.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start_issues_no_request() {
        let source = ScriptedSource::new(vec![Ok(job(10.0))]);
        let notifier = Arc::new(RecordingNotifier::default());
        let poller = JobPoller::new(STAGING, notifier);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = poller.run("job-1", &source, &cancel).await.unwrap();

        assert_eq!(outcome, PollOutcome::Cancelled);
        assert_eq!(source.call_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_job_id_is_rejected() {
        let source = ScriptedSource::new(vec![Ok(job(10.0))]);
        let notifier = Arc::new(RecordingNotifier::default());
        let poller = JobPoller::new(STAGING, notifier);

        let result = poller.run("  ", &source, &CancellationToken::new()).await;

        assert_eq!(result, Err(PollError::EmptyJobId));
        assert_eq!(source.call_count(), 0);
        assert_eq!(*poller.state().borrow(), PollState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_cap_and_exponential_backoff() {
        let interval = Duration::from_secs(2);
        let source = ScriptedSource::<JobStatus>::new(vec![Err("down".to_string())]);
        let notifier = Arc::new(RecordingNotifier::default());
        let poller = JobPoller::new(interval, notifier.clone()).with_retry(RetryPolicy {
            max_consecutive_failures: Some(4),
            backoff: Backoff::Exponential { max_secs: 5 },
        });

        let start = Instant::now();
        let outcome = poller
            .run("job-1", &source, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            PollOutcome::GaveUp {
                attempts: 4,
                last_error: "down".to_string(),
            }
        );
        let offsets: Vec<u64> = source
            .calls()
            .into_iter()
            .map(|at| (at - start).as_secs())
            .collect();
        assert_eq!(offsets, vec![0, 2, 6, 11]);
        assert_eq!(notifier.events.lock().unwrap().len(), 4);
        assert_eq!(*poller.state().borrow(), PollState::GaveUp);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submission_retry_variant() {
        let interval = Duration::from_secs(2);
        let source = ScriptedSource::new(vec![
            Ok(SubmissionStatus { success: false }),
            Ok(SubmissionStatus { success: false }),
            Ok(SubmissionStatus { success: true }),
        ]);
        let notifier = Arc::new(RecordingNotifier::default());
        let poller = JobPoller::new(interval, notifier);

        let start = Instant::now();
        let outcome = poller
            .run("submission-9", &source, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, PollOutcome::Completed(SubmissionStatus { success: true }));
        assert_eq!(source.call_count(), 3);
        assert_eq!((Instant::now() - start).as_secs(), 4);
    }
}
