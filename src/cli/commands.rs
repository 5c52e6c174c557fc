//! Non-interactive command implementations.

use anyhow::{Context, Result, bail};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::context::AppContext;
use crate::core::models::{JobStatus, Scene, SubmissionStatus};
use crate::core::notifications::{self, JobEvent};
use crate::core::poller::{JobPoller, PollError, PollEvent, PollOutcome, StatusSource};
use crate::core::progress::ProgressTracker;
use crate::core::reorder::{self, DragEnd, DragOutcome, PersistResolution, SceneList};
use crate::simulator::SimulatorServer;

/// Cancel `token` when the user presses Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping");
            token.cancel();
        }
    });
}

fn format_status(status: &JobStatus) -> String {
    format!(
        "{}  {:>3}%  {}/{} done, {} running, {} waiting, {} failed",
        status.id,
        status.display_percentage(),
        status.completed,
        status.total,
        status.in_progress,
        status.waiting,
        status.failed
    )
}

/// Poll one job, printing each event and recording it in `progress`.
///
/// Returns only after every event the poller sent has been handled.
async fn watch_job<S>(
    poller: JobPoller<JobStatus>,
    job_id: &str,
    source: &S,
    mut events: mpsc::Receiver<PollEvent<JobStatus>>,
    progress: &ProgressTracker,
    cancel: &CancellationToken,
) -> Result<PollOutcome<JobStatus>, PollError>
where
    S: StatusSource<JobStatus> + ?Sized,
{
    let printer = async {
        while let Some(event) = events.recv().await {
            match event {
                PollEvent::Update(status) => {
                    println!("{}", format_status(&status));
                    progress.update(status).await;
                }
                PollEvent::FetchFailed { error, .. } => {
                    progress.record_failure(job_id).await;
                    let failed = progress
                        .get(job_id)
                        .await
                        .map_or(1, |job| job.failed_checks.max(1));
                    eprintln!("{job_id}  status check failed ({failed} in a row): {error}");
                }
            }
        }
    };
    // The poller holds the only sender; dropping it with this future ends the printer.
    let poll = async move { poller.run(job_id, source, cancel).await };
    let (outcome, ()) = tokio::join!(poll, printer);
    outcome
}

/// Poll every job until all complete or the user interrupts.
pub async fn watch(ctx: AppContext, job_ids: Vec<String>) -> Result<()> {
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let mut tasks = JoinSet::new();
    for job_id in job_ids {
        let (tx, rx) = mpsc::channel(16);
        let poller = JobPoller::<JobStatus>::new(
            ctx.config.staging_poll_interval(),
            ctx.notifier.clone(),
        )
        .with_retry(ctx.config.retry)
        .with_events(tx);

        let progress = ctx.progress.clone();
        let api = ctx.api.clone();
        let token = cancel.child_token();
        tasks.spawn(async move {
            let outcome = watch_job(poller, &job_id, &api, rx, &progress, &token).await;
            (job_id, outcome)
        });
    }

    let mut unfinished = 0;
    while let Some(joined) = tasks.join_next().await {
        let (job_id, outcome) = joined.context("Poll task panicked")?;
        match outcome? {
            PollOutcome::Completed(status) => {
                println!("{} complete", job_id);
                notifications::deliver(
                    ctx.notifier.as_ref(),
                    JobEvent::Completed {
                        job_id,
                        total: status.total,
                        failed: status.failed,
                    },
                )
                .await;
            }
            PollOutcome::Cancelled => {
                println!("{} no longer watched", job_id);
                unfinished += 1;
            }
            PollOutcome::GaveUp {
                attempts,
                last_error,
            } => {
                println!("{} gave up after {} attempts: {}", job_id, attempts, last_error);
                unfinished += 1;
            }
        }
    }

    info!(
        tracked = ctx.progress.get_all().await.len(),
        active = ctx.progress.active_count().await,
        overall = ctx.progress.overall_percentage().await,
        "Watch finished"
    );

    if unfinished > 0 {
        bail!("{} job(s) did not complete", unfinished);
    }
    Ok(())
}

/// Wait for a video-creation submission to be accepted.
pub async fn await_submission(ctx: AppContext, submission_id: String) -> Result<()> {
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let poller = JobPoller::<SubmissionStatus>::new(
        ctx.config.submission_poll_interval(),
        ctx.notifier.clone(),
    )
    .with_retry(ctx.config.retry);

    match poller.run(&submission_id, &ctx.api, &cancel).await? {
        PollOutcome::Completed(_) => {
            println!("Submission {} accepted", submission_id);
            Ok(())
        }
        PollOutcome::Cancelled => bail!("Stopped waiting for submission {}", submission_id),
        PollOutcome::GaveUp { last_error, .. } => {
            bail!("Submission {} not confirmed: {}", submission_id, last_error)
        }
    }
}

pub async fn create_job(ctx: AppContext, total: u32) -> Result<()> {
    let status = ctx
        .api
        .create_job(total)
        .await
        .context("Failed to create job")?;
    println!("{}", status.id);
    Ok(())
}

async fn fetch_scenes(ctx: &AppContext, video_id: &str) -> Result<Vec<Scene>> {
    match ctx.api.list_scenes(video_id).await {
        Ok(scenes) => Ok(scenes),
        Err(e) if e.is_not_found() => bail!("Video {} not found", video_id),
        Err(e) => Err(e).context("Failed to fetch scenes"),
    }
}

pub async fn list_scenes(ctx: AppContext, video_id: String) -> Result<()> {
    let scenes = fetch_scenes(&ctx, &video_id).await?;
    let list = SceneList::new(scenes, ctx.config.reorder);

    for (i, scene) in list.items().iter().enumerate() {
        println!("{:>2}. {}  {}", i, scene.id, scene.title);
    }
    Ok(())
}

/// Move one scene from position `from` to position `to` (zero-based).
pub async fn move_scene(ctx: AppContext, video_id: String, from: usize, to: usize) -> Result<()> {
    let scenes = fetch_scenes(&ctx, &video_id).await?;
    let mut list = SceneList::new(scenes, ctx.config.reorder);

    let drag = DragEnd {
        source: from,
        destination: (to < list.len()).then_some(to),
    };
    let outcome = reorder::drag_and_persist(
        &mut list,
        drag,
        &ctx.api,
        ctx.notifier.as_ref(),
        &video_id,
    )
    .await;

    match outcome {
        DragOutcome::Unchanged => {
            println!("Nothing to move");
            Ok(())
        }
        DragOutcome::Busy => bail!("Another reorder is still being saved"),
        DragOutcome::Persisted(PersistResolution::Confirmed) => {
            println!("Order saved: {}", list.ids().join(", "));
            Ok(())
        }
        DragOutcome::Persisted(resolution) => {
            bail!("Order was not saved ({:?})", resolution)
        }
    }
}

pub async fn visitor_id(ctx: AppContext) -> Result<()> {
    let id = ctx.visitor.get().await?;
    println!("{}", id);
    Ok(())
}

/// Serve the backend simulator until Ctrl-C.
pub async fn simulate(server: SimulatorServer) -> Result<()> {
    tokio::select! {
        result = server.start() => result,
        _ = tokio::signal::ctrl_c() => {
            server.shutdown();
            Ok(())
        }
    }
}
