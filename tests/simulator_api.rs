use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reelsync::api::{ApiClient, ApiError};
use reelsync::config::{ReorderConfig, SimulatorConfig};
use reelsync::core::reorder::{self, DragOutcome};
use reelsync::core::{
    DragEnd, JobEvent, JobPoller, JobStatus, NotificationChannel, PersistResolution, PollEvent,
    PollOutcome, SceneList, SubmissionStatus,
};
use reelsync::simulator::SimulatorServer;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct RecordingNotifier {
    events: Mutex<Vec<JobEvent>>,
}

impl RecordingNotifier {
    fn events(&self) -> Vec<JobEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationChannel for RecordingNotifier {
    async fn notify(&self, event: JobEvent) -> Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

async fn start_simulator(config: SimulatorConfig) -> (Arc<SimulatorServer>, ApiClient) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = Arc::new(SimulatorServer::new(config));
    let serving = server.clone();
    tokio::spawn(async move { serving.serve(listener).await });

    let client = ApiClient::new(&format!("http://{addr}"), None, Some(Duration::from_secs(5)))
        .unwrap();
    (server, client)
}

fn sim_config() -> SimulatorConfig {
    SimulatorConfig {
        units_per_poll: 2,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_job_progresses_per_status_request() {
    let (server, api) = start_simulator(sim_config()).await;

    let job = api.create_job(4).await.unwrap();
    assert_eq!(job.total, 4);

    let mut seen = Vec::new();
    for _ in 0..3 {
        let status = api.job_status(&job.id).await.unwrap();
        assert!(status.is_consistent(), "{status:?}");
        seen.push(status.percentage_completed);
    }
    assert_eq!(seen, vec![0.0, 50.0, 100.0]);

    server.shutdown();
}

#[tokio::test]
async fn test_poller_runs_until_complete() {
    let (server, api) = start_simulator(sim_config()).await;
    let job = api.create_job(6).await.unwrap();

    let notifier = Arc::new(RecordingNotifier::default());
    let (tx, mut rx) = mpsc::channel(16);
    let poller = JobPoller::<JobStatus>::new(Duration::from_millis(50), notifier.clone())
        .with_events(tx);

    let outcome = timeout(
        Duration::from_secs(5),
        poller.run(&job.id, &api, &CancellationToken::new()),
    )
    .await
    .expect("poller did not finish")
    .unwrap();

    match outcome {
        PollOutcome::Completed(status) => assert_eq!(status.percentage_completed, 100.0),
        other => panic!("expected completion, got {other:?}"),
    }

    let mut percentages = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let PollEvent::Update(status) = event {
            percentages.push(status.display_percentage());
        }
    }
    assert_eq!(percentages, vec![0, 33, 67, 100]);
    assert!(notifier.events().is_empty());

    server.shutdown();
}

#[tokio::test]
async fn test_outages_are_retried_and_notified() {
    let (server, api) = start_simulator(SimulatorConfig {
        fail_every: Some(2),
        ..sim_config()
    })
    .await;
    let job = api.create_job(4).await.unwrap();

    let notifier = Arc::new(RecordingNotifier::default());
    let poller = JobPoller::<JobStatus>::new(Duration::from_millis(20), notifier.clone());

    let outcome = timeout(
        Duration::from_secs(5),
        poller.run(&job.id, &api, &CancellationToken::new()),
    )
    .await
    .expect("poller did not finish")
    .unwrap();
    assert!(matches!(outcome, PollOutcome::Completed(_)));

    // Requests 2 and 4 fail; each failure is reported once.
    let failures: Vec<u32> = notifier
        .events()
        .into_iter()
        .filter_map(|event| match event {
            JobEvent::PollFailed { attempt, .. } => Some(attempt),
            _ => None,
        })
        .collect();
    assert_eq!(failures, vec![2, 4]);

    server.shutdown();
}

#[tokio::test]
async fn test_submission_is_accepted_after_configured_polls() {
    let (server, api) = start_simulator(sim_config()).await;

    let notifier = Arc::new(RecordingNotifier::default());
    let poller = JobPoller::<SubmissionStatus>::new(Duration::from_millis(20), notifier);

    let outcome = timeout(
        Duration::from_secs(5),
        poller.run("submission-1", &api, &CancellationToken::new()),
    )
    .await
    .expect("poller did not finish")
    .unwrap();
    assert!(matches!(
        outcome,
        PollOutcome::Completed(SubmissionStatus { success: true })
    ));

    server.shutdown();
}

#[tokio::test]
async fn test_scene_move_is_persisted() {
    let (server, api) = start_simulator(sim_config()).await;
    let notifier = RecordingNotifier::default();

    let scenes = api.list_scenes("video-1").await.unwrap();
    let mut list = SceneList::new(scenes, ReorderConfig::default());
    let before = list.ids();
    assert_eq!(before.len(), 5);

    let outcome = reorder::drag_and_persist(
        &mut list,
        DragEnd {
            source: 2,
            destination: Some(0),
        },
        &api,
        &notifier,
        "video-1",
    )
    .await;
    assert_eq!(outcome, DragOutcome::Persisted(PersistResolution::Confirmed));

    let expected = vec![
        before[2].clone(),
        before[0].clone(),
        before[1].clone(),
        before[3].clone(),
        before[4].clone(),
    ];
    assert_eq!(list.ids(), expected);

    // A fresh load sees the saved order, and reconciling changes nothing.
    let reloaded = api.list_scenes("video-1").await.unwrap();
    let reloaded_ids: Vec<String> = reloaded.iter().map(|scene| scene.id.clone()).collect();
    assert_eq!(reloaded_ids, expected);
    assert!(!list.reconcile(reloaded));
    assert!(notifier.events().is_empty());

    server.shutdown();
}

#[tokio::test]
async fn test_partial_order_is_rejected() {
    let (server, api) = start_simulator(sim_config()).await;

    let scenes = api.list_scenes("video-2").await.unwrap();
    let partial = vec![scenes[0].id.clone()];

    let err = api.save_scene_order("video-2", &partial).await.unwrap_err();
    match err {
        ApiError::Status { status, message } => {
            assert_eq!(status, 409);
            assert!(message.contains("every scene"), "{message}");
        }
        other => panic!("expected status error, got {other:?}"),
    }

    server.shutdown();
}
