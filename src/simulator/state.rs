//! In-memory backend state behind the simulator routes.

use std::collections::{HashMap, HashSet};

use crate::config::SimulatorConfig;
use crate::core::models::{JobStatus, Scene, SubmissionStatus};

const DEMO_SCENES: [&str; 5] = [
    "Front exterior",
    "Living room",
    "Kitchen",
    "Primary bedroom",
    "Backyard",
];

/// Units of work a job is created with when first seen through a status call.
const DEFAULT_JOB_UNITS: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimError {
    #[error("simulated outage")]
    Unavailable,
    #[error("order must list every scene exactly once")]
    OrderMismatch,
    #[error("total must be greater than zero")]
    EmptyJob,
}

#[derive(Debug, Clone)]
struct SimJob {
    total: u32,
    polls: u32,
}

#[derive(Debug)]
pub struct SimState {
    config: SimulatorConfig,
    jobs: HashMap<String, SimJob>,
    submissions: HashMap<String, u32>,
    scenes: HashMap<String, Vec<Scene>>,
    status_requests: u64,
    next_job: u64,
}

impl SimState {
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            config,
            jobs: HashMap::new(),
            submissions: HashMap::new(),
            scenes: HashMap::new(),
            status_requests: 0,
            next_job: 1,
        }
    }

    pub fn create_job(&mut self, total: u32) -> Result<JobStatus, SimError> {
        if total == 0 {
            return Err(SimError::EmptyJob);
        }
        let id = format!("job-{}", self.next_job);
        self.next_job += 1;
        let job = SimJob { total, polls: 0 };
        let status = self.snapshot(&id, &job);
        self.jobs.insert(id, job);
        Ok(status)
    }

    /// Report a job's progress, then advance it by one step.
    pub fn job_status(&mut self, job_id: &str) -> Result<JobStatus, SimError> {
        self.check_outage()?;

        let job = self
            .jobs
            .entry(job_id.to_string())
            .or_insert(SimJob {
                total: DEFAULT_JOB_UNITS,
                polls: 0,
            })
            .clone();
        let status = self.snapshot(job_id, &job);

        if let Some(job) = self.jobs.get_mut(job_id) {
            job.polls += 1;
        }
        Ok(status)
    }

    pub fn submission_status(&mut self, submission_id: &str) -> Result<SubmissionStatus, SimError> {
        self.check_outage()?;

        let polls = self.submissions.entry(submission_id.to_string()).or_insert(0);
        *polls += 1;
        Ok(SubmissionStatus {
            success: *polls >= self.config.submission_polls,
        })
    }

    pub fn scenes(&mut self, video_id: &str) -> Vec<Scene> {
        let mut scenes = self.scenes_mut(video_id).clone();
        scenes.sort_by_key(|scene| scene.order);
        scenes
    }

    /// Replace the stored order. The ids must be exactly the stored set.
    pub fn persist_order(&mut self, video_id: &str, ordered_ids: &[String]) -> Result<(), SimError> {
        let scenes = self.scenes_mut(video_id);

        let stored: HashSet<&str> = scenes.iter().map(|scene| scene.id.as_str()).collect();
        let incoming: HashSet<&str> = ordered_ids.iter().map(String::as_str).collect();
        if stored != incoming || ordered_ids.len() != scenes.len() {
            return Err(SimError::OrderMismatch);
        }

        for scene in scenes.iter_mut() {
            if let Some(position) = ordered_ids.iter().position(|id| *id == scene.id) {
                scene.order = (position as i64 + 1) * 10;
            }
        }
        Ok(())
    }

    fn scenes_mut(&mut self, video_id: &str) -> &mut Vec<Scene> {
        self.scenes.entry(video_id.to_string()).or_insert_with(|| {
            DEMO_SCENES
                .iter()
                .enumerate()
                .map(|(i, title)| Scene {
                    id: format!("{video_id}-scene-{}", i + 1),
                    order: (i as i64 + 1) * 10,
                    title: title.to_string(),
                    duration_secs: Some(4.0),
                    image_url: None,
                })
                .collect()
        })
    }

    fn check_outage(&mut self) -> Result<(), SimError> {
        self.status_requests += 1;
        match self.config.fail_every {
            Some(n) if n > 0 && self.status_requests % n as u64 == 0 => Err(SimError::Unavailable),
            _ => Ok(()),
        }
    }

    fn snapshot(&self, job_id: &str, job: &SimJob) -> JobStatus {
        let done = job.polls.saturating_mul(self.config.units_per_poll).min(job.total);
        let in_progress = self.config.units_per_poll.min(job.total - done);
        JobStatus {
            id: job_id.to_string(),
            percentage_completed: done as f64 / job.total as f64 * 100.0,
            total: job.total,
            completed: done,
            in_progress,
            failed: 0,
            waiting: job.total - done - in_progress,
        }
    }
}
