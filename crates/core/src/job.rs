//! Job record and its status machine.
//!
//! ```text
//! NOT_START -> SUBMITTED -> IN_PROGRESS -> { SUCCESS | FAILURE | CANCEL }
//! ```
//!
//! `NOT_START` may jump straight to `FAILURE` (or `CANCEL`) when dispatch
//! is refused. Terminal states are final; every mutator returns
//! [`CoreError::InvalidTransition`] instead of silently accepting an
//! out-of-order update.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::filter::SelectionFilter;
use crate::types::{JobId, Timestamp, WorkerId};
use crate::worker::{BotType, GenerationMode};

define_text_enum! {
    /// Lifecycle status of a job.
    JobStatus {
        NotStart = "NOT_START",
        Submitted = "SUBMITTED",
        InProgress = "IN_PROGRESS",
        Success = "SUCCESS",
        Failure = "FAILURE",
        Cancel = "CANCEL",
    }
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failure | JobStatus::Cancel)
    }

    /// Whether a job bound to a worker is holding one of its slots.
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Submitted | JobStatus::InProgress)
    }

    /// Whether moving from `self` to `to` keeps the status sequence
    /// monotonic. `IN_PROGRESS -> IN_PROGRESS` is allowed for progress
    /// updates.
    pub fn can_transition_to(self, to: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match to {
            JobStatus::NotStart => false,
            JobStatus::Submitted => self == JobStatus::NotStart,
            JobStatus::InProgress | JobStatus::Success => self.is_active(),
            JobStatus::Failure | JobStatus::Cancel => true,
        }
    }
}

define_text_enum! {
    /// What a job asks the remote bot to do.
    JobAction {
        Imagine = "IMAGINE",
        Upscale = "UPSCALE",
        Variation = "VARIATION",
        Reroll = "REROLL",
        Describe = "DESCRIBE",
        Blend = "BLEND",
        Shorten = "SHORTEN",
        Show = "SHOW",
        Pan = "PAN",
        Zoom = "ZOOM",
        Vary = "VARY",
        Action = "ACTION",
        Modal = "MODAL",
    }
}

impl JobAction {
    /// Actions that act on the asset produced by a parent job.
    ///
    /// All of them must run on the worker holding the parent's
    /// conversational context, so they bypass worker selection.
    pub fn requires_parent(self) -> bool {
        matches!(
            self,
            JobAction::Upscale
                | JobAction::Variation
                | JobAction::Reroll
                | JobAction::Show
                | JobAction::Pan
                | JobAction::Zoom
                | JobAction::Vary
                | JobAction::Action
                | JobAction::Modal
        )
    }
}

/// One unit of submitted work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub parent_id: Option<JobId>,
    pub user_id: Option<String>,
    pub action: JobAction,
    pub status: JobStatus,
    pub bot_type: BotType,
    pub mode: Option<GenerationMode>,

    pub prompt: String,
    /// Human-readable command line, e.g. `/imagine a cat`.
    pub description: String,
    /// Opaque caller pass-through.
    pub state: Option<String>,
    pub notify_hook: Option<String>,
    pub client_ip: Option<String>,

    /// Bound at dispatch time, never changed afterwards.
    pub worker_id: Option<WorkerId>,
    pub filter: Option<SelectionFilter>,
    /// Correlation key sent with the remote submission.
    pub nonce: String,
    /// Remote message carrying this job's output, once known.
    pub message_id: Option<String>,

    pub submit_time: Timestamp,
    pub start_time: Option<Timestamp>,
    pub finish_time: Option<Timestamp>,
    /// Progress marker such as `"42%"`.
    pub progress: Option<String>,
    pub fail_reason: Option<String>,
    pub image_url: Option<String>,
    pub thumbnail_url: Option<String>,

    /// Action-specific extras (button index, custom id, source links).
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
    pub updated_at: Timestamp,
}

impl Job {
    /// Create a job in `NOT_START`, the only state a job may be created in.
    pub fn new(action: JobAction, prompt: impl Into<String>, description: impl Into<String>) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now();
        Self {
            nonce: id.clone(),
            id,
            parent_id: None,
            user_id: None,
            action,
            status: JobStatus::NotStart,
            bot_type: BotType::MidJourney,
            mode: None,
            prompt: prompt.into(),
            description: description.into(),
            state: None,
            notify_hook: None,
            client_ip: None,
            worker_id: None,
            filter: None,
            message_id: None,
            submit_time: now,
            start_time: None,
            finish_time: None,
            progress: None,
            fail_reason: None,
            image_url: None,
            thumbnail_url: None,
            properties: serde_json::Map::new(),
            updated_at: now,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Bind to `worker_id` and move to `SUBMITTED`.
    pub fn mark_submitted(&mut self, worker_id: &str) -> Result<(), CoreError> {
        self.check(JobStatus::Submitted)?;
        if let Some(ref bound) = self.worker_id {
            if bound != worker_id {
                return Err(CoreError::Conflict(format!(
                    "Job {} is already bound to worker {bound}",
                    self.id
                )));
            }
        }
        let now = chrono::Utc::now();
        self.worker_id = Some(worker_id.to_string());
        self.status = JobStatus::Submitted;
        self.start_time = Some(now);
        self.progress = Some("0%".to_string());
        self.updated_at = now;
        Ok(())
    }

    /// Move to `IN_PROGRESS`, optionally recording a progress marker.
    pub fn mark_in_progress(&mut self, progress: Option<&str>) -> Result<(), CoreError> {
        self.check(JobStatus::InProgress)?;
        self.status = JobStatus::InProgress;
        if let Some(marker) = progress {
            self.progress = Some(marker.to_string());
        }
        self.updated_at = chrono::Utc::now();
        Ok(())
    }

    pub fn succeed(
        &mut self,
        image_url: Option<String>,
        thumbnail_url: Option<String>,
    ) -> Result<(), CoreError> {
        self.check(JobStatus::Success)?;
        let now = chrono::Utc::now();
        self.status = JobStatus::Success;
        self.finish_time = Some(now);
        self.progress = Some("100%".to_string());
        self.image_url = image_url;
        self.thumbnail_url = thumbnail_url;
        self.updated_at = now;
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), CoreError> {
        self.check(JobStatus::Failure)?;
        let now = chrono::Utc::now();
        self.status = JobStatus::Failure;
        self.finish_time = Some(now);
        self.fail_reason = Some(reason.into());
        self.progress = None;
        self.updated_at = now;
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), CoreError> {
        self.check(JobStatus::Cancel)?;
        let now = chrono::Utc::now();
        self.status = JobStatus::Cancel;
        self.finish_time = Some(now);
        self.progress = None;
        self.updated_at = now;
        Ok(())
    }

    fn check(&self, to: JobStatus) -> Result<(), CoreError> {
        if !self.status.can_transition_to(to) {
            return Err(CoreError::InvalidTransition {
                job_id: self.id.clone(),
                from: self.status,
                to,
            });
        }
        let needs_worker = matches!(to, JobStatus::InProgress | JobStatus::Success);
        if needs_worker && self.worker_id.is_none() {
            return Err(CoreError::Internal(format!(
                "Job {} has no bound worker",
                self.id
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
