//! Caller-supplied constraints narrowing which workers may serve a job.

use serde::{Deserialize, Serialize};

use crate::types::WorkerId;
use crate::worker::{BotType, GenerationMode, Worker};

/// Per-submission worker constraints.
///
/// Every non-empty field must be satisfied. Stored on the job it was
/// computed for so the choice can be audited later.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionFilter {
    /// Pin the job to one worker.
    pub instance_id: Option<WorkerId>,
    /// Acceptable generation modes; the worker must support at least one.
    pub modes: Vec<GenerationMode>,
    /// Required bot variant.
    pub bot_type: Option<BotType>,
    /// Only workers with remix enabled.
    pub remix_enabled: bool,
}

impl SelectionFilter {
    /// Filter pinned to a single worker.
    pub fn pinned(worker_id: impl Into<WorkerId>) -> Self {
        Self {
            instance_id: Some(worker_id.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.instance_id.as_deref().is_none_or(str::is_empty)
            && self.modes.is_empty()
            && self.bot_type.is_none()
            && !self.remix_enabled
    }

    /// Whether `worker`'s configuration satisfies every constraint.
    ///
    /// Liveness, locks and capacity are not considered here.
    pub fn matches(&self, worker: &Worker) -> bool {
        // An empty pin is treated as absent.
        if let Some(id) = self.instance_id.as_deref().filter(|id| !id.is_empty()) {
            if id != worker.id {
                return false;
            }
        }
        if !self.modes.is_empty() && !self.modes.iter().any(|m| worker.supports_mode(*m)) {
            return false;
        }
        if let Some(bot) = self.bot_type {
            if !worker.supports_bot(bot) {
                return false;
            }
        }
        if self.remix_enabled && !worker.remix_enabled {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(id: &str) -> Worker {
        Worker::new(id, "token")
    }

    #[test]
    fn empty_filter_matches_anything() {
        let filter = SelectionFilter::default();
        assert!(filter.is_empty());
        assert!(filter.matches(&worker("a")));
    }

    #[test]
    fn pinned_filter_matches_only_that_worker() {
        let filter = SelectionFilter::pinned("a");
        assert!(filter.matches(&worker("a")));
        assert!(!filter.matches(&worker("b")));
    }

    #[test]
    fn empty_pin_is_ignored() {
        let filter = SelectionFilter::pinned("");
        assert!(filter.matches(&worker("b")));
    }

    #[test]
    fn mode_constraint_needs_one_supported_mode() {
        let mut w = worker("a");
        w.allow_modes = vec![GenerationMode::Relax];

        let filter = SelectionFilter {
            modes: vec![GenerationMode::Fast, GenerationMode::Relax],
            ..Default::default()
        };
        assert!(filter.matches(&w));

        let fast_only = SelectionFilter {
            modes: vec![GenerationMode::Fast],
            ..Default::default()
        };
        assert!(!fast_only.matches(&w));
    }

    #[test]
    fn bot_constraint() {
        let filter = SelectionFilter {
            bot_type: Some(BotType::NijiJourney),
            ..Default::default()
        };
        let mut w = worker("a");
        assert!(!filter.matches(&w));
        w.enable_niji = true;
        assert!(filter.matches(&w));
    }

    #[test]
    fn remix_constraint() {
        let filter = SelectionFilter {
            remix_enabled: true,
            ..Default::default()
        };
        let mut w = worker("a");
        assert!(!filter.matches(&w));
        w.remix_enabled = true;
        assert!(filter.matches(&w));
    }
}
