//! Worker selection: eligibility filtering and the pick strategies.
//!
//! [`eligible`] narrows a pool snapshot to the workers that may serve a
//! job at all; the dispatcher then drops the ones admission refuses and
//! hands the rest to a [`Selector`].

use std::sync::{Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use drawproxy_core::error::CoreError;
use drawproxy_core::filter::SelectionFilter;
use drawproxy_core::job::JobAction;
use drawproxy_core::types::Timestamp;
use drawproxy_core::worker::BotType;
use drawproxy_gateway::SessionState;

use crate::pool::WorkerView;

/// How a worker is picked from the admissible candidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectMode {
    /// Least recently active worker first.
    #[default]
    BestWaitIdle,
    Random,
    /// Proportional to the configured weight.
    Weighted,
    /// Round robin over candidates ordered by `(sort, id)`.
    Polling,
}

impl SelectMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SelectMode::BestWaitIdle => "BestWaitIdle",
            SelectMode::Random => "Random",
            SelectMode::Weighted => "Weighted",
            SelectMode::Polling => "Polling",
        }
    }
}

impl std::fmt::Display for SelectMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SelectMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BestWaitIdle" => Ok(SelectMode::BestWaitIdle),
            "Random" => Ok(SelectMode::Random),
            "Weighted" => Ok(SelectMode::Weighted),
            "Polling" => Ok(SelectMode::Polling),
            other => Err(CoreError::Validation(format!(
                "Unknown select mode: \"{other}\""
            ))),
        }
    }
}

/// What a job needs from the worker that serves it.
#[derive(Debug, Clone, Copy)]
pub struct Requirement<'a> {
    pub filter: &'a SelectionFilter,
    pub action: JobAction,
    pub bot_type: BotType,
}

/// Whether `view` may serve a job with `req` at all: enabled, unlocked,
/// session READY, and every filter constraint satisfied. Capacity and
/// quota are admission's concern.
pub fn is_eligible(view: &WorkerView, req: &Requirement<'_>) -> bool {
    view.worker.is_active()
        && view.state == SessionState::Ready
        && req.filter.matches(&view.worker)
        && view.worker.supports_bot(req.bot_type)
        && view.worker.supports_action(req.action)
}

/// The eligible subset of `views`.
pub fn eligible<'a, I>(views: I, req: &Requirement<'_>) -> Vec<WorkerView>
where
    I: IntoIterator<Item = &'a WorkerView>,
{
    views
        .into_iter()
        .filter(|v| is_eligible(v, req))
        .cloned()
        .collect()
}

/// Strategy state reported by [`Selector::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct SelectorStats {
    pub mode: SelectMode,
    pub cursor: u64,
}

struct SelectorState {
    mode: SelectMode,
    cursor: u64,
    rng: StdRng,
}

/// Runtime-swappable pick strategy. All state sits behind one lock.
pub struct Selector {
    state: Mutex<SelectorState>,
}

impl Selector {
    pub fn new(mode: SelectMode) -> Self {
        Self::with_rng(mode, StdRng::from_os_rng())
    }

    /// Deterministic selector for reproducible draws.
    pub fn seeded(mode: SelectMode, seed: u64) -> Self {
        Self::with_rng(mode, StdRng::seed_from_u64(seed))
    }

    fn with_rng(mode: SelectMode, rng: StdRng) -> Self {
        Self {
            state: Mutex::new(SelectorState {
                mode,
                cursor: 0,
                rng,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SelectorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn mode(&self) -> SelectMode {
        self.lock().mode
    }

    /// Swap the strategy. The polling cursor starts over.
    pub fn set_mode(&self, mode: SelectMode) {
        let mut state = self.lock();
        state.mode = mode;
        state.cursor = 0;
        tracing::info!(mode = %mode, "Worker select mode changed");
    }

    pub fn stats(&self) -> SelectorStats {
        let state = self.lock();
        SelectorStats {
            mode: state.mode,
            cursor: state.cursor,
        }
    }

    /// Pick one of `candidates`, or `None` when there are none.
    pub fn select<'a>(&self, candidates: &'a [WorkerView]) -> Option<&'a WorkerView> {
        if candidates.is_empty() {
            return None;
        }
        let mut state = self.lock();
        match state.mode {
            SelectMode::BestWaitIdle => best_wait_idle(candidates),
            SelectMode::Random => {
                let idx = state.rng.random_range(0..candidates.len());
                candidates.get(idx)
            }
            SelectMode::Weighted => {
                let draw = {
                    let total = total_weight(candidates);
                    state.rng.random_range(0..total)
                };
                weighted_pick(candidates, draw)
            }
            SelectMode::Polling => {
                let cursor = state.cursor;
                state.cursor = state.cursor.wrapping_add(1);
                polling_pick(candidates, cursor)
            }
        }
    }
}

/// Most recent sign of activity: heartbeat ack or job hand-over.
fn last_activity(view: &WorkerView) -> Option<Timestamp> {
    view.last_heartbeat_ack.max(view.load.last_dispatch)
}

fn best_wait_idle(candidates: &[WorkerView]) -> Option<&WorkerView> {
    candidates
        .iter()
        .min_by(|a, b| {
            last_activity(a)
                .cmp(&last_activity(b))
                .then_with(|| a.worker.id.cmp(&b.worker.id))
        })
}

/// Weights of zero or below count as one.
fn effective_weight(view: &WorkerView) -> u64 {
    u64::try_from(view.worker.weight).unwrap_or(0).max(1)
}

fn total_weight(candidates: &[WorkerView]) -> u64 {
    candidates.iter().map(effective_weight).sum()
}

/// Cumulative scan for `draw` in `[0, total_weight)`.
fn weighted_pick(candidates: &[WorkerView], draw: u64) -> Option<&WorkerView> {
    let mut acc = 0u64;
    for view in candidates {
        acc += effective_weight(view);
        if draw < acc {
            return Some(view);
        }
    }
    candidates.last()
}

fn polling_pick(candidates: &[WorkerView], cursor: u64) -> Option<&WorkerView> {
    let mut ordered: Vec<&WorkerView> = candidates.iter().collect();
    ordered.sort_by(|a, b| {
        a.worker
            .sort
            .cmp(&b.worker.sort)
            .then_with(|| a.worker.id.cmp(&b.worker.id))
    });
    let len = u64::try_from(ordered.len()).ok()?;
    let idx = usize::try_from(cursor % len).ok()?;
    ordered.get(idx).copied()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use drawproxy_core::worker::{GenerationMode, Worker};

    use super::*;
    use crate::test_support::view;

    fn ids(views: &[WorkerView]) -> Vec<&str> {
        views.iter().map(|v| v.worker.id.as_str()).collect()
    }

    fn req(filter: &SelectionFilter) -> Requirement<'_> {
        Requirement {
            filter,
            action: JobAction::Imagine,
            bot_type: BotType::MidJourney,
        }
    }

    #[test]
    fn eligibility_requires_ready_active_and_filter() {
        let ready = view(Worker::new("a", "t"), SessionState::Ready);
        let connecting = view(Worker::new("b", "t"), SessionState::Connecting);
        let mut locked_worker = Worker::new("c", "t");
        locked_worker.lock = true;
        let locked = view(locked_worker, SessionState::Ready);
        let mut relax_only = Worker::new("d", "t");
        relax_only.allow_modes = vec![GenerationMode::Relax];
        let relax = view(relax_only, SessionState::Ready);

        let all = [ready, connecting, locked, relax];
        let any = SelectionFilter::default();
        assert_eq!(ids(&eligible(&all, &req(&any))), vec!["a", "d"]);

        let fast = SelectionFilter {
            modes: vec![GenerationMode::Fast],
            ..Default::default()
        };
        assert_eq!(ids(&eligible(&all, &req(&fast))), vec!["a"]);

        let pinned = SelectionFilter::pinned("d");
        assert_eq!(ids(&eligible(&all, &req(&pinned))), vec!["d"]);
    }

    #[test]
    fn capability_flags_gate_actions() {
        let mut no_blend = Worker::new("a", "t");
        no_blend.is_blend = false;
        let all = [view(no_blend, SessionState::Ready)];
        let filter = SelectionFilter::default();
        let blend = Requirement {
            filter: &filter,
            action: JobAction::Blend,
            bot_type: BotType::MidJourney,
        };
        assert!(eligible(&all, &blend).is_empty());

        let niji = Requirement {
            filter: &filter,
            action: JobAction::Imagine,
            bot_type: BotType::NijiJourney,
        };
        assert!(eligible(&all, &niji).is_empty());
    }

    #[test]
    fn best_wait_idle_prefers_oldest_activity_then_id() {
        let now = chrono::Utc::now();
        let mut a = view(Worker::new("a", "t"), SessionState::Ready);
        a.last_heartbeat_ack = Some(now);
        let mut b = view(Worker::new("b", "t"), SessionState::Ready);
        b.last_heartbeat_ack = Some(now - chrono::Duration::seconds(30));
        let mut c = view(Worker::new("c", "t"), SessionState::Ready);
        c.last_heartbeat_ack = Some(now - chrono::Duration::seconds(30));

        let selector = Selector::seeded(SelectMode::BestWaitIdle, 1);
        let candidates = [a, c, b];
        assert_eq!(selector.select(&candidates).unwrap().worker.id, "b");
    }

    #[test]
    fn polling_is_fair_over_many_calls() {
        let candidates: Vec<WorkerView> = ["c", "a", "b"]
            .into_iter()
            .map(|id| view(Worker::new(id, "t"), SessionState::Ready))
            .collect();
        let selector = Selector::seeded(SelectMode::Polling, 1);

        let n = candidates.len();
        let k = 7;
        let mut hits: HashMap<String, usize> = HashMap::new();
        for _ in 0..n + k {
            let picked = selector.select(&candidates).unwrap();
            *hits.entry(picked.worker.id.clone()).or_default() += 1;
        }

        let floor = (n + k) / n;
        let ceil = (n + k).div_ceil(n);
        assert_eq!(hits.len(), n);
        for count in hits.values() {
            assert!(*count == floor || *count == ceil, "count {count}");
        }
    }

    #[test]
    fn polling_orders_by_sort_then_id() {
        let mut first = Worker::new("z", "t");
        first.sort = -1;
        let candidates = [
            view(Worker::new("b", "t"), SessionState::Ready),
            view(first, SessionState::Ready),
            view(Worker::new("a", "t"), SessionState::Ready),
        ];
        let selector = Selector::seeded(SelectMode::Polling, 1);
        let order: Vec<String> = (0..3)
            .map(|_| selector.select(&candidates).unwrap().worker.id.clone())
            .collect();
        assert_eq!(order, vec!["z", "a", "b"]);
    }

    #[test]
    fn switching_mode_resets_cursor() {
        let candidates = [view(Worker::new("a", "t"), SessionState::Ready)];
        let selector = Selector::seeded(SelectMode::Polling, 1);
        selector.select(&candidates);
        selector.select(&candidates);
        assert_eq!(selector.stats().cursor, 2);

        selector.set_mode(SelectMode::Random);
        selector.set_mode(SelectMode::Polling);
        assert_eq!(selector.stats().cursor, 0);
        assert_eq!(selector.mode(), SelectMode::Polling);
    }

    #[test]
    fn weighted_follows_weights() {
        let mut light = Worker::new("light", "t");
        light.weight = 1;
        let mut heavy = Worker::new("heavy", "t");
        heavy.weight = 3;
        let candidates = [
            view(light, SessionState::Ready),
            view(heavy, SessionState::Ready),
        ];
        let selector = Selector::seeded(SelectMode::Weighted, 42);

        let draws = 10_000;
        let heavy_hits = (0..draws)
            .filter(|_| selector.select(&candidates).unwrap().worker.id == "heavy")
            .count();
        let share = heavy_hits as f64 / draws as f64;
        assert!((0.72..=0.78).contains(&share), "share {share}");
    }

    #[test]
    fn non_positive_weight_counts_as_one() {
        let mut zero = Worker::new("zero", "t");
        zero.weight = 0;
        let mut negative = Worker::new("neg", "t");
        negative.weight = -5;
        let candidates = [
            view(zero, SessionState::Ready),
            view(negative, SessionState::Ready),
        ];
        assert_eq!(total_weight(&candidates), 2);
        assert_eq!(weighted_pick(&candidates, 0).unwrap().worker.id, "zero");
        assert_eq!(weighted_pick(&candidates, 1).unwrap().worker.id, "neg");
    }

    #[test]
    fn select_mode_parses_names() {
        assert_eq!("Weighted".parse::<SelectMode>().unwrap(), SelectMode::Weighted);
        assert!("weighted".parse::<SelectMode>().is_err());
    }
}
