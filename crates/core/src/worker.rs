//! Worker (automation account) configuration and eligibility rules.
//!
//! A [`Worker`] is one externally rate-limited account. The record carries
//! both the configuration supplied by account CRUD (credential, limits,
//! weights, capability flags) and the running daily draw counter.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::job::JobAction;
use crate::types::{Timestamp, WorkerId};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// `day_draw_limit` value meaning "no daily quota".
pub const UNLIMITED_DAILY_DRAWS: i32 = -1;

pub const DEFAULT_CORE_SIZE: u32 = 3;
pub const DEFAULT_QUEUE_SIZE: u32 = 10;
pub const DEFAULT_MAX_QUEUE_SIZE: u32 = 100;
pub const DEFAULT_INTERVAL_SECS: f64 = 1.2;
pub const DEFAULT_TIMEOUT_MINUTES: u32 = 5;

/// Upper bound on `interval_secs` (one day).
pub const MAX_INTERVAL_SECS: f64 = 86_400.0;

/// Maximum length of a worker id.
const MAX_ID_LEN: usize = 128;

define_text_enum! {
    /// Generation speed mode offered by the remote bot.
    GenerationMode {
        Fast = "FAST",
        Relax = "RELAX",
        Turbo = "TURBO",
    }
}

define_text_enum! {
    /// Remote bot variant a job is addressed to.
    BotType {
        MidJourney = "MID_JOURNEY",
        NijiJourney = "NIJI_JOURNEY",
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// One automation account and its limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Worker {
    pub id: WorkerId,
    /// Gateway credential. Accepted on input, never serialized back out.
    #[serde(skip_serializing)]
    pub credential: String,
    pub guild_id: String,
    pub channel_id: String,

    pub enabled: bool,
    /// Manual suspension, independent of `enabled`.
    pub lock: bool,
    pub disabled_reason: Option<String>,

    /// Concurrency ceiling: jobs running on the remote side at once.
    pub core_size: u32,
    /// Soft queue ceiling used once `core_size` is reached.
    pub queue_size: u32,
    /// Hard queue ceiling; never queued past this.
    pub max_queue_size: u32,
    /// Minimum spacing between two submissions, in seconds.
    pub interval_secs: f64,
    /// A started job that has not finished after this long is failed.
    pub timeout_minutes: u32,

    pub weight: i32,
    pub sort: i32,

    /// Daily quota, [`UNLIMITED_DAILY_DRAWS`] for none.
    pub day_draw_limit: i32,
    pub day_draw_count: i32,

    /// Supported generation modes; empty means every mode.
    pub allow_modes: Vec<GenerationMode>,
    pub enable_mj: bool,
    pub enable_niji: bool,
    pub remix_enabled: bool,

    pub is_blend: bool,
    pub is_describe: bool,
    pub is_shorten: bool,

    pub remark: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Default for Worker {
    fn default() -> Self {
        let now = chrono::Utc::now();
        Self {
            id: String::new(),
            credential: String::new(),
            guild_id: String::new(),
            channel_id: String::new(),
            enabled: true,
            lock: false,
            disabled_reason: None,
            core_size: DEFAULT_CORE_SIZE,
            queue_size: DEFAULT_QUEUE_SIZE,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            interval_secs: DEFAULT_INTERVAL_SECS,
            timeout_minutes: DEFAULT_TIMEOUT_MINUTES,
            weight: 0,
            sort: 0,
            day_draw_limit: UNLIMITED_DAILY_DRAWS,
            day_draw_count: 0,
            allow_modes: Vec::new(),
            enable_mj: true,
            enable_niji: false,
            remix_enabled: false,
            is_blend: true,
            is_describe: true,
            is_shorten: true,
            remark: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Worker {
    /// Create a worker with default limits.
    pub fn new(id: impl Into<WorkerId>, credential: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            credential: credential.into(),
            ..Default::default()
        }
    }

    /// Enabled and not manually locked.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.lock
    }

    /// Whether a daily quota is set and fully used.
    pub fn quota_exhausted(&self) -> bool {
        quota_exhausted(self.day_draw_limit, self.day_draw_count)
    }

    /// Active and within quota.
    pub fn is_accept_new_task(&self) -> bool {
        self.is_active() && !self.quota_exhausted()
    }

    pub fn supports_mode(&self, mode: GenerationMode) -> bool {
        self.allow_modes.is_empty() || self.allow_modes.contains(&mode)
    }

    pub fn supports_bot(&self, bot: BotType) -> bool {
        match bot {
            BotType::MidJourney => self.enable_mj,
            BotType::NijiJourney => self.enable_niji,
        }
    }

    /// Capability flags gating the actions that need a dedicated command.
    pub fn supports_action(&self, action: JobAction) -> bool {
        match action {
            JobAction::Blend => self.is_blend,
            JobAction::Describe => self.is_describe,
            JobAction::Shorten => self.is_shorten,
            _ => true,
        }
    }

    /// Minimum spacing between two submissions to this worker.
    pub fn min_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.interval_secs.clamp(0.0, MAX_INTERVAL_SECS))
            .unwrap_or(Duration::ZERO)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.timeout_minutes) * 60)
    }

    /// Validate the configuration fields supplied by account CRUD.
    pub fn validate(&self) -> Result<(), CoreError> {
        validate_worker_id(&self.id)?;
        if self.credential.trim().is_empty() {
            return Err(CoreError::Validation(
                "Worker credential must not be empty".to_string(),
            ));
        }
        if self.core_size == 0 {
            return Err(CoreError::Validation(
                "core_size must be at least 1".to_string(),
            ));
        }
        if self.queue_size > self.max_queue_size {
            return Err(CoreError::Validation(format!(
                "queue_size ({}) must not exceed max_queue_size ({})",
                self.queue_size, self.max_queue_size
            )));
        }
        if !(0.0..=MAX_INTERVAL_SECS).contains(&self.interval_secs) {
            return Err(CoreError::Validation(format!(
                "interval_secs must be between 0 and {MAX_INTERVAL_SECS}"
            )));
        }
        if self.day_draw_limit < UNLIMITED_DAILY_DRAWS {
            return Err(CoreError::Validation(
                "day_draw_limit must be -1 (unlimited) or non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Whether a daily quota is set (`limit > 0`) and `count` has reached it.
pub fn quota_exhausted(limit: i32, count: i32) -> bool {
    limit > 0 && count >= limit
}

/// Validate a worker id.
///
/// Rules:
/// - Must not be empty.
/// - Must not exceed `MAX_ID_LEN` characters.
/// - Must contain only alphanumeric, hyphen, underscore, or dot characters.
pub fn validate_worker_id(id: &str) -> Result<(), CoreError> {
    if id.is_empty() {
        return Err(CoreError::Validation(
            "Worker id must not be empty".to_string(),
        ));
    }
    if id.len() > MAX_ID_LEN {
        return Err(CoreError::Validation(format!(
            "Worker id must not exceed {MAX_ID_LEN} characters"
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(CoreError::Validation(
            "Worker id may only contain alphanumeric, hyphen, underscore, or dot characters"
                .to_string(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn worker() -> Worker {
        Worker::new("acct-1", "token")
    }

    // -- eligibility ----------------------------------------------------------

    #[test]
    fn default_worker_accepts_tasks() {
        assert!(worker().is_accept_new_task());
    }

    #[test]
    fn locked_worker_rejects_tasks() {
        let mut w = worker();
        w.lock = true;
        assert!(!w.is_accept_new_task());
    }

    #[test]
    fn unlimited_quota_never_exhausts() {
        let mut w = worker();
        w.day_draw_count = 10_000;
        assert!(!w.quota_exhausted());
    }

    #[test]
    fn quota_exhausted_at_limit() {
        let mut w = worker();
        w.day_draw_limit = 5;
        w.day_draw_count = 5;
        assert!(w.quota_exhausted());
        assert!(!w.is_accept_new_task());
    }

    #[test]
    fn zero_limit_is_not_a_quota() {
        assert!(!quota_exhausted(0, 3));
    }

    #[test]
    fn empty_allow_modes_supports_everything() {
        let w = worker();
        for mode in GenerationMode::ALL {
            assert!(w.supports_mode(*mode));
        }
    }

    #[test]
    fn allow_modes_restricts() {
        let mut w = worker();
        w.allow_modes = vec![GenerationMode::Relax];
        assert!(w.supports_mode(GenerationMode::Relax));
        assert!(!w.supports_mode(GenerationMode::Fast));
    }

    #[test]
    fn bot_support_follows_flags() {
        let w = worker();
        assert!(w.supports_bot(BotType::MidJourney));
        assert!(!w.supports_bot(BotType::NijiJourney));
    }

    #[test]
    fn capability_flags_gate_actions() {
        let mut w = worker();
        w.is_blend = false;
        assert!(!w.supports_action(JobAction::Blend));
        assert!(w.supports_action(JobAction::Imagine));
    }

    // -- validation -----------------------------------------------------------

    #[test]
    fn valid_worker_passes() {
        assert!(worker().validate().is_ok());
    }

    #[test]
    fn zero_core_size_rejected() {
        let mut w = worker();
        w.core_size = 0;
        assert!(w.validate().is_err());
    }

    #[test]
    fn queue_above_max_rejected() {
        let mut w = worker();
        w.queue_size = 20;
        w.max_queue_size = 10;
        assert!(w.validate().is_err());
    }

    #[test]
    fn out_of_range_interval_rejected() {
        for bad in [1e30, f64::INFINITY, f64::NAN, -0.5, MAX_INTERVAL_SECS + 1.0] {
            let mut w = worker();
            w.interval_secs = bad;
            assert!(w.validate().is_err(), "interval {bad} accepted");
        }
    }

    #[test]
    fn min_interval_never_panics() {
        let mut w = worker();
        w.interval_secs = 1e30;
        assert_eq!(w.min_interval(), Duration::from_secs_f64(MAX_INTERVAL_SECS));
        w.interval_secs = f64::NAN;
        assert_eq!(w.min_interval(), Duration::ZERO);
        w.interval_secs = 1.5;
        assert_eq!(w.min_interval(), Duration::from_millis(1500));
    }

    #[test]
    fn empty_credential_rejected() {
        let w = Worker::new("acct-1", "  ");
        assert!(w.validate().is_err());
    }

    #[test]
    fn worker_id_with_spaces_rejected() {
        assert!(validate_worker_id("acct 1").is_err());
    }

    #[test]
    fn credential_is_not_serialized() {
        let json = serde_json::to_value(worker()).unwrap();
        assert!(json.get("credential").is_none());
        assert_eq!(json["id"], "acct-1");
    }

    #[test]
    fn deserialize_fills_defaults() {
        let w: Worker =
            serde_json::from_str(r#"{"id":"a","credential":"t","core_size":1}"#).unwrap();
        assert_eq!(w.core_size, 1);
        assert_eq!(w.queue_size, DEFAULT_QUEUE_SIZE);
        assert_eq!(w.day_draw_limit, UNLIMITED_DAILY_DRAWS);
        assert_eq!(w.credential, "t");
    }

    #[test]
    fn bot_type_text_round_trip() {
        assert_eq!(BotType::NijiJourney.as_str(), "NIJI_JOURNEY");
        assert_eq!("FAST".parse::<GenerationMode>().unwrap(), GenerationMode::Fast);
        assert!("SLOW".parse::<GenerationMode>().is_err());
    }
}
