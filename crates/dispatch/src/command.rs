//! Submission requests, command descriptions and the frame sent to a
//! worker's session.

use serde_json::{json, Map, Value};

use drawproxy_core::error::CoreError;
use drawproxy_core::filter::SelectionFilter;
use drawproxy_core::job::{Job, JobAction};
use drawproxy_core::types::JobId;
use drawproxy_core::worker::{BotType, GenerationMode, Worker};

/// Number of images in a generated grid; upscale/variation pick one.
pub const GRID_SIZE: u8 = 4;

pub const MIN_BLEND_IMAGES: usize = 2;
pub const MAX_BLEND_IMAGES: usize = 5;

/// What a caller asks the dispatcher to run.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub action: JobAction,
    pub prompt: String,
    /// Job whose output a child action operates on.
    pub parent_id: Option<JobId>,
    pub filter: Option<SelectionFilter>,
    pub bot_type: Option<BotType>,
    pub mode: Option<GenerationMode>,
    pub state: Option<String>,
    pub notify_hook: Option<String>,
    pub client_ip: Option<String>,
    pub user_id: Option<String>,
    pub properties: Map<String, Value>,
}

impl SubmitRequest {
    pub fn new(action: JobAction, prompt: impl Into<String>) -> Self {
        Self {
            action,
            prompt: prompt.into(),
            parent_id: None,
            filter: None,
            bot_type: None,
            mode: None,
            state: None,
            notify_hook: None,
            client_ip: None,
            user_id: None,
            properties: Map::new(),
        }
    }

    pub fn imagine(prompt: impl Into<String>) -> Result<Self, CoreError> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(CoreError::Validation("prompt must not be empty".into()));
        }
        Ok(Self::new(JobAction::Imagine, prompt))
    }

    pub fn describe(link: impl Into<String>) -> Result<Self, CoreError> {
        let link = link.into();
        if link.trim().is_empty() {
            return Err(CoreError::Validation("link must not be empty".into()));
        }
        let mut req = Self::new(JobAction::Describe, "");
        req.properties.insert("link".into(), Value::String(link));
        Ok(req)
    }

    pub fn blend(links: Vec<String>) -> Result<Self, CoreError> {
        if !(MIN_BLEND_IMAGES..=MAX_BLEND_IMAGES).contains(&links.len()) {
            return Err(CoreError::Validation(format!(
                "blend takes {MIN_BLEND_IMAGES} to {MAX_BLEND_IMAGES} images, got {}",
                links.len()
            )));
        }
        let mut req = Self::new(JobAction::Blend, "");
        req.properties.insert("links".into(), json!(links));
        Ok(req)
    }

    pub fn shorten(prompt: impl Into<String>) -> Result<Self, CoreError> {
        let mut req = Self::imagine(prompt)?;
        req.action = JobAction::Shorten;
        Ok(req)
    }

    /// Follow-up action on the output of `parent_id`.
    ///
    /// `index` (1..=4) is required for upscale and variation; `custom_id`
    /// for button actions (action, pan, zoom, vary).
    pub fn change(
        parent_id: impl Into<JobId>,
        action: JobAction,
        index: Option<u8>,
        custom_id: Option<String>,
    ) -> Result<Self, CoreError> {
        if !action.requires_parent() {
            return Err(CoreError::Validation(format!(
                "{action} is not a follow-up action"
            )));
        }
        let mut req = Self::new(action, "");
        req.parent_id = Some(parent_id.into());

        if matches!(action, JobAction::Upscale | JobAction::Variation) {
            let index = index
                .filter(|i| (1..=GRID_SIZE).contains(i))
                .ok_or_else(|| {
                    CoreError::Validation(format!("{action} needs an index between 1 and {GRID_SIZE}"))
                })?;
            req.properties.insert("index".into(), json!(index));
        }

        let needs_custom_id = matches!(
            action,
            JobAction::Action | JobAction::Pan | JobAction::Zoom | JobAction::Vary
        );
        match custom_id.filter(|c| !c.trim().is_empty()) {
            Some(custom_id) => {
                req.properties.insert("custom_id".into(), Value::String(custom_id));
            }
            None if needs_custom_id => {
                return Err(CoreError::Validation(format!("{action} needs a custom_id")));
            }
            None => {}
        }
        Ok(req)
    }
}

fn property_str<'a>(properties: &'a Map<String, Value>, key: &str) -> &'a str {
    properties.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// Human-readable command line for a job, e.g. `/up <parent> U2`.
pub fn describe_command(
    action: JobAction,
    prompt: &str,
    parent_id: Option<&str>,
    properties: &Map<String, Value>,
) -> String {
    let parent = parent_id.unwrap_or_default();
    let index = properties.get("index").and_then(Value::as_u64).unwrap_or(0);
    match action {
        JobAction::Imagine => format!("/imagine {prompt}"),
        JobAction::Upscale => format!("/up {parent} U{index}"),
        JobAction::Variation => format!("/up {parent} V{index}"),
        JobAction::Reroll => format!("/up {parent} R"),
        JobAction::Describe => "/describe".to_string(),
        JobAction::Blend => "/blend".to_string(),
        JobAction::Shorten => format!("/shorten {prompt}"),
        JobAction::Show => format!("/show {parent}"),
        JobAction::Pan | JobAction::Zoom | JobAction::Vary | JobAction::Action => {
            format!("/action {}", property_str(properties, "custom_id"))
        }
        JobAction::Modal => "/modal".to_string(),
    }
}

/// Frame handed to the worker's session for `job`.
///
/// The nonce travels with the command so the gateway's acknowledgment
/// and first content update can be correlated back to the job.
pub fn command_payload(job: &Job, worker: Option<&Worker>) -> Value {
    json!({
        "type": "command",
        "nonce": job.nonce,
        "action": job.action,
        "bot_type": job.bot_type,
        "mode": job.mode,
        "prompt": job.prompt,
        "description": job.description,
        "guild_id": worker.map(|w| w.guild_id.as_str()),
        "channel_id": worker.map(|w| w.channel_id.as_str()),
        "properties": job.properties,
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn descriptions_follow_command_syntax() {
        let up = SubmitRequest::change("p1", JobAction::Upscale, Some(2), None).unwrap();
        assert_eq!(
            describe_command(up.action, "", Some("p1"), &up.properties),
            "/up p1 U2"
        );

        let reroll = SubmitRequest::change("p1", JobAction::Reroll, None, None).unwrap();
        assert_eq!(
            describe_command(reroll.action, "", Some("p1"), &reroll.properties),
            "/up p1 R"
        );

        let action =
            SubmitRequest::change("p1", JobAction::Action, None, Some("MJ::JOB::pan".into()))
                .unwrap();
        assert_eq!(
            describe_command(action.action, "", Some("p1"), &action.properties),
            "/action MJ::JOB::pan"
        );

        assert_eq!(
            describe_command(JobAction::Imagine, "a cat", None, &Map::new()),
            "/imagine a cat"
        );
    }

    #[test]
    fn index_is_bounded() {
        assert_matches!(
            SubmitRequest::change("p1", JobAction::Variation, Some(5), None),
            Err(CoreError::Validation(_))
        );
        assert_matches!(
            SubmitRequest::change("p1", JobAction::Upscale, None, None),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn button_actions_need_custom_id() {
        assert_matches!(
            SubmitRequest::change("p1", JobAction::Pan, None, None),
            Err(CoreError::Validation(_))
        );
        assert!(SubmitRequest::change("p1", JobAction::Modal, None, None).is_ok());
    }

    #[test]
    fn imagine_is_not_a_change() {
        assert_matches!(
            SubmitRequest::change("p1", JobAction::Imagine, None, None),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn blend_takes_two_to_five_links() {
        assert!(SubmitRequest::blend(vec!["a".into()]).is_err());
        let req = SubmitRequest::blend(vec!["a".into(), "b".into()]).unwrap();
        assert_eq!(req.properties["links"], json!(["a", "b"]));
    }

    #[test]
    fn payload_carries_nonce_and_channel() {
        let job = Job::new(JobAction::Imagine, "a cat", "/imagine a cat");
        let mut worker = Worker::new("w", "t");
        worker.channel_id = "chan".into();
        let payload = command_payload(&job, Some(&worker));
        assert_eq!(payload["nonce"], job.id.as_str());
        assert_eq!(payload["channel_id"], "chan");
        assert_eq!(payload["action"], "IMAGINE");
    }
}
