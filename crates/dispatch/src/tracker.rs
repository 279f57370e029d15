//! Gateway events to job transitions.
//!
//! Sessions call [`JobTracker::on_event`] from their read loops, which
//! only forwards into a channel. [`run`] drains that channel in order and
//! applies each event through the [`Dispatcher`], so events from one
//! worker are handled in the order its session decoded them.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use drawproxy_core::types::WorkerId;
use drawproxy_gateway::events::{ContentUpdate, InteractionEvent, InteractionKind};
use drawproxy_gateway::{GatewayEvent, GatewayEventHandler};

use crate::dispatcher::Dispatcher;
use crate::error::DispatchError;

pub const REASON_INTERACTION_REJECTED: &str = "interaction rejected";

/// `(42%)` in a progress message.
static PROGRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\((\d{1,3})%\)").expect("valid regex"));

/// The prompt echoed back in bold at the start of a bot message.
static BOLD_PROMPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*(.+?)\*\*").expect("valid regex"));

/// Session-side half: forwards events into the tracker's queue.
#[derive(Clone)]
pub struct JobTracker {
    tx: mpsc::UnboundedSender<(WorkerId, GatewayEvent)>,
}

/// Receiving half, consumed by [`run`].
pub struct TrackerEvents {
    rx: mpsc::UnboundedReceiver<(WorkerId, GatewayEvent)>,
}

impl JobTracker {
    pub fn channel() -> (Self, TrackerEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, TrackerEvents { rx })
    }
}

impl GatewayEventHandler for JobTracker {
    fn on_event(&self, worker_id: &str, event: GatewayEvent) {
        if self.tx.send((worker_id.to_string(), event)).is_err() {
            tracing::debug!(worker_id, "Tracker stopped, dropping gateway event");
        }
    }
}

/// Apply queued gateway events until `cancel` fires or every sender is
/// gone.
pub async fn run(dispatcher: Arc<Dispatcher>, mut events: TrackerEvents, cancel: CancellationToken) {
    tracing::info!("Job tracker started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Job tracker shutting down");
                break;
            }
            next = events.rx.recv() => {
                let Some((worker_id, event)) = next else {
                    break;
                };
                handle(&dispatcher, &worker_id, event).await;
            }
        }
    }
}

/// Apply one gateway event.
pub async fn handle(dispatcher: &Dispatcher, worker_id: &str, event: GatewayEvent) {
    let outcome = match event {
        GatewayEvent::Connected { resumed } => {
            tracing::info!(worker_id, resumed, "Worker session ready");
            dispatcher.wake_launcher();
            Ok(())
        }
        GatewayEvent::Disconnected {
            resumable,
            connection,
        } => {
            // Events are applied late; jobs launched on a newer connection
            // are out of reach of this one.
            dispatcher
                .fail_disconnected(worker_id, connection, resumable)
                .await;
            Ok(())
        }
        GatewayEvent::Interaction(interaction) => {
            on_interaction(dispatcher, worker_id, interaction).await
        }
        GatewayEvent::ContentUpdate(update) => on_content(dispatcher, worker_id, update).await,
    };
    if let Err(e) = outcome {
        tracing::warn!(worker_id, error = %e, "Failed to apply gateway event");
    }
}

async fn on_interaction(
    dispatcher: &Dispatcher,
    worker_id: &str,
    interaction: InteractionEvent,
) -> Result<(), DispatchError> {
    let Some(job_id) = interaction
        .nonce
        .as_deref()
        .and_then(|nonce| dispatcher.find_by_nonce(worker_id, nonce))
    else {
        tracing::trace!(worker_id, ?interaction, "Interaction for no tracked job");
        return Ok(());
    };

    match interaction.kind {
        InteractionKind::Created | InteractionKind::Succeeded => {
            dispatcher.mark_in_progress(&job_id, None, None).await?;
        }
        InteractionKind::Failed => {
            dispatcher
                .fail_job(&job_id, REASON_INTERACTION_REJECTED)
                .await?;
        }
    }
    Ok(())
}

async fn on_content(
    dispatcher: &Dispatcher,
    worker_id: &str,
    update: ContentUpdate,
) -> Result<(), DispatchError> {
    if !update.from_bot {
        return Ok(());
    }

    let by_nonce = update
        .nonce
        .as_deref()
        .and_then(|nonce| dispatcher.find_by_nonce(worker_id, nonce));
    let job_id = by_nonce.or_else(|| {
        dispatcher.find_for_content(
            worker_id,
            &update.message_id,
            update.referenced_message_id.as_deref(),
            bold_prompt(&update.content),
        )
    });
    let Some(job_id) = job_id else {
        tracing::trace!(worker_id, message_id = %update.message_id, "Content update for no tracked job");
        return Ok(());
    };

    let progress = progress_marker(&update.content);
    match (progress, update.attachments.into_iter().next()) {
        (None, Some(image)) => {
            dispatcher
                .complete(&job_id, image.url, image.proxy_url, &update.message_id)
                .await?;
        }
        (progress, _) => {
            dispatcher
                .mark_in_progress(&job_id, progress.as_deref(), Some(&update.message_id))
                .await?;
        }
    }
    Ok(())
}

/// `"42%"` for content carrying `(42%)`.
fn progress_marker(content: &str) -> Option<String> {
    PROGRESS
        .captures(content)
        .and_then(|c| c.get(1))
        .map(|m| format!("{}%", m.as_str()))
}

fn bold_prompt(content: &str) -> Option<&str> {
    BOLD_PROMPT
        .captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
