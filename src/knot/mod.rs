//! Knot reveal state machine
//!
//! A knot moves tied -> untying -> untied. The access token is the only
//! authorization: possession of the link is possession of the knot. Two
//! rules hold everywhere:
//!
//! - the sealed message never leaves through the view path while the knot
//!   is tied or untying's gate has not been passed;
//! - opening discloses the message immediately, while the recorded
//!   `untied` transition completes after a short delay. The delay is
//!   presentation pacing, not an embargo: once a caller has opened, the
//!   message is already theirs.
//!
//! The untying due time is durable. If the process dies between open and
//! completion, the scheduler sweep finishes the transition.

use std::sync::Arc;
use std::time::Duration;

use bson::DateTime;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::schemas::{KnotDoc, KnotState};
use crate::store::FulfillmentStore;
use crate::types::{KeepsakeError, Result};

/// Pause between starting and completing an untying transition
pub const UNTYING_DELAY: Duration = Duration::from_secs(3);

/// Static teaser shown on the sealed view. Fixed text, never derived from
/// the sealed message.
pub const SEALED_PREVIEW: &str = "A sealed message is waiting inside this knot.";

/// What a sealed view exposes: presentation metadata, never the message
#[derive(Debug, Clone, Serialize)]
pub struct KnotView {
    pub knot_id: String,
    pub state: KnotState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_name: Option<String>,
    pub preview: &'static str,
    /// Whether the scheduled-reveal gate (when any) has passed
    pub gate_passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sealed_asset_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opening_asset_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_reveal_date: Option<DateTime>,
    pub view_count: i64,
}

/// Outcome of an open request
#[derive(Debug, Clone, PartialEq)]
pub enum OpenOutcome {
    /// The reveal gate has not passed yet; nothing was disclosed
    NotYet { available_at: DateTime },
    /// Untying started (or is in progress); the message is disclosed now
    Untying { message: String, due_at: DateTime },
    /// The knot was already untied
    AlreadyUntied {
        message: String,
        untied_at: Option<DateTime>,
    },
}

/// Token-gated access to knots
pub struct KnotService {
    store: Arc<FulfillmentStore>,
    untying_delay: Duration,
}

impl KnotService {
    pub fn new(store: Arc<FulfillmentStore>) -> Self {
        Self {
            store,
            untying_delay: UNTYING_DELAY,
        }
    }

    #[cfg(test)]
    fn with_delay(store: Arc<FulfillmentStore>, untying_delay: Duration) -> Self {
        Self {
            store,
            untying_delay,
        }
    }

    async fn resolve(&self, token: &str) -> Result<KnotDoc> {
        self.store
            .knot_by_token(token)
            .await?
            .ok_or_else(|| KeepsakeError::NotFound("knot", token.to_string()))
    }

    /// Sealed view: counts the visit and returns presentation metadata,
    /// including who it is from and whether the reveal gate has passed
    pub async fn view(&self, token: &str) -> Result<KnotView> {
        let knot = self.resolve(token).await?;
        let gift = self.store.gift(&knot.gift_id).await?;
        self.store.record_knot_view(&knot.id).await?;
        debug!(knot_id = %knot.id, state = ?knot.state, "Knot viewed");

        Ok(KnotView {
            knot_id: knot.id,
            state: knot.state,
            sender_name: gift.as_ref().map(|g| g.sender_name.clone()),
            recipient_name: gift.as_ref().map(|g| g.recipient_name.clone()),
            preview: SEALED_PREVIEW,
            gate_passed: knot
                .scheduled_reveal_date
                .map_or(true, |gate| gate <= DateTime::now()),
            sealed_asset_url: knot.sealed_asset_url,
            opening_asset_url: knot.opening_asset_url,
            scheduled_reveal_date: knot.scheduled_reveal_date,
            view_count: knot.view_count + 1,
        })
    }

    /// Open the knot. Gated opens disclose nothing; everything past the
    /// gate discloses the message and drives the state machine forward.
    /// Replayed opens are no-ops that answer with the current state.
    pub async fn open(&self, token: &str) -> Result<OpenOutcome> {
        let knot = self.resolve(token).await?;
        let now = DateTime::now();

        if let Some(gate) = knot.scheduled_reveal_date {
            if gate > now {
                info!(knot_id = %knot.id, available_at = %gate, "Open rejected by reveal gate");
                return Ok(OpenOutcome::NotYet { available_at: gate });
            }
        }

        match knot.state {
            KnotState::Untied => Ok(OpenOutcome::AlreadyUntied {
                message: knot.personalized_message,
                untied_at: knot.untied_at,
            }),
            KnotState::Untying => Ok(OpenOutcome::Untying {
                message: knot.personalized_message,
                due_at: knot.untying_due_at.unwrap_or(now),
            }),
            KnotState::Tied => {
                let due_at = DateTime::from_millis(
                    now.timestamp_millis() + self.untying_delay.as_millis() as i64,
                );
                let applied = self.store.begin_untying(&knot.id, due_at).await?;
                if !applied {
                    // Raced another open; answer with the fresh state
                    warn!(knot_id = %knot.id, "Concurrent open, re-reading state");
                    let fresh = self.resolve(token).await?;
                    return Ok(match fresh.state {
                        KnotState::Untied => OpenOutcome::AlreadyUntied {
                            message: fresh.personalized_message,
                            untied_at: fresh.untied_at,
                        },
                        _ => OpenOutcome::Untying {
                            message: fresh.personalized_message,
                            due_at: fresh.untying_due_at.unwrap_or(due_at),
                        },
                    });
                }

                info!(knot_id = %knot.id, due_at = %due_at, "Untying started");
                self.spawn_completion(knot.id.clone());

                Ok(OpenOutcome::Untying {
                    message: knot.personalized_message,
                    due_at,
                })
            }
        }
    }

    /// In-process completion timer. The sweep covers the crash window, and
    /// the compare-and-set in `complete_untying` makes the race harmless.
    fn spawn_completion(&self, knot_id: String) {
        let store = self.store.clone();
        let delay = self.untying_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match store.complete_untying(&knot_id).await {
                Ok(true) => info!(knot_id = %knot_id, "Knot untied"),
                Ok(false) => debug!(knot_id = %knot_id, "Untying already completed"),
                Err(e) => warn!(knot_id = %knot_id, error = %e, "Untying completion failed"),
            }
        });
    }

    /// The revealed message, available only once the knot reached untied
    pub async fn opened(&self, token: &str) -> Result<String> {
        let knot = self.resolve(token).await?;
        if knot.state != KnotState::Untied {
            return Err(KeepsakeError::InvalidState(format!(
                "knot is {:?}, message is still sealed",
                knot.state
            )));
        }
        Ok(knot.personalized_message)
    }

    /// Audited re-seal: back to tied, recorded in the interaction log
    pub async fn reseal(&self, token: &str) -> Result<()> {
        let knot = self.resolve(token).await?;
        let applied = self.store.reseal_knot(&knot.id).await?;
        if !applied {
            return Err(KeepsakeError::NotFound("knot", knot.id));
        }
        info!(knot_id = %knot.id, "Knot re-sealed");
        Ok(())
    }
}
