//! Knot document schema
//!
//! The sealed-reveal gift variant. One knot per gift of kind sealed_knot.
//! The access token is a capability: anyone holding it may view or open
//! the knot. The sealed message must never leave the view path before the
//! state reaches `untied`.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for knots
pub const KNOT_COLLECTION: &str = "knots";

/// Knot reveal states
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KnotState {
    /// Sealed, initial state
    #[default]
    Tied,
    /// Opening in progress; the delayed completion is due at untying_due_at
    Untying,
    /// Opened. Terminal except for an explicit audited re-seal.
    Untied,
}

/// Recorded interaction against a knot
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KnotAction {
    Viewed,
    UntyingStarted,
    Untied,
    Retied,
}

/// One entry in the ordered interaction log
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct KnotInteraction {
    pub action: KnotAction,
    pub at: DateTime,
    /// Free-form detail (client hints, operator notes)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Knot document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct KnotDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Knot identifier (uuid)
    pub id: String,

    /// Capability token; possession implies authorization
    pub access_token: String,

    /// Owning gift
    pub gift_id: String,

    /// The sealed personalized message
    pub personalized_message: String,

    /// Visual asset shown while sealed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sealed_asset_url: Option<String>,

    /// Visual asset shown during the opening animation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opening_asset_url: Option<String>,

    /// Reveal state
    #[serde(default)]
    pub state: KnotState,

    /// When the knot was tied (created or re-sealed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tied_at: Option<DateTime>,

    /// When the knot finished untying
    #[serde(skip_serializing_if = "Option::is_none")]
    pub untied_at: Option<DateTime>,

    /// Durable due-at for the delayed untying -> untied transition.
    /// The scheduler sweep resolves records whose due time passed while
    /// the process was down.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub untying_due_at: Option<DateTime>,

    /// Optional gate: opening is rejected before this time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_reveal_date: Option<DateTime>,

    /// Whether the message has been revealed
    #[serde(default)]
    pub is_revealed: bool,

    /// Number of times the sealed view was requested
    #[serde(default)]
    pub view_count: i64,

    /// Ordered interaction log
    #[serde(default)]
    pub interactions: Vec<KnotInteraction>,
}

impl KnotDoc {
    /// Create a new tied knot for a gift
    pub fn new(gift_id: String, personalized_message: String) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            id: uuid::Uuid::new_v4().to_string(),
            access_token: generate_access_token(),
            gift_id,
            personalized_message,
            sealed_asset_url: None,
            opening_asset_url: None,
            state: KnotState::Tied,
            tied_at: Some(DateTime::now()),
            untied_at: None,
            untying_due_at: None,
            scheduled_reveal_date: None,
            is_revealed: false,
            view_count: 0,
            interactions: Vec::new(),
        }
    }
}

/// Generate a 32-byte random capability token, hex encoded
pub fn generate_access_token() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl IntoIndexes for KnotDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("knot_id_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "access_token": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("knot_token_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "gift_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("knot_gift_unique".to_string())
                        .build(),
                ),
            ),
            // The sweep resolves overdue untying transitions
            (
                doc! { "state": 1, "untying_due_at": 1 },
                Some(
                    IndexOptions::builder()
                        .name("untying_sweep_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for KnotDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
