//! Gift document schema
//!
//! One personalized artifact request, the unit of fulfillment. Gifts are
//! transaction records: payment and delivery status are mutated only by the
//! reconciliation engine and the delivery scheduler, and the document is
//! never hard-deleted.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for gifts
pub const GIFT_COLLECTION: &str = "gifts";

/// The kind of content a gift carries
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GiftKind {
    #[default]
    TextLetter,
    SpokenMessage,
    StillImage,
    ShortVideo,
    Song,
    SealedKnot,
    Combination,
}

/// Payment status shared by Payment, Order, and Gift
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    /// Whether a transition to `next` is allowed. Transitions are monotonic
    /// along pending -> {completed|failed} -> [refunded]; nothing moves
    /// backward.
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (PaymentStatus::Pending, PaymentStatus::Completed)
                | (PaymentStatus::Pending, PaymentStatus::Failed)
                | (PaymentStatus::Completed, PaymentStatus::Refunded)
        )
    }
}

/// Delivery status of a gift
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    #[default]
    Pending,
    Scheduled,
    Delivered,
    Failed,
}

/// How the finished artifact reaches the recipient
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    #[default]
    Email,
    None,
}

/// One generated image candidate the buyer may select from
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ImageCandidate {
    /// Candidate identifier (stable across selection)
    pub id: String,
    /// Durable URL of the rendered image
    pub url: String,
}

/// Kind-specific generated content payload
///
/// Tagged union keyed by content kind rather than a bag of optional fields,
/// so a gift can never carry a payload inconsistent with its kind.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GiftContent {
    /// Personalized letter text
    Text { body: String },
    /// Synthesized voice or song audio (base64 inline or durable URL)
    AudioRef {
        url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        base64: Option<String>,
    },
    /// Generated image candidates; selected_id is resolved at payment time
    ImageCandidates {
        candidates: Vec<ImageCandidate>,
        #[serde(skip_serializing_if = "Option::is_none")]
        selected_id: Option<String>,
    },
    /// Short generated video
    VideoRef { url: String },
    /// Sealed-knot artifact, content lives on the knot document
    SealedKnot { knot_id: String },
}

/// Gift document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct GiftDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Gift identifier (uuid)
    pub id: String,

    /// Content kind
    pub kind: GiftKind,

    /// Sender display name (shown to the recipient)
    pub sender_name: String,

    /// Recipient display name
    pub recipient_name: String,

    /// Recipient email address, when delivery method is email
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_email: Option<String>,

    /// Delivery channel
    #[serde(default)]
    pub delivery_method: DeliveryMethod,

    /// Optional future delivery time for scheduled delivery
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_date: Option<DateTime>,

    /// Generated content payload, present once generation succeeds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_content: Option<GiftContent>,

    /// Human-readable warning when generation degraded to a fallback
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_warning: Option<String>,

    /// Payment status, mirrors the linked Payment after reconciliation
    #[serde(default)]
    pub payment_status: PaymentStatus,

    /// Delivery status
    #[serde(default)]
    pub delivery_status: DeliveryStatus,

    /// When the gift was delivered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime>,
}

impl GiftDoc {
    /// Create a new pending gift
    pub fn new(kind: GiftKind, sender_name: String, recipient_name: String) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            sender_name,
            recipient_name,
            recipient_email: None,
            delivery_method: DeliveryMethod::Email,
            scheduled_date: None,
            generated_content: None,
            generation_warning: None,
            payment_status: PaymentStatus::Pending,
            delivery_status: DeliveryStatus::Pending,
            delivered_at: None,
        }
    }
}

impl IntoIndexes for GiftDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("gift_id_unique".to_string())
                        .build(),
                ),
            ),
            // The delivery sweep queries on (delivery_status, scheduled_date)
            (
                doc! { "delivery_status": 1, "scheduled_date": 1 },
                Some(
                    IndexOptions::builder()
                        .name("delivery_sweep_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for GiftDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_status_monotonic() {
        assert!(PaymentStatus::Pending.can_transition_to(PaymentStatus::Completed));
        assert!(PaymentStatus::Pending.can_transition_to(PaymentStatus::Failed));
        assert!(PaymentStatus::Completed.can_transition_to(PaymentStatus::Refunded));

        // No regressions and no skips backward
        assert!(!PaymentStatus::Completed.can_transition_to(PaymentStatus::Pending));
        assert!(!PaymentStatus::Failed.can_transition_to(PaymentStatus::Completed));
        assert!(!PaymentStatus::Refunded.can_transition_to(PaymentStatus::Pending));
        assert!(!PaymentStatus::Pending.can_transition_to(PaymentStatus::Refunded));
    }

    #[test]
    fn test_content_tagged_serialization() {
        let content = GiftContent::ImageCandidates {
            candidates: vec![ImageCandidate {
                id: "a".to_string(),
                url: "https://assets.example/a.png".to_string(),
            }],
            selected_id: None,
        };
        let json = serde_json::to_string(&content).unwrap();
        assert!(json.contains("\"kind\":\"image_candidates\""));
    }
}
