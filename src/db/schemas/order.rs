//! Order document schema
//!
//! The commercial wrapper around a gift: exactly one order per gift
//! (unique index on gift_id). Order.payment_status mirrors the linked
//! payment after every reconciliation step.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::{GiftKind, Metadata, PaymentStatus};

/// Collection name for orders
pub const ORDER_COLLECTION: &str = "orders";

/// Order document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct OrderDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Order identifier (uuid)
    pub id: String,

    /// Owning buyer account, absent for guest checkout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buyer_id: Option<String>,

    /// Linked gift
    pub gift_id: String,

    /// Content kind, denormalized for reporting
    pub kind: GiftKind,

    /// Linked payment
    pub payment_id: String,

    /// Mirror of the linked payment's status
    #[serde(default)]
    pub payment_status: PaymentStatus,

    /// Price in minor currency units
    pub amount_cents: i64,

    /// ISO currency code
    pub currency: String,

    /// When the order completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime>,
}

impl OrderDoc {
    /// Create a new pending order wrapping a gift
    pub fn new(
        gift_id: String,
        kind: GiftKind,
        payment_id: String,
        amount_cents: i64,
        currency: String,
    ) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            id: uuid::Uuid::new_v4().to_string(),
            buyer_id: None,
            gift_id,
            kind,
            payment_id,
            payment_status: PaymentStatus::Pending,
            amount_cents,
            currency,
            completed_at: None,
        }
    }
}

impl IntoIndexes for OrderDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("order_id_unique".to_string())
                        .build(),
                ),
            ),
            // Exactly one order per gift
            (
                doc! { "gift_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("order_gift_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "payment_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("order_payment_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for OrderDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
