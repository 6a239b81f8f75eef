//! Payment document schema
//!
//! The financial record for an order. The checkout session id is the
//! external correlation key the webhook handler resolves events against,
//! so it carries a unique index.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::{Metadata, PaymentStatus};

/// Collection name for payments
pub const PAYMENT_COLLECTION: &str = "payments";

/// Buyer identity: registered account or guest contact details
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Buyer {
    /// Account id for registered buyers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buyer_id: Option<String>,

    /// Guest email (also used for the payment confirmation)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Guest display name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Payment document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct PaymentDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Payment identifier (uuid)
    pub id: String,

    /// Amount in minor currency units
    pub amount_cents: i64,

    /// ISO currency code
    pub currency: String,

    /// Buyer identity
    #[serde(default)]
    pub buyer: Buyer,

    /// Payment processor checkout session reference (external correlation id)
    pub checkout_session_id: String,

    /// External transaction reference reported by the processor on completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_ref: Option<String>,

    /// Payment status
    #[serde(default)]
    pub status: PaymentStatus,

    /// When the payment completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime>,

    /// When the payment was refunded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refunded_at: Option<DateTime>,
}

impl PaymentDoc {
    /// Create a new pending payment
    pub fn new(amount_cents: i64, currency: String, buyer: Buyer, checkout_session_id: String) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            id: uuid::Uuid::new_v4().to_string(),
            amount_cents,
            currency,
            buyer,
            checkout_session_id,
            transaction_ref: None,
            status: PaymentStatus::Pending,
            completed_at: None,
            refunded_at: None,
        }
    }
}

impl IntoIndexes for PaymentDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("payment_id_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "checkout_session_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("checkout_session_unique".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for PaymentDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
