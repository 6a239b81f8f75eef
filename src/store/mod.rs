//! Fulfillment ledger store
//!
//! Persistence facade over the three-entity ledger (payments, orders,
//! gifts) plus knots. Two modes:
//!
//! - **Mongo-backed**: production mode, typed collections with indexes.
//! - **Memory-only**: dev mode and unit tests, no external dependencies.
//!
//! Status transitions that matter for correctness (payment terminal
//! transitions, knot state moves, the delivered guard) are compare-and-set:
//! the update only applies when the record is still in the expected state,
//! and the caller learns whether it applied. Webhook replays and concurrent
//! sweeps rely on this instead of external locking.

use bson::{doc, DateTime};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

use crate::db::schemas::{
    DeliveryMethod, DeliveryStatus, GiftContent, GiftDoc, KnotAction, KnotDoc, KnotInteraction,
    KnotState, OrderDoc, PaymentDoc, PaymentStatus, GIFT_COLLECTION, KNOT_COLLECTION,
    ORDER_COLLECTION, PAYMENT_COLLECTION,
};
use crate::db::{MongoClient, MongoCollection};
use crate::types::Result;

/// Mongo-backed collections
struct MongoBackend {
    gifts: MongoCollection<GiftDoc>,
    orders: MongoCollection<OrderDoc>,
    payments: MongoCollection<PaymentDoc>,
    knots: MongoCollection<KnotDoc>,
}

/// In-memory tables for dev mode and tests
#[derive(Default)]
struct MemoryBackend {
    gifts: RwLock<HashMap<String, GiftDoc>>,
    orders: RwLock<HashMap<String, OrderDoc>>,
    payments: RwLock<HashMap<String, PaymentDoc>>,
    knots: RwLock<HashMap<String, KnotDoc>>,
}

enum Backend {
    Mongo(MongoBackend),
    Memory(MemoryBackend),
}

/// The fulfillment ledger store
pub struct FulfillmentStore {
    backend: Backend,
}

impl FulfillmentStore {
    /// Create a Mongo-backed store, applying collection indexes
    pub async fn new(mongo: &MongoClient) -> Result<Self> {
        let backend = MongoBackend {
            gifts: mongo.collection(GIFT_COLLECTION).await?,
            orders: mongo.collection(ORDER_COLLECTION).await?,
            payments: mongo.collection(PAYMENT_COLLECTION).await?,
            knots: mongo.collection(KNOT_COLLECTION).await?,
        };
        info!("Fulfillment store initialized (MongoDB-backed)");
        Ok(Self {
            backend: Backend::Mongo(backend),
        })
    }

    /// Create a memory-only store (dev mode, tests)
    pub fn memory_only() -> Self {
        info!("Fulfillment store initialized (memory-only)");
        Self {
            backend: Backend::Memory(MemoryBackend::default()),
        }
    }

    // ------------------------------------------------------------------
    // Inserts
    // ------------------------------------------------------------------

    pub async fn insert_gift(&self, gift: GiftDoc) -> Result<()> {
        match &self.backend {
            Backend::Mongo(m) => m.gifts.insert_one(gift).await,
            Backend::Memory(m) => {
                m.gifts.write().await.insert(gift.id.clone(), gift);
                Ok(())
            }
        }
    }

    pub async fn insert_order(&self, order: OrderDoc) -> Result<()> {
        match &self.backend {
            Backend::Mongo(m) => m.orders.insert_one(order).await,
            Backend::Memory(m) => {
                m.orders.write().await.insert(order.id.clone(), order);
                Ok(())
            }
        }
    }

    pub async fn insert_payment(&self, payment: PaymentDoc) -> Result<()> {
        match &self.backend {
            Backend::Mongo(m) => m.payments.insert_one(payment).await,
            Backend::Memory(m) => {
                m.payments.write().await.insert(payment.id.clone(), payment);
                Ok(())
            }
        }
    }

    pub async fn insert_knot(&self, knot: KnotDoc) -> Result<()> {
        match &self.backend {
            Backend::Mongo(m) => m.knots.insert_one(knot).await,
            Backend::Memory(m) => {
                m.knots.write().await.insert(knot.id.clone(), knot);
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    pub async fn gift(&self, gift_id: &str) -> Result<Option<GiftDoc>> {
        match &self.backend {
            Backend::Mongo(m) => m.gifts.find_one(doc! { "id": gift_id }).await,
            Backend::Memory(m) => Ok(m.gifts.read().await.get(gift_id).cloned()),
        }
    }

    pub async fn order_by_gift(&self, gift_id: &str) -> Result<Option<OrderDoc>> {
        match &self.backend {
            Backend::Mongo(m) => m.orders.find_one(doc! { "gift_id": gift_id }).await,
            Backend::Memory(m) => Ok(m
                .orders
                .read()
                .await
                .values()
                .find(|o| o.gift_id == gift_id)
                .cloned()),
        }
    }

    pub async fn order_by_payment(&self, payment_id: &str) -> Result<Option<OrderDoc>> {
        match &self.backend {
            Backend::Mongo(m) => m.orders.find_one(doc! { "payment_id": payment_id }).await,
            Backend::Memory(m) => Ok(m
                .orders
                .read()
                .await
                .values()
                .find(|o| o.payment_id == payment_id)
                .cloned()),
        }
    }

    pub async fn payment(&self, payment_id: &str) -> Result<Option<PaymentDoc>> {
        match &self.backend {
            Backend::Mongo(m) => m.payments.find_one(doc! { "id": payment_id }).await,
            Backend::Memory(m) => Ok(m.payments.read().await.get(payment_id).cloned()),
        }
    }

    pub async fn payment_by_session(&self, session_id: &str) -> Result<Option<PaymentDoc>> {
        match &self.backend {
            Backend::Mongo(m) => {
                m.payments
                    .find_one(doc! { "checkout_session_id": session_id })
                    .await
            }
            Backend::Memory(m) => Ok(m
                .payments
                .read()
                .await
                .values()
                .find(|p| p.checkout_session_id == session_id)
                .cloned()),
        }
    }

    pub async fn knot(&self, knot_id: &str) -> Result<Option<KnotDoc>> {
        match &self.backend {
            Backend::Mongo(m) => m.knots.find_one(doc! { "id": knot_id }).await,
            Backend::Memory(m) => Ok(m.knots.read().await.get(knot_id).cloned()),
        }
    }

    pub async fn knot_by_token(&self, token: &str) -> Result<Option<KnotDoc>> {
        match &self.backend {
            Backend::Mongo(m) => m.knots.find_one(doc! { "access_token": token }).await,
            Backend::Memory(m) => Ok(m
                .knots
                .read()
                .await
                .values()
                .find(|k| k.access_token == token)
                .cloned()),
        }
    }

    pub async fn knot_by_gift(&self, gift_id: &str) -> Result<Option<KnotDoc>> {
        match &self.backend {
            Backend::Mongo(m) => m.knots.find_one(doc! { "gift_id": gift_id }).await,
            Backend::Memory(m) => Ok(m
                .knots
                .read()
                .await
                .values()
                .find(|k| k.gift_id == gift_id)
                .cloned()),
        }
    }

    // ------------------------------------------------------------------
    // Payment transitions (compare-and-set on current status)
    // ------------------------------------------------------------------

    /// pending -> completed. Returns false when the payment was already
    /// terminal (webhook replay) or unknown.
    pub async fn complete_payment(
        &self,
        payment_id: &str,
        transaction_ref: Option<&str>,
    ) -> Result<bool> {
        let now = DateTime::now();
        match &self.backend {
            Backend::Mongo(m) => {
                let mut set = doc! { "status": "completed", "completed_at": now };
                if let Some(txn) = transaction_ref {
                    set.insert("transaction_ref", txn);
                }
                let result = m
                    .payments
                    .update_one(
                        doc! { "id": payment_id, "status": "pending" },
                        doc! { "$set": set },
                    )
                    .await?;
                Ok(result.modified_count == 1)
            }
            Backend::Memory(m) => {
                let mut payments = m.payments.write().await;
                match payments.get_mut(payment_id) {
                    Some(p) if p.status.can_transition_to(PaymentStatus::Completed) => {
                        p.status = PaymentStatus::Completed;
                        p.completed_at = Some(now);
                        p.transaction_ref = transaction_ref.map(|s| s.to_string());
                        p.metadata.updated_at = Some(now);
                        Ok(true)
                    }
                    _ => Ok(false),
                }
            }
        }
    }

    /// pending -> failed. Returns false when already terminal or unknown.
    pub async fn fail_payment(&self, payment_id: &str) -> Result<bool> {
        let now = DateTime::now();
        match &self.backend {
            Backend::Mongo(m) => {
                let result = m
                    .payments
                    .update_one(
                        doc! { "id": payment_id, "status": "pending" },
                        doc! { "$set": { "status": "failed" } },
                    )
                    .await?;
                Ok(result.modified_count == 1)
            }
            Backend::Memory(m) => {
                let mut payments = m.payments.write().await;
                match payments.get_mut(payment_id) {
                    Some(p) if p.status.can_transition_to(PaymentStatus::Failed) => {
                        p.status = PaymentStatus::Failed;
                        p.metadata.updated_at = Some(now);
                        Ok(true)
                    }
                    _ => Ok(false),
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Order and gift mirrors
    // ------------------------------------------------------------------

    /// Mirror a terminal payment status onto the order
    pub async fn set_order_payment_status(
        &self,
        order_id: &str,
        status: PaymentStatus,
    ) -> Result<()> {
        let now = DateTime::now();
        let completed = status == PaymentStatus::Completed;
        match &self.backend {
            Backend::Mongo(m) => {
                let mut set = doc! { "payment_status": status_str(status) };
                if completed {
                    set.insert("completed_at", now);
                }
                m.orders
                    .update_one(doc! { "id": order_id }, doc! { "$set": set })
                    .await?;
                Ok(())
            }
            Backend::Memory(m) => {
                if let Some(o) = m.orders.write().await.get_mut(order_id) {
                    o.payment_status = status;
                    if completed {
                        o.completed_at = Some(now);
                    }
                    o.metadata.updated_at = Some(now);
                }
                Ok(())
            }
        }
    }

    /// Mirror a terminal payment status onto the gift
    pub async fn set_gift_payment_status(
        &self,
        gift_id: &str,
        status: PaymentStatus,
    ) -> Result<()> {
        match &self.backend {
            Backend::Mongo(m) => {
                m.gifts
                    .update_one(
                        doc! { "id": gift_id },
                        doc! { "$set": { "payment_status": status_str(status) } },
                    )
                    .await?;
                Ok(())
            }
            Backend::Memory(m) => {
                if let Some(g) = m.gifts.write().await.get_mut(gift_id) {
                    g.payment_status = status;
                    g.metadata.updated_at = Some(DateTime::now());
                }
                Ok(())
            }
        }
    }

    /// Replace the gift's generated content (candidate selection resolution)
    pub async fn set_gift_content(&self, gift_id: &str, content: GiftContent) -> Result<()> {
        match &self.backend {
            Backend::Mongo(m) => {
                let content_bson = bson::to_bson(&content)
                    .map_err(|e| crate::types::KeepsakeError::Database(e.to_string()))?;
                m.gifts
                    .update_one(
                        doc! { "id": gift_id },
                        doc! { "$set": { "generated_content": content_bson } },
                    )
                    .await?;
                Ok(())
            }
            Backend::Memory(m) => {
                if let Some(g) = m.gifts.write().await.get_mut(gift_id) {
                    g.generated_content = Some(content);
                    g.metadata.updated_at = Some(DateTime::now());
                }
                Ok(())
            }
        }
    }

    /// Record the terminal generation outcome: the payload (when one was
    /// produced) and the degradation or failure warning shown to the buyer
    pub async fn record_generation_outcome(
        &self,
        gift_id: &str,
        content: Option<GiftContent>,
        warning: Option<String>,
    ) -> Result<()> {
        match &self.backend {
            Backend::Mongo(m) => {
                let mut set = bson::Document::new();
                if let Some(ref content) = content {
                    let content_bson = bson::to_bson(content)
                        .map_err(|e| crate::types::KeepsakeError::Database(e.to_string()))?;
                    set.insert("generated_content", content_bson);
                }
                if let Some(ref warning) = warning {
                    set.insert("generation_warning", warning.as_str());
                }
                if set.is_empty() {
                    return Ok(());
                }
                m.gifts
                    .update_one(doc! { "id": gift_id }, doc! { "$set": set })
                    .await?;
                Ok(())
            }
            Backend::Memory(m) => {
                if let Some(g) = m.gifts.write().await.get_mut(gift_id) {
                    if content.is_some() {
                        g.generated_content = content;
                    }
                    if warning.is_some() {
                        g.generation_warning = warning;
                    }
                    g.metadata.updated_at = Some(DateTime::now());
                }
                Ok(())
            }
        }
    }

    /// Move a gift's delivery status. A gift that already reached
    /// `delivered` is append-only: the update is refused and false returned.
    pub async fn set_gift_delivery_status(
        &self,
        gift_id: &str,
        status: DeliveryStatus,
        delivered_at: Option<DateTime>,
    ) -> Result<bool> {
        let now = DateTime::now();
        match &self.backend {
            Backend::Mongo(m) => {
                let mut set = doc! { "delivery_status": delivery_str(status) };
                if let Some(at) = delivered_at {
                    set.insert("delivered_at", at);
                }
                let result = m
                    .gifts
                    .update_one(
                        doc! { "id": gift_id, "delivery_status": { "$ne": "delivered" } },
                        doc! { "$set": set },
                    )
                    .await?;
                Ok(result.modified_count == 1)
            }
            Backend::Memory(m) => {
                let mut gifts = m.gifts.write().await;
                match gifts.get_mut(gift_id) {
                    Some(g) if g.delivery_status != DeliveryStatus::Delivered => {
                        g.delivery_status = status;
                        if delivered_at.is_some() {
                            g.delivered_at = delivered_at;
                        }
                        g.metadata.updated_at = Some(now);
                        Ok(true)
                    }
                    _ => Ok(false),
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Knot transitions
    // ------------------------------------------------------------------

    /// Record a sealed view: bump the counter and append to the log
    pub async fn record_knot_view(&self, knot_id: &str) -> Result<()> {
        let entry = KnotInteraction {
            action: KnotAction::Viewed,
            at: DateTime::now(),
            detail: None,
        };
        match &self.backend {
            Backend::Mongo(m) => {
                let entry_bson = bson::to_bson(&entry)
                    .map_err(|e| crate::types::KeepsakeError::Database(e.to_string()))?;
                m.knots
                    .update_one(
                        doc! { "id": knot_id },
                        doc! {
                            "$inc": { "view_count": 1 },
                            "$push": { "interactions": entry_bson },
                        },
                    )
                    .await?;
                Ok(())
            }
            Backend::Memory(m) => {
                if let Some(k) = m.knots.write().await.get_mut(knot_id) {
                    k.view_count += 1;
                    k.interactions.push(entry);
                    k.metadata.updated_at = Some(DateTime::now());
                }
                Ok(())
            }
        }
    }

    /// tied -> untying, persisting the durable due-at for completion.
    /// Returns false when the knot was not tied (replayed open).
    pub async fn begin_untying(&self, knot_id: &str, due_at: DateTime) -> Result<bool> {
        let entry = KnotInteraction {
            action: KnotAction::UntyingStarted,
            at: DateTime::now(),
            detail: None,
        };
        match &self.backend {
            Backend::Mongo(m) => {
                let entry_bson = bson::to_bson(&entry)
                    .map_err(|e| crate::types::KeepsakeError::Database(e.to_string()))?;
                let result = m
                    .knots
                    .update_one(
                        doc! { "id": knot_id, "state": "tied" },
                        doc! {
                            "$set": { "state": "untying", "untying_due_at": due_at },
                            "$push": { "interactions": entry_bson },
                        },
                    )
                    .await?;
                Ok(result.modified_count == 1)
            }
            Backend::Memory(m) => {
                let mut knots = m.knots.write().await;
                match knots.get_mut(knot_id) {
                    Some(k) if k.state == KnotState::Tied => {
                        k.state = KnotState::Untying;
                        k.untying_due_at = Some(due_at);
                        k.interactions.push(entry);
                        k.metadata.updated_at = Some(DateTime::now());
                        Ok(true)
                    }
                    _ => Ok(false),
                }
            }
        }
    }

    /// untying -> untied. Returns false when the knot already completed
    /// (the in-process timer and the sweep may race; exactly one wins).
    pub async fn complete_untying(&self, knot_id: &str) -> Result<bool> {
        let now = DateTime::now();
        let entry = KnotInteraction {
            action: KnotAction::Untied,
            at: now,
            detail: None,
        };
        match &self.backend {
            Backend::Mongo(m) => {
                let entry_bson = bson::to_bson(&entry)
                    .map_err(|e| crate::types::KeepsakeError::Database(e.to_string()))?;
                let result = m
                    .knots
                    .update_one(
                        doc! { "id": knot_id, "state": "untying" },
                        doc! {
                            "$set": {
                                "state": "untied",
                                "untied_at": now,
                                "is_revealed": true,
                            },
                            "$unset": { "untying_due_at": "" },
                            "$push": { "interactions": entry_bson },
                        },
                    )
                    .await?;
                Ok(result.modified_count == 1)
            }
            Backend::Memory(m) => {
                let mut knots = m.knots.write().await;
                match knots.get_mut(knot_id) {
                    Some(k) if k.state == KnotState::Untying => {
                        k.state = KnotState::Untied;
                        k.untied_at = Some(now);
                        k.is_revealed = true;
                        k.untying_due_at = None;
                        k.interactions.push(entry);
                        k.metadata.updated_at = Some(now);
                        Ok(true)
                    }
                    _ => Ok(false),
                }
            }
        }
    }

    /// Explicit audited re-seal: back to tied, clearing reveal markers
    pub async fn reseal_knot(&self, knot_id: &str) -> Result<bool> {
        let now = DateTime::now();
        let entry = KnotInteraction {
            action: KnotAction::Retied,
            at: now,
            detail: None,
        };
        match &self.backend {
            Backend::Mongo(m) => {
                let entry_bson = bson::to_bson(&entry)
                    .map_err(|e| crate::types::KeepsakeError::Database(e.to_string()))?;
                let result = m
                    .knots
                    .update_one(
                        doc! { "id": knot_id },
                        doc! {
                            "$set": {
                                "state": "tied",
                                "is_revealed": false,
                                "tied_at": now,
                            },
                            "$unset": { "untied_at": "", "untying_due_at": "" },
                            "$push": { "interactions": entry_bson },
                        },
                    )
                    .await?;
                Ok(result.modified_count == 1)
            }
            Backend::Memory(m) => {
                let mut knots = m.knots.write().await;
                match knots.get_mut(knot_id) {
                    Some(k) => {
                        k.state = KnotState::Tied;
                        k.is_revealed = false;
                        k.tied_at = Some(now);
                        k.untied_at = None;
                        k.untying_due_at = None;
                        k.interactions.push(entry);
                        k.metadata.updated_at = Some(now);
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Sweep queries
    // ------------------------------------------------------------------

    /// Gifts due for delivery: scheduled, paid, schedule time passed,
    /// deliverable by email
    pub async fn due_scheduled_gifts(&self, now: DateTime) -> Result<Vec<GiftDoc>> {
        match &self.backend {
            Backend::Mongo(m) => {
                m.gifts
                    .find_many(doc! {
                        "delivery_status": "scheduled",
                        "payment_status": "completed",
                        "scheduled_date": { "$lte": now },
                        "delivery_method": "email",
                        "recipient_email": { "$nin": [null, ""] },
                    })
                    .await
            }
            Backend::Memory(m) => Ok(m
                .gifts
                .read()
                .await
                .values()
                .filter(|g| {
                    g.delivery_status == DeliveryStatus::Scheduled
                        && g.payment_status == PaymentStatus::Completed
                        && g.delivery_method == DeliveryMethod::Email
                        && g.recipient_email.as_deref().is_some_and(|e| !e.is_empty())
                        && g.scheduled_date.is_some_and(|d| d <= now)
                })
                .cloned()
                .collect()),
        }
    }

    /// Knots whose delayed untying completion is overdue (crash recovery)
    pub async fn overdue_untying_knots(&self, now: DateTime) -> Result<Vec<KnotDoc>> {
        match &self.backend {
            Backend::Mongo(m) => {
                m.knots
                    .find_many(doc! {
                        "state": "untying",
                        "untying_due_at": { "$lte": now },
                    })
                    .await
            }
            Backend::Memory(m) => Ok(m
                .knots
                .read()
                .await
                .values()
                .filter(|k| {
                    k.state == KnotState::Untying && k.untying_due_at.is_some_and(|d| d <= now)
                })
                .cloned()
                .collect()),
        }
    }
}

fn status_str(status: PaymentStatus) -> &'static str {
    match status {
        PaymentStatus::Pending => "pending",
        PaymentStatus::Completed => "completed",
        PaymentStatus::Failed => "failed",
        PaymentStatus::Refunded => "refunded",
    }
}

fn delivery_str(status: DeliveryStatus) -> &'static str {
    match status {
        DeliveryStatus::Pending => "pending",
        DeliveryStatus::Scheduled => "scheduled",
        DeliveryStatus::Delivered => "delivered",
        DeliveryStatus::Failed => "failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::{Buyer, GiftKind};

    async fn seeded_store() -> (FulfillmentStore, PaymentDoc, GiftDoc) {
        let store = FulfillmentStore::memory_only();
        let gift = GiftDoc::new(
            GiftKind::TextLetter,
            "Ada".to_string(),
            "Grace".to_string(),
        );
        let payment = PaymentDoc::new(
            1999,
            "EUR".to_string(),
            Buyer {
                buyer_id: None,
                email: Some("ada@example.com".to_string()),
                name: Some("Ada".to_string()),
            },
            "cs_test_123".to_string(),
        );
        store.insert_gift(gift.clone()).await.unwrap();
        store.insert_payment(payment.clone()).await.unwrap();
        (store, payment, gift)
    }

    #[tokio::test]
    async fn test_complete_payment_is_compare_and_set() {
        let (store, payment, _) = seeded_store().await;

        assert!(store.complete_payment(&payment.id, Some("txn_1")).await.unwrap());
        // Replay does not re-apply
        assert!(!store.complete_payment(&payment.id, Some("txn_1")).await.unwrap());
        // Nor can a completed payment fail afterwards
        assert!(!store.fail_payment(&payment.id).await.unwrap());

        let stored = store.payment(&payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Completed);
        assert_eq!(stored.transaction_ref.as_deref(), Some("txn_1"));
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_delivered_gift_is_append_only() {
        let (store, _, gift) = seeded_store().await;

        assert!(store
            .set_gift_delivery_status(&gift.id, DeliveryStatus::Delivered, Some(DateTime::now()))
            .await
            .unwrap());
        // No regression once delivered
        assert!(!store
            .set_gift_delivery_status(&gift.id, DeliveryStatus::Failed, None)
            .await
            .unwrap());

        let stored = store.gift(&gift.id).await.unwrap().unwrap();
        assert_eq!(stored.delivery_status, DeliveryStatus::Delivered);
    }

    #[tokio::test]
    async fn test_payment_lookup_by_session() {
        let (store, payment, _) = seeded_store().await;
        let found = store.payment_by_session("cs_test_123").await.unwrap().unwrap();
        assert_eq!(found.id, payment.id);
        assert!(store.payment_by_session("cs_missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_knot_untying_transitions() {
        let store = FulfillmentStore::memory_only();
        let knot = KnotDoc::new("gift-1".to_string(), "surprise".to_string());
        let knot_id = knot.id.clone();
        store.insert_knot(knot).await.unwrap();

        assert!(store.begin_untying(&knot_id, DateTime::now()).await.unwrap());
        // A second open attempt does not restart the transition
        assert!(!store.begin_untying(&knot_id, DateTime::now()).await.unwrap());

        assert!(store.complete_untying(&knot_id).await.unwrap());
        // Timer/sweep race: the loser is a no-op
        assert!(!store.complete_untying(&knot_id).await.unwrap());

        let stored = store.knot(&knot_id).await.unwrap().unwrap();
        assert_eq!(stored.state, KnotState::Untied);
        assert!(stored.is_revealed);
        assert!(stored.untied_at.is_some());
        assert!(stored.untying_due_at.is_none());

        let actions: Vec<KnotAction> = stored.interactions.iter().map(|i| i.action).collect();
        assert_eq!(actions, vec![KnotAction::UntyingStarted, KnotAction::Untied]);
    }

    #[tokio::test]
    async fn test_due_scheduled_gifts_predicate() {
        let store = FulfillmentStore::memory_only();

        let past = DateTime::from_millis(DateTime::now().timestamp_millis() - 60_000);
        let future = DateTime::from_millis(DateTime::now().timestamp_millis() + 3_600_000);

        let mut due = GiftDoc::new(GiftKind::Song, "A".into(), "B".into());
        due.recipient_email = Some("b@example.com".to_string());
        due.payment_status = PaymentStatus::Completed;
        due.delivery_status = DeliveryStatus::Scheduled;
        due.scheduled_date = Some(past);

        let mut not_yet = due.clone();
        not_yet.id = uuid::Uuid::new_v4().to_string();
        not_yet.scheduled_date = Some(future);

        let mut unpaid = due.clone();
        unpaid.id = uuid::Uuid::new_v4().to_string();
        unpaid.payment_status = PaymentStatus::Pending;

        let due_id = due.id.clone();
        store.insert_gift(due).await.unwrap();
        store.insert_gift(not_yet).await.unwrap();
        store.insert_gift(unpaid).await.unwrap();

        let found = store.due_scheduled_gifts(DateTime::now()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, due_id);
    }
}
