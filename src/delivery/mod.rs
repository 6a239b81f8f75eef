//! Gift email dispatch
//!
//! Shared by the reconciliation engine (deliver-now path) and the delivery
//! scheduler (scheduled sweep). Routes a gift to the right email variant,
//! sends it, and records the delivery outcome on the gift. The delivered
//! state is append-only: a gift marked delivered is never re-sent and never
//! regresses.

use std::sync::Arc;

use bson::DateTime;
use tracing::{error, info, warn};

use crate::db::schemas::{DeliveryMethod, DeliveryStatus, GiftDoc, GiftKind};
use crate::email::{gift_email, knot_email, EmailSender};
use crate::logging::UsageLogger;
use crate::store::FulfillmentStore;
use crate::types::Result;

/// Outcome of one dispatch attempt
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Delivered,
    /// No deliverable channel (no email method or missing address)
    Skipped,
    Failed(String),
}

/// Sends gift emails and records the outcome
pub struct GiftDispatcher {
    store: Arc<FulfillmentStore>,
    email: Arc<dyn EmailSender>,
    usage: UsageLogger,
    public_url: String,
}

impl GiftDispatcher {
    pub fn new(
        store: Arc<FulfillmentStore>,
        email: Arc<dyn EmailSender>,
        usage: UsageLogger,
        public_url: String,
    ) -> Self {
        Self {
            store,
            email,
            usage,
            public_url,
        }
    }

    /// Deliver one gift now. Sealed knots get a link-only email; everything
    /// else gets the artifact itself.
    pub async fn dispatch(&self, gift: &GiftDoc) -> Result<DispatchOutcome> {
        let Some(recipient) = gift.recipient_email.as_deref().filter(|e| !e.is_empty()) else {
            info!(gift_id = %gift.id, "Gift has no recipient address, skipping dispatch");
            return Ok(DispatchOutcome::Skipped);
        };
        if gift.delivery_method != DeliveryMethod::Email {
            info!(gift_id = %gift.id, "Gift has no email delivery method, skipping dispatch");
            return Ok(DispatchOutcome::Skipped);
        }

        let message = if gift.kind == GiftKind::SealedKnot {
            let Some(knot) = self.store.knot_by_gift(&gift.id).await? else {
                error!(gift_id = %gift.id, "Sealed-knot gift has no knot record");
                self.store
                    .set_gift_delivery_status(&gift.id, DeliveryStatus::Failed, None)
                    .await?;
                return Ok(DispatchOutcome::Failed("knot record missing".to_string()));
            };
            let url = format!(
                "{}/knot/{}",
                self.public_url.trim_end_matches('/'),
                knot.access_token
            );
            knot_email(gift, recipient, &url)
        } else {
            gift_email(gift, recipient)
        };

        match self.email.send(message).await {
            Ok(receipt) => {
                let applied = self
                    .store
                    .set_gift_delivery_status(
                        &gift.id,
                        DeliveryStatus::Delivered,
                        Some(DateTime::now()),
                    )
                    .await?;
                if !applied {
                    warn!(gift_id = %gift.id, "Gift was already delivered, status unchanged");
                }
                info!(
                    gift_id = %gift.id,
                    message_id = %receipt.message_id,
                    "Gift delivered"
                );
                self.usage.log_gift_delivered(&gift.id).await;
                Ok(DispatchOutcome::Delivered)
            }
            Err(e) => {
                error!(gift_id = %gift.id, error = %e, "Gift delivery failed");
                self.store
                    .set_gift_delivery_status(&gift.id, DeliveryStatus::Failed, None)
                    .await?;
                Ok(DispatchOutcome::Failed(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::KnotDoc;
    use crate::email::testing::RecordingEmailSender;

    fn dispatcher(
        store: Arc<FulfillmentStore>,
        email: RecordingEmailSender,
    ) -> GiftDispatcher {
        GiftDispatcher::new(
            store,
            Arc::new(email),
            UsageLogger::new("test".to_string()),
            "https://keepsake.example".to_string(),
        )
    }

    #[tokio::test]
    async fn test_dispatch_marks_delivered() {
        let store = Arc::new(FulfillmentStore::memory_only());
        let email = RecordingEmailSender::new();

        let mut gift = GiftDoc::new(GiftKind::TextLetter, "Ada".into(), "Grace".into());
        gift.recipient_email = Some("grace@example.com".to_string());
        store.insert_gift(gift.clone()).await.unwrap();

        let outcome = dispatcher(store.clone(), email.clone())
            .dispatch(&gift)
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Delivered);
        assert_eq!(email.sent_count().await, 1);
        let stored = store.gift(&gift.id).await.unwrap().unwrap();
        assert_eq!(stored.delivery_status, DeliveryStatus::Delivered);
        assert!(stored.delivered_at.is_some());
    }

    #[tokio::test]
    async fn test_knot_gift_gets_link_email() {
        let store = Arc::new(FulfillmentStore::memory_only());
        let email = RecordingEmailSender::new();

        let mut gift = GiftDoc::new(GiftKind::SealedKnot, "Ada".into(), "Grace".into());
        gift.recipient_email = Some("grace@example.com".to_string());
        let knot = KnotDoc::new(gift.id.clone(), "the secret".to_string());
        let token = knot.access_token.clone();
        store.insert_gift(gift.clone()).await.unwrap();
        store.insert_knot(knot).await.unwrap();

        dispatcher(store.clone(), email.clone())
            .dispatch(&gift)
            .await
            .unwrap();

        let sent = email.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0]
            .html_body
            .contains(&format!("https://keepsake.example/knot/{}", token)));
        // The sealed message itself never appears in the email
        assert!(!sent[0].html_body.contains("the secret"));
    }

    #[tokio::test]
    async fn test_send_failure_marks_failed() {
        let store = Arc::new(FulfillmentStore::memory_only());
        let email = RecordingEmailSender::new();
        email.set_fail_next(true).await;

        let mut gift = GiftDoc::new(GiftKind::TextLetter, "Ada".into(), "Grace".into());
        gift.recipient_email = Some("grace@example.com".to_string());
        store.insert_gift(gift.clone()).await.unwrap();

        let outcome = dispatcher(store.clone(), email.clone())
            .dispatch(&gift)
            .await
            .unwrap();

        assert!(matches!(outcome, DispatchOutcome::Failed(_)));
        let stored = store.gift(&gift.id).await.unwrap().unwrap();
        assert_eq!(stored.delivery_status, DeliveryStatus::Failed);
    }

    #[tokio::test]
    async fn test_missing_address_skips() {
        let store = Arc::new(FulfillmentStore::memory_only());
        let email = RecordingEmailSender::new();

        let gift = GiftDoc::new(GiftKind::TextLetter, "Ada".into(), "Grace".into());
        store.insert_gift(gift.clone()).await.unwrap();

        let outcome = dispatcher(store, email.clone()).dispatch(&gift).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Skipped);
        assert_eq!(email.sent_count().await, 0);
    }
}
