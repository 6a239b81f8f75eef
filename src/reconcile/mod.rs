//! Payment reconciliation engine
//!
//! Turns authenticated webhook events into ledger state. The processor
//! retries deliveries, so every handler here is idempotent: terminal
//! payment transitions are compare-and-set, and a replayed event that
//! finds the payment already terminal acknowledges without side effects.
//! Commit order on completion is payment, then order, then gift, so a
//! crash between steps leaves the mirrors behind the payment, never ahead
//! of it.

use std::sync::Arc;

use bson::DateTime;
use tracing::{error, info, warn};

use crate::db::schemas::{
    DeliveryMethod, DeliveryStatus, GiftContent, GiftDoc, PaymentDoc, PaymentStatus,
};
use crate::delivery::GiftDispatcher;
use crate::email::{confirmation_email, EmailSender};
use crate::logging::{EventType, UsageEvent, UsageLogger};
use crate::payments::{WebhookEvent, WebhookEventType};
use crate::store::FulfillmentStore;
use crate::types::Result;

/// How the webhook endpoint should answer the processor
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookDisposition {
    /// Event handled (or already handled); the processor stops retrying
    Ack,
    /// Event cannot be attributed; the processor should surface it
    Reject(String),
}

/// The reconciliation engine
pub struct ReconcileEngine {
    store: Arc<FulfillmentStore>,
    email: Arc<dyn EmailSender>,
    dispatcher: Arc<GiftDispatcher>,
    usage: UsageLogger,
}

impl ReconcileEngine {
    pub fn new(
        store: Arc<FulfillmentStore>,
        email: Arc<dyn EmailSender>,
        dispatcher: Arc<GiftDispatcher>,
        usage: UsageLogger,
    ) -> Self {
        Self {
            store,
            email,
            dispatcher,
            usage,
        }
    }

    /// Handle one decoded webhook event. Errors bubble up so the endpoint
    /// answers 5xx and the processor redelivers.
    pub async fn on_webhook_event(&self, event: &WebhookEvent) -> Result<WebhookDisposition> {
        let Some(payment) = self.resolve_payment(event).await? else {
            error!(
                session_id = %event.session_id,
                event_type = ?event.event_type,
                "Webhook for unknown checkout session"
            );
            return Ok(WebhookDisposition::Reject(format!(
                "unknown checkout session {}",
                event.session_id
            )));
        };

        match event.event_type {
            WebhookEventType::CheckoutCompleted => self.on_completed(event, payment).await,
            WebhookEventType::CheckoutExpired
            | WebhookEventType::CheckoutAsyncPaymentFailed => self.on_failed(event, payment).await,
        }
    }

    /// Resolve the payment the event belongs to: metadata payment id first,
    /// then the session correlation key.
    async fn resolve_payment(&self, event: &WebhookEvent) -> Result<Option<PaymentDoc>> {
        if !event.metadata.payment_id.is_empty() {
            if let Some(payment) = self.store.payment(&event.metadata.payment_id).await? {
                return Ok(Some(payment));
            }
        }
        self.store.payment_by_session(&event.session_id).await
    }

    async fn on_completed(
        &self,
        event: &WebhookEvent,
        payment: PaymentDoc,
    ) -> Result<WebhookDisposition> {
        // Step 1: payment, compare-and-set on pending
        let applied = self
            .store
            .complete_payment(&payment.id, event.transaction_ref.as_deref())
            .await?;
        if !applied {
            info!(
                payment_id = %payment.id,
                status = ?payment.status,
                "Completed webhook replayed against terminal payment, no-op"
            );
            return Ok(WebhookDisposition::Ack);
        }
        info!(payment_id = %payment.id, session_id = %event.session_id, "Payment completed");

        // Step 2: order mirror
        let gift_id = match self.store.order_by_payment(&payment.id).await? {
            Some(order) => {
                self.store
                    .set_order_payment_status(&order.id, PaymentStatus::Completed)
                    .await?;
                order.gift_id
            }
            None => {
                warn!(payment_id = %payment.id, "Completed payment has no order record");
                event.metadata.gift_id.clone()
            }
        };
        if gift_id.is_empty() {
            error!(payment_id = %payment.id, "Completed payment cannot be tied to a gift");
            return Ok(WebhookDisposition::Ack);
        }

        // Step 3: gift mirror
        self.store
            .set_gift_payment_status(&gift_id, PaymentStatus::Completed)
            .await?;

        let Some(mut gift) = self.store.gift(&gift_id).await? else {
            error!(payment_id = %payment.id, gift_id = %gift_id, "Gift record missing");
            return Ok(WebhookDisposition::Ack);
        };

        // Step 4: resolve an unresolved candidate selection before delivery
        self.resolve_candidate_selection(&mut gift).await?;

        // Step 5: delivery timing. Only email-deliverable gifts enter the
        // scheduled/deliver-now decision; anything else stays pending so it
        // is never parked in a state the sweep cannot reach.
        let deliverable = gift.delivery_method == DeliveryMethod::Email
            && gift.recipient_email.as_deref().is_some_and(|e| !e.is_empty());
        if deliverable {
            let now = DateTime::now();
            match gift.scheduled_date {
                Some(at) if at > now => {
                    self.store
                        .set_gift_delivery_status(&gift.id, DeliveryStatus::Scheduled, None)
                        .await?;
                    info!(gift_id = %gift.id, scheduled_date = %at, "Gift queued for scheduled delivery");
                }
                _ => {
                    self.dispatcher.dispatch(&gift).await?;
                }
            }
        } else {
            info!(gift_id = %gift.id, "Gift has no deliverable channel, delivery left pending");
        }

        // Step 6: best-effort buyer confirmation
        self.send_confirmation(event, &payment, &gift).await;

        Ok(WebhookDisposition::Ack)
    }

    async fn on_failed(
        &self,
        event: &WebhookEvent,
        payment: PaymentDoc,
    ) -> Result<WebhookDisposition> {
        let applied = self.store.fail_payment(&payment.id).await?;
        if !applied {
            info!(
                payment_id = %payment.id,
                event_type = ?event.event_type,
                "Failure webhook replayed against terminal payment, no-op"
            );
            return Ok(WebhookDisposition::Ack);
        }
        warn!(
            payment_id = %payment.id,
            session_id = %event.session_id,
            event_type = ?event.event_type,
            "Payment failed"
        );

        if let Some(order) = self.store.order_by_payment(&payment.id).await? {
            self.store
                .set_order_payment_status(&order.id, PaymentStatus::Failed)
                .await?;
            self.store
                .set_gift_payment_status(&order.gift_id, PaymentStatus::Failed)
                .await?;
        }

        Ok(WebhookDisposition::Ack)
    }

    /// An image gift may reach payment with no candidate chosen; default to
    /// the first candidate so delivery always has a concrete artifact.
    async fn resolve_candidate_selection(&self, gift: &mut GiftDoc) -> Result<()> {
        let resolved = match &mut gift.generated_content {
            Some(GiftContent::ImageCandidates {
                candidates,
                selected_id,
            }) if selected_id.is_none() => match candidates.first() {
                Some(first) => {
                    warn!(
                        gift_id = %gift.id,
                        candidate_id = %first.id,
                        "No image candidate selected at payment time, defaulting to first"
                    );
                    *selected_id = Some(first.id.clone());
                    true
                }
                None => false,
            },
            _ => false,
        };
        if resolved {
            if let Some(content) = gift.generated_content.clone() {
                self.store.set_gift_content(&gift.id, content).await?;
            }
        }
        Ok(())
    }

    /// Confirmation failures are logged and swallowed; the payment already
    /// settled and must stay acknowledged.
    async fn send_confirmation(&self, event: &WebhookEvent, payment: &PaymentDoc, gift: &GiftDoc) {
        let buyer_email = event
            .metadata
            .buyer_email
            .clone()
            .or_else(|| payment.buyer.email.clone());
        let Some(buyer_email) = buyer_email.filter(|e| !e.is_empty()) else {
            info!(payment_id = %payment.id, "No buyer address, skipping confirmation");
            return;
        };

        let message = confirmation_email(gift, &buyer_email, payment.amount_cents, &payment.currency);
        match self.email.send(message).await {
            Ok(_) => {
                self.usage
                    .log(
                        UsageEvent::new(
                            EventType::ConfirmationSent,
                            self.usage.node_id().to_string(),
                        )
                        .with_gift(gift.id.clone()),
                    )
                    .await;
            }
            Err(e) => {
                warn!(payment_id = %payment.id, error = %e, "Confirmation email failed");
            }
        }
    }
}
