//! Order intake
//!
//! Accepts a gift order, opens the ledger (gift, payment, order, knot for
//! the sealed variant), creates the hosted checkout session, and kicks off
//! content generation in the background. Payment settles later through the
//! webhook; generation and checkout run independently so neither blocks
//! the other.

use std::sync::Arc;

use bson::DateTime;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::db::schemas::{
    Buyer, DeliveryMethod, GiftContent, GiftDoc, GiftKind, KnotDoc, OrderDoc, PaymentDoc,
};
use crate::generation::{CommissionResult, GenerationRequest, JobPoller, ProviderRegistry};
use crate::payments::{CheckoutClient, CheckoutMetadata, CheckoutRequest};
use crate::store::FulfillmentStore;
use crate::types::{KeepsakeError, Result};

/// An incoming gift order
#[derive(Debug, Clone, Deserialize)]
pub struct IntakeRequest {
    pub kind: GiftKind,
    pub sender_name: String,
    pub recipient_name: String,
    #[serde(default)]
    pub recipient_email: Option<String>,
    /// Future delivery time, epoch milliseconds
    #[serde(default)]
    pub scheduled_date_ms: Option<i64>,
    /// Prompt handed to the generation provider
    #[serde(default)]
    pub prompt: String,
    /// Sealed message for the knot variant
    #[serde(default)]
    pub personalized_message: Option<String>,
    #[serde(default)]
    pub buyer_email: Option<String>,
    #[serde(default)]
    pub buyer_name: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
}

/// What the buyer's client needs to continue: ids plus the checkout URL
#[derive(Debug, Clone, Serialize)]
pub struct IntakeResponse {
    pub gift_id: String,
    pub payment_id: String,
    pub order_id: String,
    pub checkout_url: String,
}

/// Order intake service
pub struct OrderIntake {
    store: Arc<FulfillmentStore>,
    checkout: Arc<dyn CheckoutClient>,
    poller: JobPoller,
    providers: ProviderRegistry,
}

impl OrderIntake {
    pub fn new(
        store: Arc<FulfillmentStore>,
        checkout: Arc<dyn CheckoutClient>,
        poller: JobPoller,
        providers: ProviderRegistry,
    ) -> Self {
        Self {
            store,
            checkout,
            poller,
            providers,
        }
    }

    /// Open the ledger for one order and return the checkout handoff.
    /// Generation continues in the background after this returns.
    pub async fn create_order(self: &Arc<Self>, request: IntakeRequest) -> Result<IntakeResponse> {
        if request.amount_cents <= 0 {
            return Err(KeepsakeError::InvalidState(
                "order amount must be positive".to_string(),
            ));
        }
        if request.kind == GiftKind::SealedKnot
            && request
                .personalized_message
                .as_deref()
                .map_or(true, str::is_empty)
        {
            return Err(KeepsakeError::InvalidState(
                "sealed knot requires a personalized message".to_string(),
            ));
        }

        let mut gift = GiftDoc::new(
            request.kind,
            request.sender_name.clone(),
            request.recipient_name.clone(),
        );
        gift.recipient_email = request.recipient_email.clone();
        gift.delivery_method = if gift.recipient_email.as_deref().is_some_and(|e| !e.is_empty())
        {
            DeliveryMethod::Email
        } else {
            DeliveryMethod::None
        };
        gift.scheduled_date = request.scheduled_date_ms.map(DateTime::from_millis);

        // The sealed variant carries its content on the knot record
        if request.kind == GiftKind::SealedKnot {
            let mut knot = KnotDoc::new(
                gift.id.clone(),
                request.personalized_message.clone().unwrap_or_default(),
            );
            knot.scheduled_reveal_date = gift.scheduled_date;
            gift.generated_content = Some(GiftContent::SealedKnot {
                knot_id: knot.id.clone(),
            });
            self.store.insert_knot(knot).await?;
        }

        self.store.insert_gift(gift.clone()).await?;

        let mut payment = PaymentDoc::new(
            request.amount_cents,
            request.currency.clone(),
            Buyer {
                buyer_id: None,
                email: request.buyer_email.clone(),
                name: request.buyer_name.clone(),
            },
            String::new(),
        );

        let session = self
            .checkout
            .create_session(CheckoutRequest {
                amount_cents: request.amount_cents,
                currency: request.currency.clone(),
                product_label: product_label(request.kind, &request.recipient_name),
                success_url: request.success_url.clone(),
                cancel_url: request.cancel_url.clone(),
                metadata: CheckoutMetadata {
                    gift_id: gift.id.clone(),
                    payment_id: payment.id.clone(),
                    buyer_email: request.buyer_email.clone(),
                },
            })
            .await?;
        payment.checkout_session_id = session.session_id;
        self.store.insert_payment(payment.clone()).await?;

        let order = OrderDoc::new(
            gift.id.clone(),
            request.kind,
            payment.id.clone(),
            request.amount_cents,
            request.currency.clone(),
        );
        self.store.insert_order(order.clone()).await?;

        info!(
            gift_id = %gift.id,
            payment_id = %payment.id,
            kind = ?request.kind,
            "Order opened, checkout session created"
        );

        // Sealed knots need no generation; everything else starts now
        if request.kind != GiftKind::SealedKnot {
            let intake = Arc::clone(self);
            let gift_id = gift.id.clone();
            let generation = GenerationRequest {
                kind: request.kind,
                prompt: request.prompt.clone(),
                params: serde_json::Value::Null,
            };
            tokio::spawn(async move {
                if let Err(e) = intake.run_generation(&gift_id, generation).await {
                    error!(gift_id = %gift_id, error = %e, "Generation task errored");
                }
            });
        }

        Ok(IntakeResponse {
            gift_id: gift.id,
            payment_id: payment.id,
            order_id: order.id,
            checkout_url: session.checkout_url,
        })
    }

    /// Drive one gift's generation to a terminal outcome and record it
    pub async fn run_generation(&self, gift_id: &str, request: GenerationRequest) -> Result<()> {
        let Some(pair) = self.providers.get(request.kind) else {
            error!(gift_id = %gift_id, kind = ?request.kind, "No provider registered for kind");
            self.store
                .record_generation_outcome(
                    gift_id,
                    None,
                    Some("This gift type is temporarily unavailable.".to_string()),
                )
                .await?;
            return Ok(());
        };

        let result = if request.kind == GiftKind::StillImage {
            self.poller
                .commission_image_candidates(pair.primary.as_ref(), &request)
                .await
        } else {
            self.poller
                .commission(
                    pair.primary.as_ref(),
                    pair.fallback.as_deref(),
                    &request,
                )
                .await
        };

        match result {
            CommissionResult::Completed(content) => {
                self.store
                    .record_generation_outcome(gift_id, Some(content), None)
                    .await
            }
            CommissionResult::CompletedWithWarning(content, warning) => {
                self.store
                    .record_generation_outcome(gift_id, Some(content), Some(warning))
                    .await
            }
            CommissionResult::Failed { reason, job_id } => {
                error!(gift_id = %gift_id, %reason, ?job_id, "Generation failed");
                self.store
                    .record_generation_outcome(
                        gift_id,
                        None,
                        Some("Your gift could not be created; our team is on it.".to_string()),
                    )
                    .await
            }
        }
    }
}

fn product_label(kind: GiftKind, recipient_name: &str) -> String {
    let what = match kind {
        GiftKind::TextLetter => "Personalized letter",
        GiftKind::SpokenMessage => "Spoken message",
        GiftKind::StillImage => "Personalized artwork",
        GiftKind::ShortVideo => "Personalized video",
        GiftKind::Song => "Personalized song",
        GiftKind::SealedKnot => "Sealed knot",
        GiftKind::Combination => "Gift bundle",
    };
    format!("{} for {}", what, recipient_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::{KnotState, PaymentStatus};
    use crate::generation::provider::{JobSubmission, ProviderError, ProviderErrorKind};
    use crate::generation::{ContentProvider, PollerConfig};
    use crate::logging::UsageLogger;
    use crate::payments::CheckoutSession;
    use async_trait::async_trait;

    struct FakeCheckout;

    #[async_trait]
    impl CheckoutClient for FakeCheckout {
        async fn create_session(&self, request: CheckoutRequest) -> Result<CheckoutSession> {
            assert!(!request.metadata.gift_id.is_empty());
            assert!(!request.metadata.payment_id.is_empty());
            Ok(CheckoutSession {
                session_id: "cs_fake_1".to_string(),
                checkout_url: "https://pay.example/cs_fake_1".to_string(),
            })
        }
    }

    struct InlineProvider {
        content: GiftContent,
    }

    #[async_trait]
    impl ContentProvider for InlineProvider {
        fn name(&self) -> &str {
            "inline"
        }
        async fn submit(&self, _: &GenerationRequest) -> std::result::Result<JobSubmission, ProviderError> {
            Ok(JobSubmission::Inline(self.content.clone()))
        }
        async fn job_status(&self, _: &str) -> std::result::Result<crate::generation::JobStatus, ProviderError> {
            Err(ProviderError::new(ProviderErrorKind::Other, "no jobs"))
        }
        async fn fetch_asset(&self, _: &str) -> std::result::Result<Vec<u8>, ProviderError> {
            Err(ProviderError::new(ProviderErrorKind::Other, "no assets"))
        }
    }

    fn intake(store: Arc<FulfillmentStore>, registry: ProviderRegistry) -> Arc<OrderIntake> {
        Arc::new(OrderIntake::new(
            store,
            Arc::new(FakeCheckout),
            JobPoller::new(PollerConfig::default(), UsageLogger::new("test".to_string())),
            registry,
        ))
    }

    fn letter_request() -> IntakeRequest {
        IntakeRequest {
            kind: GiftKind::TextLetter,
            sender_name: "Ada".to_string(),
            recipient_name: "Grace".to_string(),
            recipient_email: Some("grace@example.com".to_string()),
            scheduled_date_ms: None,
            prompt: "a warm letter".to_string(),
            personalized_message: None,
            buyer_email: Some("ada@example.com".to_string()),
            buyer_name: Some("Ada".to_string()),
            amount_cents: 1999,
            currency: "EUR".to_string(),
            success_url: "https://keepsake.example/thanks".to_string(),
            cancel_url: "https://keepsake.example/cancel".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_order_opens_full_ledger() {
        let store = Arc::new(FulfillmentStore::memory_only());
        let mut registry = ProviderRegistry::new();
        registry.register(
            GiftKind::TextLetter,
            Arc::new(InlineProvider {
                content: GiftContent::Text {
                    body: "Dear Grace".to_string(),
                },
            }),
            None,
        );

        let response = intake(store.clone(), registry)
            .create_order(letter_request())
            .await
            .unwrap();

        assert_eq!(response.checkout_url, "https://pay.example/cs_fake_1");

        let gift = store.gift(&response.gift_id).await.unwrap().unwrap();
        assert_eq!(gift.payment_status, PaymentStatus::Pending);
        assert_eq!(gift.delivery_method, DeliveryMethod::Email);

        let payment = store.payment(&response.payment_id).await.unwrap().unwrap();
        assert_eq!(payment.checkout_session_id, "cs_fake_1");
        assert_eq!(payment.status, PaymentStatus::Pending);

        let order = store.order_by_gift(&response.gift_id).await.unwrap().unwrap();
        assert_eq!(order.payment_id, response.payment_id);
        assert_eq!(order.amount_cents, 1999);
    }

    #[tokio::test]
    async fn test_generation_outcome_lands_on_gift() {
        let store = Arc::new(FulfillmentStore::memory_only());
        let mut registry = ProviderRegistry::new();
        registry.register(
            GiftKind::TextLetter,
            Arc::new(InlineProvider {
                content: GiftContent::Text {
                    body: "Dear Grace".to_string(),
                },
            }),
            None,
        );
        let intake = intake(store.clone(), registry);

        let response = intake.create_order(letter_request()).await.unwrap();
        intake
            .run_generation(
                &response.gift_id,
                GenerationRequest {
                    kind: GiftKind::TextLetter,
                    prompt: "a warm letter".to_string(),
                    params: serde_json::Value::Null,
                },
            )
            .await
            .unwrap();

        let gift = store.gift(&response.gift_id).await.unwrap().unwrap();
        assert_eq!(
            gift.generated_content,
            Some(GiftContent::Text {
                body: "Dear Grace".to_string()
            })
        );
        assert!(gift.generation_warning.is_none());
    }

    #[tokio::test]
    async fn test_sealed_knot_order_creates_tied_knot() {
        let store = Arc::new(FulfillmentStore::memory_only());
        let intake = intake(store.clone(), ProviderRegistry::new());

        let mut request = letter_request();
        request.kind = GiftKind::SealedKnot;
        request.personalized_message = Some("see you in june".to_string());

        let response = intake.create_order(request).await.unwrap();

        let knot = store.knot_by_gift(&response.gift_id).await.unwrap().unwrap();
        assert_eq!(knot.state, KnotState::Tied);
        assert_eq!(knot.personalized_message, "see you in june");

        let gift = store.gift(&response.gift_id).await.unwrap().unwrap();
        assert_eq!(
            gift.generated_content,
            Some(GiftContent::SealedKnot {
                knot_id: knot.id.clone()
            })
        );
    }

    #[tokio::test]
    async fn test_sealed_knot_requires_message() {
        let store = Arc::new(FulfillmentStore::memory_only());
        let intake = intake(store, ProviderRegistry::new());

        let mut request = letter_request();
        request.kind = GiftKind::SealedKnot;
        request.personalized_message = None;

        assert!(matches!(
            intake.create_order(request).await,
            Err(KeepsakeError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_unregistered_kind_records_warning() {
        let store = Arc::new(FulfillmentStore::memory_only());
        let intake = intake(store.clone(), ProviderRegistry::new());

        let response = intake.create_order(letter_request()).await.unwrap();
        intake
            .run_generation(
                &response.gift_id,
                GenerationRequest {
                    kind: GiftKind::TextLetter,
                    prompt: String::new(),
                    params: serde_json::Value::Null,
                },
            )
            .await
            .unwrap();

        let gift = store.gift(&response.gift_id).await.unwrap().unwrap();
        assert!(gift.generated_content.is_none());
        assert!(gift.generation_warning.is_some());
    }
}
