//! Delivery scheduler
//!
//! A periodic sweep loop that releases scheduled gifts whose delivery time
//! has passed and resolves knot untying transitions whose due time passed
//! while no process was watching them. The first sweep runs immediately on
//! startup so a restart catches up on anything missed while down.
//!
//! The sweep is designed for one instance per deployment. Concurrent
//! sweeps will not corrupt state (every transition is compare-and-set)
//! but they race on dispatch, so running more than one scheduler risks
//! duplicate delivery attempts.

use std::sync::Arc;
use std::time::Duration;

use bson::DateTime;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::delivery::GiftDispatcher;
use crate::store::FulfillmentStore;
use crate::types::Result;

/// Scheduler tuning
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Time between sweeps
    pub interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

/// The delivery scheduler loop
pub struct DeliveryScheduler {
    config: SchedulerConfig,
    store: Arc<FulfillmentStore>,
    dispatcher: Arc<GiftDispatcher>,
}

impl DeliveryScheduler {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<FulfillmentStore>,
        dispatcher: Arc<GiftDispatcher>,
    ) -> Self {
        Self {
            config,
            store,
            dispatcher,
        }
    }

    /// Spawn the sweep loop. The handle is held for the process lifetime.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Delivery scheduler started"
        );
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.interval);
            loop {
                // First tick fires immediately
                interval.tick().await;
                if let Err(e) = self.sweep(DateTime::now()).await {
                    error!(error = %e, "Scheduler sweep failed");
                }
            }
        })
    }

    /// One sweep: release due scheduled gifts, then resolve overdue knots.
    /// A dispatch failure marks that gift and moves on; it never aborts the
    /// rest of the sweep.
    pub async fn sweep(&self, now: DateTime) -> Result<()> {
        let due = self.store.due_scheduled_gifts(now).await?;
        if !due.is_empty() {
            info!(count = due.len(), "Releasing scheduled gifts");
        }
        for gift in due {
            if let Err(e) = self.dispatcher.dispatch(&gift).await {
                error!(gift_id = %gift.id, error = %e, "Scheduled dispatch errored");
            }
        }

        let overdue = self.store.overdue_untying_knots(now).await?;
        for knot in overdue {
            match self.store.complete_untying(&knot.id).await {
                Ok(true) => {
                    info!(knot_id = %knot.id, "Resolved overdue untying transition");
                }
                Ok(false) => {
                    // Lost the race against an in-process timer
                    debug!(knot_id = %knot.id, "Untying already completed elsewhere");
                }
                Err(e) => {
                    error!(knot_id = %knot.id, error = %e, "Untying resolution failed");
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::{
        DeliveryStatus, GiftDoc, GiftKind, KnotDoc, KnotState, PaymentStatus,
    };
    use crate::email::testing::RecordingEmailSender;
    use crate::email::EmailSender;
    use crate::logging::UsageLogger;

    fn scheduler(
        store: Arc<FulfillmentStore>,
        email: RecordingEmailSender,
    ) -> DeliveryScheduler {
        let sender: Arc<dyn EmailSender> = Arc::new(email);
        let dispatcher = Arc::new(GiftDispatcher::new(
            store.clone(),
            sender,
            UsageLogger::new("test".to_string()),
            "https://keepsake.example".to_string(),
        ));
        DeliveryScheduler::new(SchedulerConfig::default(), store, dispatcher)
    }

    fn scheduled_gift(offset_ms: i64) -> GiftDoc {
        let mut gift = GiftDoc::new(GiftKind::Song, "Ada".into(), "Grace".into());
        gift.recipient_email = Some("grace@example.com".to_string());
        gift.payment_status = PaymentStatus::Completed;
        gift.delivery_status = DeliveryStatus::Scheduled;
        gift.scheduled_date = Some(DateTime::from_millis(
            DateTime::now().timestamp_millis() + offset_ms,
        ));
        gift
    }

    #[tokio::test]
    async fn test_sweep_delivers_due_gift_once() {
        let store = Arc::new(FulfillmentStore::memory_only());
        let email = RecordingEmailSender::new();
        let gift = scheduled_gift(-60_000);
        store.insert_gift(gift.clone()).await.unwrap();

        let scheduler = scheduler(store.clone(), email.clone());
        scheduler.sweep(DateTime::now()).await.unwrap();

        let stored = store.gift(&gift.id).await.unwrap().unwrap();
        assert_eq!(stored.delivery_status, DeliveryStatus::Delivered);
        assert_eq!(email.sent_count().await, 1);

        // A second sweep finds nothing to do
        scheduler.sweep(DateTime::now()).await.unwrap();
        assert_eq!(email.sent_count().await, 1);
    }

    #[tokio::test]
    async fn test_sweep_leaves_future_gifts_alone() {
        let store = Arc::new(FulfillmentStore::memory_only());
        let email = RecordingEmailSender::new();
        let gift = scheduled_gift(3_600_000);
        store.insert_gift(gift.clone()).await.unwrap();

        scheduler(store.clone(), email.clone())
            .sweep(DateTime::now())
            .await
            .unwrap();

        let stored = store.gift(&gift.id).await.unwrap().unwrap();
        assert_eq!(stored.delivery_status, DeliveryStatus::Scheduled);
        assert_eq!(email.sent_count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_delivery_is_not_retried() {
        let store = Arc::new(FulfillmentStore::memory_only());
        let email = RecordingEmailSender::new();
        email.set_fail_next(true).await;
        let gift = scheduled_gift(-60_000);
        store.insert_gift(gift.clone()).await.unwrap();

        let scheduler = scheduler(store.clone(), email.clone());
        scheduler.sweep(DateTime::now()).await.unwrap();

        let stored = store.gift(&gift.id).await.unwrap().unwrap();
        assert_eq!(stored.delivery_status, DeliveryStatus::Failed);

        // Failed gifts fall out of the due query; no second attempt
        scheduler.sweep(DateTime::now()).await.unwrap();
        assert_eq!(email.sent_count().await, 0);
    }

    #[tokio::test]
    async fn test_sweep_resolves_overdue_untying() {
        let store = Arc::new(FulfillmentStore::memory_only());
        let email = RecordingEmailSender::new();

        let knot = KnotDoc::new("gift-1".to_string(), "surprise".to_string());
        let knot_id = knot.id.clone();
        store.insert_knot(knot).await.unwrap();
        let past = DateTime::from_millis(DateTime::now().timestamp_millis() - 10_000);
        assert!(store.begin_untying(&knot_id, past).await.unwrap());

        scheduler(store.clone(), email)
            .sweep(DateTime::now())
            .await
            .unwrap();

        let stored = store.knot(&knot_id).await.unwrap().unwrap();
        assert_eq!(stored.state, KnotState::Untied);
        assert!(stored.is_revealed);
    }
}
