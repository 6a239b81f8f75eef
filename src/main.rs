//! Keepsake - fulfillment service for personalized digital gifts

use clap::Parser;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keepsake::{
    config::Args,
    db::schemas::GiftKind,
    db::MongoClient,
    delivery::GiftDispatcher,
    email::{EmailConfig, EmailSender, HttpEmailSender},
    generation::{
        ContentProvider, HttpContentProvider, JobPoller, PollProfile, PollerConfig,
        ProviderConfig, ProviderRegistry,
    },
    intake::OrderIntake,
    knot::KnotService,
    logging::UsageLogger,
    payments::{CheckoutClient, CheckoutConfig, HttpCheckoutClient},
    reconcile::ReconcileEngine,
    scheduler::{DeliveryScheduler, SchedulerConfig},
    server::{self, AppState},
    store::FulfillmentStore,
    types::KeepsakeError,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("keepsake={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Validate configuration
    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    // Print startup banner
    info!("======================================");
    info!("  Keepsake - gift fulfillment service");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!(
        "Mode: {}",
        if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" }
    );
    info!("MongoDB: {}", args.mongodb_uri);
    info!("Public URL: {}", args.public_url);
    info!("Scheduler interval: {}s", args.scheduler_interval_secs);
    info!("======================================");

    // Connect to MongoDB (optional in dev mode)
    let (store, store_kind) = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(client) => {
            info!("MongoDB connected successfully");
            (FulfillmentStore::new(&client).await?, "mongodb")
        }
        Err(e) => {
            if args.dev_mode {
                warn!(
                    "MongoDB connection failed (dev mode, continuing memory-only): {}",
                    e
                );
                (FulfillmentStore::memory_only(), "memory")
            } else {
                error!("MongoDB connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };
    let store = Arc::new(store);

    // Usage telemetry (disabled without a path)
    let usage = UsageLogger::new(args.node_id.to_string());
    if let Some(ref path) = args.usage_log_path {
        if let Err(e) = usage.init_file(path.into()).await {
            warn!("Usage log init failed, telemetry disabled: {}", e);
        }
    }

    // Email collaborator
    let email: Arc<dyn EmailSender> = Arc::new(HttpEmailSender::new(EmailConfig {
        api_url: args.email_api_url.clone(),
        api_key: args.email_api_key.clone().unwrap_or_default(),
        from: args.email_from.clone(),
        timeout: std::time::Duration::from_millis(args.request_timeout_ms),
    })?);

    // Dispatch and reconciliation
    let dispatcher = Arc::new(GiftDispatcher::new(
        store.clone(),
        email.clone(),
        usage.clone(),
        args.public_url.clone(),
    ));
    let engine = Arc::new(ReconcileEngine::new(
        store.clone(),
        email.clone(),
        dispatcher.clone(),
        usage.clone(),
    ));

    // Content generation: one provider client per kind family, routed by
    // the registry, driven by the poller
    let poller = JobPoller::new(
        PollerConfig {
            wall_clock_ceiling: std::time::Duration::from_secs(args.generation_ceiling_secs),
            ..PollerConfig::default()
        },
        usage.clone(),
    );
    let providers = build_provider_registry(&args)?;

    // Payment processor
    let checkout: Arc<dyn CheckoutClient> = Arc::new(HttpCheckoutClient::new(CheckoutConfig {
        api_url: args.payment_api_url.clone(),
        api_key: args.payment_api_key.clone().unwrap_or_default(),
        timeout: std::time::Duration::from_millis(args.request_timeout_ms),
    })?);

    // Order intake
    let intake = Arc::new(OrderIntake::new(
        store.clone(),
        checkout,
        poller,
        providers,
    ));

    // Knot reveal service
    let knots = Arc::new(KnotService::new(store.clone()));

    // Delivery scheduler: exactly one per deployment
    let scheduler = Arc::new(DeliveryScheduler::new(
        SchedulerConfig {
            interval: std::time::Duration::from_secs(args.scheduler_interval_secs),
        },
        store.clone(),
        dispatcher.clone(),
    ));
    let _scheduler_handle = scheduler.start();

    let state = Arc::new(AppState {
        args,
        store,
        engine,
        intake,
        knots,
        usage,
        store_kind,
        started_at: Instant::now(),
    });

    server::run(state).await?;

    Ok(())
}

/// Build the per-kind provider routing table. All kind families share the
/// configured generation API; they differ in name (telemetry, job routing)
/// and polling cadence. Song and spoken-message jobs degrade to narration
/// or plain text when their primary is saturated.
fn build_provider_registry(args: &Args) -> Result<ProviderRegistry, KeepsakeError> {
    let timeout = std::time::Duration::from_millis(args.request_timeout_ms);
    let api_key = args.provider_api_key.clone().unwrap_or_default();

    let provider = |name: &str, initial_secs: u64, max_secs: u64| -> Result<
        Arc<dyn ContentProvider>,
        KeepsakeError,
    > {
        let client = HttpContentProvider::new(ProviderConfig {
            name: name.to_string(),
            api_url: format!("{}/{}", args.provider_api_url.trim_end_matches('/'), name),
            api_key: api_key.clone(),
            timeout,
            poll_profile: PollProfile {
                initial_delay: std::time::Duration::from_secs(initial_secs),
                max_delay: std::time::Duration::from_secs(max_secs),
            },
        })
        .map_err(|e| KeepsakeError::Provider(e.to_string()))?;
        Ok(Arc::new(client))
    };

    let textgen = provider("textgen", 5, 15)?;
    let voicegen = provider("voicegen", 8, 20)?;
    let songgen = provider("songgen", 15, 30)?;
    let imagegen = provider("imagegen", 10, 25)?;
    let videogen = provider("videogen", 15, 30)?;

    let mut registry = ProviderRegistry::new();
    registry.register(GiftKind::TextLetter, textgen.clone(), None);
    registry.register(GiftKind::SpokenMessage, voicegen.clone(), Some(textgen.clone()));
    registry.register(GiftKind::Song, songgen, Some(voicegen));
    registry.register(GiftKind::StillImage, imagegen, None);
    registry.register(GiftKind::ShortVideo, videogen, None);
    registry.register(GiftKind::Combination, textgen, None);

    Ok(registry)
}
