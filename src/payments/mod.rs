//! Payment processor boundary: hosted checkout and webhook decoding

pub mod checkout;
pub mod webhook;

pub use checkout::{
    CheckoutClient, CheckoutConfig, CheckoutRequest, CheckoutSession, HttpCheckoutClient,
};
pub use webhook::{
    parse_event, sign_body, CheckoutMetadata, WebhookEvent, WebhookEventType,
    SIGNATURE_TOLERANCE_SECS,
};
