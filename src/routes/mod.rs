//! HTTP route handlers

mod gifts;
mod health;
mod knots;
mod webhook;

pub use gifts::handle_create_gift;
pub use health::health_check;
pub use knots::{handle_open, handle_opened, handle_reseal, handle_view};
pub use webhook::{handle_payment_webhook, SIGNATURE_HEADER};
