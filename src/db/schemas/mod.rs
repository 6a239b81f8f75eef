//! Database schemas for Keepsake
//!
//! Defines MongoDB document structures for the fulfillment ledger
//! (gifts, orders, payments) and the sealed-knot reveal artifact.

mod gift;
mod knot;
mod metadata;
mod order;
mod payment;

pub use gift::{
    DeliveryMethod, DeliveryStatus, GiftContent, GiftDoc, GiftKind, ImageCandidate, PaymentStatus,
    GIFT_COLLECTION,
};
pub use knot::{
    generate_access_token, KnotAction, KnotDoc, KnotInteraction, KnotState, KNOT_COLLECTION,
};
pub use metadata::Metadata;
pub use order::{OrderDoc, ORDER_COLLECTION};
pub use payment::{Buyer, PaymentDoc, PAYMENT_COLLECTION};
