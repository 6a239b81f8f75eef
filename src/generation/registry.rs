//! Provider routing by gift kind
//!
//! Each kind maps to a primary provider and an optional fallback the
//! poller degrades to when the primary is rate limited or unavailable.
//! The fallback always produces a simpler artifact (narration instead of
//! a song, plain text instead of a rendered piece), never a retry of the
//! same job.

use std::collections::HashMap;
use std::sync::Arc;

use crate::db::schemas::GiftKind;
use crate::generation::provider::ContentProvider;

/// A kind's provider pair
#[derive(Clone)]
pub struct ProviderPair {
    pub primary: Arc<dyn ContentProvider>,
    pub fallback: Option<Arc<dyn ContentProvider>>,
}

/// Kind -> provider routing table
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    entries: HashMap<GiftKind, ProviderPair>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        kind: GiftKind,
        primary: Arc<dyn ContentProvider>,
        fallback: Option<Arc<dyn ContentProvider>>,
    ) {
        self.entries.insert(kind, ProviderPair { primary, fallback });
    }

    pub fn get(&self, kind: GiftKind) -> Option<&ProviderPair> {
        self.entries.get(&kind)
    }
}
