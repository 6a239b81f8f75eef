//! Content generation: provider boundary and job polling

pub mod poller;
pub mod provider;
pub mod registry;

pub use poller::{CommissionResult, JobPoller, PollerConfig, MAX_WALL_CLOCK};
pub use registry::{ProviderPair, ProviderRegistry};
pub use provider::{
    ContentProvider, GenerationRequest, HttpContentProvider, JobStatus, JobSubmission,
    PollProfile, ProviderConfig, ProviderError, ProviderErrorKind,
};
