//! Client-side synchronization of one user's pipeline with the shared store.

pub mod engine;
pub mod feed;
pub mod finder;
pub mod ordering;
pub mod quota;
pub mod state;
pub mod taxonomy;
pub mod view;

pub use engine::PipelineEngine;
pub use feed::{FeedOutcome, FeedSubscription};
pub use finder::FinderSession;
pub use quota::{ActionOutcome, QuotaGate};
pub use state::{LeadCommand, Mutation, PipelineState, TagChange};
pub use view::{BoardColumn, BoardView, ViewFilter};
