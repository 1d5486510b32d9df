//! Data models for the lead pipeline.
//!
//! Wire names are camelCase so the board client can consume them directly.

mod change;
mod finder;
mod lead;
mod meta;
mod owner;
mod quota;
mod tag;

pub use change::*;
pub use finder::*;
pub use lead::*;
pub use meta::*;
pub use owner::*;
pub use quota::*;
pub use tag::*;
