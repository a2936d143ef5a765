//! Tool selector and context compactor (spec.md §4.4).

pub mod compactor;
pub mod selector;

pub use compactor::{CompactionOutcome, Compactor};
pub use selector::{select_tools, ModelTier};
