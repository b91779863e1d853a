//! Inventory feeds: where they come from and how they are read

pub mod parser;
pub mod source;

pub use parser::{parse_feed, FeedRows};
pub use source::{source_for_location, FeedPayload, FeedSource};
