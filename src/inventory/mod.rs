//! Inventory domain: item records, lifecycle and carat classification

pub mod carat;
pub mod item;
pub mod lifecycle;

pub use carat::{CaratBand, CaratBands, OTHER_RANGE};
pub use item::{CandidateItem, FeedStatus, InventoryItem, Location, ITEM_SCHEMA_VERSION};
pub use lifecycle::{ItemState, LifecycleEvent};
