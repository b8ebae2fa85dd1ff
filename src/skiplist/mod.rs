//! The probabilistic secondary index, ported from the
//! original engine's doubly-linked skip list into a single generic,
//! arena-based structure.

pub mod comparator;
pub mod height;
pub mod list;

pub use comparator::{Comparator, KeyComparison};
pub use height::{HeightSampler, Probability};
pub use list::{Multi, NodeHandle, SkipList, SkipListIter, Unique, Uniqueness, DEFAULT_MAX_HEIGHT};
