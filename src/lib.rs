//! `markerstore`: a memory-mapped, append-only document storage engine.
//!
//! A collection is a directory of datafiles: an active journal plus zero or
//! more sealed datafiles, each holding a sequence of CRC-protected markers
//! ([`datafile`]). Document shape and attribute names are interned once,
//! process-wide, through the shape dictionary ([`shaper`]), so a stored
//! document's body need only reference a shape id rather than repeat its
//! field names. [`collection`] ties datafiles, the shaper, and a primary
//! hash index together into create/read/update/delete/truncate operations
//! with journal rotation, cap enforcement, and compaction (rolling
//! dead-marker-heavy sealed datafiles into a fresh one, either inline via
//! `Collection::compact` or off the write path via
//! `collection::CompactionScheduler`). [`skiplist`] is the probabilistic
//! ordered index a caller builds a secondary index on top of.
//! [`sequence`], [`resource`], and [`metrics`] are the ambient services
//! those modules share.

pub mod collection;
pub mod datafile;
pub mod error;
pub mod metrics;
pub mod resource;
pub mod sequence;
pub mod shaper;
pub mod skiplist;

pub use collection::{
    Barrier, BarrierGuard, CapConstraint, Collection, CollectionKind, CompactionConfig,
    CompactionOutcome, CompactionScheduler, CreateOutcome, DatafileStats, Figures, Mptr,
    OperationContext, Parameters, PrimaryIndex, UpdateOutcome, UpdatePolicy,
};
pub use datafile::{Datafile, DatafileState, MarkerType, Reservation};
pub use error::{ErrorPosture, Result, StorageError};
pub use metrics::{Metrics, MetricsSnapshot, OperationKind};
pub use resource::{ResourceManager, SystemResources, TuningProfile};
pub use sequence::SequenceGenerator;
pub use shaper::Shaper;
pub use skiplist::{Comparator, HeightSampler, KeyComparison, Multi, NodeHandle, Probability, SkipList, Unique};
