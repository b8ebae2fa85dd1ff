//! The primary collection: barriers, the primary
//! hash index, `parameter.json`, and the collection itself.

pub mod barrier;
pub mod collection;
pub mod compactor;
pub mod parameter;
pub mod primary_index;
pub mod scheduler;

pub use barrier::{Barrier, BarrierGuard};
pub use collection::{
    Collection, CreateOutcome, DatafileStats, Figures, OperationContext, UpdateOutcome, UpdatePolicy,
};
pub use compactor::{CompactionConfig, CompactionOutcome};
pub use parameter::{CapConstraint, CollectionKind, Parameters};
pub use primary_index::{Mptr, PrimaryIndex};
pub use scheduler::CompactionScheduler;
