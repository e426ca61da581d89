//! Fusion core: weight resolution, weighted rank merge, and temporal grouping.

pub mod locality;
pub mod merge;
pub mod temporal;
pub mod types;
pub mod weights;

pub use locality::LocalityIndex;
pub use merge::merge_ranked;
pub use temporal::{GroupError, SlotLists, TemporalTuple, group_by_slice, group_temporal};
pub use types::{Method, MethodBucket, RankedList, ScoredId, WeightMap};
pub use weights::WeightTable;
