//! kubemeta store: per-resource-type cache with secondary indexes, a deletion
//! grace window and subscriber fan-out.

#![forbid(unsafe_code)]

pub mod indexer;
mod set;
mod store;

pub use set::StoreSet;
pub use store::{MetaStore, SendFn, StoreConfig};
