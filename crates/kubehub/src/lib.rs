//! kubemeta kubehub: informers, preprocessing and the meta manager that owns the stores.

#![forbid(unsafe_code)]

mod client;
mod informer;
mod manager;
mod preprocess;

pub use client::build_client;
pub use informer::{resync_period, EventHandler, Informer, KnownKeys};
pub use manager::{ManagerSettings, MetaManager};
pub use preprocess::{preprocess, LAST_APPLIED_ANNOTATION};
