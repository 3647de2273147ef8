//! kubemeta collectors: translate store events into entity and entity-link records.
//!
//! A collector registers with the meta manager for the resource types and link
//! variants its [`CollectorConfig`] enables. Records are buffered and handed to an
//! [`OutputCollector`] in batches of [`FLUSH_BATCH`] or every [`FLUSH_INTERVAL`].

#![forbid(unsafe_code)]

mod collector;
pub mod config;
pub mod output;
pub mod process;

pub use collector::{MetaCollector, FLUSH_BATCH, FLUSH_INTERVAL};
pub use config::{validate_all, CollectorConfig, DEFAULT_DOMAIN};
pub use output::{container_entity_id, entity_id, JsonLinesOutput, OutputCollector, Record, CATEGORY_ENTITY, CATEGORY_ENTITY_LINK};
