//! kubemeta lookup: resolve data-path identifiers to pod metadata.
//!
//! [`LookupService`] reads the pod, service and workload stores directly; the
//! axum router in [`http`] exposes it to local agents.

#![forbid(unsafe_code)]

pub mod http;
mod service;

pub use http::{build_router, port_from_env, serve, serve_on, PORT_ENV};
pub use service::{LookupService, PodMetadata};
