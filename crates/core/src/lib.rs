//! kubemeta core types: resource tags, the cached object envelope and store events.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

mod error;
mod raw;
mod tags;

pub use error::{MetaError, MetaResult};
pub use raw::{LinkTarget, ObjectLink, RawObject};
pub use tags::{GroupVersionKind, LinkDest, LinkType, MetaTag, ResourceType};

/// Seconds since the Unix epoch.
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// The single cached envelope around a raw resource.
#[derive(Debug, Clone)]
pub struct ObjectWrapper {
    pub tag: MetaTag,
    pub raw: Arc<RawObject>,
    /// Preserved across updates of the same primary key.
    pub first_observed_time: i64,
    /// Refreshed on every observation, timer ticks included.
    pub last_observed_time: i64,
    /// Tombstone flag; cleared by a later Add/Update inside the grace window.
    pub deleted: bool,
}

impl ObjectWrapper {
    pub fn new(raw: impl Into<RawObject>) -> Self {
        Self::observed_at(raw, now_secs())
    }

    pub fn observed_at(raw: impl Into<RawObject>, ts: i64) -> Self {
        let raw = raw.into();
        Self { tag: raw.tag(), raw: Arc::new(raw), first_observed_time: ts, last_observed_time: ts, deleted: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Add,
    Update,
    Delete,
    DeferredDelete,
    Timer,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Add => "add",
            EventKind::Update => "update",
            EventKind::Delete => "delete",
            EventKind::DeferredDelete => "deferred_delete",
            EventKind::Timer => "timer",
        }
    }
}

/// Snapshot request for one subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerTick {
    pub subscriber_id: String,
    pub interval: Duration,
}

#[derive(Debug, Clone)]
pub enum EventPayload {
    Object(ObjectWrapper),
    Timer(TimerTick),
}

/// Event envelope threaded through a store's single consumer.
#[derive(Debug, Clone)]
pub struct K8sMetaEvent {
    pub kind: EventKind,
    pub payload: EventPayload,
}

impl K8sMetaEvent {
    pub fn object(kind: EventKind, obj: ObjectWrapper) -> Self {
        Self { kind, payload: EventPayload::Object(obj) }
    }

    pub fn add(obj: ObjectWrapper) -> Self { Self::object(EventKind::Add, obj) }
    pub fn update(obj: ObjectWrapper) -> Self { Self::object(EventKind::Update, obj) }
    pub fn delete(obj: ObjectWrapper) -> Self { Self::object(EventKind::Delete, obj) }

    pub fn timer(tick: TimerTick) -> Self {
        Self { kind: EventKind::Timer, payload: EventPayload::Timer(tick) }
    }

    pub fn as_object(&self) -> Option<&ObjectWrapper> {
        match &self.payload {
            EventPayload::Object(o) => Some(o),
            EventPayload::Timer(_) => None,
        }
    }
}

