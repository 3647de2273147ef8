//! Flat output records and the collector they are handed to.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::warn;

pub const CATEGORY_ENTITY: &str = "entity";
pub const CATEGORY_ENTITY_LINK: &str = "entity_link";

/// A flat key-value record as consumed by the agent's log pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Record(BTreeMap<String, String>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn category(&self) -> &str {
        self.get("__category__").unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Downstream sink. Back-pressure, if any, is the implementation's concern.
pub trait OutputCollector: Send + Sync {
    fn add_raw_log(&self, record: Record);
}

/// Writes one JSON object per line.
pub struct JsonLinesOutput<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesOutput<W> {
    pub fn new(out: W) -> Self {
        Self { out: Mutex::new(out) }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl JsonLinesOutput<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> OutputCollector for JsonLinesOutput<W> {
    fn add_raw_log(&self, record: Record) {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        let res = serde_json::to_writer(&mut *out, &record).map_err(std::io::Error::from).and_then(|_| out.write_all(b"\n"));
        if let Err(e) = res {
            warn!(error = %e, "failed to write record");
        }
    }
}

/// Stable 128-bit hex id of an entity: sha256 over cluster, namespace and name.
pub fn entity_id(cluster_id: &str, namespace: &str, name: &str) -> String {
    hashed_id(&[cluster_id, namespace, name])
}

/// Id of a container entity, keyed by its pod and container name.
pub fn container_entity_id(cluster_id: &str, namespace: &str, pod: &str, container: &str) -> String {
    hashed_id(&[cluster_id, namespace, pod, container])
}

// Each field is length-prefixed so adjacent fields cannot run together.
fn hashed_id(fields: &[&str]) -> String {
    let mut h = Sha256::new();
    for f in fields {
        h.update((f.len() as u64).to_be_bytes());
        h.update(f.as_bytes());
    }
    hex::encode(&h.finalize()[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_is_stable_and_128_bit() {
        let a = entity_id("c1", "default", "p1");
        assert_eq!(a.len(), 32);
        assert_eq!(a, entity_id("c1", "default", "p1"));
        assert_ne!(a, entity_id("c2", "default", "p1"));
        assert_ne!(a, entity_id("c1", "default", "p2"));
    }

    #[test]
    fn entity_id_keeps_field_boundaries() {
        assert_ne!(entity_id("cluster-1", "app1", "web"), entity_id("cluster-1", "app", "1web"));
        assert_ne!(entity_id("c", "", "ns"), entity_id("c", "ns", ""));
        assert_ne!(
            container_entity_id("c", "default", "web/a", "b"),
            container_entity_id("c", "default", "web", "a/b")
        );
    }

    #[test]
    fn json_lines_writes_one_object_per_record() {
        let out = JsonLinesOutput::new(Vec::new());
        let mut r = Record::new();
        r.insert("__category__", CATEGORY_ENTITY);
        r.insert("name", "p1");
        out.add_raw_log(r.clone());
        out.add_raw_log(r);
        let text = String::from_utf8(out.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], r#"{"__category__":"entity","name":"p1"}"#);
    }
}
