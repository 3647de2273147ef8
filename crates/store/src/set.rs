use std::sync::Arc;

use kubemeta_core::ResourceType;
use rustc_hash::FxHashMap;

use crate::MetaStore;

/// Read-only registry of the stores a manager owns, cheap to clone.
#[derive(Clone, Default)]
pub struct StoreSet {
    stores: Arc<FxHashMap<ResourceType, Arc<MetaStore>>>,
}

impl StoreSet {
    pub fn new(stores: impl IntoIterator<Item = Arc<MetaStore>>) -> Self {
        let map = stores.into_iter().map(|s| (s.resource(), s)).collect();
        Self { stores: Arc::new(map) }
    }

    pub fn get(&self, rt: ResourceType) -> Option<&Arc<MetaStore>> {
        self.stores.get(&rt)
    }

    /// Enabled resource types in declaration order.
    pub fn resources(&self) -> Vec<ResourceType> {
        let mut out: Vec<_> = self.stores.keys().copied().collect();
        out.sort();
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<MetaStore>> {
        self.stores.values()
    }
}
