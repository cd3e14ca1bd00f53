//! Concurrency-safe entity stores with sequential internal ids.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

macro_rules! internal_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u64);

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

internal_id!(
    /// Internal id of a simulated user.
    UserId, "U"
);
internal_id!(
    /// Internal id of a simulated chair.
    ChairId, "C"
);
internal_id!(
    /// Internal id of a simulated owner.
    OwnerId, "O"
);
internal_id!(
    /// Internal id of a ride request.
    RequestId, "R"
);

/// Keyed store that hands out ids `1, 2, 3, ...` in creation order.
pub struct Registry<K, V> {
    last_id: AtomicU64,
    entries: RwLock<BTreeMap<K, Arc<V>>>,
}

impl<K, V> Default for Registry<K, V> {
    fn default() -> Self {
        Self {
            last_id: AtomicU64::new(0),
            entries: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<K: Copy + Ord + From<u64>, V> Registry<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the next id, builds the entity with it and stores it.
    pub fn create(&self, build: impl FnOnce(K) -> V) -> Arc<V> {
        let id = K::from(self.last_id.fetch_add(1, Ordering::AcqRel) + 1);
        let entity = Arc::new(build(id));
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::clone(&entity));
        entity
    }

    pub fn get(&self, id: K) -> Option<Arc<V>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// All entities in id order.
    pub fn values(&self) -> Vec<Arc<V>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
