#![forbid(unsafe_code)]

//! Notification records and their per-name cache.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use ahash::AHashMap;

use crate::sync::{read, write};

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a notifying object; the sender of every record it raises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(u64);

impl ObjectId {
    pub(crate) fn next() -> Self {
        Self(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj#{}", self.0)
    }
}

/// Immutable `{sender, property_name}` record describing a property change.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyChange {
    sender: ObjectId,
    property_name: Arc<str>,
}

impl PropertyChange {
    #[must_use]
    pub fn new(sender: ObjectId, property_name: impl Into<Arc<str>>) -> Self {
        Self {
            sender,
            property_name: property_name.into(),
        }
    }

    #[must_use]
    pub fn sender(&self) -> ObjectId {
        self.sender
    }

    #[must_use]
    pub fn property_name(&self) -> &str {
        &self.property_name
    }

    pub(crate) fn name_arc(&self) -> &Arc<str> {
        &self.property_name
    }
}

impl fmt::Display for PropertyChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.sender, self.property_name)
    }
}

/// Memoizes one record per property name.
///
/// Two racing first lookups may both build a candidate; only the one that
/// lands in the map is ever handed out.
pub(crate) struct RecordCache {
    sender: ObjectId,
    records: RwLock<AHashMap<Arc<str>, Arc<PropertyChange>>>,
}

impl RecordCache {
    pub(crate) fn new(sender: ObjectId) -> Self {
        Self {
            sender,
            records: RwLock::new(AHashMap::new()),
        }
    }

    pub(crate) fn get_or_insert(&self, property_name: &str) -> Arc<PropertyChange> {
        if let Some(record) = read(&self.records).get(property_name) {
            return Arc::clone(record);
        }
        let candidate = Arc::new(PropertyChange::new(self.sender, property_name));
        let mut records = write(&self.records);
        let retained = records
            .entry(Arc::clone(candidate.name_arc()))
            .or_insert(candidate);
        Arc::clone(retained)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        read(&self.records).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn same_name_reuses_instance() {
        let cache = RecordCache::new(ObjectId::next());
        let a = cache.get_or_insert("Count");
        let b = cache.get_or_insert("Count");
        assert!(Arc::ptr_eq(&a, &b));
        let c = cache.get_or_insert("Name");
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn record_carries_sender_and_name() {
        let id = ObjectId::next();
        let cache = RecordCache::new(id);
        let record = cache.get_or_insert("Title");
        assert_eq!(record.sender(), id);
        assert_eq!(record.property_name(), "Title");
        assert_eq!(record.to_string(), format!("obj#{}.Title", id.get()));
    }

    #[test]
    fn object_ids_are_unique() {
        let a = ObjectId::next();
        let b = ObjectId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn concurrent_first_lookups_converge() {
        let cache = Arc::new(RecordCache::new(ObjectId::next()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || cache.get_or_insert("Shared"))
            })
            .collect();
        let records: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let retained = cache.get_or_insert("Shared");
        for record in &records {
            assert!(Arc::ptr_eq(record, &retained));
        }
        assert_eq!(cache.len(), 1);
    }
}
