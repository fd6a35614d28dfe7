//! Abstract heap
//!
//! One heap per checker run. Records are inserted when a constructor starts
//! and afterwards only grow: updating a field joins into what is already known.

use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use super::value::{Address, ClassId, Value};

/// What is known about one abstract object
#[derive(Debug, Clone, Default)]
pub struct ObjectRecord {
    /// Assigned members keyed by declaring class, in assignment order
    fields: IndexMap<(ClassId, String), Value>,
    /// Outer `this` visible from each class in the object's hierarchy
    outers: FxHashMap<ClassId, Value>,
}

impl ObjectRecord {
    pub fn field(&self, owner: ClassId, name: &str) -> Option<&Value> {
        self.fields.get(&(owner, name.to_string()))
    }

    pub fn has_field(&self, owner: ClassId, name: &str) -> bool {
        self.fields.contains_key(&(owner, name.to_string()))
    }

    pub fn fields(&self) -> impl Iterator<Item = (ClassId, &str, &Value)> {
        self.fields
            .iter()
            .map(|((owner, name), value)| (*owner, name.as_str(), value))
    }

    pub fn outer(&self, class: ClassId) -> Option<&Value> {
        self.outers.get(&class)
    }
}

/// Address-indexed store of object records
#[derive(Debug, Default)]
pub struct Heap {
    objects: FxHashMap<Address, ObjectRecord>,
    /// Bumped whenever a stored field or outer value changes
    epoch: u64,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, addr: &Address) -> bool {
        self.objects.contains_key(addr)
    }

    pub fn get(&self, addr: &Address) -> Option<&ObjectRecord> {
        self.objects.get(addr)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Number of refinements so far; values read from the heap at an older
    /// epoch may be stale
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Insert an empty record; returns `false` if one already exists
    pub fn allocate(&mut self, addr: &Address) -> bool {
        if self.objects.contains_key(addr) {
            return false;
        }
        self.objects.insert(addr.clone(), ObjectRecord::default());
        true
    }

    /// Record `value` for `owner`'s member `field`, joining with any earlier
    /// value
    pub fn update_field(&mut self, addr: &Address, owner: ClassId, field: &str, value: Value) {
        let record = self.objects.entry(addr.clone()).or_default();
        let changed = match record.fields.get_mut(&(owner, field.to_string())) {
            Some(existing) => {
                let joined = existing.join(&value);
                let changed = joined != *existing;
                *existing = joined;
                changed
            }
            None => {
                record.fields.insert((owner, field.to_string()), value);
                true
            }
        };
        if changed {
            self.epoch += 1;
        }
    }

    pub fn set_outer(&mut self, addr: &Address, class: ClassId, outer: Value) {
        let record = self.objects.entry(addr.clone()).or_default();
        let joined = match record.outers.get(&class) {
            Some(existing) => existing.join(&outer),
            None => outer,
        };
        if record.outers.get(&class) != Some(&joined) {
            record.outers.insert(class, joined);
            self.epoch += 1;
        }
    }

    pub fn field(&self, addr: &Address, owner: ClassId, field: &str) -> Option<&Value> {
        self.objects.get(addr).and_then(|r| r.field(owner, field))
    }

    pub fn outer(&self, addr: &Address, class: ClassId) -> Option<&Value> {
        self.objects.get(addr).and_then(|r| r.outer(class))
    }
}
