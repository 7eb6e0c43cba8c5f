//! Reference tables used while decoding and encoding a single reference scope
use crate::amf3::length::Length;
use crate::errors::Error;
use crate::types::Value;
use std::collections::HashMap;
use std::hash::Hash;
use std::rc::Rc;

/// An ordered list of values that have been read in the current scope
#[derive(Clone, Debug)]
pub(crate) struct DecodeTable<T> {
    entries: Vec<T>,
}

impl<T> Default for DecodeTable<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T: Clone> DecodeTable<T> {
    /// Register a new entry, it gets the next free index
    #[inline]
    pub(crate) fn push(&mut self, val: T) {
        self.entries.push(val);
    }

    /// Retrieve the entry for a back-reference
    pub(crate) fn get(&self, index: usize) -> Result<T, Error> {
        self.entries
            .get(index)
            .cloned()
            .ok_or(Error::InvalidReference {
                index,
                len: self.entries.len(),
            })
    }
}

/// The object table of a decoding scope
///
/// A slot is reserved as soon as a complex value is entered and filled once it has been read
/// completely, so that children can refer back to their parents.
#[derive(Clone, Debug, Default)]
pub(crate) struct ObjectTable {
    slots: Vec<Option<Rc<Value>>>,
}

impl ObjectTable {
    /// Reserve the next slot for a value that is being read
    pub(crate) fn reserve(&mut self) -> usize {
        self.slots.push(None);
        self.slots.len() - 1
    }

    /// Fill a reserved slot, returning the shared value
    pub(crate) fn complete(&mut self, index: usize, value: Value) -> Rc<Value> {
        let value = Rc::new(value);
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = Some(Rc::clone(&value));
        }
        value
    }

    /// Resolve a back-reference
    ///
    /// A slot that is still being read can't be shared yet and resolves to `Value::Reference`
    pub(crate) fn resolve(&self, index: usize) -> Result<Rc<Value>, Error> {
        match self.slots.get(index) {
            Some(Some(value)) => Ok(Rc::clone(value)),
            Some(None) => Ok(Rc::new(Value::Reference(index as u32))),
            None => Err(Error::InvalidReference {
                index,
                len: self.slots.len(),
            }),
        }
    }
}

/// An identifier for a cacheable element, based on its address
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey(usize);

impl CacheKey {
    /// Create a `CacheKey` from a pointer representing an element to be serialized
    pub fn from_ptr<T: ?Sized>(p: *const T) -> Self {
        Self(p as *const () as usize)
    }

    /// Create a `CacheKey` for a shared value
    pub fn from_rc<T: ?Sized>(rc: &Rc<T>) -> Self {
        Self::from_ptr(Rc::as_ptr(rc))
    }
}

/// The object table of an encoding scope, keyed by value identity
///
/// Every entry remembers the type marker it was written with, so that raw `Value::Reference`s can be
/// written with the marker of their target.
#[derive(Clone, Debug, Default)]
pub(crate) struct IdentityTable {
    positions: HashMap<CacheKey, usize>,
    markers: Vec<u8>,
}

impl IdentityTable {
    #[inline]
    pub(crate) fn get(&self, key: CacheKey) -> Option<usize> {
        self.positions.get(&key).copied()
    }

    /// Register a value about to be written, returning its index
    pub(crate) fn insert(&mut self, key: CacheKey, marker: u8) -> usize {
        let index = self.markers.len();
        self.markers.push(marker);
        self.positions.insert(key, index);
        index
    }

    /// The marker the entry at `index` was written with
    pub(crate) fn marker(&self, index: usize) -> Result<u8, Error> {
        self.markers
            .get(index)
            .copied()
            .ok_or(Error::InvalidReference {
                index,
                len: self.markers.len(),
            })
    }
}

/// Abstraction over the Amf3 caching mechanism for values compared by equality (strings, traits)
#[derive(Clone, Debug)]
pub(crate) struct ElementCache<T> {
    cache: Vec<T>,
    positions: HashMap<T, usize>,
}

impl<T> Default for ElementCache<T> {
    fn default() -> Self {
        ElementCache {
            cache: Vec::new(),
            positions: HashMap::new(),
        }
    }
}

impl<T: Eq + Hash + Clone> ElementCache<T> {
    /// Check if the cache contains a given element
    #[inline]
    pub(crate) fn has(&self, val: &T) -> bool {
        self.positions.contains_key(val)
    }

    /// Add the given item to the cache, if the item already exists will do nothing
    pub(crate) fn store(&mut self, val: T) {
        if !self.has(&val) {
            self.positions.insert(val.clone(), self.cache.len());
            self.cache.push(val);
        }
    }

    /// Retrieve the index for the given value
    #[inline]
    pub(crate) fn get_index(&self, val: &T) -> Option<usize> {
        self.positions.get(val).copied()
    }

    /// Get a Length reference to an item in the cache
    /// If the item exists, will return a `Length::Reference` to the item
    /// If the item does not exist, will return the given size as `Length::Size`
    pub(crate) fn to_length(&self, val: &T, length: u32) -> Length {
        if let Some(i) = self.get_index(val) {
            Length::Reference(i)
        } else {
            Length::Size(length)
        }
    }

    /// See #to_length, except will store the given value via #store after retrieving the index
    pub(crate) fn to_length_store(&mut self, val: T, length: u32) -> Length {
        let len = self.to_length(&val, length);
        self.store(val);
        len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_slot_resolves_to_reference() {
        let mut table = ObjectTable::default();
        let index = table.reserve();
        assert_eq!(*table.resolve(index).unwrap(), Value::Reference(0));

        let value = table.complete(index, Value::Date(1.0));
        assert!(Rc::ptr_eq(&value, &table.resolve(index).unwrap()));
    }

    #[test]
    fn out_of_range_reference() {
        let table = ObjectTable::default();
        assert_eq!(
            table.resolve(3),
            Err(Error::InvalidReference { index: 3, len: 0 })
        );
    }

    #[test]
    fn element_cache_references_repeats() {
        let mut cache = ElementCache::<String>::default();
        assert_eq!(cache.to_length_store("a".into(), 1), Length::Size(1));
        assert_eq!(cache.to_length_store("b".into(), 1), Length::Size(1));
        assert_eq!(cache.to_length_store("a".into(), 1), Length::Reference(0));
        assert_eq!(cache.to_length_store("b".into(), 1), Length::Reference(1));
    }

    #[test]
    fn identity_table_keeps_markers() {
        let a = Rc::new(Value::Null);
        let b = Rc::new(Value::Null);
        let mut table = IdentityTable::default();
        assert_eq!(table.insert(CacheKey::from_rc(&a), 0x0a), 0);
        assert_eq!(table.get(CacheKey::from_rc(&a)), Some(0));
        assert_eq!(table.get(CacheKey::from_rc(&b)), None);
        assert_eq!(table.marker(0), Ok(0x0a));
    }
}
