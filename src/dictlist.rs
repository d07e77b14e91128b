use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Error)]
#[error("duplicate id {0:?}")]
pub struct DuplicateId(pub String);

/// Something that can live in a [`DictList`].
pub trait HasId {
    fn id(&self) -> &str;
}

/// An ordered collection with the O(1) lookup of a map.
///
/// Iteration yields entries in insertion order. Two entries with the same
/// id are rejected at insertion time.
#[derive(Debug)]
pub struct DictList<T> {
    items: Vec<T>,
    index: HashMap<String, usize>,
}

impl<T> Default for DictList<T> {
    fn default() -> DictList<T> {
        DictList {
            items: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T: HasId> DictList<T> {
    pub fn new() -> DictList<T> {
        DictList::default()
    }

    pub fn insert(&mut self, item: T) -> Result<(), DuplicateId> {
        let id = item.id().to_string();
        if self.index.contains_key(&id) {
            return Err(DuplicateId(id));
        }
        self.index.insert(id, self.items.len());
        self.items.push(item);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.index.get(id).map(|&k| &self.items[k])
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut T> {
        let k = *self.index.get(id)?;
        Some(&mut self.items[k])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|i| i.id())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.items.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<'a, T> IntoIterator for &'a DictList<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Entry {
        id: String,
        value: u32,
    }

    impl HasId for Entry {
        fn id(&self) -> &str {
            &self.id
        }
    }

    fn entry(id: &str, value: u32) -> Entry {
        Entry {
            id: id.into(),
            value,
        }
    }

    #[test]
    fn lookup_and_order() {
        let mut list = DictList::new();
        list.insert(entry("ph_0", 1)).unwrap();
        list.insert(entry("do_0", 2)).unwrap();
        list.insert(entry("pump_0", 3)).unwrap();

        assert_eq!(list.get("do_0").unwrap().value, 2);
        let order: Vec<_> = list.iter().map(|e| e.id.clone()).collect();
        assert_eq!(order, ["ph_0", "do_0", "pump_0"]);
    }

    #[test]
    fn duplicate_id_rejected() {
        let mut list = DictList::new();
        list.insert(entry("ph_0", 1)).unwrap();
        assert!(list.insert(entry("ph_0", 9)).is_err());
        assert_eq!(list.len(), 1);
        assert_eq!(list.get("ph_0").unwrap().value, 1);
    }
}
