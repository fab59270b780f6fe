//! Case-insensitive request properties

use ahash::AHashMap;

/// String-keyed map whose keys are stored lowercased
#[derive(Debug, Clone)]
pub struct PropertyBag<T> {
    entries: AHashMap<String, T>,
}

impl<T> Default for PropertyBag<T> {
    fn default() -> Self {
        PropertyBag {
            entries: AHashMap::new(),
        }
    }
}

impl<T> PropertyBag<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, replacing any entry with the same key in any case
    pub fn insert(&mut self, key: &str, value: T) -> Option<T> {
        self.entries.insert(key.to_lowercase(), value)
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.entries.get(&key.to_lowercase())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_lowercase())
    }

    pub fn remove(&mut self, key: &str) -> Option<T> {
        self.entries.remove(&key.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries with their lowercased keys, in no particular order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: AsRef<str>, T> FromIterator<(K, T)> for PropertyBag<T> {
    fn from_iter<I: IntoIterator<Item = (K, T)>>(iter: I) -> Self {
        let mut bag = PropertyBag::new();
        for (key, value) in iter {
            bag.insert(key.as_ref(), value);
        }
        bag
    }
}
