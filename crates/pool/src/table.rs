use std::{borrow::Borrow, collections::hash_map::Entry, hash::Hash, ops::Deref};

use ahash::{HashMap, HashMapExt};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TableType {
    /// holds at most `start-size` entries.
    Fixed,
    #[default]
    Expanding,
    /// grows like an expanding table and shrinks back towards `start-size`.
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub struct TableOptions {
    #[cfg_attr(feature = "serde", serde(default, rename = "type"))]
    pub kind: TableType,
    #[cfg_attr(feature = "serde", serde(default = "TableOptions::start_size"))]
    pub start_size: usize,
}

impl TableOptions {
    fn start_size() -> usize {
        17
    }
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            kind: TableType::Expanding,
            start_size: Self::start_size(),
        }
    }
}

/// The default HashMap is created without allocating capacity, the table
/// pre-allocates `start-size` entries and applies the resize policy on top
/// of it.
///
/// # Test
///
/// ```
/// use srtp_keydb_pool::*;
///
/// let mut table = Table::new(TableOptions {
///     kind: TableType::Fixed,
///     start_size: 1,
/// });
///
/// assert_eq!(table.insert_unique(1, "a"), Ok(None));
/// assert_eq!(table.insert_unique(1, "b"), Ok(Some(&"a")));
/// assert_eq!(table.insert_unique(2, "c"), Err(Error::Exhausted));
/// assert_eq!(table.get(&1), Some(&"a"));
/// ```
pub struct Table<K, V> {
    options: TableOptions,
    map: HashMap<K, V>,
}

impl<K, V> Default for Table<K, V> {
    fn default() -> Self {
        Self::new(TableOptions::default())
    }
}

impl<K, V> Deref for Table<K, V> {
    type Target = HashMap<K, V>;

    fn deref(&self) -> &Self::Target {
        &self.map
    }
}

impl<K, V> Table<K, V> {
    pub fn new(options: TableOptions) -> Self {
        Self {
            map: HashMap::with_capacity(options.start_size),
            options,
        }
    }

    pub fn options(&self) -> &TableOptions {
        &self.options
    }
}

impl<K, V> Table<K, V>
where
    K: Eq + Hash,
{
    /// Adds an entry unless the key is taken.
    ///
    /// Returns the entry already stored under the key instead of replacing
    /// it, `None` when the new entry went in.
    pub fn insert_unique(&mut self, key: K, value: V) -> Result<Option<&V>, Error> {
        let full = self.options.kind == TableType::Fixed && self.map.len() >= self.options.start_size;

        match self.map.entry(key) {
            Entry::Occupied(entry) => Ok(Some(&*entry.into_mut())),
            Entry::Vacant(_) if full => Err(Error::Exhausted),
            Entry::Vacant(entry) => {
                entry.insert(value);
                Ok(None)
            }
        }
    }

    /// # Test
    ///
    /// ```
    /// use srtp_keydb_pool::*;
    ///
    /// let mut table = Table::new(TableOptions {
    ///     kind: TableType::Dynamic,
    ///     start_size: 4,
    /// });
    ///
    /// for i in 0..64 {
    ///     table.insert_unique(i, i).unwrap();
    /// }
    ///
    /// for i in 0..64 {
    ///     assert_eq!(table.remove(&i), Some(i));
    /// }
    ///
    /// assert!(table.is_empty());
    /// assert!(table.capacity() < 64);
    /// ```
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let value = self.map.remove(key)?;

        if self.options.kind == TableType::Dynamic {
            let capacity = self.map.capacity();
            if capacity > self.options.start_size && self.map.len() * 4 < capacity {
                self.map
                    .shrink_to((self.map.len() * 2).max(self.options.start_size));
            }
        }

        Some(value)
    }
}
