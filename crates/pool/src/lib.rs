pub mod table;

pub use self::table::{Table, TableOptions, TableType};

use std::{
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
    ops::{Index, IndexMut},
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The pool or table reached its configured limit.
    Exhausted,
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Exhausted => write!(f, "no free slot left"),
        }
    }
}

/// Growth policy of a pool or table.
///
/// Fixed pools never grow, expanding pools grow page by page and never give
/// memory back, dynamic pools grow the same way and release trailing pages
/// again when enough objects are free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum PoolType {
    Fixed,
    #[default]
    Expanding,
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub struct PoolOptions {
    #[cfg_attr(feature = "serde", serde(default, rename = "type"))]
    pub kind: PoolType,
    ///
    /// Number of objects added each time the pool grows.
    ///
    #[cfg_attr(feature = "serde", serde(default = "PoolOptions::page_items"))]
    pub page_items: usize,
    ///
    /// The number of objects will never exceed this value (0 = no max).
    ///
    #[cfg_attr(feature = "serde", serde(default))]
    pub max_items: usize,
    ///
    /// The number of objects will never go below this value.
    ///
    #[cfg_attr(feature = "serde", serde(default))]
    pub min_items: usize,
    ///
    /// Minimum number of free objects per 100, dynamic pools only.
    ///
    #[cfg_attr(feature = "serde", serde(default))]
    pub free_level: usize,
}

impl PoolOptions {
    fn page_items() -> usize {
        10
    }

    pub fn with_page_items(page_items: usize) -> Self {
        Self {
            page_items,
            ..Default::default()
        }
    }

    pub fn fixed(max_items: usize) -> Self {
        Self {
            kind: PoolType::Fixed,
            page_items: max_items,
            max_items,
            min_items: 0,
            free_level: 0,
        }
    }
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            kind: PoolType::Expanding,
            page_items: Self::page_items(),
            max_items: 0,
            min_items: 0,
            free_level: 0,
        }
    }
}

/// Stamped reference to an object living in an [`ObjectPool`].
///
/// Every allocation carries a new stamp, so a handle that outlived its
/// object never resolves to whatever reuses the slot.
pub struct Handle<T> {
    index: u32,
    stamp: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    fn new(index: u32, stamp: u64) -> Self {
        Self {
            index,
            stamp,
            _marker: PhantomData,
        }
    }

    pub fn index(&self) -> usize {
        self.index as usize
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.stamp == other.stamp
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.stamp.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Handle({}v{})", self.index, self.stamp)
    }
}

enum Slot<T> {
    Vacant,
    Occupied { stamp: u64, value: T },
}

/// Object pool
///
/// Objects are kept in pages of `page_items` slots. Allocation never blocks:
/// when no slot is free and the pool is not allowed to grow any more the
/// allocation fails with [`Error::Exhausted`].
///
/// # Test
///
/// ```
/// use srtp_keydb_pool::*;
///
/// let mut pool = ObjectPool::new(PoolOptions::fixed(2));
///
/// let a = pool.alloc("a").unwrap();
/// let b = pool.alloc("b").unwrap();
///
/// assert_eq!(pool.alloc("c"), Err(Error::Exhausted));
/// assert_eq!(pool[a], "a");
/// assert_eq!(pool.release(b), Some("b"));
/// assert_eq!(pool.get(b), None);
/// assert!(pool.alloc("c").is_ok());
/// ```
pub struct ObjectPool<T> {
    options: PoolOptions,
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    allocated: usize,
    stamp: u64,
}

impl<T> Default for ObjectPool<T> {
    fn default() -> Self {
        Self::new(PoolOptions::default())
    }
}

impl<T> ObjectPool<T> {
    pub fn new(mut options: PoolOptions) -> Self {
        options.page_items = options.page_items.max(1);
        options.free_level = options.free_level.min(100);

        let mut pool = Self {
            slots: Vec::new(),
            free: Vec::new(),
            allocated: 0,
            stamp: 0,
            options,
        };

        let initial = match options.kind {
            PoolType::Fixed if options.max_items > 0 => options.max_items,
            PoolType::Fixed => options.page_items.max(options.min_items),
            _ => pool.floor(),
        };

        pool.extend_to(initial);
        pool
    }

    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    /// number of live objects.
    ///
    /// # Test
    ///
    /// ```
    /// use srtp_keydb_pool::*;
    ///
    /// let mut pool = ObjectPool::default();
    ///
    /// assert!(pool.is_empty());
    /// pool.alloc(1u8).unwrap();
    /// assert_eq!(pool.len(), 1);
    /// ```
    pub fn len(&self) -> usize {
        self.allocated
    }

    pub fn is_empty(&self) -> bool {
        self.allocated == 0
    }

    /// number of slots currently backed by memory.
    ///
    /// # Test
    ///
    /// ```
    /// use srtp_keydb_pool::*;
    ///
    /// let mut pool = ObjectPool::new(PoolOptions::with_page_items(4));
    ///
    /// assert_eq!(pool.capacity(), 0);
    /// pool.alloc(()).unwrap();
    /// assert_eq!(pool.capacity(), 4);
    /// ```
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn alloc(&mut self, value: T) -> Result<Handle<T>, Error> {
        if self.free.is_empty() {
            self.grow()?;
        }

        let index = self.free.pop().ok_or(Error::Exhausted)?;
        self.stamp += 1;
        self.allocated += 1;
        self.slots[index as usize] = Slot::Occupied {
            stamp: self.stamp,
            value,
        };

        Ok(Handle::new(index, self.stamp))
    }

    /// Returns the object to the pool, handing back its value.
    ///
    /// Releasing a stale handle does nothing.
    pub fn release(&mut self, handle: Handle<T>) -> Option<T> {
        let slot = self.slots.get_mut(handle.index())?;
        if !matches!(slot, Slot::Occupied { stamp, .. } if *stamp == handle.stamp) {
            return None;
        }

        let Slot::Occupied { value, .. } = std::mem::replace(slot, Slot::Vacant) else {
            return None;
        };

        self.free.push(handle.index);
        self.allocated -= 1;

        if self.options.kind == PoolType::Dynamic {
            self.shrink();
        }

        Some(value)
    }

    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        match self.slots.get(handle.index())? {
            Slot::Occupied { stamp, value } if *stamp == handle.stamp => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        match self.slots.get_mut(handle.index())? {
            Slot::Occupied { stamp, value } if *stamp == handle.stamp => Some(value),
            _ => None,
        }
    }

    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.get(handle).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied { stamp, value } => Some((Handle::new(index as u32, *stamp), value)),
                Slot::Vacant => None,
            })
    }

    pub fn handles(&self) -> Vec<Handle<T>> {
        self.iter().map(|(handle, _)| handle).collect()
    }

    /// smallest capacity the pool keeps, rounded up to whole pages.
    fn floor(&self) -> usize {
        self.options.min_items.div_ceil(self.options.page_items) * self.options.page_items
    }

    fn grow(&mut self) -> Result<(), Error> {
        if self.options.kind == PoolType::Fixed {
            return Err(Error::Exhausted);
        }

        let mut target = self.slots.len() + self.options.page_items;
        if self.options.max_items > 0 {
            target = target.min(self.options.max_items);
        }

        if target <= self.slots.len() {
            return Err(Error::Exhausted);
        }

        self.extend_to(target);
        Ok(())
    }

    fn extend_to(&mut self, target: usize) {
        let start = self.slots.len();
        if target <= start {
            return;
        }

        self.slots.resize_with(target, || Slot::Vacant);

        // lowest index is handed out first
        self.free.extend((start..target).rev().map(|index| index as u32));
    }

    fn shrink(&mut self) {
        let floor = self.floor();
        let page_items = self.options.page_items;

        loop {
            let len = self.slots.len();
            if len <= floor {
                break;
            }

            let start = ((len - 1) / page_items) * page_items;
            if start < floor {
                break;
            }

            if self.slots[start..]
                .iter()
                .any(|slot| matches!(slot, Slot::Occupied { .. }))
            {
                break;
            }

            let free_after = start - self.allocated;
            if start > 0 && free_after * 100 < self.options.free_level * start {
                break;
            }

            self.slots.truncate(start);
            self.free.retain(|index| (*index as usize) < start);
        }
    }
}

impl<T> Index<Handle<T>> for ObjectPool<T> {
    type Output = T;

    fn index(&self, handle: Handle<T>) -> &Self::Output {
        match self.get(handle) {
            Some(value) => value,
            None => panic!("stale pool handle {:?}", handle),
        }
    }
}

impl<T> IndexMut<Handle<T>> for ObjectPool<T> {
    fn index_mut(&mut self, handle: Handle<T>) -> &mut Self::Output {
        match self.get_mut(handle) {
            Some(value) => value,
            None => panic!("stale pool handle {:?}", handle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_pool_gives_pages_back() {
        let mut pool = ObjectPool::new(PoolOptions {
            kind: PoolType::Dynamic,
            page_items: 2,
            max_items: 0,
            min_items: 2,
            free_level: 0,
        });

        let handles = (0..6).map(|i| pool.alloc(i).unwrap()).collect::<Vec<_>>();
        assert_eq!(pool.capacity(), 6);

        for handle in handles.iter().rev() {
            pool.release(*handle);
        }

        assert_eq!(pool.capacity(), 2);
        assert!(pool.is_empty());
    }

    #[test]
    fn dynamic_pool_respects_free_level() {
        let mut pool = ObjectPool::new(PoolOptions {
            kind: PoolType::Dynamic,
            page_items: 2,
            max_items: 0,
            min_items: 0,
            free_level: 50,
        });

        let a = pool.alloc(1).unwrap();
        let b = pool.alloc(2).unwrap();
        let c = pool.alloc(3).unwrap();
        assert_eq!(pool.capacity(), 4);

        // dropping the last page would leave no free slot at all
        pool.release(c);
        assert_eq!(pool.capacity(), 4);

        pool.release(b);
        assert_eq!(pool.capacity(), 2);

        pool.release(a);
        assert_eq!(pool.capacity(), 0);
    }

    #[test]
    fn expanding_pool_honours_max_items() {
        let mut pool = ObjectPool::new(PoolOptions {
            kind: PoolType::Expanding,
            page_items: 4,
            max_items: 6,
            min_items: 0,
            free_level: 0,
        });

        for i in 0..6 {
            pool.alloc(i).unwrap();
        }

        assert_eq!(pool.capacity(), 6);
        assert_eq!(pool.alloc(6), Err(Error::Exhausted));
    }

    #[test]
    fn stale_handle_does_not_alias_reused_slot() {
        let mut pool = ObjectPool::new(PoolOptions::fixed(1));

        let first = pool.alloc("first").unwrap();
        pool.release(first);

        let second = pool.alloc("second").unwrap();
        assert_eq!(first.index(), second.index());
        assert_eq!(pool.get(first), None);
        assert_eq!(pool.release(first), None);
        assert_eq!(pool[second], "second");
    }
}
