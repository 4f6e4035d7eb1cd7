//! Per-builder memoization keyed by `(context, lineage)` identity.
//!
//! Keys hold clones of the context and lineage values, so every distinct key
//! a block has rendered under stays reachable for the lifetime of the
//! compiled template. Entries are never evicted.
//!
//! A [`BlockMemo`] wraps a store for one block builder and is held for the
//! whole of that block's `create`. The lock is reentrant so a block can be
//! entered again on the same thread through recursive partials; renders on
//! other threads wait until the outer `create` has written its state back.

use std::cell::{RefCell, RefMut};

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::value::{Lineage, Value};

#[derive(Debug, Clone)]
struct MemoKey {
    context: Value,
    lineage: Lineage,
}

impl MemoKey {
    fn matches(&self, context: &Value, lineage: &Lineage) -> bool {
        self.context.is_same(context) && self.lineage.is_same(lineage)
    }
}

#[derive(Debug)]
pub struct MemoStore<E> {
    keys: Vec<MemoKey>,
    entries: Vec<E>,
}

impl<E> Default for MemoStore<E> {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            entries: Vec::new(),
        }
    }
}

impl<E> MemoStore<E> {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, context: &Value, lineage: &Lineage) -> Option<usize> {
        self.keys.iter().position(|key| key.matches(context, lineage))
    }

    /// First entry whose key matches.
    pub fn get(&self, context: &Value, lineage: &Lineage) -> Option<&E> {
        self.position(context, lineage).map(|i| &self.entries[i])
    }

    pub fn get_mut(&mut self, context: &Value, lineage: &Lineage) -> Option<&mut E> {
        self.position(context, lineage)
            .map(move |i| &mut self.entries[i])
    }

    /// Append an entry. Does not deduplicate: callers only set fresh keys.
    pub fn set(&mut self, context: &Value, lineage: &Lineage, entry: E) {
        self.keys.push(MemoKey {
            context: context.clone(),
            lineage: lineage.clone(),
        });
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Exclusive, reentrant access to one block's [`MemoStore`].
pub(crate) struct BlockMemo<E> {
    store: ReentrantMutex<RefCell<MemoStore<E>>>,
}

impl<E> BlockMemo<E> {
    pub fn new() -> Self {
        Self {
            store: ReentrantMutex::new(RefCell::new(MemoStore::new())),
        }
    }

    /// Claim the store for the current thread. Hold the guard across the
    /// block's `create`; borrow through [`MemoGuard::store`] only briefly,
    /// never across child creation.
    pub fn enter(&self) -> MemoGuard<'_, E> {
        MemoGuard(self.store.lock())
    }
}

impl<E> Default for BlockMemo<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for BlockMemo<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockMemo").finish_non_exhaustive()
    }
}

pub(crate) struct MemoGuard<'a, E>(ReentrantMutexGuard<'a, RefCell<MemoStore<E>>>);

impl<E> MemoGuard<'_, E> {
    /// At most one borrow may be live per thread; release it before
    /// creating children, which may re-enter this store.
    pub fn store(&self) -> RefMut<'_, MemoStore<E>> {
        self.0.borrow_mut()
    }
}
