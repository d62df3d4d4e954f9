//! Ordered collection store
//!
//! Splice semantics: an item is removed at its source index and re-inserted at
//! the target index. Every edit leaves each item in exactly one collection.

use crate::error::StoreError;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use taskboard_model::{CollectionId, Identifier, Move, OrderedCollection, PositionedItem};

/// Result of a reorder or transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Order changed
    Applied,
    /// Source and target position are equal; order unchanged but still persisted
    Unchanged,
    /// Gesture had no target; nothing to persist
    Cancelled,
}

impl MoveOutcome {
    /// Check if the gesture still needs a durable write
    #[inline]
    #[must_use]
    pub fn needs_persist(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

/// Copy of some collections taken before an optimistic edit
#[derive(Debug, Clone)]
pub struct Snapshot<T> {
    collections: Vec<OrderedCollection<T>>,
}

impl<T> Snapshot<T> {
    /// Collections captured
    #[must_use]
    pub fn collection_ids(&self) -> Vec<CollectionId> {
        self.collections.iter().map(|c| c.id.clone()).collect()
    }

    /// Captured order of one collection
    #[must_use]
    pub fn order(&self, collection: &CollectionId) -> Option<Vec<Identifier>> {
        self.collections
            .iter()
            .find(|c| &c.id == collection)
            .map(OrderedCollection::ids)
    }
}

/// In-memory ordered collections
///
/// Collections keep their insertion order (sections render their task lists
/// in this order). Each structural edit bumps the collection's revision.
#[derive(Debug, Clone)]
pub struct OrderedCollectionStore<T> {
    collections: IndexMap<CollectionId, OrderedCollection<T>>,
    revisions: HashMap<CollectionId, u64>,
}

impl<T> Default for OrderedCollectionStore<T> {
    fn default() -> Self {
        Self {
            collections: IndexMap::new(),
            revisions: HashMap::new(),
        }
    }
}

impl<T: Clone> OrderedCollectionStore<T> {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a whole collection
    ///
    /// Owners of the inserted items are rewritten to the collection id.
    pub fn insert_collection(&mut self, mut collection: OrderedCollection<T>) {
        for item in &mut collection.items {
            item.owner = collection.id.clone();
        }
        let id = collection.id.clone();
        self.collections.insert(id.clone(), collection);
        self.bump(&id);
    }

    /// Drop a collection and everything in it
    pub fn remove_collection(&mut self, id: &CollectionId) -> Option<OrderedCollection<T>> {
        let removed = self.collections.shift_remove(id);
        if removed.is_some() {
            self.bump(id);
        }
        removed
    }

    /// Read a collection
    #[inline]
    #[must_use]
    pub fn collection(&self, id: &CollectionId) -> Option<&OrderedCollection<T>> {
        self.collections.get(id)
    }

    /// Loaded collection ids in insertion order
    #[must_use]
    pub fn collection_ids(&self) -> Vec<CollectionId> {
        self.collections.keys().cloned().collect()
    }

    /// All collections in insertion order
    pub fn collections(&self) -> impl Iterator<Item = &OrderedCollection<T>> {
        self.collections.values()
    }

    /// Ids of a collection in order
    ///
    /// # Errors
    /// Returns `StoreError::UnknownCollection` if not loaded
    pub fn order(&self, id: &CollectionId) -> Result<Vec<Identifier>, StoreError> {
        self.require(id).map(OrderedCollection::ids)
    }

    /// Structural revision of a collection (0 if never loaded)
    #[inline]
    #[must_use]
    pub fn revision(&self, id: &CollectionId) -> u64 {
        self.revisions.get(id).copied().unwrap_or(0)
    }

    /// Locate an item in any collection
    #[must_use]
    pub fn locate(&self, id: &Identifier) -> Option<(CollectionId, usize)> {
        self.collections.values().find_map(|coll| {
            coll.position_of(id).map(|index| (coll.id.clone(), index))
        })
    }

    /// Item by id in any collection
    #[must_use]
    pub fn get(&self, id: &Identifier) -> Option<&PositionedItem<T>> {
        self.collections.values().find_map(|coll| coll.get(id))
    }

    /// Total number of items across collections
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.collections.values().map(OrderedCollection::len).sum()
    }

    /// Move the item at `from` to `to` inside one collection
    ///
    /// # Arguments
    /// * `to` - `None` when the drag ended outside a target; returns `Cancelled`
    ///
    /// # Errors
    /// - `StoreError::UnknownCollection` if not loaded
    /// - `StoreError::IndexOutOfBounds` unless `from, to < len`
    pub fn reorder(
        &mut self,
        id: &CollectionId,
        from: usize,
        to: Option<usize>,
    ) -> Result<MoveOutcome, StoreError> {
        let Some(to) = to else {
            return Ok(MoveOutcome::Cancelled);
        };

        let coll = self.require_mut(id)?;
        let len = coll.len();
        for index in [from, to] {
            if index >= len {
                return Err(StoreError::IndexOutOfBounds {
                    collection: id.clone(),
                    index,
                    len,
                });
            }
        }

        if from == to {
            return Ok(MoveOutcome::Unchanged);
        }

        let moved = coll.items.remove(from);
        coll.items.insert(to, moved);
        self.bump(id);
        Ok(MoveOutcome::Applied)
    }

    /// Move the item at `from` in `source` to `to` in `dest`
    ///
    /// `to` may equal the destination length (append). Both collections are
    /// validated before either is touched.
    ///
    /// # Errors
    /// - `StoreError::SameCollection` if `source == dest`
    /// - `StoreError::UnknownCollection` if either is not loaded
    /// - `StoreError::IndexOutOfBounds` for an invalid index
    pub fn transfer(
        &mut self,
        source: &CollectionId,
        dest: &CollectionId,
        from: usize,
        to: Option<usize>,
    ) -> Result<MoveOutcome, StoreError> {
        if source == dest {
            return Err(StoreError::SameCollection(source.clone()));
        }
        let Some(to) = to else {
            return Ok(MoveOutcome::Cancelled);
        };

        let source_len = self.require(source)?.len();
        let dest_len = self.require(dest)?.len();
        if from >= source_len {
            return Err(StoreError::IndexOutOfBounds {
                collection: source.clone(),
                index: from,
                len: source_len,
            });
        }
        if to > dest_len {
            return Err(StoreError::IndexOutOfBounds {
                collection: dest.clone(),
                index: to,
                len: dest_len,
            });
        }

        let mut moved = self.require_mut(source)?.items.remove(from);
        moved.owner = dest.clone();
        self.require_mut(dest)?.items.insert(to, moved);
        self.bump(source);
        self.bump(dest);
        Ok(MoveOutcome::Applied)
    }

    /// Apply a gesture, resolving the source index by id
    ///
    /// # Errors
    /// - `StoreError::ItemNotFound` if the item is not in `from_collection`
    /// - any error of [`Self::reorder`] / [`Self::transfer`]
    pub fn apply_move(&mut self, mv: &Move) -> Result<MoveOutcome, StoreError> {
        let from = self
            .require(&mv.from_collection)?
            .position_of(&mv.item_id)
            .ok_or_else(|| StoreError::ItemNotFound {
                id: mv.item_id.clone(),
                collection: mv.from_collection.clone(),
            })?;

        if mv.is_transfer() {
            self.transfer(&mv.from_collection, &mv.to_collection, from, mv.to_index)
        } else {
            self.reorder(&mv.from_collection, from, mv.to_index)
        }
    }

    /// Insert an item at `index` (`index <= len`)
    ///
    /// # Errors
    /// - `StoreError::DuplicateItem` if the id is already in any collection
    /// - `StoreError::IndexOutOfBounds` if `index > len`
    pub fn insert_at(
        &mut self,
        id: &CollectionId,
        mut item: PositionedItem<T>,
        index: usize,
    ) -> Result<(), StoreError> {
        if let Some((existing, _)) = self.locate(&item.id) {
            return Err(StoreError::DuplicateItem {
                id: item.id,
                collection: existing,
            });
        }

        let coll = self.require_mut(id)?;
        if index > coll.len() {
            return Err(StoreError::IndexOutOfBounds {
                collection: id.clone(),
                index,
                len: coll.len(),
            });
        }
        item.owner = id.clone();
        coll.items.insert(index, item);
        self.bump(id);
        Ok(())
    }

    /// Remove an item; removing an absent id is a no-op
    pub fn remove_by_id(
        &mut self,
        id: &CollectionId,
        item: &Identifier,
    ) -> Option<PositionedItem<T>> {
        let coll = self.collections.get_mut(id)?;
        let index = coll.position_of(item)?;
        let removed = coll.items.remove(index);
        self.bump(id);
        Some(removed)
    }

    /// Mutate the payload of an item wherever it lives
    pub fn update<R>(&mut self, id: &Identifier, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.collections
            .values_mut()
            .find_map(|coll| coll.items.iter_mut().find(|item| &item.id == id))
            .map(|item| f(&mut item.payload))
    }

    /// Rearrange a collection to a canonical order
    ///
    /// Returns `false` when local order already matched.
    ///
    /// # Errors
    /// - `StoreError::UnknownCollection` if not loaded
    /// - `StoreError::OrderMismatch` unless `order` is a permutation of local ids
    pub fn align_to(&mut self, id: &CollectionId, order: &[Identifier]) -> Result<bool, StoreError> {
        let coll = self.require_mut(id)?;
        if coll.ids() == order {
            return Ok(false);
        }

        let local: HashSet<&Identifier> = coll.items.iter().map(|item| &item.id).collect();
        let wanted: HashSet<&Identifier> = order.iter().collect();
        if local != wanted || order.len() != coll.len() {
            return Err(StoreError::OrderMismatch(id.clone()));
        }

        let mut by_id: HashMap<Identifier, PositionedItem<T>> = coll
            .items
            .drain(..)
            .map(|item| (item.id.clone(), item))
            .collect();
        coll.items = order.iter().filter_map(|id| by_id.remove(id)).collect();
        self.bump(id);
        Ok(true)
    }

    /// Capture collections for later rollback; unknown ids are skipped
    #[must_use]
    pub fn snapshot(&self, ids: &[CollectionId]) -> Snapshot<T> {
        Snapshot {
            collections: ids
                .iter()
                .filter_map(|id| self.collections.get(id).cloned())
                .collect(),
        }
    }

    /// Restore captured order
    ///
    /// Payloads keep their latest value. Items deleted since the snapshot stay
    /// deleted, items added since keep their index, and collections removed
    /// since are not recreated. Restored items are taken out of any other
    /// collection so each stays in exactly one.
    pub fn restore(&mut self, snapshot: Snapshot<T>) {
        let snapshot_collections: HashSet<CollectionId> =
            snapshot.collections.iter().map(|c| c.id.clone()).collect();
        let snapshot_items: HashSet<Identifier> = snapshot
            .collections
            .iter()
            .flat_map(|c| c.items.iter().map(|item| item.id.clone()))
            .collect();
        let live: HashMap<Identifier, T> = self
            .collections
            .values()
            .flat_map(|c| c.items.iter())
            .map(|item| (item.id.clone(), item.payload.clone()))
            .collect();

        let mut restored = HashSet::new();
        for captured in snapshot.collections {
            let id = captured.id;
            let Some(current) = self.collections.get(&id) else {
                continue;
            };
            let added: Vec<(usize, PositionedItem<T>)> = current
                .items
                .iter()
                .enumerate()
                .filter(|(_, item)| !snapshot_items.contains(&item.id))
                .map(|(index, item)| (index, item.clone()))
                .collect();

            let mut items: Vec<PositionedItem<T>> = captured
                .items
                .into_iter()
                .filter_map(|item| {
                    live.get(&item.id)
                        .map(|payload| PositionedItem::new(item.id, payload.clone(), id.clone()))
                })
                .collect();
            restored.extend(items.iter().map(|item| item.id.clone()));
            for (index, item) in added {
                let at = index.min(items.len());
                items.insert(at, item);
            }

            self.collections.insert(id.clone(), OrderedCollection { id: id.clone(), items });
            self.bump(&id);
        }

        let mut touched = Vec::new();
        for (id, coll) in &mut self.collections {
            if snapshot_collections.contains(id) {
                continue;
            }
            let before = coll.len();
            coll.items.retain(|item| !restored.contains(&item.id));
            if coll.len() != before {
                touched.push(id.clone());
            }
        }
        for id in touched {
            self.bump(&id);
        }
    }

    fn require(&self, id: &CollectionId) -> Result<&OrderedCollection<T>, StoreError> {
        self.collections
            .get(id)
            .ok_or_else(|| StoreError::UnknownCollection(id.clone()))
    }

    fn require_mut(&mut self, id: &CollectionId) -> Result<&mut OrderedCollection<T>, StoreError> {
        self.collections
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownCollection(id.clone()))
    }

    fn bump(&mut self, id: &CollectionId) {
        *self.revisions.entry(id.clone()).or_insert(0) += 1;
    }
}
