//! Positioned items and ordered collections
//!
//! An item's position is its index in [`OrderedCollection::items`]; it is
//! never stored on the item itself.

use crate::entity::Entity;
use crate::id::{CollectionId, Identifier};
use serde::{Deserialize, Serialize};

/// Entity placed in exactly one owning collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionedItem<T> {
    /// Stable identifier
    pub id: Identifier,
    /// Entity data
    pub payload: T,
    /// Collection the item currently belongs to
    pub owner: CollectionId,
}

impl<T> PositionedItem<T> {
    /// Create new positioned item
    #[inline]
    #[must_use]
    pub fn new(id: Identifier, payload: T, owner: CollectionId) -> Self {
        Self { id, payload, owner }
    }
}

impl<T: Entity> PositionedItem<T> {
    /// Place an entity into a collection, keyed by the entity's own id
    #[inline]
    #[must_use]
    pub fn from_entity(payload: T, owner: CollectionId) -> Self {
        Self {
            id: payload.id().clone(),
            payload,
            owner,
        }
    }
}

/// Named, ordered list of items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderedCollection<T> {
    /// Collection name
    pub id: CollectionId,
    /// Items in rendering order
    pub items: Vec<PositionedItem<T>>,
}

impl<T> OrderedCollection<T> {
    /// Create empty collection
    #[inline]
    #[must_use]
    pub fn new(id: CollectionId) -> Self {
        Self {
            id,
            items: Vec::new(),
        }
    }

    /// Number of items
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Ids in order
    #[must_use]
    pub fn ids(&self) -> Vec<Identifier> {
        self.items.iter().map(|item| item.id.clone()).collect()
    }

    /// Derived position of an item
    #[must_use]
    pub fn position_of(&self, id: &Identifier) -> Option<usize> {
        self.items.iter().position(|item| &item.id == id)
    }

    /// Check membership
    #[inline]
    #[must_use]
    pub fn contains(&self, id: &Identifier) -> bool {
        self.position_of(id).is_some()
    }

    /// Item by id
    #[must_use]
    pub fn get(&self, id: &Identifier) -> Option<&PositionedItem<T>> {
        self.items.iter().find(|item| &item.id == id)
    }

    /// Payloads in order
    pub fn payloads(&self) -> impl Iterator<Item = &T> {
        self.items.iter().map(|item| &item.payload)
    }
}

impl<T: Entity> OrderedCollection<T> {
    /// Build a collection from entities in authority order
    #[must_use]
    pub fn from_entities(id: CollectionId, entities: impl IntoIterator<Item = T>) -> Self {
        let items = entities
            .into_iter()
            .map(|entity| PositionedItem::from_entity(entity, id.clone()))
            .collect();
        Self { id, items }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Board;

    fn boards(ids: &[&str]) -> OrderedCollection<Board> {
        OrderedCollection::from_entities(
            CollectionId::boards(),
            ids.iter().map(|id| Board::new(Identifier::from(*id))),
        )
    }

    #[test]
    fn positions_are_derived_from_index() {
        let coll = boards(&["a", "b", "c"]);
        assert_eq!(coll.position_of(&"c".into()), Some(2));
        assert_eq!(coll.position_of(&"z".into()), None);
    }

    #[test]
    fn from_entities_sets_owner_and_id() {
        let coll = boards(&["a"]);
        let item = &coll.items[0];
        assert_eq!(item.id, Identifier::from("a"));
        assert_eq!(item.owner, CollectionId::boards());
    }

    #[test]
    fn ids_in_order() {
        let coll = boards(&["x", "y"]);
        assert_eq!(coll.ids(), vec![Identifier::from("x"), Identifier::from("y")]);
        assert_eq!(coll.len(), 2);
        assert!(!coll.is_empty());
    }
}
