//! Drag-and-drop move operation
//!
//! [`Move`] is the single gesture type consumed by every list: board list,
//! favourites, section list and task lists.

use crate::id::{CollectionId, Identifier};
use serde::{Deserialize, Serialize};

/// Move an item to a position, within its collection or into a sibling one
///
/// `to_index == None` means the drag ended outside any valid drop target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    pub item_id: Identifier,
    pub from_collection: CollectionId,
    pub to_collection: CollectionId,
    pub to_index: Option<usize>,
}

impl Move {
    /// Reorder inside one collection
    #[inline]
    #[must_use]
    pub fn within(collection: CollectionId, item_id: Identifier, to_index: usize) -> Self {
        Self {
            item_id,
            from_collection: collection.clone(),
            to_collection: collection,
            to_index: Some(to_index),
        }
    }

    /// Move to a different collection
    #[inline]
    #[must_use]
    pub fn across(
        from_collection: CollectionId,
        to_collection: CollectionId,
        item_id: Identifier,
        to_index: usize,
    ) -> Self {
        Self {
            item_id,
            from_collection,
            to_collection,
            to_index: Some(to_index),
        }
    }

    /// Drag dropped outside any target
    #[inline]
    #[must_use]
    pub fn cancelled(collection: CollectionId, item_id: Identifier) -> Self {
        Self {
            item_id,
            from_collection: collection.clone(),
            to_collection: collection,
            to_index: None,
        }
    }

    /// Check if the move changes the owning collection
    #[inline]
    #[must_use]
    pub fn is_transfer(&self) -> bool {
        self.from_collection != self.to_collection
    }

    /// Collections whose order this move touches
    #[must_use]
    pub fn affected(&self) -> Vec<CollectionId> {
        if self.is_transfer() {
            vec![self.from_collection.clone(), self.to_collection.clone()]
        } else {
            vec![self.from_collection.clone()]
        }
    }
}
