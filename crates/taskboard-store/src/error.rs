//! Store error types

use taskboard_model::{CollectionId, Identifier};

/// Errors raised by structural edits
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Collection is not loaded
    #[error("unknown collection: {0}")]
    UnknownCollection(CollectionId),

    /// Index outside the collection
    #[error("index {index} out of bounds for {collection} (len {len})")]
    IndexOutOfBounds {
        collection: CollectionId,
        index: usize,
        len: usize,
    },

    /// Transfer requested within a single collection
    #[error("transfer source and destination are both {0}; use reorder")]
    SameCollection(CollectionId),

    /// Item is already present in some collection
    #[error("item {id} already present in {collection}")]
    DuplicateItem {
        id: Identifier,
        collection: CollectionId,
    },

    /// Item not present in the named collection
    #[error("item {id} not found in {collection}")]
    ItemNotFound {
        id: Identifier,
        collection: CollectionId,
    },

    /// Canonical order does not describe the same items as local state
    #[error("canonical order for {0} does not match local items")]
    OrderMismatch(CollectionId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display() {
        let err = StoreError::IndexOutOfBounds {
            collection: CollectionId::boards(),
            index: 5,
            len: 3,
        };
        assert_eq!(err.to_string(), "index 5 out of bounds for boards (len 3)");

        let err = StoreError::SameCollection("s1".into());
        assert!(err.to_string().contains("use reorder"));
    }
}
