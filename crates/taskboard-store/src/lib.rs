//! Taskboard Store
//!
//! In-memory representation of named ordered collections.
//!
//! # Core Concepts
//!
//! - [`OrderedCollectionStore`]: reorder, transfer, insert, remove with splice semantics
//! - [`MoveOutcome`]: whether a gesture changed order and still needs persisting
//! - [`Snapshot`]: captured order used to roll back a failed optimistic move
//!
//! # Example
//!
//! ```rust
//! use taskboard_model::{CollectionId, Identifier, OrderedCollection, Task};
//! use taskboard_store::OrderedCollectionStore;
//!
//! let mut store = OrderedCollectionStore::new();
//! store.insert_collection(OrderedCollection::from_entities(
//!     CollectionId::from("todo"),
//!     vec![Task::new("a".into()), Task::new("b".into()), Task::new("c".into())],
//! ));
//!
//! store.reorder(&"todo".into(), 0, Some(2)).unwrap();
//! let order: Vec<Identifier> = store.order(&"todo".into()).unwrap();
//! assert_eq!(order, ["b", "c", "a"].map(Identifier::from));
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod error;
mod store;

pub use error::StoreError;
pub use store::{MoveOutcome, OrderedCollectionStore, Snapshot};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
