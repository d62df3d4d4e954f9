//! Taskboard Model
//!
//! Identifiers, positioned items and the board entities shared by the store,
//! the sync engine and the authority adapters.
//!
//! # Core Concepts
//!
//! - [`Identifier`]: authority-assigned entity id, the only cross-reference key
//! - [`PositionedItem<T>`]: entity plus its owning collection
//! - [`OrderedCollection<T>`]: ordered items; position is the index
//! - [`Entity`]: trait implemented by [`Board`], [`Section`] and [`Task`]
//! - [`Move`]: drag-and-drop gesture for every list
//!
//! # Example
//!
//! ```rust
//! use taskboard_model::{Board, CollectionId, OrderedCollection};
//!
//! let boards = OrderedCollection::from_entities(
//!     CollectionId::boards(),
//!     vec![Board::new("a".into()), Board::new("b".into())],
//! );
//! assert_eq!(boards.position_of(&"b".into()), Some(1));
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod entity;
mod error;
mod id;
mod item;
mod moves;

pub use entity::{
    filter_by_title, Board, BoardDetail, Entity, EntityKind, FieldMap, FieldName, Section,
    SectionDetail, Task,
};
pub use error::ModelError;
pub use id::{CollectionId, Identifier};
pub use item::{OrderedCollection, PositionedItem};
pub use moves::Move;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
