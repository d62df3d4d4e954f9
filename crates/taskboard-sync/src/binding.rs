//! List bindings
//!
//! One engine type serves every list; a [`ListBinding`] supplies the only
//! list-specific facts: which authority scope a collection maps to, where new
//! items land, and whether items may cross collections.

use crate::authority::{CreateRequest, EntityRef, OrderRequest, Scope, TransferRequest};
use std::fmt::{self, Display, Formatter};
use taskboard_model::{CollectionId, EntityKind, FieldMap, Identifier, Move};

/// Where a created item is inserted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPosition {
    Front,
    Back,
}

impl InsertPosition {
    /// Concrete index for a collection of `len` items
    #[inline]
    #[must_use]
    pub fn index(self, len: usize) -> usize {
        match self {
            Self::Front => 0,
            Self::Back => len,
        }
    }
}

/// Configuration of one kind of list
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ListBinding {
    /// The user's board list (single collection `boards`)
    Boards,
    /// Favourite boards (single collection `favourites`)
    Favourites,
    /// Sections of a board (single collection named after the board)
    Sections { board: Identifier },
    /// Task lists of a board, one collection per section
    Tasks { board: Identifier },
}

impl ListBinding {
    #[inline]
    #[must_use]
    pub fn sections(board: Identifier) -> Self {
        Self::Sections { board }
    }

    #[inline]
    #[must_use]
    pub fn tasks(board: Identifier) -> Self {
        Self::Tasks { board }
    }

    /// Kind of entity held by the list
    #[must_use]
    pub fn entity_kind(&self) -> EntityKind {
        match self {
            Self::Boards | Self::Favourites => EntityKind::Board,
            Self::Sections { .. } => EntityKind::Section,
            Self::Tasks { .. } => EntityKind::Task,
        }
    }

    /// Owning board of sections and tasks
    #[must_use]
    pub fn board(&self) -> Option<&Identifier> {
        match self {
            Self::Boards | Self::Favourites => None,
            Self::Sections { board } | Self::Tasks { board } => Some(board),
        }
    }

    /// The collection of a single-collection list
    ///
    /// Task lists have one collection per section and return `None`.
    #[must_use]
    pub fn home_collection(&self) -> Option<CollectionId> {
        match self {
            Self::Boards => Some(CollectionId::boards()),
            Self::Favourites => Some(CollectionId::favourites()),
            Self::Sections { board } => Some(CollectionId::owned_by(board)),
            Self::Tasks { .. } => None,
        }
    }

    /// Authority scope backing a collection of this list
    #[must_use]
    pub fn scope(&self, collection: &CollectionId) -> Scope {
        match self {
            Self::Boards => Scope::Boards,
            Self::Favourites => Scope::Favourites,
            Self::Sections { board } => Scope::Sections {
                board: board.clone(),
            },
            Self::Tasks { board } => Scope::Tasks {
                board: board.clone(),
                section: collection.as_owner(),
            },
        }
    }

    /// Only task lists allow items to change collection
    #[inline]
    #[must_use]
    pub fn supports_transfer(&self) -> bool {
        matches!(self, Self::Tasks { .. })
    }

    /// Favourites are populated by toggling, never created directly
    #[inline]
    #[must_use]
    pub fn supports_create(&self) -> bool {
        !matches!(self, Self::Favourites)
    }

    /// Insert position of created items
    ///
    /// Boards and tasks go to the front, sections are appended.
    #[must_use]
    pub fn insert_position(&self) -> InsertPosition {
        match self {
            Self::Sections { .. } => InsertPosition::Back,
            Self::Boards | Self::Favourites | Self::Tasks { .. } => InsertPosition::Front,
        }
    }

    /// Authority address of an item of this list
    #[must_use]
    pub fn entity_ref(&self, id: Identifier) -> EntityRef {
        match self {
            Self::Boards | Self::Favourites => EntityRef::board(id),
            Self::Sections { board } => EntityRef::section(board.clone(), id),
            Self::Tasks { board } => EntityRef::task(board.clone(), id),
        }
    }

    /// Create request for a new item in `collection`
    #[must_use]
    pub fn create_request(&self, collection: &CollectionId, seed: FieldMap) -> CreateRequest {
        CreateRequest {
            kind: self.entity_kind(),
            board: self.board().cloned(),
            section: match self {
                Self::Tasks { .. } => Some(collection.as_owner()),
                _ => None,
            },
            seed,
        }
    }

    /// Order write for an applied move, given the resulting orders
    #[must_use]
    pub fn order_request(
        &self,
        mv: &Move,
        source_order: Vec<Identifier>,
        destination_order: Vec<Identifier>,
    ) -> OrderRequest {
        match self.board() {
            Some(board) if mv.is_transfer() => OrderRequest::Transfer(TransferRequest {
                board: board.clone(),
                moved: mv.item_id.clone(),
                source: mv.from_collection.clone(),
                source_order,
                destination: mv.to_collection.clone(),
                destination_order,
            }),
            _ => OrderRequest::Reorder {
                scope: self.scope(&mv.from_collection),
                collection: mv.from_collection.clone(),
                order: source_order,
            },
        }
    }
}

impl Display for ListBinding {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boards => f.write_str("board list"),
            Self::Favourites => f.write_str("favourites list"),
            Self::Sections { board } => write!(f, "section list of {board}"),
            Self::Tasks { board } => write!(f, "task lists of {board}"),
        }
    }
}
