//! Remote authority boundary
//!
//! The durable store is reached through [`RemoteAuthority`], a fallible
//! request/response surface. Records cross the boundary as JSON and are
//! decoded into entities by the engine.

use crate::error::AuthorityError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use taskboard_model::{CollectionId, EntityKind, FieldMap, Identifier};

/// Raw record as returned by the authority
pub type Record = serde_json::Value;

/// Container addressed by a fetch or an order write
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "lowercase")]
pub enum Scope {
    /// All boards of the user
    Boards,
    /// Favourite boards
    Favourites,
    /// Sections of one board
    Sections { board: Identifier },
    /// Tasks of one section
    Tasks {
        board: Identifier,
        section: Identifier,
    },
}

impl Display for Scope {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Boards => f.write_str("boards"),
            Scope::Favourites => f.write_str("favourites"),
            Scope::Sections { board } => write!(f, "sections of {board}"),
            Scope::Tasks { section, .. } => write!(f, "tasks of {section}"),
        }
    }
}

/// Address of a single entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: Identifier,
    /// Owning board, required for sections and tasks
    pub board: Option<Identifier>,
}

impl EntityRef {
    #[inline]
    #[must_use]
    pub fn board(id: Identifier) -> Self {
        Self {
            kind: EntityKind::Board,
            id,
            board: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn section(board: Identifier, id: Identifier) -> Self {
        Self {
            kind: EntityKind::Section,
            id,
            board: Some(board),
        }
    }

    #[inline]
    #[must_use]
    pub fn task(board: Identifier, id: Identifier) -> Self {
        Self {
            kind: EntityKind::Task,
            id,
            board: Some(board),
        }
    }
}

impl Display for EntityRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

/// Create request; the authority assigns the id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub kind: EntityKind,
    pub board: Option<Identifier>,
    pub section: Option<Identifier>,
    pub seed: FieldMap,
}

/// Cross-collection move, carrying the full resulting order of both sides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub board: Identifier,
    pub moved: Identifier,
    pub source: CollectionId,
    pub source_order: Vec<Identifier>,
    pub destination: CollectionId,
    pub destination_order: Vec<Identifier>,
}

/// Durable order write
///
/// Always carries complete final orders, never deltas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderRequest {
    /// New order of a single collection
    Reorder {
        scope: Scope,
        collection: CollectionId,
        order: Vec<Identifier>,
    },
    /// Item moved between two collections
    Transfer(TransferRequest),
}

impl OrderRequest {
    /// Orders carried by the request, per collection
    #[must_use]
    pub fn orders(&self) -> Vec<CollectionOrder> {
        match self {
            OrderRequest::Reorder {
                collection, order, ..
            } => vec![CollectionOrder::new(collection.clone(), order.clone())],
            OrderRequest::Transfer(t) => vec![
                CollectionOrder::new(t.source.clone(), t.source_order.clone()),
                CollectionOrder::new(t.destination.clone(), t.destination_order.clone()),
            ],
        }
    }
}

/// Final order of one collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionOrder {
    pub collection: CollectionId,
    pub order: Vec<Identifier>,
}

impl CollectionOrder {
    #[inline]
    #[must_use]
    pub fn new(collection: CollectionId, order: Vec<Identifier>) -> Self {
        Self { collection, order }
    }
}

/// Acknowledgement of an order write, echoing the canonical order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAck {
    pub orders: Vec<CollectionOrder>,
}

impl OrderAck {
    /// Ack echoing exactly what was requested
    #[must_use]
    pub fn echo(request: &OrderRequest) -> Self {
        Self {
            orders: request.orders(),
        }
    }
}

/// Durable store read/write surface
///
/// Any `Err` is a failed write and triggers the caller's rollback policy.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    /// Ordered records of a container
    async fn fetch(&self, scope: Scope) -> Result<Vec<Record>, AuthorityError>;

    /// One board with its sections and their tasks
    async fn fetch_board(&self, board: Identifier) -> Result<Record, AuthorityError>;

    /// Persist complete final order(s)
    async fn persist_order(&self, request: OrderRequest) -> Result<OrderAck, AuthorityError>;

    /// Create an entity; returns the record with its assigned id
    async fn create(&self, request: CreateRequest) -> Result<Record, AuthorityError>;

    /// Partial update; returns the canonical record
    async fn update(&self, target: EntityRef, fields: FieldMap) -> Result<Record, AuthorityError>;

    /// Delete an entity
    async fn delete(&self, target: EntityRef) -> Result<(), AuthorityError>;
}
