//! Identifiers for entities and collections
//!
//! Provides [`Identifier`] (authority-assigned entity id) and [`CollectionId`]
//! (name of an ordered collection).

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt::{self, Display, Formatter};

/// Opaque entity identifier assigned by the durable authority
///
/// Never reassigned and never derived from a position. All diffing, keying
/// and reconciliation goes through this value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Wrap an authority-issued token
    #[inline]
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Identifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identifier {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Identifier {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Identifier {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Name of an ordered collection
///
/// The board list and favourites use fixed names; a section list is named
/// after its board and a task list after its section.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionId(String);

impl CollectionId {
    /// Collection holding every board of the user
    pub const BOARDS: &'static str = "boards";

    /// Collection holding the favourite boards
    pub const FAVOURITES: &'static str = "favourites";

    /// Create collection id
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The board list
    #[inline]
    #[must_use]
    pub fn boards() -> Self {
        Self::new(Self::BOARDS)
    }

    /// The favourites list
    #[inline]
    #[must_use]
    pub fn favourites() -> Self {
        Self::new(Self::FAVOURITES)
    }

    /// Collection owned by an entity (sections of a board, tasks of a section)
    #[inline]
    #[must_use]
    pub fn owned_by(owner: &Identifier) -> Self {
        Self(owner.as_str().to_string())
    }

    /// Interpret this collection name as the id of its owning entity
    #[inline]
    #[must_use]
    pub fn as_owner(&self) -> Identifier {
        Identifier::new(self.0.clone())
    }

    /// Raw name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CollectionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CollectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&Identifier> for CollectionId {
    fn from(id: &Identifier) -> Self {
        Self::owned_by(id)
    }
}
