//! Model error types

use crate::entity::EntityKind;
use crate::id::Identifier;

/// Errors raised while decoding or updating entities
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// Record could not be decoded into the entity
    #[error("cannot decode {kind} record: {source}")]
    Decode {
        kind: EntityKind,
        #[source]
        source: serde_json::Error,
    },

    /// Entity did not serialize to a JSON object
    #[error("{0} record is not an object")]
    NotAnObject(EntityKind),

    /// Partial update tried to rewrite the identifier
    #[error("update would change identity of {kind} {id}")]
    IdentityChanged { kind: EntityKind, id: Identifier },
}
