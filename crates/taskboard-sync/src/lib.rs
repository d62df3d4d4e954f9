//! Taskboard Sync - optimistic synchronization for ordered lists
//!
//! Keeps the board list, favourites, section list and task lists responsive:
//! - Applies drag-and-drop moves locally before the durable write
//! - Reconciles with the canonical order or rolls back on failure
//! - Coalesces bursts of field edits into one write per field
//! - Routes failures to inline or transient notices
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use taskboard_model::{CollectionId, FieldName, Move};
//! use taskboard_sync::{SyncConfig, Workspace};
//!
//! # async fn example(authority: Arc<dyn taskboard_sync::RemoteAuthority>) -> Result<(), taskboard_sync::SyncError> {
//! let workspace = Workspace::new(authority, SyncConfig::default());
//! workspace.load().await?;
//!
//! let board = workspace.create_board().await?;
//! workspace.edit_board(&board.id, FieldName::TITLE, "Roadmap")?;
//! workspace
//!     .move_board(Move::within(CollectionId::boards(), board.id.clone(), 1))
//!     .await?;
//! workspace.close().await;
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod authority;
pub mod binding;
pub mod board_view;
pub mod coalescer;
pub mod config;
pub mod edit;
pub mod engine;
pub mod error;
pub mod notice;
pub mod state;
pub mod workspace;

pub use authority::{
    CollectionOrder, CreateRequest, EntityRef, OrderAck, OrderRequest, Record, RemoteAuthority,
    Scope, TransferRequest,
};
pub use binding::{InsertPosition, ListBinding};
pub use board_view::BoardView;
pub use coalescer::{MutationCoalescer, MutationKey, PendingMutation};
pub use config::SyncConfig;
pub use edit::FieldEditor;
pub use engine::{Deleted, OptimisticSyncEngine, StagedMove};
pub use error::{AuthorityError, ConfigError, FailureClass, SyncError};
pub use notice::{Notice, NoticeBus, SavedFlag};
pub use state::{allowed_transitions, validate_transition, SyncLedger, SyncState};
pub use workspace::{SearchResults, StagedToggle, Workspace};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving a workspace
    pub use crate::{
        AuthorityError, BoardView, Notice, RemoteAuthority, SyncConfig, SyncError, Workspace,
    };
    pub use taskboard_model::{CollectionId, FieldName, Identifier, Move};
    pub use taskboard_store::MoveOutcome;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
