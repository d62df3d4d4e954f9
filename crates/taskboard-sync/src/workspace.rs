//! Workspace: the board list, favourites and their edits
//!
//! Owns one engine per list plus the shared edit pipeline. Boards appear in
//! two lists at once, so board edits and deletes always touch both.

use crate::authority::{EntityRef, RemoteAuthority};
use crate::binding::ListBinding;
use crate::board_view::BoardView;
use crate::config::SyncConfig;
use crate::edit::FieldEditor;
use crate::engine::{Deleted, OptimisticSyncEngine};
use crate::error::SyncError;
use crate::notice::{Notice, NoticeBus, SavedFlag};
use serde_json::Value;
use std::sync::Arc;
use taskboard_model::{
    filter_by_title, Board, CollectionId, Entity, FieldMap, FieldName, Identifier, Move,
    OrderedCollection,
};
use taskboard_store::MoveOutcome;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Boards matching a title search
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResults {
    pub boards: Vec<Board>,
    pub favourites: Vec<Board>,
}

/// One user's session against the authority
pub struct Workspace {
    authority: Arc<dyn RemoteAuthority>,
    config: SyncConfig,
    notices: NoticeBus,
    editor: FieldEditor,
    boards: OptimisticSyncEngine<Board>,
    favourites: OptimisticSyncEngine<Board>,
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("boards", &self.boards)
            .field("favourites", &self.favourites)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Workspace {
    /// Create a session with empty lists
    #[must_use]
    pub fn new(authority: Arc<dyn RemoteAuthority>, config: SyncConfig) -> Self {
        let notices = NoticeBus::new(config.notice_capacity);
        let editor = FieldEditor::new(
            Arc::clone(&authority),
            notices.clone(),
            SavedFlag::new(),
            config.clone(),
        );
        let boards = OptimisticSyncEngine::new(
            ListBinding::Boards,
            Arc::clone(&authority),
            notices.clone(),
            &config,
        );
        let favourites = OptimisticSyncEngine::new(
            ListBinding::Favourites,
            Arc::clone(&authority),
            notices.clone(),
            &config,
        );
        boards.hydrate(OrderedCollection::new(CollectionId::boards()));
        favourites.hydrate(OrderedCollection::new(CollectionId::favourites()));

        Self {
            authority,
            config,
            notices,
            editor,
            boards,
            favourites,
        }
    }

    /// Fetch boards and favourites concurrently
    ///
    /// # Errors
    /// Returns the first fetch failure; a notice is published for it
    pub async fn load(&self) -> Result<(), SyncError> {
        let loaded = futures::try_join!(self.boards.load(), self.favourites.load());
        if let Err(err) = &loaded {
            warn!(error = %err, "initial load failed");
            if let Some(authority) = err.authority() {
                self.notices.report(None, None, authority);
            }
        }
        loaded?;
        info!(
            boards = self.boards().len(),
            favourites = self.favourites().len(),
            "workspace loaded"
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Boards in display order
    #[must_use]
    pub fn boards(&self) -> Vec<Board> {
        self.boards.items(&CollectionId::boards())
    }

    /// Favourite boards in display order
    #[must_use]
    pub fn favourites(&self) -> Vec<Board> {
        self.favourites.items(&CollectionId::favourites())
    }

    #[inline]
    #[must_use]
    pub fn board_engine(&self) -> &OptimisticSyncEngine<Board> {
        &self.boards
    }

    #[inline]
    #[must_use]
    pub fn favourite_engine(&self) -> &OptimisticSyncEngine<Board> {
        &self.favourites
    }

    /// Case-insensitive title search over both lists
    #[must_use]
    pub fn search(&self, query: &str) -> SearchResults {
        let boards = self.boards();
        let favourites = self.favourites();
        SearchResults {
            boards: filter_by_title(&boards, query).into_iter().cloned().collect(),
            favourites: filter_by_title(&favourites, query)
                .into_iter()
                .cloned()
                .collect(),
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    #[inline]
    #[must_use]
    pub fn notices(&self) -> &NoticeBus {
        &self.notices
    }

    #[inline]
    #[must_use]
    pub fn saved(&self) -> &SavedFlag {
        self.editor.saved()
    }

    #[inline]
    #[must_use]
    pub fn editor(&self) -> &FieldEditor {
        &self.editor
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Structure
    // ------------------------------------------------------------------

    /// Create an empty board at the front of the board list
    ///
    /// # Errors
    /// Returns `SyncError::Authority` if the authority rejects the create
    pub async fn create_board(&self) -> Result<Board, SyncError> {
        self.boards.create(&CollectionId::boards(), FieldMap::new()).await
    }

    /// Remove a board from both lists and fire its delete
    pub fn delete_board(&self, id: &Identifier) -> Option<Deleted<Board>> {
        self.editor.discard(&self.boards, id);
        if self.boards.contains(id) {
            self.favourites.remove_local(id);
            self.boards.delete(id)
        } else {
            self.favourites.delete(id)
        }
    }

    /// Reorder the board list
    ///
    /// # Errors
    /// Returns the local rejection or the authority failure (already rolled back)
    pub async fn move_board(&self, mv: Move) -> Result<MoveOutcome, SyncError> {
        self.boards.move_item(mv).await
    }

    /// Reorder the favourites list
    ///
    /// # Errors
    /// Returns the local rejection or the authority failure (already rolled back)
    pub async fn move_favourite(&self, mv: Move) -> Result<MoveOutcome, SyncError> {
        self.favourites.move_item(mv).await
    }

    // ------------------------------------------------------------------
    // Fields
    // ------------------------------------------------------------------

    /// Edit a board's title, description or icon
    ///
    /// # Errors
    /// - `SyncError::UnknownItem` if the board is not loaded
    /// - `SyncError::Model` if the value does not fit the field
    pub fn edit_board(&self, id: &Identifier, field: FieldName, value: impl Into<Value>) -> Result<(), SyncError> {
        self.editor.edit(
            &[self.boards.clone(), self.favourites.clone()],
            EntityRef::board(id.clone()),
            field,
            value.into(),
        )
    }

    /// Commit a board's pending edits now
    pub async fn flush_board(&self, id: &Identifier) -> usize {
        self.editor.flush_target(id).await
    }

    /// Flip a board's favourite flag and wait for the write
    ///
    /// # Errors
    /// Returns the authority failure after both lists were restored
    pub async fn toggle_favourite(&self, id: &Identifier) -> Result<bool, SyncError> {
        self.stage_toggle(id)?.settle().await
    }

    /// Flip a board's favourite flag locally
    ///
    /// Reads the board's current local value even while other writes on it
    /// are unacknowledged.
    ///
    /// # Errors
    /// - `SyncError::UnknownItem` if the board is in neither list
    /// - `SyncError::Store` if the favourites list rejects the insert
    pub fn stage_toggle(&self, id: &Identifier) -> Result<StagedToggle, SyncError> {
        let listed = self.boards.contains(id);
        let board = self
            .boards
            .get(id)
            .or_else(|| self.favourites.get(id))
            .ok_or_else(|| SyncError::UnknownItem(id.clone()))?;
        let favourite = !board.favourite;
        let flag = FieldMap::single(FieldName::FAVOURITE, favourite);

        let mut previous = None;
        if favourite {
            if !self.favourites.contains(id) {
                let mut listed = board;
                listed.apply_fields(&flag)?;
                self.favourites
                    .insert_local(&CollectionId::favourites(), listed, 0)?;
            }
        } else if let Some((_, index)) = self.favourites.locate(id) {
            previous = self
                .favourites
                .remove_local(id)
                .map(|item| (index, item.payload));
        }
        self.boards.apply_fields(id, &flag)?;
        self.boards.begin_write(id);
        info!(board = %id, favourite, "favourite toggled locally");

        Ok(StagedToggle {
            authority: Arc::clone(&self.authority),
            editor: self.editor.clone(),
            notices: self.notices.clone(),
            boards: self.boards.clone(),
            favourites: self.favourites.clone(),
            id: id.clone(),
            favourite,
            listed,
            previous,
        })
    }

    /// Open one board with its sections and tasks
    ///
    /// # Errors
    /// Returns the fetch or decode failure
    pub async fn open_board(&self, id: &Identifier) -> Result<BoardView, SyncError> {
        BoardView::open(
            Arc::clone(&self.authority),
            self.notices.clone(),
            self.editor.clone(),
            &self.config,
            id.clone(),
        )
        .await
    }

    /// Commit every pending edit
    pub async fn close(&self) -> usize {
        self.editor.flush_all().await
    }
}

/// Favourite flip applied locally, write not yet sent
#[must_use = "a staged toggle must be settled"]
pub struct StagedToggle {
    authority: Arc<dyn RemoteAuthority>,
    editor: FieldEditor,
    notices: NoticeBus,
    boards: OptimisticSyncEngine<Board>,
    favourites: OptimisticSyncEngine<Board>,
    id: Identifier,
    favourite: bool,
    /// Board was in the board list when toggled
    listed: bool,
    /// Index and payload of the favourites entry removed by an un-favourite
    previous: Option<(usize, Board)>,
}

impl StagedToggle {
    /// New flag value
    #[inline]
    #[must_use]
    pub fn favourite(&self) -> bool {
        self.favourite
    }

    /// Send the write; restore both lists on failure
    ///
    /// # Errors
    /// Returns `SyncError::Authority` if the write failed
    pub async fn settle(self) -> Result<bool, SyncError> {
        let flag = FieldMap::single(FieldName::FAVOURITE, self.favourite);
        let target = EntityRef::board(self.id.clone());

        match self.authority.update(target, flag).await {
            Ok(record) => {
                let masked = self.editor.coalescer().pending_fields(&self.id);
                for engine in [&self.boards, &self.favourites] {
                    if let Err(err) = engine.merge_record(&record, &masked) {
                        warn!(board = %self.id, error = %err, "canonical board rejected");
                    }
                }
                self.boards.finish_write(&self.id, true);
                Ok(self.favourite)
            }
            Err(err) => {
                warn!(board = %self.id, error = %err, "favourite toggle failed");
                self.roll_back();
                self.boards.finish_write(&self.id, false);
                self.notices.report(Some(&self.id), Some(&FieldName::FAVOURITE), &err);
                Err(err.into())
            }
        }
    }

    fn roll_back(&self) {
        let flag = FieldMap::single(FieldName::FAVOURITE, !self.favourite);
        if let Err(err) = self.boards.apply_fields(&self.id, &flag) {
            warn!(board = %self.id, error = %err, "favourite rollback failed");
        }

        if self.favourite {
            self.favourites.remove_local(&self.id);
        } else if let Some((index, removed)) = &self.previous {
            let board = match self.boards.get(&self.id) {
                Some(board) => Some(board),
                None if !self.listed => Some(removed.clone()),
                // Deleted while the write was in flight.
                None => None,
            };
            match board {
                Some(mut board) => {
                    if board.apply_fields(&flag).is_ok() {
                        if let Err(err) = self.favourites.insert_local(&CollectionId::favourites(), board, *index) {
                            warn!(board = %self.id, error = %err, "favourite rollback failed");
                        }
                    }
                }
                None => debug!(board = %self.id, "board deleted; favourite not restored"),
            }
        }
        info!(board = %self.id, "favourite toggle rolled back");
    }
}
