//! One opened board
//!
//! Holds the board's section list and one task list per section. Section
//! and task edits share the session's [`FieldEditor`].

use crate::authority::{EntityRef, RemoteAuthority};
use crate::binding::ListBinding;
use crate::config::SyncConfig;
use crate::edit::FieldEditor;
use crate::engine::{Deleted, OptimisticSyncEngine, StagedMove};
use crate::error::SyncError;
use crate::notice::NoticeBus;
use serde_json::Value;
use std::sync::Arc;
use taskboard_model::{
    Board, BoardDetail, CollectionId, EntityKind, FieldMap, FieldName, Identifier, ModelError,
    Move, OrderedCollection, Section, Task,
};
use taskboard_store::MoveOutcome;
use tracing::{info, warn};

/// Sections and tasks of one board
pub struct BoardView {
    board: Board,
    editor: FieldEditor,
    sections: OptimisticSyncEngine<Section>,
    tasks: OptimisticSyncEngine<Task>,
}

impl std::fmt::Debug for BoardView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoardView")
            .field("board", &self.board.id)
            .field("sections", &self.sections)
            .field("tasks", &self.tasks)
            .finish_non_exhaustive()
    }
}

impl BoardView {
    pub(crate) async fn open(
        authority: Arc<dyn RemoteAuthority>,
        notices: NoticeBus,
        editor: FieldEditor,
        config: &SyncConfig,
        id: Identifier,
    ) -> Result<Self, SyncError> {
        let record = match authority.fetch_board(id.clone()).await {
            Ok(record) => record,
            Err(err) => {
                warn!(board = %id, error = %err, "board fetch failed");
                notices.report(None, None, &err);
                return Err(err.into());
            }
        };
        let detail: BoardDetail =
            serde_json::from_value(record).map_err(|source| ModelError::Decode {
                kind: EntityKind::Board,
                source,
            })?;

        let sections = OptimisticSyncEngine::new(
            ListBinding::sections(id.clone()),
            Arc::clone(&authority),
            notices.clone(),
            config,
        );
        let tasks = OptimisticSyncEngine::new(
            ListBinding::tasks(id.clone()),
            authority,
            notices,
            config,
        );

        sections.hydrate(OrderedCollection::from_entities(
            CollectionId::owned_by(&id),
            detail.sections.iter().map(|s| s.section.clone()),
        ));
        for section in detail.sections {
            tasks.hydrate(OrderedCollection::from_entities(
                CollectionId::owned_by(&section.section.id),
                section.tasks,
            ));
        }
        info!(board = %id, sections = tasks.collection_ids().len(), "board opened");

        Ok(Self {
            board: detail.board,
            editor,
            sections,
            tasks,
        })
    }

    /// Board header as fetched
    #[inline]
    #[must_use]
    pub fn board(&self) -> &Board {
        &self.board
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> &Identifier {
        &self.board.id
    }

    fn section_list(&self) -> CollectionId {
        CollectionId::owned_by(&self.board.id)
    }

    /// Sections in display order
    #[must_use]
    pub fn sections(&self) -> Vec<Section> {
        self.sections.items(&self.section_list())
    }

    /// Tasks of one section in display order
    #[must_use]
    pub fn tasks(&self, section: &Identifier) -> Vec<Task> {
        self.tasks.items(&CollectionId::owned_by(section))
    }

    #[inline]
    #[must_use]
    pub fn section_engine(&self) -> &OptimisticSyncEngine<Section> {
        &self.sections
    }

    #[inline]
    #[must_use]
    pub fn task_engine(&self) -> &OptimisticSyncEngine<Task> {
        &self.tasks
    }

    // ------------------------------------------------------------------
    // Sections
    // ------------------------------------------------------------------

    /// Append an empty section with an empty task list
    ///
    /// # Errors
    /// Returns `SyncError::Authority` if the authority rejects the create
    pub async fn create_section(&self) -> Result<Section, SyncError> {
        let section = self
            .sections
            .create(&self.section_list(), FieldMap::new())
            .await?;
        self.tasks
            .hydrate(OrderedCollection::new(CollectionId::owned_by(&section.id)));
        Ok(section)
    }

    /// Remove a section with its tasks and fire its delete
    pub fn delete_section(&self, id: &Identifier) -> Option<Deleted<Section>> {
        let list = CollectionId::owned_by(id);
        for task in self.tasks.items(&list) {
            self.editor.discard(&self.tasks, &task.id);
        }
        self.tasks.remove_collection(&list);
        self.editor.discard(&self.sections, id);
        self.sections.delete(id)
    }

    /// Rename a section (coalesced)
    ///
    /// # Errors
    /// Returns `SyncError::UnknownItem` if the section is not loaded
    pub fn rename_section(&self, id: &Identifier, title: &str) -> Result<(), SyncError> {
        self.editor.edit(
            std::slice::from_ref(&self.sections),
            EntityRef::section(self.board.id.clone(), id.clone()),
            FieldName::TITLE,
            Value::from(title),
        )
    }

    /// Reorder the section list
    ///
    /// # Errors
    /// Returns the local rejection or the authority failure (already rolled back)
    pub async fn move_section(&self, mv: Move) -> Result<MoveOutcome, SyncError> {
        self.sections.move_item(mv).await
    }

    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    /// Create an empty task at the top of a section
    ///
    /// # Errors
    /// - `SyncError::Store` if the section is not loaded
    /// - `SyncError::Authority` if the authority rejects the create
    pub async fn create_task(&self, section: &Identifier) -> Result<Task, SyncError> {
        self.tasks
            .create(&CollectionId::owned_by(section), FieldMap::new())
            .await
    }

    /// Remove a task and fire its delete
    pub fn delete_task(&self, id: &Identifier) -> Option<Deleted<Task>> {
        self.editor.discard(&self.tasks, id);
        self.tasks.delete(id)
    }

    /// Edit a task's title or content (coalesced)
    ///
    /// # Errors
    /// - `SyncError::UnknownItem` if the task is not loaded
    /// - `SyncError::Model` if the value does not fit the field
    pub fn edit_task(&self, id: &Identifier, field: FieldName, value: impl Into<Value>) -> Result<(), SyncError> {
        self.editor.edit(
            std::slice::from_ref(&self.tasks),
            EntityRef::task(self.board.id.clone(), id.clone()),
            field,
            value.into(),
        )
    }

    /// Commit a task's pending edits (task editor closed)
    pub async fn close_task(&self, id: &Identifier) -> usize {
        self.editor.flush_target(id).await
    }

    /// Move a task within or across sections and wait for the write
    ///
    /// # Errors
    /// Returns the local rejection or the authority failure (already rolled back)
    pub async fn move_task(&self, mv: Move) -> Result<MoveOutcome, SyncError> {
        self.tasks.move_item(mv).await
    }

    /// Move a task locally; the returned write is sent when settled
    ///
    /// # Errors
    /// Returns `SyncError::Store` if the move does not fit local state
    pub fn stage_task_move(&self, mv: Move) -> Result<Option<StagedMove<Task>>, SyncError> {
        self.tasks.stage_move(mv)
    }

    /// Commit pending edits of every section and task of this board
    pub async fn close(&self) -> usize {
        let mut targets: Vec<Identifier> = self.sections().into_iter().map(|s| s.id).collect();
        for list in self.tasks.collection_ids() {
            targets.extend(self.tasks.items(&list).into_iter().map(|t| t.id));
        }

        let mut flushed = 0;
        for target in &targets {
            flushed += self.editor.flush_target(target).await;
        }
        info!(board = %self.board.id, flushed, "board closed");
        flushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::{MockRemoteAuthority, OrderAck, OrderRequest, Scope};
    use crate::error::AuthorityError;
    use crate::notice::SavedFlag;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    fn board_record() -> Value {
        json!({
            "id": "b1",
            "title": "Roadmap",
            "sections": [
                { "id": "s1", "title": "Todo", "tasks": [ { "id": "A" }, { "id": "B" } ] },
                { "id": "s2", "title": "Done", "tasks": [ { "id": "X" } ] }
            ]
        })
    }

    async fn open(mut mock: MockRemoteAuthority) -> BoardView {
        mock.expect_fetch_board().returning(|_| Ok(board_record()));
        let authority: Arc<dyn RemoteAuthority> = Arc::new(mock);
        let notices = NoticeBus::new(16);
        let config = SyncConfig::default();
        let editor = FieldEditor::new(
            Arc::clone(&authority),
            notices.clone(),
            SavedFlag::new(),
            config.clone(),
        );
        BoardView::open(authority, notices, editor, &config, "b1".into())
            .await
            .unwrap()
    }

    fn ids<T: taskboard_model::Entity>(items: &[T]) -> Vec<&str> {
        items.iter().map(|item| item.id().as_str()).collect()
    }

    #[tokio::test]
    async fn open_hydrates_sections_and_tasks() {
        let view = open(MockRemoteAuthority::new()).await;

        assert_eq!(view.board().title, "Roadmap");
        assert_eq!(ids(&view.sections()), vec!["s1", "s2"]);
        assert_eq!(ids(&view.tasks(&"s1".into())), vec!["A", "B"]);
        assert_eq!(ids(&view.tasks(&"s2".into())), vec!["X"]);
    }

    #[tokio::test]
    async fn open_failure_is_reported() {
        let mut mock = MockRemoteAuthority::new();
        mock.expect_fetch_board()
            .returning(|id| Err(AuthorityError::NotFound(id.to_string())));
        let authority: Arc<dyn RemoteAuthority> = Arc::new(mock);
        let notices = NoticeBus::new(4);
        let mut rx = notices.subscribe();
        let editor = FieldEditor::new(Arc::clone(&authority), notices.clone(), SavedFlag::new(), SyncConfig::default());

        let err = BoardView::open(authority, notices, editor, &SyncConfig::default(), "gone".into())
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Authority(AuthorityError::NotFound(_))));
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn sections_append_and_tasks_prepend() {
        let mut mock = MockRemoteAuthority::new();
        mock.expect_create().returning(|req| {
            let id = match req.kind {
                EntityKind::Section => "s3",
                _ => "T",
            };
            Ok(json!({ "id": id }))
        });
        let view = open(mock).await;

        let section = view.create_section().await.unwrap();
        assert_eq!(ids(&view.sections()), vec!["s1", "s2", "s3"]);
        assert!(view.tasks(&section.id).is_empty());

        view.create_task(&"s2".into()).await.unwrap();
        assert_eq!(ids(&view.tasks(&"s2".into())), vec!["T", "X"]);
    }

    #[tokio::test]
    async fn deleting_a_section_drops_its_tasks() {
        let mut mock = MockRemoteAuthority::new();
        mock.expect_delete()
            .withf(|target| target.kind == EntityKind::Section && target.board == Some("b1".into()))
            .times(1)
            .returning(|_| Ok(()));
        let view = open(mock).await;

        let deleted = view.delete_section(&"s1".into()).unwrap();
        deleted.settled().await;

        assert_eq!(ids(&view.sections()), vec!["s2"]);
        assert!(view.task_engine().locate(&"A".into()).is_none());
        assert_eq!(view.task_engine().collection_ids(), vec![CollectionId::from("s2")]);
    }

    #[tokio::test]
    async fn task_transfer_between_sections() {
        let mut mock = MockRemoteAuthority::new();
        mock.expect_persist_order()
            .withf(|req| matches!(req, OrderRequest::Transfer(t) if t.board == "b1".into()))
            .times(1)
            .returning(|req| Ok(OrderAck::echo(&req)));
        let view = open(mock).await;

        view.move_task(Move::across("s1".into(), "s2".into(), "A".into(), 1))
            .await
            .unwrap();

        assert_eq!(ids(&view.tasks(&"s1".into())), vec!["B"]);
        assert_eq!(ids(&view.tasks(&"s2".into())), vec!["X", "A"]);
    }

    #[tokio::test]
    async fn section_reorder_uses_section_scope() {
        let mut mock = MockRemoteAuthority::new();
        mock.expect_persist_order()
            .withf(|req| {
                matches!(req, OrderRequest::Reorder { scope: Scope::Sections { board }, .. } if *board == "b1".into())
            })
            .times(1)
            .returning(|req| Ok(OrderAck::echo(&req)));
        let view = open(mock).await;

        view.move_section(Move::within("b1".into(), "s2".into(), 0))
            .await
            .unwrap();
        assert_eq!(ids(&view.sections()), vec!["s2", "s1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn task_edits_wait_for_rich_text_delay_unless_closed() {
        let mut mock = MockRemoteAuthority::new();
        mock.expect_update()
            .withf(|target, fields| {
                target.kind == EntityKind::Task && fields.get(&FieldName::CONTENT) == Some(&json!("<p>hi</p>"))
            })
            .times(1)
            .returning(|target, fields| {
                let mut record = fields.to_json();
                record["id"] = json!(target.id);
                Ok(record)
            });
        let view = open(mock).await;

        view.edit_task(&"A".into(), FieldName::CONTENT, "<p>h</p>").unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        view.edit_task(&"A".into(), FieldName::CONTENT, "<p>hi</p>").unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(view.tasks(&"s1".into())[0].content, "<p>hi</p>");
        assert_eq!(view.close_task(&"A".into()).await, 1);
        assert_eq!(view.close().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_rename_keeps_local_title_and_reports_inline() {
        let mut mock = MockRemoteAuthority::new();
        mock.expect_update()
            .returning(|_, _| Err(AuthorityError::validation("title too long")));
        let view = open(mock).await;
        let mut notices = view.sections.notices().subscribe();

        view.rename_section(&"s1".into(), "Backlog").unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(view.sections()[0].title, "Backlog");
        assert_eq!(
            notices.recv().await.unwrap(),
            crate::notice::Notice::Inline {
                target: "s1".into(),
                field: FieldName::TITLE,
                message: "title too long".into(),
            }
        );
    }
}
