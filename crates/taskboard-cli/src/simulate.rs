//! Scripted session against the in-memory authority
//!
//! Each round rotates the board list, flips a favourite, types a board
//! title, edits a task and moves a task to the next section. Writes fail
//! periodically when configured. At the end every local order is compared
//! with the durable one.

use anyhow::Context;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use taskboard_model::{CollectionId, FieldName, Identifier, Move};
use taskboard_sync::{AuthorityError, RemoteAuthority, SyncConfig, SyncError, Workspace};
use taskboard_test_utils::{sample_authority, Operation};
use tokio::sync::broadcast::error::TryRecvError;
use tracing::info;

#[derive(Debug, Clone)]
pub(crate) struct SimulationConfig {
    pub(crate) rounds: usize,
    /// Fail every nth order write and field update (0 disables)
    pub(crate) fail_every: u64,
    pub(crate) latency: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            rounds: 5,
            fail_every: 0,
            latency: Duration::ZERO,
        }
    }
}

/// Local and durable order of one list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct ListReport {
    pub(crate) name: String,
    pub(crate) local: Vec<String>,
    pub(crate) durable: Vec<String>,
}

impl ListReport {
    fn new(name: impl Into<String>, local: &[Identifier], durable: &[Identifier]) -> Self {
        let strings = |ids: &[Identifier]| -> Vec<String> { ids.iter().map(ToString::to_string).collect() };
        Self {
            name: name.into(),
            local: strings(local),
            durable: strings(durable),
        }
    }

    #[must_use]
    pub(crate) fn converged(&self) -> bool {
        self.local == self.durable
    }
}

#[derive(Debug, Default, Serialize)]
pub(crate) struct SimulationReport {
    pub(crate) moves: usize,
    pub(crate) failed_moves: usize,
    pub(crate) toggles: usize,
    pub(crate) failed_toggles: usize,
    pub(crate) edits: usize,
    pub(crate) notices: usize,
    pub(crate) lists: Vec<ListReport>,
}

impl SimulationReport {
    #[must_use]
    pub(crate) fn converged(&self) -> bool {
        self.lists.iter().all(ListReport::converged)
    }

    fn tally(&mut self, result: Result<taskboard_sync::prelude::MoveOutcome, SyncError>) {
        self.moves += 1;
        if result.is_err() {
            self.failed_moves += 1;
        }
    }

    #[must_use]
    pub(crate) fn to_text(&self) -> String {
        let mut out = String::new();
        out.push_str("Simulation Report\n=================\n\n");
        out.push_str(&format!(
            "Moves: {} ({} failed)\nFavourite toggles: {} ({} failed)\nField edits: {}\nNotices: {}\n\n",
            self.moves, self.failed_moves, self.toggles, self.failed_toggles, self.edits, self.notices
        ));
        for list in &self.lists {
            let status = if list.converged() { "OK" } else { "DIVERGED" };
            out.push_str(&format!("{:<20} {status}\n", list.name));
            out.push_str(&format!("  local:   {}\n", list.local.join(", ")));
            if !list.converged() {
                out.push_str(&format!("  durable: {}\n", list.durable.join(", ")));
            }
        }
        out
    }
}

fn ids_of<T: taskboard_model::Entity>(items: &[T]) -> Vec<Identifier> {
    items.iter().map(|item| item.id().clone()).collect()
}

/// Run the scripted session
///
/// # Errors
/// Returns error if the session cannot be loaded or a local operation is
/// rejected; injected write failures are counted, not returned
pub(crate) async fn run(config: &SimulationConfig) -> anyhow::Result<SimulationReport> {
    let authority = Arc::new(sample_authority().with_latency(config.latency));
    if config.fail_every > 0 {
        for op in [Operation::PersistOrder, Operation::Update] {
            authority.fail_every(op, config.fail_every, AuthorityError::transient("injected failure"));
        }
    }

    let sync = SyncConfig::default()
        .with_field_debounce(Duration::from_millis(20))
        .with_rich_text_debounce(Duration::from_millis(50));
    let workspace = Workspace::new(Arc::clone(&authority) as Arc<dyn RemoteAuthority>, sync);
    let mut notices = workspace.subscribe();
    workspace.load().await.context("initial load failed")?;
    let roadmap = Identifier::from("roadmap");
    let view = workspace
        .open_board(&roadmap)
        .await
        .context("opening the sample board failed")?;

    let mut report = SimulationReport::default();
    for round in 0..config.rounds {
        let boards = workspace.boards();
        let Some(first) = boards.first() else { break };
        let mv = Move::within(CollectionId::boards(), first.id.clone(), boards.len() - 1);
        report.tally(workspace.move_board(mv).await);

        let target = boards[round % boards.len()].id.clone();
        report.toggles += 1;
        if workspace.toggle_favourite(&target).await.is_err() {
            report.failed_toggles += 1;
        }

        for stroke in 1..=3 {
            workspace.edit_board(&target, FieldName::TITLE, format!("Board {round}.{stroke}"))?;
            report.edits += 1;
        }

        let sections = view.sections();
        let source = sections
            .iter()
            .position(|section| !view.tasks(&section.id).is_empty());
        if let Some(index) = source {
            let from = &sections[index];
            let to = &sections[(index + 1) % sections.len()];
            let tasks = view.tasks(&from.id);
            if let Some(task) = tasks.first() {
                view.edit_task(&task.id, FieldName::CONTENT, format!("<p>round {round}</p>"))?;
                report.edits += 1;
                let mv = Move::across(
                    CollectionId::owned_by(&from.id),
                    CollectionId::owned_by(&to.id),
                    task.id.clone(),
                    0,
                );
                report.tally(view.move_task(mv).await);
            }
        }
        info!(round, "round finished");
    }

    view.close().await;
    workspace.close().await;

    loop {
        match notices.try_recv() {
            Ok(_) => report.notices += 1,
            Err(TryRecvError::Lagged(missed)) => {
                report.notices += usize::try_from(missed).unwrap_or(usize::MAX);
            }
            Err(_) => break,
        }
    }

    report.lists.push(ListReport::new(
        "boards",
        &ids_of(&workspace.boards()),
        &authority.board_order(),
    ));
    report.lists.push(ListReport::new(
        "favourites",
        &ids_of(&workspace.favourites()),
        &authority.favourite_order(),
    ));
    let sections = view.sections();
    report.lists.push(ListReport::new(
        "sections",
        &ids_of(&sections),
        &authority.section_order(&roadmap),
    ));
    for section in &sections {
        report.lists.push(ListReport::new(
            format!("tasks of {}", section.id),
            &ids_of(&view.tasks(&section.id)),
            &authority.task_order(&section.id),
        ));
    }
    Ok(report)
}
