//! Testing utilities for the taskboard workspace
//!
//! Shared fixtures and an in-memory authority with failure injection.

#![allow(missing_docs)]

pub mod memory;

pub use memory::{Call, InMemoryAuthority, Operation};

use std::sync::Arc;
use std::time::Duration;
use taskboard_model::{Board, Identifier, Section, Task};
use taskboard_sync::{SyncConfig, Workspace};

pub fn id(token: &str) -> Identifier {
    Identifier::from(token)
}

pub fn ids(tokens: &[&str]) -> Vec<Identifier> {
    tokens.iter().map(|t| id(t)).collect()
}

pub fn board(token: &str, title: &str) -> Board {
    Board::new(id(token)).with_title(title)
}

pub fn section(token: &str, title: &str) -> Section {
    let mut section = Section::new(id(token));
    section.title = title.to_string();
    section
}

pub fn task(token: &str, title: &str) -> Task {
    let mut task = Task::new(id(token));
    task.title = title.to_string();
    task
}

/// Default debounce delays with a short saved indicator
pub fn test_config() -> SyncConfig {
    SyncConfig::default().with_saved_flag(Duration::from_millis(100))
}

/// Three boards, "roadmap" favourited, with sections and tasks on "roadmap"
///
/// ```text
/// boards:      roadmap, groceries, travel
/// favourites:  roadmap
/// roadmap:     todo [t1, t2, t3], doing [t4], done []
/// ```
pub fn sample_authority() -> InMemoryAuthority {
    let roadmap = id("roadmap");
    InMemoryAuthority::new()
        .with_board(board("roadmap", "Roadmap").favourited())
        .with_board(board("groceries", "Groceries"))
        .with_board(board("travel", "Travel plans"))
        .with_section(&roadmap, section("todo", "Todo"))
        .with_section(&roadmap, section("doing", "Doing"))
        .with_section(&roadmap, section("done", "Done"))
        .with_task(&id("todo"), task("t1", "Draft outline"))
        .with_task(&id("todo"), task("t2", "Collect feedback"))
        .with_task(&id("todo"), task("t3", "Publish"))
        .with_task(&id("doing"), task("t4", "Review budget"))
}

/// Loaded workspace over `authority`
pub async fn loaded_workspace(authority: Arc<InMemoryAuthority>) -> Workspace {
    let workspace = Workspace::new(authority, test_config());
    workspace.load().await.unwrap();
    workspace
}

/// Route `tracing` output through the test harness (RUST_LOG filters it)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
