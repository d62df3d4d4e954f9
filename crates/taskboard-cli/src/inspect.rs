//! Read-only view of a live board API

use anyhow::Context;
use clap::ArgMatches;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use taskboard_http::{HttpAuthority, HttpConfig};
use taskboard_model::{Board, Identifier, Section, Task};
use taskboard_sync::{SyncConfig, Workspace};

#[derive(Debug, Serialize)]
struct BoardListing {
    boards: Vec<Board>,
    favourites: Vec<Board>,
    #[serde(skip_serializing_if = "Option::is_none")]
    board: Option<BoardContents>,
}

#[derive(Debug, Serialize)]
struct BoardContents {
    board: Board,
    sections: Vec<SectionContents>,
}

#[derive(Debug, Serialize)]
struct SectionContents {
    section: Section,
    tasks: Vec<Task>,
}

fn http_config(args: &ArgMatches) -> anyhow::Result<HttpConfig> {
    let mut config = match args.get_one::<PathBuf>("config") {
        Some(path) => HttpConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => HttpConfig::default(),
    };
    if let Some(base) = args.get_one::<String>("base-url") {
        config.base_url.clone_from(base);
    }
    let token = args
        .get_one::<String>("token")
        .cloned()
        .or_else(|| std::env::var("TASKBOARD_TOKEN").ok());
    if let Some(token) = token {
        config.token = Some(token);
    }
    config.validate()?;
    Ok(config)
}

/// List boards, favourites and optionally one board's contents
///
/// # Errors
/// Returns error on bad settings or any failed request
pub(crate) async fn run(args: &ArgMatches) -> anyhow::Result<()> {
    let http = http_config(args)?;
    let sync = match args.get_one::<PathBuf>("sync-config") {
        Some(path) => SyncConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => SyncConfig::default(),
    };

    let authority = HttpAuthority::new(&http)?;
    let workspace = Workspace::new(Arc::new(authority), sync);
    workspace
        .load()
        .await
        .with_context(|| format!("loading boards from {}", http.base_url))?;

    let board = match args.get_one::<String>("board") {
        Some(id) => {
            let view = workspace.open_board(&Identifier::from(id.as_str())).await?;
            let sections = view
                .sections()
                .into_iter()
                .map(|section| SectionContents {
                    tasks: view.tasks(&section.id),
                    section,
                })
                .collect();
            Some(BoardContents {
                board: view.board().clone(),
                sections,
            })
        }
        None => None,
    };
    let listing = BoardListing {
        boards: workspace.boards(),
        favourites: workspace.favourites(),
        board,
    };

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&listing)?);
    } else {
        print_listing(&listing);
    }
    Ok(())
}

fn label(board: &Board) -> String {
    let title = if board.title.is_empty() { "Untitled" } else { &board.title };
    format!("{} {title}", board.icon).trim().to_string()
}

fn print_listing(listing: &BoardListing) {
    println!("Boards");
    for board in &listing.boards {
        let star = if board.favourite { "*" } else { " " };
        println!("  {star} {:<28} {}", label(board), board.id);
    }
    println!("Favourites");
    for board in &listing.favourites {
        println!("    {:<28} {}", label(board), board.id);
    }

    if let Some(contents) = &listing.board {
        println!();
        println!("{}", label(&contents.board));
        for section in &contents.sections {
            let title = if section.section.title.is_empty() { "Untitled" } else { &section.section.title };
            println!("  {title} ({})", section.tasks.len());
            for task in &section.tasks {
                println!("    - {}", task.display_title());
            }
        }
    }
}
