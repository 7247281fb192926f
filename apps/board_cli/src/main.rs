use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    load_settings, BoardSynchronizer, ClientSettings, IssueStore, MoveOutcome,
    NotificationBadgePoller, RestIssueStore,
};
use shared::{
    domain::{IssueKey, ProjectId, StateId},
    workflow::WorkflowGraph,
};
use tracing::warn;

#[derive(Parser, Debug)]
struct Cli {
    /// Overrides the configured API base URL.
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    token: Option<String>,
    /// Print JSON instead of a text listing.
    #[arg(long)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Lists the project's board, one column per workflow state.
    Board {
        project: i64,
    },
    /// States reachable in one step from the given state.
    Transitions {
        project: i64,
        state: String,
    },
    /// Moves an issue to another state.
    Move {
        project: i64,
        key: String,
        to: String,
    },
    /// Prints the unread notification count; with `--watch`, keeps polling.
    Notifications {
        #[arg(long)]
        watch: bool,
        #[arg(long)]
        mark_read: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();

    let mut settings = load_settings()?;
    if let Some(url) = cli.server_url.clone() {
        settings.server_url = url;
    }
    if let Some(token) = cli.token.clone() {
        settings.access_token = Some(token);
    }
    let store: Arc<dyn IssueStore> = Arc::new(
        RestIssueStore::from_settings(&settings)
            .with_context(|| format!("invalid server url '{}'", settings.server_url))?,
    );

    match cli.command {
        Command::Board { project } => {
            print_board(&store, &settings, ProjectId(project), cli.json).await
        }
        Command::Transitions { project, state } => {
            let workflow = store
                .fetch_workflow(ProjectId(project))
                .await
                .context("failed to fetch workflow")?;
            let graph = WorkflowGraph::new(workflow).context("workflow is malformed")?;
            let from = resolve_state(&graph, &state)?;
            for id in graph.allowed_next_states(from) {
                if let Some(next) = graph.state(id) {
                    println!("{}\t{}", next.id, next.name);
                }
            }
            Ok(())
        }
        Command::Move { project, key, to } => {
            let key = IssueKey::from(key.as_str());
            move_issue(store, &settings, ProjectId(project), key, &to).await
        }
        Command::Notifications { watch, mark_read } => {
            let poller = NotificationBadgePoller::new(store, settings.notification_poll_interval);
            if mark_read {
                let marked = poller
                    .mark_all_read()
                    .await
                    .context("failed to mark notifications read")?;
                println!("marked_read={marked}");
                return Ok(());
            }
            let count = poller
                .refresh_now()
                .await
                .context("failed to fetch unread count")?;
            println!("unread={count}");
            if watch {
                watch_notifications(poller).await?;
            }
            Ok(())
        }
    }
}

/// Accepts either a numeric state id or a case-insensitive state name.
fn resolve_state(graph: &WorkflowGraph, raw: &str) -> Result<StateId> {
    if let Ok(id) = raw.parse::<i64>() {
        let id = StateId(id);
        return graph
            .contains_state(id)
            .then_some(id)
            .ok_or_else(|| anyhow!("unknown state {id}"));
    }
    graph
        .columns()
        .find(|state| state.name.eq_ignore_ascii_case(raw))
        .map(|state| state.id)
        .ok_or_else(|| anyhow!("unknown state '{raw}'"))
}

async fn print_board(
    store: &Arc<dyn IssueStore>,
    settings: &ClientSettings,
    project: ProjectId,
    json: bool,
) -> Result<()> {
    let board = BoardSynchronizer::load(Arc::clone(store), project, settings.board_options())
        .await
        .context("failed to load board")?;
    let snapshot = board.snapshot().await;
    if json {
        let columns: Vec<_> = snapshot
            .columns
            .iter()
            .map(|column| {
                serde_json::json!({
                    "state": column.state,
                    "issues": column.issues,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&columns)?);
        return Ok(());
    }
    for column in &snapshot.columns {
        println!("== {} ({})", column.state.name, column.issues.len());
        for issue in &column.issues {
            println!("  {}\t{}", issue.key, issue.title);
        }
    }
    Ok(())
}

async fn move_issue(
    store: Arc<dyn IssueStore>,
    settings: &ClientSettings,
    project: ProjectId,
    key: IssueKey,
    to: &str,
) -> Result<()> {
    let board = BoardSynchronizer::load(store, project, settings.board_options())
        .await
        .context("failed to load board")?;
    let target = resolve_state(board.graph(), to)?;
    let snapshot = board.snapshot().await;
    let issue = snapshot
        .columns
        .iter()
        .flat_map(|column| column.issues.iter())
        .find(|issue| issue.key == key)
        .ok_or_else(|| anyhow!("issue {key} is not on the board"))?;

    let pending = board.move_issue(issue.id, target).await?;
    let outcome = pending.outcome().await;
    board.teardown().await;
    match outcome {
        MoveOutcome::Unchanged => println!("{key} already in that state"),
        MoveOutcome::Confirmed(issue) => println!("{key} -> {}", issue.state.name),
        MoveOutcome::RolledBack {
            error,
            reload_error,
        } => {
            if let Some(reload_error) = reload_error {
                warn!("board reload after failed move also failed: {reload_error}");
            }
            return Err(anyhow::Error::new(error).context(format!("failed to move {key}")));
        }
        MoveOutcome::Superseded | MoveOutcome::Cancelled => {
            return Err(anyhow!("move of {key} did not complete"));
        }
    }
    Ok(())
}

async fn watch_notifications(poller: Arc<NotificationBadgePoller>) -> Result<()> {
    let mut badge = poller.subscribe();
    poller.start();
    loop {
        tokio::select! {
            changed = badge.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(count) = *badge.borrow_and_update() {
                    println!("unread={count}");
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    poller.stop();
    Ok(())
}
