use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use taskpilot_core::{
    Actor, Artifact, Clarification, ClarificationId, DesignDecision, StatusTransition, WorkItem,
    WorkItemId, WorkItemKind, WorkItemStatus,
};
use taskpilot_server::config::Config;
use taskpilot_server::scheduler::Scheduler;
use taskpilot_server::workflow::{
    InMemoryRepository, NewItem, SqliteRepository, WorkflowRepository, WorkflowService,
};
use taskpilot_server::{build_service, recording_logger};

/// Taskpilot: drive work items through the agent pipeline
#[derive(Parser, Debug)]
#[command(name = "taskpilot")]
#[command(about = "Operator CLI for the taskpilot workflow service", long_about = None)]
struct Cli {
    /// Keep state in memory instead of the configured database
    #[arg(long, global = true)]
    in_memory: bool,

    /// Database file (defaults to STATE_DIR/taskpilot.db)
    #[arg(long, global = true, conflicts_with = "in_memory")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Add a work item to the backlog
    Create(CreateArgs),
    /// List all work items
    List,
    /// Show an item with its history, artifacts and clarifications
    Show { id: String },
    /// Apply a workflow operation to an item
    Apply {
        id: String,
        #[command(subcommand)]
        operation: OperationCommand,
    },
    /// Answer a clarification question
    Answer(AnswerArgs),
    /// Run one pipeline cycle: expire, reconcile, run due agents
    Run,
    /// Check that each item's history replays to its status
    Verify {
        /// Only this item
        id: Option<String>,
    },
}

#[derive(Args, Debug)]
struct CreateArgs {
    /// feature or bug
    #[arg(long)]
    kind: WorkItemKind,

    #[arg(long)]
    title: String,

    #[arg(long, default_value = "")]
    description: String,

    /// GitHub issue backing the item
    #[arg(long)]
    issue: Option<u64>,

    /// Node ID of the item's card on the project board
    #[arg(long)]
    project_item: Option<String>,
}

#[derive(Args, Debug)]
struct AnswerArgs {
    clarification_id: String,

    #[arg(long)]
    token: String,

    #[arg(long)]
    answer: String,
}

#[derive(Subcommand, Debug)]
enum OperationCommand {
    /// Move a backlog item into its first design stage
    Approve,
    /// Approve a design
    ApproveDesign,
    /// Send a design back to its agent
    RequestDesignChanges {
        #[arg(long)]
        feedback: String,
    },
    /// Reject a design and return the item to the backlog
    RejectDesign {
        #[arg(long)]
        reason: String,
    },
    /// Record the merged design pull request
    MergeDesignPr {
        #[arg(long)]
        pr: u64,
    },
    /// Record the implementation pull request
    SubmitPr {
        #[arg(long)]
        pr: u64,
    },
    /// Send the implementation back with feedback
    RequestChanges {
        #[arg(long)]
        feedback: String,
    },
    /// Merge the implementation pull request
    Merge {
        /// Overrides the agent's commit message
        #[arg(long)]
        commit_message: Option<String>,
    },
    /// Open a revert of the merged pull request
    Revert,
    /// Merge the revert pull request
    MergeRevert,
    /// Undo the most recent status change
    Undo,
}

#[derive(Serialize)]
struct ItemDetails {
    item: WorkItem,
    undo_target: Option<WorkItemStatus>,
    history: Vec<StatusTransition>,
    artifacts: Vec<Artifact>,
    clarifications: Vec<Clarification>,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

async fn apply_operation(
    service: &WorkflowService,
    id: &WorkItemId,
    operation: OperationCommand,
) -> Result<()> {
    let actor = Actor::Human;
    let applied = match operation {
        OperationCommand::Approve => service.approve(id, actor).await,
        OperationCommand::ApproveDesign => {
            service
                .review_design(id, DesignDecision::Approve, actor)
                .await
        }
        OperationCommand::RequestDesignChanges { feedback } => {
            service
                .review_design(id, DesignDecision::RequestChanges { feedback }, actor)
                .await
        }
        OperationCommand::RejectDesign { reason } => {
            service
                .review_design(id, DesignDecision::Reject { reason }, actor)
                .await
        }
        OperationCommand::MergeDesignPr { pr } => service.merge_design_pr(id, pr, actor).await,
        OperationCommand::SubmitPr { pr } => service.submit_implementation_pr(id, pr, actor).await,
        OperationCommand::RequestChanges { feedback } => {
            service.request_changes_on_pr(id, feedback, actor).await
        }
        OperationCommand::Merge { commit_message } => {
            service
                .merge_implementation_pr(id, commit_message, actor)
                .await
        }
        OperationCommand::Revert => service.revert_merge(id, actor).await,
        OperationCommand::MergeRevert => service.merge_revert_pr(id, actor).await,
        OperationCommand::Undo => service.undo_status_change(id, actor).await,
    }?;
    print_json(&applied)
}

async fn show_item(service: &WorkflowService, id: &WorkItemId) -> Result<()> {
    let details = ItemDetails {
        item: service.get_item(id).await?,
        undo_target: service.undo_target(id).await?,
        history: service.history(id).await?,
        artifacts: service.artifacts(id).await?,
        clarifications: service.clarifications(id).await?,
    };
    print_json(&details)
}

async fn verify(service: &WorkflowService, only: Option<String>) -> Result<()> {
    let ids: Vec<WorkItemId> = match only {
        Some(id) => vec![WorkItemId::from(id)],
        None => service
            .list_items()
            .await?
            .into_iter()
            .map(|item| item.id)
            .collect(),
    };

    let mut failures = 0;
    for id in &ids {
        match service.verify_history(id).await {
            Ok(()) => println!("ok      {}", id),
            Err(e) => {
                failures += 1;
                println!("FAILED  {}: {}", id, e);
            }
        }
    }
    if failures > 0 {
        return Err(anyhow!("{} of {} item(s) failed verification", failures, ids.len()));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    let repository: Arc<dyn WorkflowRepository> = if cli.in_memory {
        Arc::new(InMemoryRepository::new())
    } else {
        let path = cli.database.unwrap_or_else(|| config.database_path());
        Arc::new(SqliteRepository::new(&path).with_context(|| {
            format!("Failed to open state database {}", path.display())
        })?)
    };
    let recording = recording_logger(&config);
    let service = Arc::new(build_service(&config, repository, recording.as_ref())?);

    let result = match cli.command {
        Commands::Create(args) => {
            let item = service
                .create_item(NewItem {
                    kind: args.kind,
                    title: args.title,
                    description: args.description,
                    issue_number: args.issue,
                    project_item_id: args.project_item,
                })
                .await?;
            println!("{}", item.id);
            Ok(())
        }
        Commands::List => {
            for item in service.list_items().await? {
                let review = item.review_status.map_or("-", |r| r.as_str());
                println!(
                    "{}  {:<8} {:<15} {:<26} {}",
                    item.id,
                    item.kind.as_str(),
                    item.status.as_str(),
                    review,
                    item.title
                );
            }
            Ok(())
        }
        Commands::Show { id } => show_item(&service, &WorkItemId::from(id)).await,
        Commands::Apply { id, operation } => {
            apply_operation(&service, &WorkItemId::from(id), operation).await
        }
        Commands::Answer(args) => {
            let answered = service
                .answer_clarification(
                    &ClarificationId::from(args.clarification_id),
                    &args.token,
                    &args.answer,
                )
                .await?;
            print_json(&answered)
        }
        Commands::Run => {
            let scheduler = Scheduler::new(service.clone(), config.drift_check);
            match scheduler.run_cycle().await? {
                Some(report) => print_json(&report),
                None => Err(anyhow!("a pipeline cycle is already running")),
            }
        }
        Commands::Verify { id } => verify(&service, id).await,
    };

    service.notifications().flush().await;
    result
}
