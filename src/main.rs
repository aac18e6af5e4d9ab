use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

mod cmd;

#[derive(Parser)]
#[command(name = "dealflow")]
#[command(version, about = "Sales pipeline tracker: deals, stages and the won/lost lifecycle")]
pub struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Print command results as JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Identity recorded on changes. Overrides DEALFLOW_USER and [session] user.
    #[arg(long, global = true)]
    pub user: Option<String>,

    /// Storage backend: json, sqlite, memory. Overrides [storage] backend.
    #[arg(long, global = true)]
    pub storage: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new dealflow project
    Init,
    /// Create, edit and close deals
    Deal {
        #[command(subcommand)]
        command: DealCommands,
    },
    /// Manage pipeline stages
    Stage {
        #[command(subcommand)]
        command: StageCommands,
    },
    /// Manage notes on a deal
    Note {
        #[command(subcommand)]
        command: NoteCommands,
    },
    /// Show the kanban board
    Board {
        /// active, won, lost or all
        #[arg(short, long, default_value = "active")]
        filter: String,
        /// Include archived deals
        #[arg(long)]
        archived: bool,
    },
    /// Pipeline value, forecast, win rate and stale deals
    Stats,
    /// Inspect or prune the audit trail
    Audit {
        #[command(subcommand)]
        command: AuditCommands,
    },
    /// Show the activity timeline for a deal or stage, or log a new activity
    Activity {
        /// Deal id (or unique prefix) or stage id
        entity_id: String,
        /// Log an activity of this kind: call, email, meeting, task, note
        #[arg(long, requires = "title")]
        log: Option<String>,
        #[arg(long)]
        title: Option<String>,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Serve the HTTP API and WebSocket change feed
    Serve {
        /// Port to serve on (defaults to [server] port)
        #[arg(short, long)]
        port: Option<u16>,
        /// Address to bind (defaults to [server] host)
        #[arg(long)]
        host: Option<String>,
        /// Allow cross-origin requests
        #[arg(long)]
        cors: bool,
    },
}

#[derive(Subcommand)]
pub enum DealCommands {
    /// Create a deal
    Add {
        title: String,
        #[arg(long)]
        company: Option<String>,
        #[arg(long)]
        contact: Option<String>,
        #[arg(long, default_value = "0")]
        value: f64,
        #[arg(long, default_value = "0")]
        probability: u8,
        /// Starting stage (defaults to [pipeline] default_stage)
        #[arg(long)]
        stage: Option<String>,
        /// Expected close date (YYYY-MM-DD)
        #[arg(long)]
        close_date: Option<NaiveDate>,
        #[arg(long)]
        assign: Option<String>,
        /// Custom field as label=value (repeatable)
        #[arg(long = "field")]
        fields: Vec<String>,
    },
    /// Edit a deal's descriptive fields
    Update {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        company: Option<String>,
        #[arg(long)]
        contact: Option<String>,
        #[arg(long)]
        value: Option<f64>,
        #[arg(long)]
        probability: Option<u8>,
        #[arg(long, conflicts_with = "clear_close_date")]
        close_date: Option<NaiveDate>,
        /// Remove the expected close date
        #[arg(long)]
        clear_close_date: bool,
        #[arg(long, conflicts_with = "unassign")]
        assign: Option<String>,
        /// Remove the assignee
        #[arg(long)]
        unassign: bool,
        /// Replace custom fields with these label=value pairs
        #[arg(long = "field")]
        fields: Vec<String>,
    },
    /// Move a deal to a stage, optionally next to another deal
    Move {
        id: String,
        stage: String,
        /// Place before this deal
        #[arg(long, conflicts_with = "after")]
        before: Option<String>,
        /// Place after this deal
        #[arg(long)]
        after: Option<String>,
    },
    /// Close a deal as won
    Win { id: String },
    /// Close a deal as lost
    Lose {
        id: String,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Return a won or lost deal to the pipeline
    Reopen { id: String },
    /// Hide a deal from the board
    Archive { id: String },
    /// Restore an archived deal
    Unarchive { id: String },
    /// Delete a deal permanently
    Delete { id: String },
    /// List deals in pipeline order
    List {
        /// active, won, lost or all
        #[arg(short, long, default_value = "active")]
        filter: String,
        /// Include archived deals
        #[arg(long)]
        archived: bool,
    },
    /// Show one deal with notes and activity
    Show { id: String },
}

#[derive(Subcommand)]
pub enum StageCommands {
    /// Append a stage
    Add { id: String, name: String },
    /// Rename a stage
    Rename { id: String, name: String },
    /// Delete a stage
    Delete {
        id: String,
        /// Move the stage's deals here first instead of leaving them stranded
        #[arg(long)]
        reassign_to: Option<String>,
    },
    /// List stages with deal counts
    List,
}

#[derive(Subcommand)]
pub enum NoteCommands {
    /// Add a note to a deal
    Add { deal_id: String, content: String },
    /// Replace a note's content
    Edit { id: String, content: String },
    /// Delete a note
    Delete { id: String },
    /// List a deal's notes
    List { deal_id: String },
}

#[derive(Subcommand)]
pub enum AuditCommands {
    /// List audit entries, newest first
    List {
        #[arg(long)]
        entity_type: Option<String>,
        #[arg(long)]
        entity_id: Option<String>,
        #[arg(long)]
        action: Option<String>,
        #[arg(long = "by")]
        performed_by: Option<String>,
        /// Only entries on or after this date (YYYY-MM-DD)
        #[arg(long)]
        since: Option<NaiveDate>,
        #[arg(long, default_value = "50")]
        limit: usize,
    },
    /// Drop entries older than N days
    Prune {
        #[arg(long)]
        older_than_days: i64,
        /// Prune the activity feed as well
        #[arg(long)]
        activities: bool,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default dealflow.toml file
    Init,
}

fn init_tracing(verbose: bool, log_json: bool) {
    let fallback = if verbose { "dealflow=debug" } else { "dealflow=warn" };
    let filter = EnvFilter::try_from_env("DEALFLOW_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(fallback));

    if log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let storage = cli.storage.as_deref().map(str::parse).transpose()?;
    let ctx = cmd::CmdContext {
        project_dir,
        user: cli.user.clone(),
        storage,
        json: cli.json,
    };

    match cli.command {
        Commands::Init => cmd::cmd_init(&ctx)?,
        Commands::Deal { command } => cmd::cmd_deal(&ctx, command)?,
        Commands::Stage { command } => cmd::cmd_stage(&ctx, command)?,
        Commands::Note { command } => cmd::cmd_note(&ctx, command)?,
        Commands::Board { filter, archived } => cmd::cmd_board(&ctx, &filter, archived)?,
        Commands::Stats => cmd::cmd_stats(&ctx)?,
        Commands::Audit { command } => cmd::cmd_audit(&ctx, command)?,
        Commands::Activity {
            entity_id,
            log,
            title,
            description,
        } => cmd::cmd_activity(&ctx, &entity_id, log.as_deref(), title.as_deref(), &description)?,
        Commands::Config { command } => cmd::cmd_config(&ctx, command)?,
        Commands::Serve { port, host, cors } => cmd::cmd_serve(&ctx, port, host, cors).await?,
    }

    Ok(())
}
