//! # stategraph
//!
//! Run and resume research assistant sessions stored on disk.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{Map, Value};
use stategraph_cli::{connectors, default_corpus, initial_state, research_graph, OfflineModel, GRAPH_ID};
use stategraph_core::checkpoint::FileCheckpointSaver;
use stategraph_core::collaborators::Document;
use stategraph_core::{ExecutionConfig, SessionService};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stategraph")]
#[command(about = "Run and resume checkpointed research sessions", long_about = None)]
#[command(version)]
struct Cli {
    /// Directory holding session checkpoints
    #[arg(long, env = "STATEGRAPH_STORE", default_value = ".stategraph", global = true)]
    store: PathBuf,

    /// Execution settings file (YAML); STATEGRAPH_* variables override it
    #[arg(long, env = "STATEGRAPH_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// JSON array of {content, source} documents to search instead of the built-in corpus
    #[arg(long, global = true)]
    corpus: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a research session; it parks for review once analysts exist
    Research {
        /// Research topic
        topic: String,

        /// Upper bound on analysts
        #[arg(long, default_value_t = stategraph_cli::research::DEFAULT_MAX_ANALYSTS)]
        max_analysts: u64,

        /// Expert answers per interview
        #[arg(long, default_value_t = stategraph_cli::research::DEFAULT_MAX_TURNS)]
        max_turns: u64,
    },

    /// Resume a parked session
    Resume {
        session_id: String,

        /// Feedback on the analysts; regenerates them instead of continuing
        #[arg(short, long)]
        feedback: Option<String>,

        /// State patch as a JSON object
        #[arg(short, long)]
        patch: Option<String>,
    },

    /// Show the latest state of a session
    State { session_id: String },

    /// List a session's checkpoints, newest first
    History {
        session_id: String,

        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Delete a session and its checkpoints
    Abandon { session_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("stategraph_core=info,stategraph_cli=info,warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let service = session_service(&cli)?;

    match cli.command {
        Commands::Research {
            topic,
            max_analysts,
            max_turns,
        } => {
            if max_analysts == 0 {
                bail!("--max-analysts must be at least 1");
            }
            let reply = service
                .start(GRAPH_ID, initial_state(&topic, max_analysts, max_turns))
                .await?;
            tracing::info!(session_id = %reply.session_id, status = ?reply.status, "Research session started");
            print_json(&reply)?;
        }
        Commands::Resume {
            session_id,
            feedback,
            patch,
        } => {
            let patch = resume_patch(patch.as_deref(), feedback)?;
            let reply = service.resume(&session_id, patch).await?;
            tracing::info!(session_id = %reply.session_id, status = ?reply.status, "Session resumed");
            print_json(&reply)?;
        }
        Commands::State { session_id } => {
            print_json(&service.state(&session_id).await?)?;
        }
        Commands::History { session_id, limit } => {
            print_json(&service.history(&session_id, limit).await?)?;
        }
        Commands::Abandon { session_id } => {
            service.abandon(&session_id).await?;
            tracing::info!(%session_id, "Session abandoned");
        }
    }

    Ok(())
}

fn session_service(cli: &Cli) -> Result<SessionService> {
    let config = match &cli.config {
        Some(path) => ExecutionConfig::from_file_with_env(path)
            .with_context(|| format!("loading execution settings from {}", path.display()))?,
        None => ExecutionConfig::from_env()?,
    };
    let corpus = match &cli.corpus {
        Some(path) => load_corpus(path)?,
        None => default_corpus(),
    };
    let (web, archive) = connectors(corpus);

    let graph = research_graph(Arc::new(OfflineModel::new()), Arc::new(web), Arc::new(archive))?
        .with_config(config);

    let mut service = SessionService::new(Arc::new(FileCheckpointSaver::new(&cli.store)));
    service.register(GRAPH_ID, graph);
    Ok(service)
}

fn load_corpus(path: &Path) -> Result<Vec<Document>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading corpus {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing corpus {}", path.display()))
}

/// Combine `--patch` and `--feedback` into one patch
fn resume_patch(patch: Option<&str>, feedback: Option<String>) -> Result<Value> {
    let mut fields = match patch {
        Some(raw) => match serde_json::from_str(raw).context("parsing --patch")? {
            Value::Object(fields) => fields,
            other => bail!("--patch must be a JSON object, got {}", other),
        },
        None => Map::new(),
    };
    if let Some(feedback) = feedback {
        fields.insert("human_analyst_feedback".to_string(), Value::String(feedback));
    }
    Ok(Value::Object(fields))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
