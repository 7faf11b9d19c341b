//! `orchestrator` — command-line entry point for the code-modification
//! orchestrator (spec §6).
//!
//! ```bash
//! orchestrator run "add a null check before the dereference" \
//!     --files src/parser.rs --session-id s1
//! ```
//!
//! Exit codes: 0 ACCEPT, 10 REVISE (max attempts exhausted), 20
//! ROLLBACK, 30 FAST_PATH_FAILED_CRITICAL / cooldown active, 2
//! malformed input.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use coordination::{
    ExperienceRepository, Orchestrator, OrchestratorConfig, OrchestratorRequest, RocksDbLockStore,
    SqliteLockStore, TemplateStrategyGenerator,
};

#[derive(Parser)]
#[command(name = "orchestrator", about = "Reasoning router and reflection/fail-safe controller for autonomous code modification")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding the lock store / experience repository state.
    #[arg(long, global = true, default_value = "./orchestrator-data")]
    data_dir: PathBuf,

    /// Lock store backend.
    #[arg(long, global = true, value_enum, default_value = "rocksdb")]
    lock_backend: LockBackend,
}

#[derive(Clone, Copy, ValueEnum)]
enum LockBackend {
    Rocksdb,
    Sqlite,
}

#[derive(Subcommand)]
enum Command {
    /// Run one task through the router -> execution -> reflection pipeline.
    Run {
        /// Natural-language description of the change to make.
        problem: String,

        /// Target files the change is scoped to.
        #[arg(long = "files", required = true)]
        files: Vec<String>,

        /// Session identifier, used for lock ownership and fail-safe
        /// cooldown tracking. Generated if not supplied.
        #[arg(long)]
        session_id: Option<String>,

        /// Optional code snippet giving the router additional signal
        /// (security-sink keywords, complexity heuristics).
        #[arg(long)]
        snippet: Option<String>,

        /// Caps the number of slow-path ToT iterations before giving up
        /// with a REVISE verdict. Defaults to the orchestrator's
        /// configured `default_max_attempts`.
        #[arg(long)]
        max_attempts: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let config = match OrchestratorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };

    let lock_store: Arc<dyn coordination::LockStore> = match cli.lock_backend {
        LockBackend::Rocksdb => match RocksDbLockStore::open(cli.data_dir.join("locks")) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                eprintln!("error: failed to open lock store: {e}");
                return ExitCode::from(2);
            }
        },
        LockBackend::Sqlite => {
            let path = cli.data_dir.join("locks.sqlite3");
            match SqliteLockStore::open(path.to_string_lossy().as_ref()).await {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    eprintln!("error: failed to open lock store: {e}");
                    return ExitCode::from(2);
                }
            }
        }
    };

    let experience = match ExperienceRepository::open(cli.data_dir.join("experience")) {
        Ok(repo) => repo.shared(),
        Err(e) => {
            eprintln!("error: failed to open experience repository: {e}");
            return ExitCode::from(2);
        }
    };

    let agent_id =
        std::env::var("ORCHESTRATOR_AGENT_ID").unwrap_or_else(|_| "orchestrator-cli".to_string());

    let orchestrator = match Orchestrator::new(
        config,
        Arc::new(TemplateStrategyGenerator::new()),
        lock_store,
        experience,
        None,
        agent_id,
    ) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            eprintln!("error: failed to construct orchestrator: {e}");
            return ExitCode::from(2);
        }
    };

    match cli.command {
        Command::Run { problem, files, session_id, snippet, max_attempts } => {
            let session_id = session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let request = OrchestratorRequest {
                task_description: problem,
                session_id,
                target_files: files,
                code_snippet: snippet,
                max_attempts,
            };

            match orchestrator.handle(request).await {
                Ok(response) => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&response).unwrap_or_default()
                    );
                    match response.verdict.as_str() {
                        "ACCEPT" => ExitCode::from(0),
                        "REVISE" => ExitCode::from(10),
                        "ROLLBACK" => ExitCode::from(20),
                        other => {
                            eprintln!("warning: unrecognized verdict {other}");
                            ExitCode::from(20)
                        }
                    }
                }
                Err(e) => {
                    eprintln!("error: {e}");
                    ExitCode::from(e.exit_code() as u8)
                }
            }
        }
    }
}
