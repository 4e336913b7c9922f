//! # codekt CLI (`kt`)
//!
//! ## Usage
//!
//! ```bash
//! kt --config ./config/kt.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kt init` | Create the SQLite database and run schema migrations |
//! | `kt extract <file>` | Print the structural facts of one Python file as JSON |
//! | `kt analyze <path>` | Analyze a project: docs, KT plan, search index |
//! | `kt projects` | List analyzed projects |
//! | `kt docs <id>` | Print a project's documentation |
//! | `kt plan <id>` | Print a project's KT plan with progress |
//! | `kt progress <id> <day>` | Mark a plan day done (or `--undo`) |
//! | `kt ask <id> "<question>"` | Ask a question about a project |
//! | `kt serve` | Start the HTTP API |

use anyhow::bail;
use clap::{Parser, Subcommand};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use codekt::config::{self, Config};
use codekt::extract::{self, FileOutcome};
use codekt::llm::LlmClients;
use codekt::pipeline::{self, AppContext};
use codekt::{chat, db, migrate, server, store};

/// codekt: structural analysis and knowledge-transfer material for
/// Python codebases.
#[derive(Parser)]
#[command(name = "kt", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kt.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v info, -vv debug). `RUST_LOG` overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Extract classes, functions, and imports from one Python file.
    ///
    /// Prints the facts as JSON. Exits with status 1 when the file does
    /// not parse. Needs no configuration file.
    Extract {
        file: PathBuf,
    },

    /// Analyze a project directory and store its documentation, KT plan,
    /// and search index.
    Analyze {
        path: PathBuf,

        /// Perspective for the generated material (frontend, backend, fullstack, ...).
        #[arg(long, default_value = "fullstack")]
        role: String,
    },

    /// List analyzed projects, newest first.
    Projects,

    /// Print a project's documentation.
    Docs {
        id: String,
    },

    /// Print a project's KT plan with per-day progress.
    Plan {
        id: String,
    },

    /// Record progress on one plan day.
    Progress {
        id: String,
        day: i64,

        /// Mark the day completed (default).
        #[arg(long, group = "state")]
        done: bool,

        /// Mark the day not completed.
        #[arg(long, group = "state")]
        undo: bool,

        #[arg(long)]
        notes: Option<String>,
    },

    /// Ask a question about an analyzed project.
    Ask {
        id: String,
        question: String,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

fn init_tracing(verbose: u8) {
    use tracing_subscriber::EnvFilter;

    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

async fn open_pool(cfg: &Config) -> anyhow::Result<sqlx::SqlitePool> {
    let pool = db::connect(cfg).await?;
    migrate::apply(&pool).await?;
    Ok(pool)
}

async fn open_context(cfg: Config) -> anyhow::Result<AppContext> {
    let pool = open_pool(&cfg).await?;
    let llm = LlmClients::from_config(&cfg.llm)?;
    Ok(AppContext {
        config: Arc::new(cfg),
        pool,
        llm,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // extract needs no config file
    let cfg = match &cli.command {
        Commands::Extract { .. } => Config::minimal(),
        _ => config::load_config(&cli.config)?,
    };

    match cli.command {
        Commands::Extract { file } => run_extract(&file)?,
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Analyze { path, role } => {
            let ctx = open_context(cfg).await?;
            let summary = pipeline::run_analysis(&ctx, &path, &role).await?;
            println!("Project: {}", summary.project_id);
            println!("Files analyzed: {}", summary.files_analyzed);
            println!("Parse failures: {}", summary.parse_failures);
            println!("Unsupported files: {}", summary.unsupported);
            println!("Unreadable files: {}", summary.unreadable);
            println!("Status: {}", summary.status);
        }
        Commands::Projects => {
            let pool = open_pool(&cfg).await?;
            let projects = store::list_projects(&pool).await?;
            if projects.is_empty() {
                println!("No projects.");
            }
            for p in projects {
                println!(
                    "{}  {}  role={}  files={}  status={}  {}",
                    p.id, p.path, p.role, p.files_analyzed, p.status, p.created_at
                );
            }
        }
        Commands::Docs { id } => {
            let pool = open_pool(&cfg).await?;
            store::get_project(&pool, &id).await?;
            match store::get_documentation(&pool, &id).await? {
                Some(doc) => println!("{}", doc),
                None => println!("No documentation."),
            }
        }
        Commands::Plan { id } => {
            let pool = open_pool(&cfg).await?;
            store::get_project(&pool, &id).await?;
            let Some(plan) = store::get_kt_plan(&pool, &id).await? else {
                println!("No KT plan.");
                return Ok(());
            };
            let progress = store::get_progress(&pool, &id).await?;
            for day in &plan.plan {
                let done = progress.iter().any(|p| p.day == day.day && p.completed);
                println!("[{}] Day {}: {}", if done { "x" } else { " " }, day.day, day.title);
                if !day.focus.is_empty() {
                    println!("    Focus: {}", day.focus);
                }
                if !day.files_to_study.is_empty() {
                    println!("    Files: {}", day.files_to_study.join(", "));
                }
                if !day.exercise.is_empty() {
                    println!("    Exercise: {}", day.exercise);
                }
            }
        }
        Commands::Progress {
            id,
            day,
            done: _,
            undo,
            notes,
        } => {
            let pool = open_pool(&cfg).await?;
            store::update_progress(&pool, &id, day, !undo, notes.as_deref()).await?;
            println!(
                "Day {} marked {}.",
                day,
                if undo { "not completed" } else { "completed" }
            );
        }
        Commands::Ask { id, question } => {
            let ctx = open_context(cfg).await?;
            let answer = chat::ask(
                &ctx.pool,
                &ctx.config,
                ctx.llm.chat.as_deref(),
                &id,
                &question,
            )
            .await?;
            println!("{}", answer.answer);
            if !answer.sources.is_empty() {
                println!();
                println!("Sources:");
                for source in &answer.sources {
                    println!("  {} (complexity {})", source.file_path, source.complexity);
                }
            }
        }
        Commands::Serve => {
            let ctx = open_context(cfg).await?;
            server::run_server(ctx).await?;
        }
    }

    Ok(())
}

fn run_extract(file: &std::path::Path) -> anyhow::Result<()> {
    match extract::analyze_file(file) {
        FileOutcome::Parsed(fact) => {
            println!("{}", serde_json::to_string_pretty(&fact)?);
            Ok(())
        }
        FileOutcome::Failed(failure) => {
            eprintln!("Parse failure: {}", failure);
            std::process::exit(1);
        }
        FileOutcome::Unsupported { path, extension } => {
            bail!("No extractor for .{} files: {}", extension, path.display())
        }
        FileOutcome::Unreadable { path, reason } => {
            bail!("Cannot read {}: {}", path.display(), reason)
        }
    }
}
