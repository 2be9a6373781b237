use anyhow::{Context, Result, bail};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Arc, Mutex, mpsc};
use tracing_subscriber::EnvFilter;

use review_deck::cli::{self, Commands, ListArgs, ReviewArgs};
use review_deck::config::Config;
use review_deck::ingest::{GitBackend, Orchestrator};
use review_deck::score::Scorer;
use review_deck::store::{CommitFilter, Store};
use review_deck::tui::{App, run_tui};
use review_deck::{ReviewState, git::SyncOutcome};

fn main() -> Result<()> {
    let args = cli::parse_args();
    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    match args.command {
        None | Some(Commands::Tui) => {
            init_logging(Some(&config.log_path()))?;
            handle_tui(&config)?;
        }
        Some(Commands::Sync) => {
            init_logging(None)?;
            handle_sync(&config)?;
        }
        Some(Commands::List(list_args)) => {
            init_logging(None)?;
            handle_list(&config, &list_args)?;
        }
        Some(Commands::Review(review_args)) => {
            init_logging(None)?;
            handle_review(&config, &review_args)?;
        }
    }

    Ok(())
}

/// Install the tracing subscriber. The TUI owns the terminal, so it logs to a
/// file; headless commands log to stderr.
fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init();
        }
    }
    Ok(())
}

fn open_store(config: &Config) -> Result<Arc<Store>> {
    let path = config.db_path();
    let store = Store::open(&path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    Ok(Arc::new(store))
}

fn build_orchestrator(config: &Config, store: Arc<Store>) -> Orchestrator<GitBackend> {
    let scorer = match &config.manifest_markers {
        Some(markers) => Scorer::with_markers(markers.clone()),
        None => Scorer::default(),
    };
    Orchestrator::new(
        store,
        GitBackend::new(&config.code_folder),
        scorer,
        config.projects(),
    )
    .with_lookback(config.lookback())
    .with_workers(config.workers)
}

/// Handle the tui command - open the deck and sync in the background.
fn handle_tui(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let orchestrator = build_orchestrator(config, Arc::clone(&store));
    let app = App::new(store, Arc::new(orchestrator))?;
    run_tui(app)
}

/// Handle the sync command - one ingestion pass on the calling thread.
fn handle_sync(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let orchestrator = build_orchestrator(config, store);
    if orchestrator.projects().is_empty() {
        println!("No projects configured");
        return Ok(());
    }

    // Progress is printed from the report; nobody listens to the events.
    let (tx, _rx) = mpsc::channel();
    let report = orchestrator.run(&tx);

    for project in &report.projects {
        match &project.result {
            Ok(stats) => {
                let action = match stats.outcome {
                    SyncOutcome::Cloned => "cloned",
                    SyncOutcome::Updated => "updated",
                    SyncOutcome::UpToDate => "up to date",
                };
                println!(
                    "✓ {:20} {:10} {} new / {} extracted",
                    project.project, action, stats.inserted, stats.extracted
                );
            }
            Err(e) => println!("✗ {:20} {}", project.project, e),
        }
    }

    let summary = report.summary();
    if summary.succeeded == 0 {
        bail!("All {} projects failed to sync", summary.failed.len());
    }
    Ok(())
}

/// Handle the list command - print stored commits, oldest first.
fn handle_list(config: &Config, args: &ListArgs) -> Result<()> {
    let store = open_store(config)?;
    let filter = CommitFilter {
        project: args.project.clone(),
        state: if args.all {
            None
        } else {
            Some(ReviewState::New)
        },
    };
    let commits = store.load_commits(&filter)?;

    if commits.is_empty() {
        println!("No commits to review");
        return Ok(());
    }

    for commit in &commits {
        let marker = match commit.state {
            ReviewState::New => " ",
            ReviewState::Reviewed => "✓",
        };
        println!(
            "{} {:>3} {} {:12} {} {:16} {}",
            marker,
            commit.slat_score,
            commit.commit_time.format("%d.%m %H:%M"),
            commit.project,
            commit.short_hash(),
            commit.author_name,
            commit.subject
        );
    }
    Ok(())
}

/// Handle the review command - mark one commit reviewed.
fn handle_review(config: &Config, args: &ReviewArgs) -> Result<()> {
    let store = open_store(config)?;
    if !store.mark_reviewed(&args.project, &args.hash)? {
        bail!("No commit {} in project {}", args.hash, args.project);
    }
    if let Some(comment) = &args.comment {
        store.set_comment(&args.project, &args.hash, Some(comment))?;
    }
    println!("✓ Marked {} reviewed", args.hash);
    Ok(())
}
