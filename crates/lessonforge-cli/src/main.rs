//! LessonForge CLI
//!
//! Serves the authoring API and runs one-off publishing jobs against the
//! saved course state.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use lessonforge_orchestrator::{
    create_router, AppState, Config, CourseId, CourseOutline, HierarchyStore, RequestContext,
    RetryPolicy, SyncOrchestrator, SyncState, TreeReport,
};
use lessonforge_remote::HttpGateway;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default port for the HTTP API server.
const DEFAULT_PORT: u16 = 3000;

/// Owner recorded for work started from the command line.
const CLI_USER: &str = "cli";

/// LessonForge - Course authoring and publishing
///
/// Keeps courses, sections, lessons and steps locally and publishes them to
/// the remote learning platform.
#[derive(Parser, Debug)]
#[command(name = "lessonforge")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: lessonforge.json in current directory)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<String>,

    /// Path to the state snapshot (overrides stateFile from the config)
    #[arg(long, value_name = "FILE", global = true)]
    state_file: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API until Ctrl+C
    Serve {
        /// Port for the HTTP API server
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
    /// Publish a whole course tree and print the report
    Publish {
        /// Local course id
        #[arg(value_name = "COURSE_ID")]
        course_id: CourseId,
    },
    /// Print a course with its sections, lessons and steps in order
    Outline {
        /// Local course id
        #[arg(value_name = "COURSE_ID")]
        course_id: CourseId,
    },
    /// Load and validate the configuration, then print it
    CheckConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::debug!(config = ?args.config, state_file = ?args.state_file, "Arguments");

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(state_file) = args.state_file {
        config.state_file = state_file;
    }

    // Re-validate after overrides
    config.validate()?;

    match args.command {
        Command::Serve { port } => serve(&config, port).await,
        Command::Publish { course_id } => publish(&config, course_id).await,
        Command::Outline { course_id } => outline(&config, course_id).await,
        Command::CheckConfig => {
            print_config(&config);
            Ok(())
        }
    }
}

/// Serves the REST API and saves the snapshot on shutdown.
async fn serve(config: &Config, port: u16) -> anyhow::Result<()> {
    print_config(config);

    let state_path = PathBuf::from(&config.state_file);
    let store = load_store(&state_path).await?;
    let gateway = HttpGateway::new(config.gateway_config())
        .map_err(|e| anyhow::anyhow!("Failed to build remote client: {e}"))?;

    let app_state = AppState::build(Arc::clone(&store), Arc::new(gateway), config);
    let shutdown = app_state.shutdown.clone();
    let router = create_router(app_state);

    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {addr}: {e}\n\nSuggestion: Try a different port with --port"
        )
    })?;

    println!();
    println!("HTTP API server running on http://{addr}");
    println!("Press Ctrl+C to stop");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl+C, shutting down");
            }
            shutdown.cancel();
        })
        .await?;

    store.save(&state_path).await?;
    println!("State saved to {}", state_path.display());
    Ok(())
}

/// Publishes a course tree once, then saves the snapshot.
async fn publish(config: &Config, course_id: CourseId) -> anyhow::Result<()> {
    let state_path = PathBuf::from(&config.state_file);
    let store = load_store(&state_path).await?;
    let gateway = HttpGateway::new(config.gateway_config())
        .map_err(|e| anyhow::anyhow!("Failed to build remote client: {e}"))?;
    let sync = SyncOrchestrator::new(
        Arc::clone(&store),
        Arc::new(gateway),
        RetryPolicy::from(&config.sync),
    );

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C, cancelling publish");
            on_interrupt.cancel();
        }
    });

    let ctx = RequestContext::new(CLI_USER, config.remote.credential());
    let result = sync.publish_course_tree(&ctx, course_id, &cancel).await;

    // Progress made before a failure is still worth keeping
    store.save(&state_path).await?;

    let report = result?;
    print_report(&report);
    if report.is_complete() {
        Ok(())
    } else {
        anyhow::bail!(
            "{} entities failed to publish\n\nSuggestion: Fix the reported problems and run publish again",
            report.failed.len()
        )
    }
}

async fn outline(config: &Config, course_id: CourseId) -> anyhow::Result<()> {
    let store = load_store(Path::new(&config.state_file)).await?;
    let outline = store.outline(course_id).await?;
    print_outline(&outline);
    Ok(())
}

/// Loads configuration from the specified path or default location.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            let mut config = Config::load_from_file(path)?;
            config.apply_token_override(
                std::env::var(lessonforge_orchestrator::TOKEN_ENV_VAR).ok(),
            );
            Ok(config)
        }
        None => Ok(Config::load()?),
    }
}

async fn load_store(state_path: &Path) -> anyhow::Result<Arc<HierarchyStore>> {
    let store = HierarchyStore::load(state_path).await?;
    tracing::info!(path = %state_path.display(), "State loaded");
    Ok(Arc::new(store))
}

/// Prints the effective configuration.
fn print_config(config: &Config) {
    println!("Configuration loaded:");
    println!("  State file: {}", config.state_file);
    println!("  Remote: {}", config.remote.base_url);
    println!(
        "  Token: {}",
        if config.remote.credential().is_some() {
            "set"
        } else {
            "not set"
        }
    );
    println!("  Request timeout: {}s", config.remote.timeout_secs);
    println!(
        "  Retries: {} attempts, {}ms initial backoff, {}s per call",
        config.sync.max_attempts, config.sync.initial_backoff_ms, config.sync.call_timeout_secs
    );
}

fn print_report(report: &TreeReport) {
    println!("=== Publish Report ===");
    println!("Linked: {}", report.linked.len());
    for linked in &report.linked {
        println!("  {} -> {}", linked.entity, linked.remote_id);
    }
    if !report.failed.is_empty() {
        println!("Failed: {}", report.failed.len());
        for warning in &report.failed {
            println!("  {}: {}", warning.entity, warning.message);
        }
    }
    if !report.skipped.is_empty() {
        println!("Skipped: {}", report.skipped.len());
    }
}

fn sync_label(sync: &SyncState, remote_id: Option<lessonforge_remote::RemoteId>) -> String {
    remote_id.map_or_else(
        || format!("[{}]", sync.status),
        |id| format!("[{} #{id}]", sync.status),
    )
}

fn print_outline(outline: &CourseOutline) {
    let course = &outline.course;
    println!(
        "{} {}",
        course.title,
        sync_label(&course.sync, course.remote_id)
    );
    for section in &outline.sections {
        let s = &section.section;
        println!(
            "  {}. {} {}",
            s.position(),
            s.title,
            sync_label(&s.sync, s.remote_id)
        );
        for lesson in &section.lessons {
            let l = &lesson.lesson;
            println!(
                "    {}. {} {}",
                l.position(),
                l.title,
                sync_label(&l.sync, l.remote_id)
            );
            for step in &lesson.steps {
                println!(
                    "      {}. {} {}",
                    step.position(),
                    step.variant.kind(),
                    sync_label(&step.sync, step.remote_id)
                );
            }
        }
    }
}
