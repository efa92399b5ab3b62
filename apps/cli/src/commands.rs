//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use docmirror_core::{
    DocumentOutcome, ProgressReporter, RunSummary, SyncEngine, SyncMode, SyncOptions,
};
use docmirror_media::MediaManager;
use docmirror_remote::{DocumentFilter, NotionClient};
use docmirror_shared::{
    AppConfig, RemoteConfig, SyncConfig, config_file_path, init_config, load_config,
    load_config_from,
};
use docmirror_storage::SyncState;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// docmirror: mirror a document database into Markdown for a static site.
#[derive(Parser)]
#[command(
    name = "docmirror",
    version,
    about = "Incrementally mirror database pages into Markdown files with front matter.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file to use instead of ~/.docmirror/docmirror.toml.
    #[arg(long, global = true, env = "DOCMIRROR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Sync published documents into the content directory.
    Sync(SyncArgs),

    /// Verify credentials and the database schema.
    Check {
        /// Database to check (overrides config and env).
        #[arg(long)]
        database_id: Option<String>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args)]
pub(crate) struct SyncArgs {
    /// Ignore prior sync state and reconvert every document.
    #[arg(long)]
    pub force: bool,

    /// Like --force, and delete existing output documents first.
    /// Downloaded media is kept.
    #[arg(long)]
    pub clean: bool,

    /// Remove documents that are no longer listed upstream.
    #[arg(long)]
    pub prune: bool,

    /// Include documents whose published flag is not set.
    #[arg(long)]
    pub include_drafts: bool,

    /// Content root (overrides [sync].content_dir).
    #[arg(long)]
    pub content_dir: Option<PathBuf>,

    /// Static asset root (overrides [sync].static_dir).
    #[arg(long)]
    pub static_dir: Option<PathBuf>,

    /// Database to mirror (overrides config and env).
    #[arg(long)]
    pub database_id: Option<String>,

    /// Cancel the run after this many seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "docmirror=info",
        1 => "docmirror=debug",
        _ => "docmirror=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Sync(args) => cmd_sync(config_path, args).await,
        Command::Check { database_id } => cmd_check(config_path, database_id.as_deref()).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

fn load_app_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_sync(config_path: Option<&Path>, args: SyncArgs) -> Result<()> {
    let mut config = load_app_config(config_path)?;
    if let Some(dir) = &args.content_dir {
        config.sync.content_dir = dir.to_string_lossy().into_owned();
    }
    if let Some(dir) = &args.static_dir {
        config.sync.static_dir = dir.to_string_lossy().into_owned();
    }

    let remote = RemoteConfig::resolve(&config, args.database_id.as_deref())?;
    let sync_config = SyncConfig::from(&config);

    let client = Arc::new(NotionClient::new(&remote)?);
    let media = MediaManager::new(
        client.http().clone(),
        &sync_config.static_dir,
        sync_config.download_concurrency,
        remote.retry.clone(),
    );
    let engine = SyncEngine::new(Arc::clone(&client), media, &sync_config);

    let options = SyncOptions {
        mode: if args.clean || args.force {
            SyncMode::Full {
                remove_outputs: args.clean,
            }
        } else {
            SyncMode::Incremental
        },
        prune: args.prune,
        deadline: args.timeout_secs.map(Duration::from_secs),
        filter: if args.include_drafts {
            DocumentFilter::All
        } else {
            DocumentFilter::Published
        },
    };

    info!(
        database = %remote.database_id,
        content_dir = %sync_config.content_dir.display(),
        mode = ?options.mode,
        "starting sync"
    );

    let mut state = SyncState::load(&sync_config.state_file)?;

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, finishing in-flight documents");
                cancel.cancel();
            }
        })
    };

    let reporter = CliProgress::new();
    let result = engine.run(&mut state, &options, &cancel, &reporter).await;
    interrupt.abort();
    reporter.spinner.finish_and_clear();
    let summary = result?;

    print_summary(&summary);

    if summary.is_success() {
        Ok(())
    } else {
        Err(eyre!(
            "{} document(s) failed, {} cancelled",
            summary.failed,
            summary.cancelled
        ))
    }
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("  Sync finished ({})", summary.run_id);
    println!("  Listed:    {}", summary.listed);
    println!("  Committed: {} ({} written)", summary.committed, summary.written);
    println!("  Unchanged: {}", summary.skipped);
    println!("  Failed:    {}", summary.failed);
    if summary.cancelled > 0 {
        println!("  Cancelled: {}", summary.cancelled);
    }
    if summary.pruned > 0 {
        println!("  Pruned:    {}", summary.pruned);
    }
    println!("  Time:      {:.1}s", summary.elapsed.as_secs_f64());

    if !summary.failures.is_empty() {
        println!();
        println!("  Failures:");
        for failure in &summary.failures {
            println!("    - {failure}");
        }
    }
    if !summary.warnings.is_empty() {
        println!();
        println!("  Warnings:");
        for warning in &summary.warnings {
            println!("    - {warning}");
        }
    }
    println!();
}

async fn cmd_check(config_path: Option<&Path>, database_id: Option<&str>) -> Result<()> {
    let config = load_app_config(config_path)?;
    let remote = RemoteConfig::resolve(&config, database_id)?;
    let client = NotionClient::new(&remote)?;

    let report = client.check_connection().await?;

    println!();
    println!("  Connected as: {}", report.bot_name);
    println!("  Database:     {} ({})", report.database_title, client.database_id());
    println!("  Properties:");
    for (name, kind) in &report.properties {
        println!("    - {name}: {kind}");
    }
    if report.warnings.is_empty() {
        println!("  Schema looks good.");
    } else {
        println!("  Warnings:");
        for warning in &report.warnings {
            println!("    - {warning}");
        }
    }
    println!();
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = config_file_path()?;
    if path.exists() {
        return Err(eyre!("config already exists at {}", path.display()));
    }
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = load_app_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn documents_listed(&self, total: usize, to_sync: usize) {
        self.spinner
            .set_message(format!("{total} documents listed, {to_sync} to sync"));
    }

    fn document_done(
        &self,
        title: &str,
        outcome: &DocumentOutcome,
        current: usize,
        total: usize,
    ) {
        let status = match outcome {
            DocumentOutcome::Committed { .. } => "synced",
            DocumentOutcome::Skipped => "unchanged",
            DocumentOutcome::Failed { .. } => "failed",
            DocumentOutcome::Cancelled => "cancelled",
        };
        self.spinner
            .set_message(format!("[{current}/{total}] {status}: {title}"));
    }

    fn done(&self, _summary: &RunSummary) {
        self.spinner.finish_and_clear();
    }
}
