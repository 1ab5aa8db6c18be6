use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use drsync::config::ExecutorConfig;
use drsync::{
    BatchReport, DrSyncConfig, Outcome, Severity, StatusLog, SyncCounts, SyncExecutor,
    SyncSession, SyncStatus, TreeProvider,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "drsync")]
#[command(about = "Compare a primary tree with its DR mirror and sync the differences")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// List the differences between primary and DR
    Compare {
        /// Application name from the configuration
        #[arg(short, long)]
        app: String,
        /// Print the differences as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sync a single relative path
    Sync {
        /// Application name from the configuration
        #[arg(short, long)]
        app: String,
        /// Relative path to sync
        #[arg(short, long)]
        path: String,
        /// Report what would change without touching DR (local executor only)
        #[arg(long)]
        dry_run: bool,
    },
    /// Sync every actionable difference in one batch
    SyncAll {
        /// Application name from the configuration
        #[arg(short, long)]
        app: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
        /// Report what would change without touching DR (local executor only)
        #[arg(long)]
        dry_run: bool,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigActions,
    },
}

#[derive(Subcommand)]
enum ConfigActions {
    /// Validate configuration file
    Validate,
    /// Show current configuration
    Show,
    /// Generate default configuration
    Generate {
        /// Output path for configuration
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

type Session = SyncSession<Box<dyn TreeProvider>, Box<dyn SyncExecutor>>;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_basic_logging(&cli.log_level)?;

    match cli.command {
        Commands::Compare { app, json } => {
            let config = load_config(cli.config.as_ref()).await?;
            compare(&config, &app, json).await
        }
        Commands::Sync { app, path, dry_run } => {
            let config = load_config(cli.config.as_ref()).await?;
            sync_path(&with_dry_run(config, dry_run), &app, &path).await
        }
        Commands::SyncAll { app, yes, dry_run } => {
            let config = load_config(cli.config.as_ref()).await?;
            sync_all(&with_dry_run(config, dry_run), &app, yes).await
        }
        Commands::Config { action } => match action {
            ConfigActions::Validate => validate_config(cli.config.as_ref()).await,
            ConfigActions::Show => show_config(cli.config.as_ref()).await,
            ConfigActions::Generate { output } => generate_config(output.as_ref()).await,
        },
    }
}

fn init_basic_logging(log_level: &str) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(format!("drsync={},drsync_cli={}", level, level))
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .try_init()
        .context("Failed to initialise logging")?;

    Ok(())
}

fn config_path(config_path: Option<&PathBuf>) -> PathBuf {
    config_path.cloned().unwrap_or_else(DrSyncConfig::default_path)
}

async fn load_config(config_path_arg: Option<&PathBuf>) -> Result<DrSyncConfig> {
    let path = config_path(config_path_arg);
    info!("Loading configuration from {}", path.display());
    let config = DrSyncConfig::load(&path)
        .await
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn with_dry_run(mut config: DrSyncConfig, dry_run: bool) -> DrSyncConfig {
    if dry_run {
        if let ExecutorConfig::Local { dry_run } = &mut config.executor {
            *dry_run = true;
        }
    }
    config
}

async fn open_session(config: &DrSyncConfig, app: &str) -> Result<Session> {
    let mut session = config.session(app)?;
    let loaded = session.load().await.map(|_| ());
    if let Err(e) = loaded {
        print_log(session.log());
        return Err(e).context(format!("Failed to load trees for {}", app));
    }
    Ok(session)
}

async fn compare(config: &DrSyncConfig, app: &str, json: bool) -> Result<()> {
    let session = open_session(config, app).await?;
    let comparison = session
        .comparison()
        .context("No comparison available after load")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&comparison.differences)?);
        return Ok(());
    }

    if comparison.differences.is_empty() {
        println!("✓ {} is in sync", app);
        return Ok(());
    }

    for difference in &comparison.differences {
        println!(
            "{:<13} {:<9} {}  {}",
            difference.status.to_string(),
            difference.kind.to_string(),
            difference.path,
            difference.summary
        );
    }
    println!();
    println!("{}", comparison.counts());
    Ok(())
}

async fn sync_path(config: &DrSyncConfig, app: &str, path: &str) -> Result<()> {
    let mut session = open_session(config, app).await?;

    let Some(difference) = session.select(path).cloned() else {
        println!("✗ {} does not exist on primary or DR", path);
        return Ok(());
    };
    if difference.status == SyncStatus::Synced {
        println!("✓ {}", difference.summary);
        return Ok(());
    }

    let result = session.sync_one(&difference).await;
    print_log(session.log());
    let report = result?;
    print_report(&report);
    exit_on_failures(&report)
}

async fn sync_all(config: &DrSyncConfig, app: &str, yes: bool) -> Result<()> {
    let mut session = open_session(config, app).await?;

    let result = session
        .sync_all(|counts| yes || confirm(app, counts))
        .await;
    print_log(session.log());

    match result? {
        Some(report) => {
            print_report(&report);
            exit_on_failures(&report)
        }
        None => Ok(()),
    }
}

fn confirm(app: &str, counts: &SyncCounts) -> bool {
    println!(
        "Sync {} item(s) for {}: {}.",
        counts.total(),
        app,
        counts
    );
    print!("Proceed? [y/N] ");
    if io::stdout().flush().is_err() {
        return false;
    }

    let mut answer = String::new();
    match io::stdin().lock().read_line(&mut answer) {
        Ok(_) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
        Err(_) => false,
    }
}

fn print_report(report: &BatchReport) {
    println!();
    for outcome in &report.outcomes {
        let mark = match outcome.outcome {
            Outcome::Success => "✓",
            Outcome::Failed => "✗",
        };
        println!(
            "{} {} ({}) {}",
            mark, outcome.path, outcome.status_after, outcome.message
        );
    }
    println!("{} succeeded, {} failed", report.succeeded, report.failed);
}

fn print_log(log: &StatusLog) {
    println!("Session log:");
    for entry in log.newest_first() {
        let mark = match entry.severity {
            Severity::Info => " ",
            Severity::Success => "✓",
            Severity::Error => "✗",
        };
        println!(
            "  {} [{}] {}",
            mark,
            entry.timestamp.with_timezone(&chrono::Local).format("%H:%M:%S"),
            entry.message
        );
    }
}

fn exit_on_failures(report: &BatchReport) -> Result<()> {
    if !report.all_succeeded() {
        std::process::exit(2);
    }
    Ok(())
}

async fn validate_config(config_path_arg: Option<&PathBuf>) -> Result<()> {
    let path = config_path(config_path_arg);

    info!("Validating configuration at {}", path.display());

    let result = match DrSyncConfig::load(&path).await {
        Ok(config) => config.validate().map(|_| config),
        Err(e) => Err(e),
    };

    match result {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("Applications configured: {}", config.applications.len());
            for app in &config.applications {
                println!("  {}: {} -> {}", app.name, app.primary_path, app.dr_path);
            }
            Ok(())
        }
        Err(e) => {
            println!("✗ Configuration validation failed: {}", e);
            Err(e.into())
        }
    }
}

async fn show_config(config_path_arg: Option<&PathBuf>) -> Result<()> {
    let path = config_path(config_path_arg);

    match DrSyncConfig::load(&path).await {
        Ok(config) => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Err(e) => {
            println!("Failed to load configuration: {}", e);
            Err(e.into())
        }
    }
}

async fn generate_config(output_path: Option<&PathBuf>) -> Result<()> {
    let config = DrSyncConfig::default();

    if let Some(path) = output_path {
        config.save(path).await?;
        println!("Configuration generated at {}", path.display());
    } else {
        println!("{}", toml::to_string_pretty(&config)?);
    }

    Ok(())
}
