//! sqlite-pg-migrate CLI - SQLite to PostgreSQL migration.

use clap::{Parser, Subcommand, ValueEnum};
use sqlite_pg_migrate::error::EXIT_CONNECTION_ERROR;
use sqlite_pg_migrate::orchestrator::{target_profile, troubleshooting_suggestions};
use sqlite_pg_migrate::{
    health_check, Config, MigrateError, MigrationReport, Orchestrator, PgPool, PgSync, Profile,
    SourcePool, SqliteExport, SqliteSource, SyncDirection, TargetPool,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "sqlite-pg-migrate")]
#[command(about = "SQLite to PostgreSQL schema and data migration")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, env = "CONFIG_PATH", default_value = "config.yaml")]
    config: PathBuf,

    /// Path to state file for resume capability
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProfileArg {
    Cloud,
    Local,
}

impl From<ProfileArg> for Profile {
    fn from(arg: ProfileArg) -> Self {
        match arg {
            ProfileArg::Cloud => Profile::Cloud,
            ProfileArg::Local => Profile::Local,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum DirectionArg {
    CloudToLocal,
    LocalToCloud,
}

impl From<DirectionArg> for SyncDirection {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::CloudToLocal => SyncDirection::CloudToLocal,
            DirectionArg::LocalToCloud => SyncDirection::LocalToCloud,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Recreate every SQLite table on PostgreSQL and copy its rows
    Migrate {
        /// Continue a previous run recorded in --state-file
        #[arg(long)]
        resume: bool,

        /// Override the target profile
        #[arg(long, value_enum)]
        target: Option<ProfileArg>,
    },

    /// Replace one PostgreSQL profile's rows with the other's
    Sync {
        #[arg(value_enum)]
        direction: DirectionArg,
    },

    /// Copy a PostgreSQL profile into the SQLite export file
    Export {
        #[arg(value_enum)]
        profile: ProfileArg,
    },

    /// Test database connections
    HealthCheck {
        /// Profile to probe
        #[arg(long, value_enum)]
        target: Option<ProfileArg>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| MigrateError::Config(e.to_string()))?;

    // The chosen profile decides which credentials must be usable.
    let target = match &cli.command {
        Commands::Migrate { target, .. } | Commands::HealthCheck { target } => {
            target.map(Profile::from)
        }
        Commands::Sync { .. } | Commands::Export { .. } => None,
    };
    let config = Config::resolve(&cli.config, target)?;

    // Setup signal handling for graceful shutdown (SIGINT and SIGTERM)
    let cancel_token = setup_signal_handler();

    match cli.command {
        Commands::Migrate { resume, .. } => {
            info!(
                "Migrating {} to postgres.{}",
                config.sqlite.path.display(),
                config.migration.target
            );

            if resume && cli.state_file.is_none() {
                return Err(MigrateError::Config(
                    "--state-file is required for --resume".to_string(),
                ));
            }

            let mut orchestrator = match Orchestrator::new(config).await {
                Ok(orchestrator) => orchestrator,
                Err(e) => {
                    if e.exit_code() == EXIT_CONNECTION_ERROR {
                        print_suggestions();
                    }
                    return Err(e);
                }
            };
            if let Some(path) = cli.state_file {
                orchestrator = orchestrator.with_state_file(path);
            }
            if resume {
                orchestrator = orchestrator.resume()?;
            }

            let report = orchestrator.run(cancel_token).await?;
            print_report(&report, cli.output_json)?;
        }

        Commands::Sync { direction } => {
            let direction = SyncDirection::from(direction);
            let (from, to) = direction.profiles();
            let max_conns = config.migration.max_connections;
            info!("Syncing {}", direction);

            let source = PgPool::new(target_profile(&config, from)?, max_conns).await?;
            let destination = PgPool::new(target_profile(&config, to)?, max_conns).await?;
            let result = PgSync::new(&source, &destination).run(&cancel_token).await;
            source.close().await;
            destination.close().await;
            print_report(&result?, cli.output_json)?;
        }

        Commands::Export { profile } => {
            let profile = Profile::from(profile);
            let path = config.sqlite.export_path.clone().ok_or_else(|| {
                MigrateError::Config("sqlite.export_path is required for export".to_string())
            })?;
            info!("Exporting postgres.{} to {}", profile, path.display());

            let source = PgPool::new(
                target_profile(&config, profile)?,
                config.migration.max_connections,
            )
            .await?;
            let destination = SqliteSource::open_or_create(&path).await?;
            let result = SqliteExport::new(&source, &destination)
                .run(&cancel_token)
                .await;
            source.close().await;
            destination.close().await;
            print_report(&result?, cli.output_json)?;
        }

        Commands::HealthCheck { .. } => {
            let profile = config.migration.target;
            let result = health_check(&config, profile).await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source (SQLite): {} ({}ms)",
                    if result.source_connected { "OK" } else { "FAILED" },
                    result.source_latency_ms
                );
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Target (postgres.{}): {} ({}ms)",
                    profile,
                    if result.target_connected { "OK" } else { "FAILED" },
                    result.target_latency_ms
                );
                if let Some(ref err) = result.target_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
                if !result.suggestions.is_empty() {
                    print_suggestions();
                }
            }

            if !result.healthy {
                return Err(MigrateError::pool(
                    "one or more databases are unreachable",
                    "health check",
                ));
            }
        }
    }

    Ok(())
}

fn print_report(report: &MigrationReport, json: bool) -> Result<(), MigrateError> {
    if json {
        println!("{}", report.to_json()?);
    } else {
        println!();
        for line in report.summary_lines() {
            println!("  {}", line);
        }
        println!("  Run ID: {}", report.run_id);
    }
    Ok(())
}

fn print_suggestions() {
    eprintln!("\nTroubleshooting suggestions:");
    for (i, hint) in troubleshooting_suggestions().iter().enumerate() {
        eprintln!("{}. {}", i + 1, hint);
    }
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// The current table always finishes; cancellation takes effect between tables.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        tokio::spawn(async move {
            let mut stream = match signal(kind) {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!("Failed to install {} handler: {}", name, e);
                    return;
                }
            };
            stream.recv().await;
            eprintln!("\nReceived {}. Finishing the current table...", name);
            token.cancel();
        });
    }

    cancel_token
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Finishing the current table...");
            token.cancel();
        }
    });

    cancel_token
}
