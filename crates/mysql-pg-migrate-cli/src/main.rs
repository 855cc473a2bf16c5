//! mysql-pg-migrate CLI - Resumable MySQL to PostgreSQL migration.

use clap::{Parser, Subcommand};
use mysql_pg_migrate::{
    boot, check_connections, discover_tables, BootDecision, Config, DbExecutor, DbStateStore,
    MigrateError, MigrationRun, Orchestrator, QueryExecutor, Stage, StageSet, StateStore,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "mysql-pg-migrate")]
#[command(about = "Resumable MySQL to PostgreSQL migration")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

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

#[derive(Subcommand)]
enum Commands {
    /// Run the migration, resuming an interrupted run when one is found
    Run {
        /// Only reload data and resync sequences, skipping structural changes
        #[arg(long)]
        data_only: bool,

        /// Override target schema
        #[arg(long)]
        target_schema: Option<String>,
    },

    /// Test database connections
    HealthCheck,

    /// Show which stages of an interrupted run are complete
    Status {
        /// Override target schema
        #[arg(long)]
        target_schema: Option<String>,
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

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Run {
            data_only,
            target_schema,
        } => {
            if data_only {
                config.migration.migrate_only_data = true;
            }
            if let Some(schema) = target_schema {
                config.target.schema = Some(schema);
            }
            config.validate()?;

            let executor: Arc<dyn QueryExecutor> = Arc::new(DbExecutor::new(&config)?);
            let tables = match discover_tables(executor.as_ref(), &config).await {
                Ok(tables) => tables,
                // Discovery is the first source query; report an unreachable
                // engine the same way boot does.
                Err(e) => {
                    let diagnostic = check_connections(executor.as_ref()).await;
                    return Err(if diagnostic.is_empty() {
                        e
                    } else {
                        MigrateError::Connection(diagnostic)
                    });
                }
            };
            let migration = MigrationRun::from_config(&config, tables);
            let state = Arc::new(DbStateStore::new(executor.clone()));

            let mut stdin = BufReader::new(tokio::io::stdin());
            let mut stdout = std::io::stdout();
            let decision = boot(
                executor.as_ref(),
                state.as_ref(),
                &migration,
                &mut stdin,
                &mut stdout,
            )
            .await?;
            if decision == BootDecision::Abort {
                return Ok(());
            }

            let orchestrator = Orchestrator::new(state, StageSet::postgres(executor, &config));
            let result = orchestrator.run(&migration).await?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                println!("\nMigration completed!");
                println!("  Run ID: {}", result.run_id);
                println!("  Duration: {:.2}s", result.duration_seconds);
                println!(
                    "  Tables: {} ({} -> {})",
                    result.tables.len(),
                    result.source_database,
                    result.target_schema
                );
                println!("  Data only: {}", result.data_only);
                if !result.stages_skipped.is_empty() {
                    let skipped: Vec<&str> =
                        result.stages_skipped.iter().map(Stage::as_str).collect();
                    println!("  Resumed past: {}", skipped.join(", "));
                }
            }
        }

        Commands::HealthCheck => {
            let executor = DbExecutor::new(&config)?;
            let diagnostic = check_connections(&executor).await;
            let healthy = diagnostic.is_empty();

            if cli.output_json {
                let result = serde_json::json!({
                    "healthy": healthy,
                    "errors": diagnostic.lines().map(str::trim).collect::<Vec<_>>(),
                });
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source (MySQL {}:{}): {}",
                    config.source.host,
                    config.source.port,
                    status_of(&diagnostic, "MySQL")
                );
                println!(
                    "  Target (PostgreSQL {}:{}): {}",
                    config.target.host,
                    config.target.port,
                    status_of(&diagnostic, "PostgreSQL")
                );
                if !healthy {
                    print!("\n{}", diagnostic);
                }
                println!(
                    "\n  Overall: {}",
                    if healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !healthy {
                return Err(MigrateError::Connection(diagnostic));
            }
        }

        Commands::Status { target_schema } => {
            if let Some(schema) = target_schema {
                config.target.schema = Some(schema);
            }
            config.validate()?;

            let executor: Arc<dyn QueryExecutor> = Arc::new(DbExecutor::new(&config)?);
            let state = DbStateStore::new(executor);
            let migration = MigrationRun::from_config(&config, Vec::new());

            let mut stages = Vec::new();
            let exists = state.state_table_exists(&migration).await?;
            for stage in Stage::ALL {
                let done = exists && state.is_stage_complete(&migration, stage).await?;
                stages.push((stage, done));
            }

            if cli.output_json {
                let result = serde_json::json!({
                    "ledger": migration.state_table_name(),
                    "interrupted_run": exists,
                    "stages": stages
                        .iter()
                        .map(|(stage, done)| serde_json::json!({ "stage": stage, "complete": done }))
                        .collect::<Vec<_>>(),
                });
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else if !exists {
                println!(
                    "No interrupted run: ledger {}.{} does not exist",
                    migration.target_schema,
                    migration.state_table_name()
                );
            } else {
                println!(
                    "Interrupted run found in {}.{}:",
                    migration.target_schema,
                    migration.state_table_name()
                );
                for (stage, done) in &stages {
                    println!("  {:<30} {}", stage.as_str(), if *done { "done" } else { "pending" });
                }
            }
        }
    }

    Ok(())
}

fn status_of(diagnostic: &str, engine: &str) -> &'static str {
    let prefix = format!("{} connection error", engine);
    if diagnostic.lines().any(|line| line.trim_start().starts_with(&prefix)) {
        "FAILED"
    } else {
        "OK"
    }
}

/// Logs go to stderr; stdout carries the prompt and the report.
fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
