//! Boot validator: preflight connectivity check and operator confirmation.
//!
//! Runs strictly before any stage. A run with an existing ledger is a
//! restart after failure; that changes the banner, not the gate.

use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{error, info};

use crate::error::{MigrateError, Result};
use crate::executor::{QueryExecutor, QueryRequest, Vendor};
use crate::run::MigrationRun;
use crate::state::StateStore;

/// Operator's answer at the confirmation gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootDecision {
    Proceed,
    /// Operator declined; not an error.
    Abort,
}

/// Run `SELECT 1` against both engines. Returns an empty string when both
/// answered, otherwise one diagnostic line per failing engine.
pub async fn check_connections(executor: &dyn QueryExecutor) -> String {
    let mut message = String::new();
    for vendor in [Vendor::Source, Vendor::Target] {
        let result = executor
            .execute(QueryRequest::new(
                "boot::check_connections",
                vendor,
                "SELECT 1",
            ))
            .await;
        if let Some(e) = result.error {
            message.push_str(&format!("\t{} connection error: {}\n", vendor, e));
        }
    }
    message
}

fn banner(run: &MigrationRun) -> String {
    format!(
        "\n\tmysql-pg-migrate {}\n\
         \tMySQL database `{}` -> PostgreSQL schema \"{}\" ({} tables{})\n\n\
         \t--[boot] Configuration has been loaded.",
        env!("CARGO_PKG_VERSION"),
        run.source_database,
        run.target_schema,
        run.tables.len(),
        if run.data_only { ", data only" } else { "" }
    )
}

fn prompt(restarting: bool) -> &'static str {
    if restarting {
        "\n\t--[boot] Ready to restart after a failure.\
         \n\t--[boot] Consider checking the log files at the end of the migration.\
         \n\t--[boot] Proceed? [Y/n]"
    } else {
        "\n\t--[boot] Ready to start.\n\t--[boot] Proceed? [Y/n]"
    }
}

/// Validate connectivity, then ask the operator to confirm.
///
/// Reads answers line by line from `input`: `y`/`Y` proceeds, `n`/`N`
/// aborts, anything else re-prompts. End of input before an answer is a
/// [`MigrateError::BootInput`].
pub async fn boot<R, W>(
    executor: &dyn QueryExecutor,
    state: &dyn StateStore,
    run: &MigrationRun,
    input: &mut R,
    output: &mut W,
) -> Result<BootDecision>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let diagnostic = check_connections(executor).await;
    if !diagnostic.is_empty() {
        writeln!(output, "{}\n{}", banner(run), diagnostic)?;
        error!("Connection check failed:\n{}", diagnostic);
        return Err(MigrateError::Connection(diagnostic));
    }

    let restarting = state.state_table_exists(run).await?;
    if restarting {
        info!("Found ledger {} from an unfinished run", run.state_table_name());
    }
    let message = prompt(restarting);
    writeln!(output, "{}{}", banner(run), message)?;
    output.flush()?;

    let mut line = String::new();
    loop {
        line.clear();
        let read = input.read_line(&mut line).await?;
        if read == 0 {
            return Err(MigrateError::BootInput(
                "end of input before the confirmation prompt was answered".into(),
            ));
        }

        match line.trim() {
            "n" | "N" => {
                writeln!(output, "\t--[boot] Migration aborted.\n")?;
                info!("Migration aborted by operator");
                return Ok(BootDecision::Abort);
            }
            "y" | "Y" => return Ok(BootDecision::Proceed),
            other => {
                writeln!(
                    output,
                    "\t--[boot] Unexpected input {}\n\
                     \t--[boot] Expected input is Y or n\n{}",
                    other, message
                )?;
                output.flush()?;
            }
        }
    }
}
