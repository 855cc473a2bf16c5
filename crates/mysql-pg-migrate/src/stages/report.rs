//! Run report on stdout and in `<logs_dir>/report.log`.

use std::fs::OpenOptions;
use std::io::Write;
use tracing::{info, warn};

use super::Reporter;
use crate::run::MigrationRun;

/// Prints each report line with the run's elapsed time and appends it to
/// the report log. Failing to write the log never fails the run.
#[derive(Debug, Default)]
pub struct ConsoleReporter;

impl ConsoleReporter {
    pub fn new() -> Self {
        Self
    }
}

impl Reporter for ConsoleReporter {
    fn emit(&self, run: &MigrationRun, message: &str) {
        let line = format!(
            "\t--[{}] Total time: {}",
            message,
            format_elapsed(run.elapsed())
        );
        println!("{}", line);
        info!(run_id = %run.run_id, "{}", message);

        let path = run.logs_dir.join("report.log");
        let written = std::fs::create_dir_all(&run.logs_dir).and_then(|_| {
            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
            writeln!(file, "{} {}", chrono::Utc::now().to_rfc3339(), line.trim_start())
        });
        if let Err(e) = written {
            warn!("Could not write report to {:?}: {}", path, e);
        }
    }
}

/// Format a duration as `HH:MM:SS`; hours are not capped at 24.
pub fn format_elapsed(elapsed: chrono::Duration) -> String {
    let total = elapsed.num_seconds().max(0);
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}
