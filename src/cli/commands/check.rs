use crate::errors::{AppError, AppResult};
use crate::grouping::{load_extraction_file, load_instances, ExtractionInstance};
use crate::structural::{validate_structure, Severity};
use clap::Args;
use std::path::PathBuf;
use tracing::info;

#[derive(Args)]
#[command(author, version, about, long_about = None)]
pub struct CheckCommand {
    /// Extraction JSON file or directory of extraction files
    path: PathBuf,

    /// Only print findings with error severity
    #[arg(long)]
    errors_only: bool,

    /// Exit with a failure when any structural error is found
    #[arg(long)]
    strict: bool,
}

impl CheckCommand {
    pub fn run(&self) -> AppResult<()> {
        let (instances, stats) = if self.path.is_dir() {
            load_instances(&self.path)?
        } else {
            load_extraction_file(&self.path)?
        };
        info!(
            "Checking {} messages from {} file(s)",
            stats.instances, stats.files
        );

        let mut error_count = 0;
        let mut warning_count = 0;
        let mut clean_count = 0;

        for ExtractionInstance {
            source_id, message, ..
        } in &instances
        {
            let report = validate_structure(message);
            if report.issues.is_empty() {
                clean_count += 1;
                continue;
            }
            error_count += report.error_count();
            warning_count += report.warning_count();

            for issue in &report.issues {
                if self.errors_only && issue.severity != Severity::Error {
                    continue;
                }
                println!(
                    "[{}] {} ({}): {}",
                    issue.severity, report.message_name, source_id, issue.message
                );
            }
        }

        println!(
            "
=== CHECK COMPLETE ==="
        );
        println!("Messages checked: {}", instances.len());
        println!("Clean: {}", clean_count);
        println!("Errors: {}", error_count);
        println!("Warnings: {}", warning_count);
        println!("Skipped records: {}", stats.skipped);

        if self.strict && error_count > 0 {
            return Err(AppError::InvalidData(format!(
                "{} structural errors found",
                error_count
            )));
        }

        Ok(())
    }
}
