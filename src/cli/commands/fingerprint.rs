use crate::errors::{AppError, AppResult};
use crate::fingerprint::compare_detailed;
use crate::grouping::{load_extraction_file, ExtractionInstance};
use clap::Args;
use std::path::PathBuf;
use tracing::info;

#[derive(Args)]
#[command(author, version, about, long_about = None)]
pub struct FingerprintCommand {
    /// Extraction JSON file to fingerprint
    file: PathBuf,

    /// Only fingerprint the message with this name
    #[arg(long)]
    message: Option<String>,

    /// Print the normalized per-field tuples behind each fingerprint
    #[arg(long)]
    detailed: bool,

    /// Second extraction file; diff each message's structure against it
    #[arg(long)]
    compare: Option<PathBuf>,
}

impl FingerprintCommand {
    pub fn run(&self) -> AppResult<()> {
        let (instances, stats) = load_extraction_file(&self.file)?;
        info!(
            "Loaded {} messages from {} ({} skipped)",
            stats.instances,
            self.file.display(),
            stats.skipped
        );

        let selected: Vec<&ExtractionInstance> = instances
            .iter()
            .filter(|i| {
                self.message
                    .as_deref()
                    .map(|name| i.message.name == name)
                    .unwrap_or(true)
            })
            .collect();

        if selected.is_empty() {
            return Err(AppError::InvalidData(match &self.message {
                Some(name) => format!("No message named '{}' in {}", name, self.file.display()),
                None => format!("No messages in {}", self.file.display()),
            }));
        }

        match &self.compare {
            None => {
                for instance in &selected {
                    println!(
                        "{:<30} v{}  {}  ({} fields)",
                        instance.message.name,
                        instance.protocol_version,
                        instance.fingerprint,
                        instance.detailed.field_count
                    );
                    if self.detailed {
                        println!("{}", serde_json::to_string_pretty(&instance.detailed)?);
                    }
                }
            }
            Some(other_file) => {
                let (other_instances, _) = load_extraction_file(other_file)?;
                for instance in &selected {
                    let Some(other) = other_instances
                        .iter()
                        .find(|o| o.message.name == instance.message.name)
                    else {
                        println!(
                            "{:<30} only present in {}",
                            instance.message.name,
                            self.file.display()
                        );
                        continue;
                    };

                    let diff = compare_detailed(&instance.detailed, &other.detailed);
                    if diff.matches {
                        println!("{:<30} MATCH  {}", instance.message.name, instance.fingerprint);
                    } else {
                        println!(
                            "{:<30} DIFFER  {} vs {}  ({} mismatches)",
                            instance.message.name,
                            diff.fingerprint_first,
                            diff.fingerprint_second,
                            diff.mismatch_count
                        );
                        if self.detailed {
                            println!("{}", serde_json::to_string_pretty(&diff)?);
                        }
                    }
                }
            }
        }

        Ok(())
    }
}
