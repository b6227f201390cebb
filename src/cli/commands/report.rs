use crate::config::AppConfig;
use crate::errors::AppResult;
use crate::grouping::{group_instances, load_instances, summarize_groups};
use crate::report::{discrepancy_report, print_summary, validation_report, write_report};
use crate::voting::{vote_on_all_groups, VotingConfig};
use clap::Args;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Args)]
#[command(author, version, about, long_about = None)]
pub struct ReportCommand {
    /// Directory of extraction JSON files (overrides config.toml and env vars)
    #[arg(long)]
    extractions_dir: Option<PathBuf>,

    /// Directory for report JSON files (overrides config.toml output dir)
    #[arg(long)]
    report_dir: Option<PathBuf>,

    /// Minimum agreement ratio for consensus (overrides config.toml)
    #[arg(long)]
    threshold: Option<f64>,

    /// Minimum sources for high/medium confidence (overrides config.toml)
    #[arg(long)]
    min_sources: Option<usize>,

    /// Worker threads for voting (overrides config.toml)
    #[arg(long)]
    workers: Option<usize>,
}

impl ReportCommand {
    pub fn run(&self) -> AppResult<()> {
        info!("=== Message Consensus - Report ===");

        let app_config = match AppConfig::load() {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to load configuration: {}", e);
                return Err(crate::errors::AppError::Config(format!(
                    "Configuration error: {}",
                    e
                )));
            }
        };

        let extractions_dir = self
            .extractions_dir
            .clone()
            .unwrap_or(app_config.paths.extractions_dir.clone());
        let report_dir = self
            .report_dir
            .clone()
            .unwrap_or(app_config.paths.output_dir.clone());
        let voting_config = VotingConfig::new(
            self.threshold.unwrap_or(app_config.voting.threshold),
            self.min_sources.unwrap_or(app_config.voting.min_sources),
        )?;
        let workers = self.workers.unwrap_or(app_config.processing.workers);

        if !extractions_dir.exists() {
            return Err(crate::errors::AppError::Config(format!(
                "Extractions directory does not exist: {}",
                extractions_dir.display()
            )));
        }

        let (instances, load_stats) = load_instances(&extractions_dir)?;
        info!(
            "Loaded {} instances from {} files ({} skipped)",
            load_stats.instances, load_stats.files, load_stats.skipped
        );

        let groups = group_instances(instances);
        let group_summary = summarize_groups(&groups, voting_config.threshold);
        let results = vote_on_all_groups(&groups, &voting_config, workers)?;

        std::fs::create_dir_all(&report_dir)?;
        let validation_path = report_dir.join("validation_report.json");
        let discrepancy_path = report_dir.join("discrepancy_report.json");
        write_report(&validation_report(&results), &validation_path)?;
        write_report(&discrepancy_report(&results), &discrepancy_path)?;

        print_summary(&results);

        println!(
            "
=== GROUP DISTRIBUTION ==="
        );
        println!("Total groups: {}", group_summary.total_groups);
        println!("Total instances: {}", group_summary.total_instances);
        println!("Full agreement: {}", group_summary.full_agreement);
        println!("Partial agreement: {}", group_summary.partial_agreement);
        println!("No consensus: {}", group_summary.no_consensus);
        println!("Single source: {}", group_summary.single_source);
        for (version, count) in &group_summary.by_protocol_version {
            println!("  v{}: {} groups", version, count);
        }

        println!(
            "
Reports written to: {}",
            report_dir.display()
        );
        println!("  {}", validation_path.display());
        println!("  {}", discrepancy_path.display());

        Ok(())
    }
}
