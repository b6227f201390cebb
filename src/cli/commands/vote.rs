use crate::config::AppConfig;
use crate::errors::AppResult;
use crate::grouping::{group_instances, load_instances};
use crate::output::{write_canonical, AnnotationRegistry, WriteOptions};
use crate::report::print_summary;
use crate::voting::{vote_on_all_groups, Confidence, VotingConfig};
use clap::Args;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Args)]
#[command(author, version, about, long_about = None)]
pub struct VoteCommand {
    /// Directory of extraction JSON files (overrides config.toml and env vars)
    #[arg(long)]
    extractions_dir: Option<PathBuf>,

    /// Output directory for canonical records (overrides config.toml and env vars)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Minimum agreement ratio for consensus (overrides config.toml)
    #[arg(long)]
    threshold: Option<f64>,

    /// Minimum sources for high/medium confidence (overrides config.toml)
    #[arg(long)]
    min_sources: Option<usize>,

    /// Worker threads for voting and writing (overrides config.toml)
    #[arg(long)]
    workers: Option<usize>,

    /// JSON file of static annotations keyed by "<name>-v<version>"
    #[arg(long)]
    annotations_file: Option<PathBuf>,

    /// Write records even for groups without consensus
    #[arg(long)]
    include_no_consensus: bool,

    /// Only write records at or above this confidence tier
    #[arg(long)]
    min_confidence: Option<Confidence>,
}

impl VoteCommand {
    pub fn run(&self) -> AppResult<()> {
        info!("=== Message Consensus - Vote ===");

        let app_config = match AppConfig::load() {
            Ok(config) => {
                info!("Configuration loaded successfully");
                config
            }
            Err(e) => {
                warn!("Failed to load configuration: {}", e);
                return Err(crate::errors::AppError::Config(format!(
                    "Configuration error: {}. Set MSGC_EXTRACTIONS_DIR or configure paths.extractions_dir in config.toml",
                    e
                )));
            }
        };

        // CLI arguments override config values
        let extractions_dir = self
            .extractions_dir
            .clone()
            .unwrap_or(app_config.paths.extractions_dir.clone());
        let output_dir = self
            .output_dir
            .clone()
            .unwrap_or(app_config.paths.output_dir.clone());
        let annotations_file = self
            .annotations_file
            .clone()
            .or(app_config.paths.annotations_file.clone());
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

        info!("Configuration:");
        info!("  Extractions: {}", extractions_dir.display());
        info!("  Output: {}", output_dir.display());
        info!("  Threshold: {}", voting_config.threshold);
        info!("  Min sources: {}", voting_config.min_sources);
        info!("  Workers: {}", workers);

        let registry = AnnotationRegistry::load(annotations_file.as_deref())?;

        let (instances, load_stats) = load_instances(&extractions_dir)?;
        info!(
            "Loaded {} instances from {} files ({} skipped)",
            load_stats.instances, load_stats.files, load_stats.skipped
        );

        let groups = group_instances(instances);
        info!("Grouped into {} (message, version) groups", groups.len());

        let results = vote_on_all_groups(&groups, &voting_config, workers)?;

        let options = WriteOptions {
            require_consensus: !self.include_no_consensus,
            min_confidence: self.min_confidence,
            workers,
        };
        let manifest = write_canonical(&results, &output_dir, &options, &registry)?;

        print_summary(&results);

        println!(
            "
=== VOTE COMPLETE ==="
        );
        println!("Extraction files read: {}", load_stats.files);
        println!("Instances loaded: {}", load_stats.instances);
        println!("Malformed instances skipped: {}", load_stats.skipped);
        println!("Canonical records written: {}", manifest.stats.written);
        println!(
            "Skipped (no consensus): {}",
            manifest.stats.skipped_no_consensus
        );
        println!(
            "Skipped (below min confidence): {}",
            manifest.stats.skipped_low_confidence
        );
        println!(
            "
Canonical output written to: {}",
            output_dir.display()
        );

        Ok(())
    }
}
