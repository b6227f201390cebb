use crate::config::AppConfig;
use crate::errors::AppResult;
use crate::grouping::load_extraction_file;
use crate::output::{
    canonical_filename, canonical_path, fresh_single_source_record, load_canonical,
    update_with_new_source, AnnotationRegistry, Manifest, ManifestEntry,
};
use crate::voting::VotingConfig;
use clap::Args;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Args)]
#[command(author, version, about, long_about = None)]
pub struct UpdateCommand {
    /// Extraction JSON file from the new source
    file: PathBuf,

    /// Directory holding canonical records (overrides config.toml and env vars)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Minimum agreement ratio for consensus (overrides config.toml)
    #[arg(long)]
    threshold: Option<f64>,

    /// Minimum sources for high/medium confidence (overrides config.toml)
    #[arg(long)]
    min_sources: Option<usize>,

    /// JSON file of static annotations keyed by "<name>-v<version>"
    #[arg(long)]
    annotations_file: Option<PathBuf>,
}

impl UpdateCommand {
    pub fn run(&self) -> AppResult<()> {
        info!("=== Message Consensus - Update ===");

        let app_config = AppConfig::get_defaults()
            .map_err(|e| crate::errors::AppError::Config(format!("Configuration error: {}", e)))?;

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
        let registry = AnnotationRegistry::load(annotations_file.as_deref())?;

        let (instances, stats) = load_extraction_file(&self.file)?;
        info!(
            "Loaded {} messages from new source ({} skipped)",
            stats.instances, stats.skipped
        );

        fs::create_dir_all(output_dir.join("messages"))?;

        let mut updated = 0;
        let mut created = 0;
        let mut failed = 0;

        let mut manifest = load_manifest(&output_dir);

        for instance in &instances {
            let name = &instance.message.name;
            let version = instance.protocol_version;
            let path = canonical_path(&output_dir, name, version);

            let record = match load_canonical(&path) {
                Some(existing) => {
                    let record = update_with_new_source(existing, instance, &voting_config);
                    updated += 1;
                    record
                }
                None => {
                    let record = fresh_single_source_record(instance, &registry);
                    created += 1;
                    record
                }
            };

            let written = serde_json::to_string_pretty(&record)
                .map_err(crate::errors::AppError::from)
                .and_then(|json| fs::write(&path, json).map_err(crate::errors::AppError::from));
            if let Err(e) = written {
                // Isolated per record; the rest of the batch still lands
                warn!("Failed to write canonical record for {}: {}", name, e);
                failed += 1;
                continue;
            }

            if let Some(manifest) = &mut manifest {
                manifest.messages.insert(
                    format!("{}-v{}", name, version),
                    ManifestEntry {
                        file: format!("messages/{}", canonical_filename(name, version)),
                        fingerprint: record.fingerprint.clone(),
                        confidence: record.consensus.confidence,
                        confidence_score: record.consensus.confidence_score,
                        source_count: record.consensus.sources.len(),
                        outlier_count: record.consensus.outliers.len(),
                    },
                );
            }
        }

        if let Some(mut manifest) = manifest {
            manifest.generated_at = chrono::Local::now().to_rfc3339();
            manifest.stats.written = manifest.messages.len();
            fs::write(
                output_dir.join("manifest.json"),
                serde_json::to_string_pretty(&manifest)?,
            )?;
        }

        println!(
            "
=== UPDATE COMPLETE ==="
        );
        println!("Messages in new source: {}", instances.len());
        println!("Existing records updated: {}", updated);
        println!("New records created: {}", created);
        println!("Write failures: {}", failed);
        println!(
            "
Canonical output: {}",
            output_dir.display()
        );

        Ok(())
    }
}

fn load_manifest(output_dir: &Path) -> Option<Manifest> {
    let path = output_dir.join("manifest.json");
    let raw = fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(manifest) => Some(manifest),
        Err(e) => {
            warn!(
                "Manifest {} is unreadable ({}); leaving it untouched",
                path.display(),
                e
            );
            None
        }
    }
}
