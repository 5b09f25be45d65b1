use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tojex_experiment::ExperimentConfig;

/// Colour-cued temporal-order-judgement experiment.
#[derive(Debug, Parser)]
#[command(name = "tojex", version)]
pub struct Args {
    /// Experiment configuration (JSON). Defaults apply to anything missing.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Where trial results are written; overrides `output.results_path`.
    #[arg(long)]
    pub results: Option<PathBuf>,

    /// Seed for a reproducible trial plan.
    #[arg(long)]
    pub seed: Option<u64>,

    /// The participant has taken part before and gets the short tutorial.
    #[arg(long)]
    pub returning: bool,

    /// Assumed length of an audio cue whose duration cannot be read.
    #[arg(long, default_value_t = 600)]
    pub cue_ms: u64,
}

impl Args {
    /// Loads the configuration file (if any) and applies command-line
    /// overrides. The result is validated.
    pub fn experiment_config(&self) -> Result<ExperimentConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                ExperimentConfig::from_json(&json)
                    .with_context(|| format!("parsing {}", path.display()))?
            }
            None => ExperimentConfig::default(),
        };
        if let Some(results) = &self.results {
            config.output.results_path = results.clone();
        }
        if self.returning {
            config.first_participation = false;
        }
        config.validate().context("invalid experiment configuration")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn overrides_apply_on_top_of_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"design": {{"block_size": 10}}}}"#).unwrap();
        let args = Args::parse_from([
            "tojex",
            "--config",
            file.path().to_str().unwrap(),
            "--results",
            "out.json",
            "--returning",
        ]);
        let config = args.experiment_config().unwrap();
        assert_eq!(config.output.results_path, PathBuf::from("out.json"));
        assert!(!config.first_participation);
        assert_eq!(config.tutorial_trials(), config.tutorial.repeated_trials);
    }

    #[test]
    fn defaults_without_file() {
        let args = Args::parse_from(["tojex", "--seed", "7"]);
        assert_eq!(args.seed, Some(7));
        assert_eq!(args.cue_ms, 600);
        assert!(args.experiment_config().unwrap().first_participation);
    }
}
