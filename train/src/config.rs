//! Training program configuration format.

use crate::common::*;
use detect::config::{open_json5, locate_config_file};
use mmod_dl::{
    model::NetworkInit,
    options::DetectorOptionsInit,
    processor::{ColorJitterInit, RandomCropperInit},
    trainer::TrainerInit,
};

pub use detect::config::{OutputConfig, ReportConfig};

/// The main training configuration.
///
/// The `output`, `report` and `pause_on_error` sections are shared with the
/// `detect` program, so both can read the same file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model: NetworkInit,
    pub options: DetectorOptionsInit,
    pub cropper: RandomCropperInit,
    pub color_jitter: ColorJitterInit,
    pub training: TrainingConfig,
    pub output: OutputConfig,
    pub report: ReportConfig,
    pub pause_on_error: bool,
}

impl Config {
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        open_json5(path)
    }

    /// Load the configuration file if one is found, otherwise use the defaults.
    pub fn locate() -> Result<Self> {
        match locate_config_file() {
            Some(path) => Self::open(path),
            None => Ok(Self::default()),
        }
    }
}

/// Training options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub trainer: TrainerInit,
    #[serde(with = "tch_serde::serde_device")]
    pub device: Device,
    /// The seed of the sampling RNG. Seeded from entropy if absent.
    pub seed: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            trainer: TrainerInit::default(),
            device: Device::cuda_if_available(),
            seed: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use detect::config::ReportAction;
    use std::num::NonZeroUsize;

    #[test]
    fn parse_partial_config() -> Result<()> {
        let text = r#"{
            model: { body_blocks: 2 },
            options: { target_size: 70, min_target_size: 30 },
            cropper: { chip_dims: { h: 200, w: 200 } },
            training: {
                trainer: { mini_batch_size: 16, sync_file: null },
                device: "cpu",
                seed: 7,
            },
            report: { action: { kind: "Pause" } },
            pause_on_error: true,
        }"#;
        let config: Config = json5::from_str(text)?;

        assert_eq!(config.model.body_blocks, 2);
        assert_eq!(config.model.body_filters, NetworkInit::default().body_filters);
        assert_eq!(config.options.target_size, NonZeroUsize::new(70).unwrap());
        assert_eq!(config.cropper.chip_dims.h, 200);
        assert_eq!(
            config.training.trainer.mini_batch_size,
            NonZeroUsize::new(16).unwrap()
        );
        assert_eq!(config.training.trainer.sync_file, None);
        assert_eq!(
            config.training.trainer.learning_rate,
            TrainerInit::default().learning_rate
        );
        assert_eq!(config.training.device, Device::Cpu);
        assert_eq!(config.training.seed, Some(7));
        assert_eq!(config.report.action, ReportAction::Pause);
        assert_eq!(config.color_jitter, ColorJitterInit::default());
        assert!(config.pause_on_error);
        Ok(())
    }

    #[test]
    fn config_serializes_to_json() -> Result<()> {
        let text = serde_json::to_string_pretty(&Config::default())?;
        assert!(text.contains("\"mini_batch_size\": 87"));
        Ok(())
    }
}
