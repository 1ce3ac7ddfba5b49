//! The training program of the MMOD detector.

mod common;
pub mod config;

use crate::{common::*, config::Config};
use mmod_dl::{
    dataset::{boxes_per_image, load_imglab, load_images},
    evaluate::test_detector,
    model::Detector,
};
use tracing::{info_span, Instrument};

/// The annotation file of the training set inside the data directory.
pub const TRAINING_FILE: &str = "training.xml";
/// The optional annotation file of the testing set inside the data directory.
pub const TESTING_FILE: &str = "testing.xml";

/// Train a detector on `data_dir`, save it, evaluate it and run the reporting pass.
pub async fn start(config: Arc<Config>, data_dir: &Path) -> Result<()> {
    info!(
        "configuration:\n{}",
        serde_json::to_string_pretty(&*config)?
    );

    // load annotations
    let train_records = load_imglab(data_dir.join(TRAINING_FILE)).await?;
    let test_file = data_dir.join(TESTING_FILE);
    let test_records = if tokio::fs::metadata(&test_file).await.is_ok() {
        Some(load_imglab(&test_file).await?)
    } else {
        None
    };
    info!("num training images: {}", train_records.len());
    if let Some(records) = &test_records {
        info!("num testing images: {}", records.len());
    }

    // derive the detector geometry from the training boxes
    let options = config.options.build(&boxes_per_image(&train_records))?;
    info!("detector options:\n{}", options);

    let train_images = load_images(train_records).await?;
    let test_images = match test_records {
        Some(records) => Some(load_images(records).await?),
        None => None,
    };

    let trainer = config.training.trainer.clone().build()?;
    let cropper = config.cropper.clone().build()?;
    let jitter = config.color_jitter.clone().build()?;
    let detector = Detector::new(config.model.clone(), options, config.training.device)?;
    let seed = config.training.seed;

    let (detector, summary, train_images, trainer) = tokio::task::spawn_blocking({
        let cropper = cropper.clone();
        move || -> Result<_> {
            let mut detector = detector;
            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            let summary =
                trainer.train(&mut detector, &train_images, &cropper, &jitter, &mut rng)?;
            Ok((detector, summary, train_images, trainer))
        }
    })
    .instrument(info_span!("training"))
    .await??;

    let model_file = config.output.model_file.clone();
    detector.save(&model_file)?;
    info!("saved detector to '{}'", model_file.display());
    info!(
        "training finished after {} steps in {:.2} minutes, final loss {:.6}",
        summary.steps,
        summary.elapsed.as_secs_f64() / 60.0,
        summary.final_loss
    );

    // evaluate on the training and testing sets
    let adjust_threshold = config.report.adjust_threshold.raw();
    let detector = tokio::task::spawn_blocking(move || -> Result<_> {
        let metrics = test_detector(&detector, &train_images, adjust_threshold)?;
        info!("training results: {}", metrics);
        if let Some(test_images) = &test_images {
            let metrics = test_detector(&detector, test_images, adjust_threshold)?;
            info!("testing results: {}", metrics);
        }
        Ok(detector)
    })
    .instrument(info_span!("evaluation"))
    .await??;

    info!("{}", trainer);
    info!("{}", cropper);

    detect::report(detector, &config.report)
        .instrument(info_span!("report"))
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mmod_dl::{model::NetworkInit, processor::RandomCropperInit, trainer::TrainerInit};
    use noisy_float::prelude::*;
    use std::{fs, num::NonZeroUsize};
    use tch::{vision, Kind, Tensor};

    const TRAINING_XML: &str = r#"<?xml version='1.0' encoding='ISO-8859-1'?>
<dataset>
<images>
  <image file='a.png'>
    <box top='20' left='20' width='30' height='30'>
      <label>T</label>
    </box>
  </image>
</images>
</dataset>
"#;

    #[tokio::test]
    async fn train_save_and_report() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let data_dir = dir.path().join("data");
        let input_dir = dir.path().join("input");
        fs::create_dir(&data_dir)?;
        fs::create_dir(&input_dir)?;
        fs::write(data_dir.join(TRAINING_FILE), TRAINING_XML)?;
        for path in [data_dir.join("a.png"), input_dir.join("plan.png")] {
            let pixels = Tensor::randint(256, &[3, 80, 80], (Kind::Uint8, Device::Cpu));
            vision::image::save(&pixels, path)?;
        }

        let nz = |value| NonZeroUsize::new(value).unwrap();
        let mut config = Config::default();
        config.model = NetworkInit {
            downsampler_filters: vec![nz(4); 3],
            body_filters: nz(4),
            body_blocks: 1,
            head_kernel: nz(3),
            ..Default::default()
        };
        config.options.target_size = nz(24);
        config.cropper = RandomCropperInit {
            chip_dims: bbox::HW { h: 48, w: 48 },
            min_object_length_long_dim: 20,
            min_object_length_short_dim: 4,
            ..Default::default()
        };
        // the initial rate is below the floor, so training takes one step
        config.training.trainer = TrainerInit {
            learning_rate: r64(0.001),
            min_learning_rate: r64(0.005),
            mini_batch_size: nz(2),
            sync_file: None,
            ..Default::default()
        };
        config.training.device = Device::Cpu;
        config.training.seed = Some(0);
        config.output.model_file = dir.path().join("mmod_network.dat");
        config.report.input_dir = input_dir;
        config.report.overlay_dir = dir.path().join("overlays");
        config.report.upsample = r64(1.0);
        config.report.device = Device::Cpu;

        start(Arc::new(config), &data_dir).await?;

        assert!(dir.path().join("mmod_network.dat").is_file());
        assert!(dir.path().join("mmod_network.dat.json").is_file());
        assert!(dir.path().join("overlays").join("plan.png.png").is_file());

        let loaded = Detector::load(dir.path().join("mmod_network.dat"), Device::Cpu)?;
        assert_eq!(loaded.options().labels().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn missing_training_file_fails() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = Config {
            output: config::OutputConfig {
                model_file: dir.path().join("mmod_network.dat"),
            },
            ..Default::default()
        };
        assert!(start(Arc::new(config), dir.path()).await.is_err());
        assert!(!dir.path().join("mmod_network.dat").exists());
        Ok(())
    }
}
