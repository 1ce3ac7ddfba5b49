//! The reporting pass over a directory of images.

use crate::{
    common::*,
    config::{LabelMap, ReportAction, ReportConfig},
    console::wait_for_enter,
    listing::{list_dir, Listing},
    tally::Tally,
};

/// The outcome of one image.
#[derive(Debug)]
pub struct ImageReport {
    pub path: PathBuf,
    pub tally: Tally,
    /// All detections on the image, including labels outside the label map.
    pub num_detections: usize,
    /// The upsampled image with the counted detections drawn on it.
    pub overlay: Tensor,
}

/// The outcome of a reporting pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportSummary {
    pub num_images: usize,
    /// Images where every configured label was detected.
    pub triggered: Vec<PathBuf>,
}

/// Run the detector on every entry of `config.input_dir`.
pub async fn run_report(detector: Detector, config: ReportConfig) -> Result<ReportSummary> {
    let paths = match list_dir(&config.input_dir).await? {
        Listing::NotFound(dir) => {
            warn!("input directory '{}' does not exist", dir.display());
            return Ok(ReportSummary::default());
        }
        Listing::Entries(paths) => paths,
    };
    tokio::fs::create_dir_all(&config.overlay_dir)
        .await
        .with_context(|| {
            format!(
                "unable to create overlay directory '{}'",
                config.overlay_dir.display()
            )
        })?;

    tokio::task::spawn_blocking(move || -> Result<_> {
        let mut summary = ReportSummary::default();

        for path in paths {
            info!("image: {}", path.display());
            if !path.is_file() {
                warn!("skip non-file entry '{}'", path.display());
                continue;
            }

            let ImageReport {
                path,
                tally,
                num_detections,
                overlay,
            } = report_image(&detector, &path, &config)?;
            summary.num_images += 1;

            let overlay_path = overlay_path(&config.overlay_dir, &path);
            vision::image::save(&overlay.to_rgb8().to_device(Device::Cpu), &overlay_path)
                .with_context(|| format!("unable to save overlay '{}'", overlay_path.display()))?;

            info!("total detections: {}", num_detections);
            info!(
                "{}: {}",
                path.display(),
                format_counts(&config.labels, &tally)
            );

            if tally.all_present() {
                perform_action(&config.action, &path)?;
                summary.triggered.push(path);
            }
        }

        Ok(summary)
    })
    .await?
}

/// Detect and count objects on one image file.
pub fn report_image(
    detector: &Detector,
    path: &Path,
    config: &ReportConfig,
) -> Result<ImageReport> {
    let image = load_image(path)?;
    let mut image = upsample(&image, config.upsample.raw())?;
    let detections = detector.detect(&image, config.adjust_threshold.raw())?;

    let mut tally = Tally::new(config.labels.labels());
    for detection in &detections {
        let style = match config.labels.get(&detection.label) {
            Some(style) => style,
            None => continue,
        };
        tally.record(&detection.label);

        let [t, l, b, r] = detection.rect.tlbr();
        let color = Tensor::of_slice(&style.color)
            .to_kind(Kind::Float)
            .to_device(image.device())
            / 255.0;
        let _ = image.f_draw_rect_(
            t.round() as i64,
            l.round() as i64,
            b.round() as i64,
            r.round() as i64,
            config.stroke,
            &color,
        )?;
    }

    Ok(ImageReport {
        path: path.to_owned(),
        tally,
        num_detections: detections.len(),
        overlay: image,
    })
}

/// Enlarge a `[3, height, width]` image by `factor`.
pub fn upsample(image: &Tensor, factor: f64) -> Result<Tensor> {
    ensure!(
        factor.is_finite() && factor > 0.0,
        "upsample factor must be positive, but get {}",
        factor
    );
    if factor == 1.0 {
        return Ok(image.shallow_clone());
    }
    let (_channels, height, width) = image.size3()?;
    let new_height = ((height as f64 * factor).round() as i64).max(1);
    let new_width = ((width as f64 * factor).round() as i64).max(1);
    image.resize2d_exact(new_height, new_width)
}

/// The overlay file for an input image. The full input file name is kept and
/// `.png` is appended, so `a.jpg` and `a.png` map to distinct overlays.
pub fn overlay_path(overlay_dir: &Path, image_path: &Path) -> PathBuf {
    let mut file_name = image_path.file_name().unwrap_or_default().to_os_string();
    file_name.push(".png");
    overlay_dir.join(file_name)
}

pub fn format_counts(labels: &LabelMap, tally: &Tally) -> String {
    tally
        .iter()
        .map(|(label, count)| {
            let name = labels
                .get(label)
                .map(|style| style.display_name.as_str())
                .unwrap_or(label);
            format!("{} {}", count, name)
        })
        .join(", ")
}

pub fn perform_action(action: &ReportAction, path: &Path) -> Result<()> {
    match action {
        ReportAction::Log => {
            info!("all labels found in '{}'", path.display());
        }
        ReportAction::Pause => {
            wait_for_enter(&format!(
                "all labels found in '{}', press Enter to continue",
                path.display()
            ))?;
        }
        ReportAction::Manifest { file } => {
            let mut writer = OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
                .with_context(|| format!("unable to open manifest '{}'", file.display()))?;
            writeln!(writer, "{}", path.display())?;
        }
    }
    Ok(())
}
