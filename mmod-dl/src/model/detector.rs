use super::{Network, NetworkInit};
use crate::{
    common::*,
    label::Detection,
    loss::{MmodInference, MmodLoss},
    options::DetectorOptions,
};

/// Everything besides the weights needed to rebuild a trained detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorMeta {
    pub network: NetworkInit,
    pub options: DetectorOptions,
}

/// A network bound to its detector options and weights.
#[derive(Debug)]
pub struct Detector {
    pub vs: nn::VarStore,
    pub network: Network,
    pub meta: DetectorMeta,
}

impl Detector {
    pub fn new(network: NetworkInit, options: DetectorOptions, device: Device) -> Result<Self> {
        let vs = nn::VarStore::new(device);
        let model = network.build(&vs.root(), options.num_windows(), options.min_window_hw())?;
        Ok(Self {
            vs,
            network: model,
            meta: DetectorMeta { network, options },
        })
    }

    /// The path of the metadata file stored next to the weights.
    pub fn meta_path(path: &Path) -> PathBuf {
        let mut file_name = path.file_name().unwrap_or_default().to_os_string();
        file_name.push(".json");
        path.with_file_name(file_name)
    }

    /// Save the weights to `path` and the metadata to `<path>.json`.
    pub fn save<P>(&self, path: P) -> Result<()>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        self.vs
            .save(path)
            .with_context(|| format!("unable to save weights to '{}'", path.display()))?;
        let meta_path = Self::meta_path(path);
        let text = serde_json::to_string_pretty(&self.meta)?;
        std::fs::write(&meta_path, text)
            .with_context(|| format!("unable to write '{}'", meta_path.display()))?;
        Ok(())
    }

    pub fn load<P>(path: P, device: Device) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let meta_path = Self::meta_path(path);
        let text = std::fs::read_to_string(&meta_path)
            .with_context(|| format!("unable to read '{}'", meta_path.display()))?;
        let DetectorMeta { network, options } = serde_json::from_str(&text)
            .with_context(|| format!("invalid detector metadata '{}'", meta_path.display()))?;

        let mut detector = Self::new(network, options, device)?;
        detector
            .vs
            .load(path)
            .with_context(|| format!("unable to load weights from '{}'", path.display()))?;
        Ok(detector)
    }

    pub fn options(&self) -> &DetectorOptions {
        &self.meta.options
    }

    pub fn device(&self) -> Device {
        self.vs.device()
    }

    pub fn loss(&self) -> MmodLoss {
        MmodLoss::new(self.meta.options.clone(), self.network.stride())
    }

    pub fn inference(&self) -> MmodInference {
        MmodInference::new(self.meta.options.clone(), self.network.stride())
    }

    /// Detect objects on a float RGB image of shape `[3, height, width]`.
    pub fn detect(&self, image: &Tensor, adjust_threshold: f64) -> Result<Vec<Detection>> {
        let images = image.to_device(self.device()).unsqueeze(0);
        let outputs = tch::no_grad(|| self.network.forward_t(&images, false))?;
        let detections = self
            .inference()
            .forward(&outputs, adjust_threshold)?
            .into_iter()
            .next()
            .unwrap_or_default();
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{label::MmodRect, options::DetectorOptionsInit};

    fn small_network() -> NetworkInit {
        NetworkInit {
            downsampler_filters: vec![NonZeroUsize::new(4).unwrap(); 3],
            body_filters: NonZeroUsize::new(4).unwrap(),
            body_blocks: 1,
            head_kernel: NonZeroUsize::new(3).unwrap(),
            ..Default::default()
        }
    }

    fn small_options() -> DetectorOptions {
        let boxes = vec![vec![MmodRect::new(
            TLBR::from_tlhw([0.0, 0.0, 20.0, 20.0]),
            "T",
        )]];
        DetectorOptionsInit {
            target_size: NonZeroUsize::new(20).unwrap(),
            ..Default::default()
        }
        .build(&boxes)
        .unwrap()
    }

    #[test]
    fn meta_path_appends_extension() {
        assert_eq!(
            Detector::meta_path(Path::new("/tmp/mmod_network.dat")),
            Path::new("/tmp/mmod_network.dat.json")
        );
    }

    #[test]
    fn save_and_load_detector() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("mmod_network.dat");

        let detector = Detector::new(small_network(), small_options(), Device::Cpu)?;
        detector.save(&path)?;
        let loaded = Detector::load(&path, Device::Cpu)?;
        assert_eq!(loaded.meta, detector.meta);

        let image = Tensor::rand(&[3, 48, 48], FLOAT_CPU);
        let lhs = detector.detect(&image, -1e9)?;
        let rhs = loaded.detect(&image, -1e9)?;
        assert_eq!(lhs.len(), rhs.len());
        izip!(&lhs, &rhs).for_each(|(lhs, rhs)| {
            assert_abs_diff_eq!(lhs.confidence, rhs.confidence, epsilon = 1e-5);
        });
        Ok(())
    }
}
