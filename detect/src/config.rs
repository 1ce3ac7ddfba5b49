use crate::common::*;

/// The environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "MMOD_CONFIG";
/// The configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "mmod.json5";

/// Find the configuration file from [CONFIG_ENV], falling back to
/// [DEFAULT_CONFIG_FILE] if it exists.
pub fn locate_config_file() -> Option<PathBuf> {
    match env::var_os(CONFIG_ENV) {
        Some(path) => Some(PathBuf::from(path)),
        None => {
            let path = PathBuf::from(DEFAULT_CONFIG_FILE);
            path.is_file().then(|| path)
        }
    }
}

/// Read a JSON5 file into a configuration type.
pub fn open_json5<T, P>(path: P) -> Result<T>
where
    T: serde::de::DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file '{}'", path.display()))?;
    let config = json5::from_str(&text)
        .with_context(|| format!("failed to parse config file '{}'", path.display()))?;
    Ok(config)
}

/// The configuration of the `detect` program.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub output: OutputConfig,
    pub report: ReportConfig,
    /// Wait for Enter before exiting on error.
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

pub use output::*;
mod output {
    use super::*;

    /// Where the trained detector is stored.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct OutputConfig {
        /// The weights file. The metadata is stored at the same path with a `.json` suffix.
        pub model_file: PathBuf,
    }

    impl Default for OutputConfig {
        fn default() -> Self {
            Self {
                model_file: PathBuf::from("mmod_network.dat"),
            }
        }
    }
}

pub use report::*;
mod report {
    use super::*;

    /// The reporting pass over a directory of images.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct ReportConfig {
        pub input_dir: PathBuf,
        /// Annotated images are written here.
        pub overlay_dir: PathBuf,
        /// The factor by which images are enlarged before detection.
        pub upsample: R64,
        /// Windows scoring above this value become detections.
        pub adjust_threshold: R64,
        /// The border width of overlay boxes in pixels.
        pub stroke: usize,
        pub labels: LabelMap,
        /// Performed on images where every configured label is detected.
        pub action: ReportAction,
        #[serde(with = "tch_serde::serde_device")]
        pub device: Device,
    }

    impl Default for ReportConfig {
        fn default() -> Self {
            Self {
                input_dir: PathBuf::from("images"),
                overlay_dir: PathBuf::from("overlays"),
                upsample: r64(2.0),
                adjust_threshold: r64(0.0),
                stroke: 2,
                labels: LabelMap::default(),
                action: ReportAction::Log,
                device: Device::cuda_if_available(),
            }
        }
    }

    /// How a label is displayed.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct LabelStyle {
        pub display_name: String,
        pub color: [u8; 3],
    }

    /// The counted labels in reporting order.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct LabelMap(pub IndexMap<String, LabelStyle>);

    impl LabelMap {
        pub fn get(&self, label: &str) -> Option<&LabelStyle> {
            self.0.get(label)
        }

        pub fn labels(&self) -> impl Iterator<Item = &str> {
            self.0.keys().map(String::as_str)
        }

        pub fn len(&self) -> usize {
            self.0.len()
        }

        pub fn is_empty(&self) -> bool {
            self.0.is_empty()
        }
    }

    impl Default for LabelMap {
        fn default() -> Self {
            let entries = [
                ("T", "transformers", [255, 0, 0]),
                ("C", "fuse cutouts/switches", [0, 255, 0]),
                ("L", "luminaires", [0, 0, 255]),
                ("NM", "medium-voltage nodes", [246, 255, 51]),
                ("NB", "low-voltage nodes", [255, 51, 236]),
            ];
            Self(
                entries
                    .into_iter()
                    .map(|(label, display_name, color)| {
                        (
                            label.to_string(),
                            LabelStyle {
                                display_name: display_name.to_string(),
                                color,
                            },
                        )
                    })
                    .collect(),
            )
        }
    }

    /// The action taken when every configured label appears in an image.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "kind")]
    pub enum ReportAction {
        /// Log the image path.
        Log,
        /// Wait for Enter on the console.
        Pause,
        /// Append the image path to a text file.
        Manifest { file: PathBuf },
    }

    impl Default for ReportAction {
        fn default() -> Self {
            Self::Log
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_label_map_order() {
        let labels: Vec<_> = LabelMap::default().labels().map(String::from).collect();
        assert_eq!(labels, ["T", "C", "L", "NM", "NB"]);
        assert_eq!(
            LabelMap::default().get("NM").unwrap().color,
            [246, 255, 51]
        );
    }

    #[test]
    fn parse_partial_config() -> Result<()> {
        let text = r#"{
            // sections from the training program are ignored
            training: { mini_batch_size: 32 },
            output: { model_file: "net.dat" },
            report: {
                input_dir: "/data/plans",
                device: "cpu",
                labels: {
                    T: { display_name: "transformers", color: [1, 2, 3] },
                },
                action: { kind: "Manifest", file: "hits.txt" },
            },
        }"#;
        let config: Config = json5::from_str(text)?;

        assert_eq!(config.output.model_file, Path::new("net.dat"));
        assert_eq!(config.report.input_dir, Path::new("/data/plans"));
        assert_eq!(config.report.overlay_dir, Path::new("overlays"));
        assert_eq!(config.report.device, Device::Cpu);
        assert_eq!(config.report.labels.len(), 1);
        assert_eq!(
            config.report.action,
            ReportAction::Manifest {
                file: PathBuf::from("hits.txt")
            }
        );
        assert!(!config.pause_on_error);
        Ok(())
    }

    #[test]
    fn open_missing_config_fails() {
        assert!(Config::open("/nonexistent/mmod.json5").is_err());
    }
}
