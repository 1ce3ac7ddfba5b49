//! The imglab XML annotation format.

use super::FileRecord;
use crate::{common::*, label::MmodRect};

mod xml {
    use crate::common::*;

    #[derive(Debug, Clone, Deserialize)]
    pub struct Dataset {
        #[serde(default)]
        pub images: Images,
    }

    #[derive(Debug, Clone, Default, Deserialize)]
    pub struct Images {
        #[serde(rename = "image", default)]
        pub images: Vec<Image>,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct Image {
        pub file: String,
        #[serde(rename = "box", default)]
        pub boxes: Vec<Box>,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct Box {
        pub top: i64,
        pub left: i64,
        pub width: i64,
        pub height: i64,
        #[serde(default)]
        pub ignore: Option<String>,
        #[serde(default)]
        pub label: Option<String>,
    }
}

/// Parse an imglab XML document. Relative image paths are resolved against `base_dir`.
pub fn parse_imglab(text: &str, base_dir: &Path) -> Result<Vec<FileRecord>> {
    let dataset: xml::Dataset =
        serde_xml_rs::from_str(text).map_err(|err| format_err!("invalid imglab XML: {}", err))?;

    dataset
        .images
        .images
        .into_iter()
        .map(|image| -> Result<_> {
            let xml::Image { file, boxes } = image;
            let path = base_dir.join(&file);

            let boxes: Vec<_> = boxes
                .into_iter()
                .map(|bx| -> Result<_> {
                    let xml::Box {
                        top,
                        left,
                        width,
                        height,
                        ignore,
                        label,
                    } = bx;
                    let rect = TLBR::try_from_tlhw([
                        top as f64,
                        left as f64,
                        height as f64,
                        width as f64,
                    ])
                    .with_context(|| format!("invalid box in image '{}'", file))?;
                    let ignore = match ignore.as_deref().map(str::trim) {
                        None | Some("") | Some("0") | Some("false") => false,
                        Some("1") | Some("true") => true,
                        Some(other) => bail!("invalid ignore flag '{}' in image '{}'", other, file),
                    };

                    Ok(MmodRect {
                        rect,
                        label: label.map(|label| label.trim().to_string()).unwrap_or_default(),
                        ignore,
                    })
                })
                .try_collect()?;

            Ok(FileRecord { path, boxes })
        })
        .try_collect()
}

/// Read and parse an imglab XML file.
pub async fn load_imglab<P>(file: P) -> Result<Vec<FileRecord>>
where
    P: AsRef<Path>,
{
    let file = file.as_ref();
    let text = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("unable to read dataset file '{}'", file.display()))?;
    let base_dir = file.parent().unwrap_or_else(|| Path::new(""));
    let records = parse_imglab(&text, base_dir)
        .with_context(|| format!("unable to parse dataset file '{}'", file.display()))?;
    Ok(records)
}

/// Collect the boxes of all records, grouped by image.
pub fn boxes_per_image(records: &[FileRecord]) -> Vec<Vec<MmodRect>> {
    records.iter().map(|record| record.boxes.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version='1.0' encoding='ISO-8859-1'?>
<dataset>
<name>plan</name>
<comment>sample</comment>
<images>
  <image file='a.jpg'>
    <box top='10' left='20' width='30' height='40'>
      <label>T</label>
    </box>
    <box top='100' left='100' width='8' height='8' ignore='1'>
      <label>C</label>
    </box>
  </image>
  <image file='sub/b.png'>
  </image>
</images>
</dataset>
"#;

    #[test]
    fn parse_imglab_sample() -> Result<()> {
        let records = parse_imglab(SAMPLE, Path::new("/data"))?;
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.path, Path::new("/data/a.jpg"));
        assert_eq!(first.boxes.len(), 2);
        assert_eq!(first.boxes[0].label, "T");
        assert!(!first.boxes[0].ignore);
        assert_eq!(first.boxes[0].rect.tlbr(), [10.0, 20.0, 50.0, 50.0]);
        assert_eq!(first.boxes[1].label, "C");
        assert!(first.boxes[1].ignore);

        let second = &records[1];
        assert_eq!(second.path, Path::new("/data/sub/b.png"));
        assert!(second.boxes.is_empty());
        Ok(())
    }

    #[test]
    fn parse_imglab_rejects_garbage() {
        assert!(parse_imglab("<dataset><images>", Path::new(".")).is_err());
    }

    #[tokio::test]
    async fn load_imglab_resolves_relative_paths() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("training.xml");
        tokio::fs::write(&file, SAMPLE).await?;

        let records = load_imglab(&file).await?;
        assert_eq!(records[0].path, dir.path().join("a.jpg"));
        Ok(())
    }

    #[tokio::test]
    async fn load_imglab_missing_file() {
        assert!(load_imglab("/nonexistent/training.xml").await.is_err());
    }
}
