use crate::{common::*, label::MmodRect};

/// The record with image path and boxes, but without image pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub path: PathBuf,
    /// Boxes in pixel units.
    pub boxes: Vec<MmodRect>,
}

/// The record with image pixels and boxes.
#[derive(Debug, TensorLike)]
pub struct LabeledImage {
    #[tensor_like(clone)]
    pub path: PathBuf,
    /// RGB float image of shape `[3, height, width]` in range `[0, 1]`.
    pub image: Tensor,
    #[tensor_like(clone)]
    pub boxes: Vec<MmodRect>,
}

impl LabeledImage {
    pub fn height(&self) -> i64 {
        self.image.size()[1]
    }

    pub fn width(&self) -> i64 {
        self.image.size()[2]
    }
}

/// Decode an image file into a float RGB tensor of shape `[3, height, width]`.
pub fn load_image<P>(path: P) -> Result<Tensor>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let image = vision::image::load(path)
        .with_context(|| format!("unable to decode image '{}'", path.display()))?;
    let (channels, _height, _width) = image.size3()?;
    ensure!(
        channels == 3,
        "expect RGB image, but '{}' has {} channels",
        path.display(),
        channels
    );
    Ok(image.to_kind(Kind::Float) / 255.0)
}

/// Decode the images of all records.
pub async fn load_images(records: Vec<FileRecord>) -> Result<Vec<LabeledImage>> {
    tokio::task::spawn_blocking(move || {
        records
            .into_iter()
            .map(|record| -> Result<_> {
                let FileRecord { path, boxes } = record;
                let image = load_image(&path)?;
                Ok(LabeledImage { path, image, boxes })
            })
            .try_collect()
    })
    .await?
}
