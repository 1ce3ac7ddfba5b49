use crate::{common::*, loss::LevelGeometry};

/// Downscaling image pyramid. Each level is `(N - 1) / N` the size of the previous one.
#[derive(Debug, Clone, PartialEq)]
pub struct Pyramid {
    ratio: f64,
    min_height: f64,
    min_width: f64,
}

impl Pyramid {
    /// Create a pyramid with downscale factor `N` whose levels stop before they
    /// get smaller than `min_height` by `min_width`.
    pub fn new(downscale: usize, min_height: f64, min_width: f64) -> Result<Self> {
        ensure!(downscale >= 2, "pyramid downscale must be at least 2");
        ensure!(
            min_height > 0.0 && min_width > 0.0,
            "the minimum level size must be positive"
        );
        Ok(Self {
            ratio: (downscale - 1) as f64 / downscale as f64,
            min_height,
            min_width,
        })
    }

    /// The scale and the size of every level. The first level is the input itself.
    pub fn levels(&self, height: i64, width: i64) -> Vec<LevelGeometry> {
        let first = LevelGeometry {
            scale: 1.0,
            height,
            width,
        };
        let rest = (1..)
            .map(|index| {
                let scale = self.ratio.powi(index);
                LevelGeometry {
                    scale,
                    height: (height as f64 * scale).round() as i64,
                    width: (width as f64 * scale).round() as i64,
                }
            })
            .take_while(|level| {
                level.height as f64 >= self.min_height && level.width as f64 >= self.min_width
            });
        iter::once(first).chain(rest).collect()
    }

    /// Build the levels of a batch of images of shape `[batch, channels, height, width]`.
    pub fn build(&self, images: &Tensor) -> Result<Vec<(f64, Tensor)>> {
        let (_batch_size, _channels, height, width) = images.size4()?;
        let levels = self
            .levels(height, width)
            .into_iter()
            .map(|level| {
                let LevelGeometry {
                    scale,
                    height,
                    width,
                } = level;
                let tensor = if scale == 1.0 {
                    images.shallow_clone()
                } else {
                    images.adaptive_avg_pool2d(&[height, width])
                };
                (scale, tensor)
            })
            .collect();
        Ok(levels)
    }
}
