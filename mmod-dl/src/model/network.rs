use super::{ConvBnReluInit, ConvBnRelu, Pyramid};
use crate::{common::*, loss::LevelGeometry};

/// Mean RGB intensities subtracted from the input.
const PIXEL_MEAN: [f64; 3] = [122.782, 117.001, 104.298];

/// The network topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkInit {
    /// Each pyramid level is `(N - 1) / N` the size of the previous one.
    pub pyramid_downscale: NonZeroUsize,
    /// Filters of the stride-2 blocks. Each block halves the resolution.
    pub downsampler_filters: Vec<NonZeroUsize>,
    pub downsampler_kernel: NonZeroUsize,
    pub body_filters: NonZeroUsize,
    pub body_blocks: usize,
    pub body_kernel: NonZeroUsize,
    pub head_kernel: NonZeroUsize,
}

impl Default for NetworkInit {
    fn default() -> Self {
        let nz = |value| NonZeroUsize::new(value).unwrap();
        Self {
            pyramid_downscale: nz(4),
            downsampler_filters: vec![nz(32), nz(64), nz(128)],
            downsampler_kernel: nz(5),
            body_filters: nz(55),
            body_blocks: 3,
            body_kernel: nz(5),
            head_kernel: nz(15),
        }
    }
}

impl NetworkInit {
    /// Build the network scoring `num_windows` windows. Pyramid levels smaller
    /// than `min_window_hw` are not generated.
    pub fn build<'p, P>(
        &self,
        path: P,
        num_windows: usize,
        min_window_hw: (f64, f64),
    ) -> Result<Network>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let Self {
            pyramid_downscale,
            ref downsampler_filters,
            downsampler_kernel,
            body_filters,
            body_blocks,
            body_kernel,
            head_kernel,
        } = *self;
        ensure!(num_windows > 0, "num_windows must be positive");
        ensure!(
            head_kernel.get() % 2 == 1,
            "head_kernel must be odd to keep the score map aligned"
        );

        let (min_h, min_w) = min_window_hw;
        let pyramid = Pyramid::new(pyramid_downscale.get(), min_h, min_w)?;

        let mut in_c = 3;
        let mut blocks = vec![];

        for (index, &out_c) in downsampler_filters.iter().enumerate() {
            let block = ConvBnReluInit {
                s: 2,
                ..ConvBnReluInit::new(in_c, out_c.get(), downsampler_kernel.get())
            }
            .build(path / format!("down_{}", index));
            blocks.push(block);
            in_c = out_c.get();
        }

        for index in 0..body_blocks {
            let block = ConvBnReluInit::new(in_c, body_filters.get(), body_kernel.get())
                .build(path / format!("body_{}", index));
            blocks.push(block);
            in_c = body_filters.get();
        }

        let head = nn::conv2d(
            path / "head",
            in_c as i64,
            num_windows as i64,
            head_kernel.get() as i64,
            nn::ConvConfig {
                padding: head_kernel.get() as i64 / 2,
                ..Default::default()
            },
        );

        let pixel_mean = Tensor::of_slice(&PIXEL_MEAN)
            .to_kind(Kind::Float)
            .view([1, 3, 1, 1])
            .to_device(path.device());

        Ok(Network {
            blocks,
            head,
            pyramid,
            stride: 1 << downsampler_filters.len(),
            num_windows: num_windows as i64,
            pixel_mean,
        })
    }
}

/// The score map of one pyramid level.
#[derive(Debug, TensorLike)]
pub struct LevelOutput {
    /// The ratio of the level size to the input size.
    #[tensor_like(copy)]
    pub scale: f64,
    /// Scores of shape `[batch, num_windows, height, width]`.
    pub scores: Tensor,
}

impl LevelOutput {
    pub fn geometry(&self) -> Result<LevelGeometry> {
        let (_batch_size, _num_windows, height, width) = self.scores.size4()?;
        Ok(LevelGeometry {
            scale: self.scale,
            height,
            width,
        })
    }
}

#[derive(Debug)]
pub struct Network {
    blocks: Vec<ConvBnRelu>,
    head: nn::Conv2D,
    pyramid: Pyramid,
    stride: i64,
    num_windows: i64,
    pixel_mean: Tensor,
}

impl Network {
    /// Score a batch of float RGB images in `[0, 1]` of shape `[batch, 3, height, width]`.
    pub fn forward_t(&self, images: &Tensor, train: bool) -> Result<Vec<LevelOutput>> {
        let (_batch_size, channels, _height, _width) = images.size4()?;
        ensure!(channels == 3, "expect RGB input, but get {} channels", channels);

        let normalized = (images * 255.0 - &self.pixel_mean) / 256.0;

        self.pyramid
            .build(&normalized)?
            .into_iter()
            .map(|(scale, level)| {
                let features = self
                    .blocks
                    .iter()
                    .fold(level, |xs, block| block.forward_t(&xs, train));
                let scores = features.apply(&self.head);
                debug_assert_eq!(scores.size()[1], self.num_windows);
                Ok(LevelOutput { scale, scores })
            })
            .collect()
    }

    /// The input pixels per score cell.
    pub fn stride(&self) -> i64 {
        self.stride
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_output_shapes() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let init = NetworkInit {
            downsampler_filters: vec![NonZeroUsize::new(4).unwrap(); 3],
            body_filters: NonZeroUsize::new(4).unwrap(),
            body_blocks: 1,
            head_kernel: NonZeroUsize::new(3).unwrap(),
            ..Default::default()
        };
        let network = init.build(&vs.root(), 2, (40.0, 40.0))?;
        assert_eq!(network.stride(), 8);

        let images = Tensor::rand(&[2, 3, 64, 64], FLOAT_CPU);
        let outputs = network.forward_t(&images, false)?;

        // 64, 48 pixels; 36 is smaller than the window
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].scores.size(), [2, 2, 8, 8]);
        assert_eq!(outputs[1].scores.size(), [2, 2, 6, 6]);
        assert_abs_diff_eq!(outputs[1].scale, 0.75);
        Ok(())
    }

    #[test]
    fn reject_even_head_kernel() {
        let vs = nn::VarStore::new(Device::Cpu);
        let init = NetworkInit {
            head_kernel: NonZeroUsize::new(4).unwrap(),
            ..Default::default()
        };
        assert!(init.build(&vs.root(), 1, (10.0, 10.0)).is_err());
    }
}
