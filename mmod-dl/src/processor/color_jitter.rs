//! The random color distortion algorithm.

use crate::{common::*, tensor::TensorExt as _};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorJitterInit {
    pub hue_shift: Option<R64>,
    pub saturation_shift: Option<R64>,
    pub value_shift: Option<R64>,
}

impl Default for ColorJitterInit {
    fn default() -> Self {
        Self {
            hue_shift: Some(r64(0.05)),
            saturation_shift: Some(r64(0.2)),
            value_shift: Some(r64(0.2)),
        }
    }
}

impl ColorJitterInit {
    pub fn build(self) -> Result<ColorJitter> {
        let Self {
            hue_shift,
            saturation_shift,
            value_shift,
        } = self;

        let check = |shift: Option<R64>, name: &str| -> Result<Option<f64>> {
            match shift {
                Some(shift) => {
                    let shift = shift.raw();
                    ensure!(
                        shift > 0.0 && shift <= 1.0,
                        "{} must be in range (0, 1], but get {}",
                        name,
                        shift
                    );
                    Ok(Some(shift))
                }
                None => Ok(None),
            }
        };

        Ok(ColorJitter {
            max_hue_shift: check(hue_shift, "hue_shift")?,
            max_saturation_shift: check(saturation_shift, "saturation_shift")?,
            max_value_shift: check(value_shift, "value_shift")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ColorJitter {
    max_hue_shift: Option<f64>,
    max_saturation_shift: Option<f64>,
    max_value_shift: Option<f64>,
}

impl ColorJitter {
    /// Randomly shift the hue, saturation and value of an RGB image in `[0, 1]`.
    pub fn forward<R>(&self, rgb: &Tensor, rng: &mut R) -> Result<Tensor>
    where
        R: Rng,
    {
        tch::no_grad(|| -> Result<_> {
            let hsv = rgb.f_rgb_to_hsv()?;
            let mut draw = |max_shift: Option<f64>| match max_shift {
                Some(max_shift) => rng.gen_range((-max_shift)..max_shift),
                None => 0.0,
            };
            let hue_shift = draw(self.max_hue_shift);
            let saturation_shift = draw(self.max_saturation_shift);
            let value_shift = draw(self.max_value_shift);

            let hue = (hsv.select(0, 0) + hue_shift + 1.0).fmod(1.0);
            let saturation = (hsv.select(0, 1) + saturation_shift).clamp(0.0, 1.0);
            let value = (hsv.select(0, 2) + value_shift).clamp(0.0, 1.0);

            Tensor::stack(&[hue, saturation, value], 0).f_hsv_to_rgb()
        })
    }

    /// Apply an independent distortion to every image of a batch.
    pub fn forward_batch<R>(&self, images: &Tensor, rng: &mut R) -> Result<Tensor>
    where
        R: Rng,
    {
        let (batch_size, _channels, _height, _width) = images.size4()?;
        let distorted: Vec<_> = (0..batch_size)
            .map(|index| self.forward(&images.select(0, index), rng))
            .try_collect()?;
        Ok(Tensor::stack(&distorted, 0))
    }
}
