//! Image tensor helpers.

use crate::common::*;

pub trait TensorExt {
    fn f_fill_rect_(
        &mut self,
        top: i64,
        left: i64,
        bottom: i64,
        right: i64,
        color: &Tensor,
    ) -> Result<Tensor>;

    fn f_draw_rect_(
        &mut self,
        top: i64,
        left: i64,
        bottom: i64,
        right: i64,
        stroke: usize,
        color: &Tensor,
    ) -> Result<Tensor>;

    /// Resize a float image, or a batch of float images, to exact dimensions.
    fn resize2d_exact(&self, new_height: i64, new_width: i64) -> Result<Tensor>;

    /// Convert a float image in `[0, 1]` to an 8-bit image.
    fn to_rgb8(&self) -> Tensor;

    fn f_rgb_to_hsv(&self) -> Result<Tensor>;

    fn f_hsv_to_rgb(&self) -> Result<Tensor>;
}

impl TensorExt for Tensor {
    fn f_fill_rect_(
        &mut self,
        top: i64,
        left: i64,
        bottom: i64,
        right: i64,
        color: &Tensor,
    ) -> Result<Tensor> {
        tch::no_grad(|| -> Result<_> {
            let (n_channels, _height, _width) = self.size3()?;
            ensure!(
                color.size1()? == n_channels,
                "the number of channels of input and color tensors do not match"
            );
            if bottom > top && right > left {
                let mut rect = self.i((.., top..bottom, left..right));
                let expanded_color = color.f_view([n_channels, 1, 1])?.f_expand_as(&rect)?;
                rect.f_copy_(&expanded_color)?;
            }
            Ok(())
        })?;

        Ok(self.shallow_clone())
    }

    fn f_draw_rect_(
        &mut self,
        t: i64,
        l: i64,
        b: i64,
        r: i64,
        stroke: usize,
        color: &Tensor,
    ) -> Result<Tensor> {
        let (_n_channels, height, width) = self.size3()?;

        let (outer_t, outer_l, outer_b, outer_r) = {
            let half_stroke = (stroke / 2) as i64;
            (
                t - half_stroke,
                l - half_stroke,
                b + half_stroke,
                r + half_stroke,
            )
        };
        let (inner_t, inner_l, inner_b, inner_r) = {
            let stroke = stroke as i64;
            (
                outer_t + stroke,
                outer_l + stroke,
                outer_b - stroke,
                outer_r - stroke,
            )
        };

        let clamp_h = |v: i64| v.max(0).min(height);
        let clamp_w = |v: i64| v.max(0).min(width);

        let (outer_t, outer_b) = (clamp_h(outer_t), clamp_h(outer_b));
        let (outer_l, outer_r) = (clamp_w(outer_l), clamp_w(outer_r));
        let (inner_t, inner_b) = (clamp_h(inner_t), clamp_h(inner_b));
        let (inner_l, inner_r) = (clamp_w(inner_l), clamp_w(inner_r));

        // top, left, bottom and right edges
        let _ = self.f_fill_rect_(outer_t, outer_l, inner_t, outer_r, color)?;
        let _ = self.f_fill_rect_(outer_t, outer_l, outer_b, inner_l, color)?;
        let _ = self.f_fill_rect_(inner_b, outer_l, outer_b, outer_r, color)?;
        let _ = self.f_fill_rect_(outer_t, inner_r, outer_b, outer_r, color)?;

        Ok(self.shallow_clone())
    }

    fn resize2d_exact(&self, new_height: i64, new_width: i64) -> Result<Tensor> {
        tch::no_grad(|| match (self.kind(), self.size().as_slice()) {
            (Kind::Float, &[_n_channels, _height, _width]) => {
                let device = self.device();
                let resized = vision::image::resize(
                    &self.to_rgb8().to_device(Device::Cpu),
                    new_width,
                    new_height,
                )?
                .to_kind(Kind::Float)
                    / 255.0;
                Ok(resized.to_device(device))
            }
            (Kind::Float, &[batch_size, _n_channels, _height, _width]) => {
                let resized_vec: Vec<_> = (0..batch_size)
                    .map(|index| self.select(0, index).resize2d_exact(new_height, new_width))
                    .try_collect()?;
                Ok(Tensor::stack(&resized_vec, 0))
            }
            (kind, &[_, _, _]) | (kind, &[_, _, _, _]) => {
                bail!("unsupported data kind {:?}", kind)
            }
            _ => bail!("invalid shape: expect three or four dimensions"),
        })
    }

    fn to_rgb8(&self) -> Tensor {
        tch::no_grad(|| (self * 255.0).clamp(0.0, 255.0).to_kind(Kind::Uint8))
    }

    fn f_rgb_to_hsv(&self) -> Result<Tensor> {
        let eps = 1e-4;
        let rgb = self;
        let (channels, _height, _width) = rgb.size3()?;
        ensure!(
            channels == 3,
            "channel size must be 3, but get {}",
            channels
        );

        let red = rgb.select(0, 0);
        let green = rgb.select(0, 1);
        let blue = rgb.select(0, 2);

        let (max, argmax) = rgb.max_dim(0, false);
        let (min, _argmin) = rgb.min_dim(0, false);
        let diff = &max - &min;

        let value = max;
        let saturation = (&diff / &value).where_self(&value.gt(eps), &value.zeros_like());

        let case1 = value.zeros_like();
        let case2 = (&green - &blue) / &diff;
        let case3 = (&blue - &red) / &diff + 2.0;
        let case4 = (&red - &green) / &diff + 4.0;

        let hue = {
            let hue = case1.where_self(
                &diff.le(eps),
                &case2.where_self(&argmax.eq(0), &case3.where_self(&argmax.eq(1), &case4)),
            );
            let hue = hue.where_self(&hue.ge(0.0), &(&hue + 6.0));
            hue / 6.0
        };

        Ok(Tensor::stack(&[hue, saturation, value], 0))
    }

    fn f_hsv_to_rgb(&self) -> Result<Tensor> {
        let hsv = self;
        let (channels, _height, _width) = hsv.size3()?;
        ensure!(
            channels == 3,
            "channel size must be 3, but get {}",
            channels
        );

        // hue is stored in [0, 1) and scaled to the six sectors here
        let hue = hsv.select(0, 0) * 6.0;
        let saturation = hsv.select(0, 1);
        let value = hsv.select(0, 2);

        let func = |n: i64| {
            let k = (&hue + n as f64).fmod(6.0);
            let ramp = k.minimum(&(-&k + 4.0)).clamp(0.0, 1.0);
            &value - &value * &saturation * ramp
        };

        let red = func(5);
        let green = func(3);
        let blue = func(1);
        Ok(Tensor::stack(&[red, green, blue], 0))
    }
}
