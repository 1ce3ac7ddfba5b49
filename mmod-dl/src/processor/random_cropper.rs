//! Random object-centered and background crops.

use crate::{
    common::*,
    dataset::LabeledImage,
    label::MmodRect,
    tensor::TensorExt as _,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomCropperInit {
    /// The output size of every crop.
    pub chip_dims: HW<usize>,
    /// Objects whose long side is smaller than this in the chip are ignored.
    pub min_object_length_long_dim: usize,
    /// Objects whose short side is smaller than this in the chip are ignored.
    pub min_object_length_short_dim: usize,
    /// The largest object long side relative to the chip long side.
    pub max_object_size: R64,
    pub background_crops_fraction: R64,
    /// The largest random offset of an object relative to its size.
    pub translate_amount: R64,
    pub randomly_flip: bool,
}

impl Default for RandomCropperInit {
    fn default() -> Self {
        Self {
            chip_dims: HW { h: 250, w: 250 },
            min_object_length_long_dim: 84,
            min_object_length_short_dim: 6,
            max_object_size: r64(0.7),
            background_crops_fraction: r64(0.5),
            translate_amount: r64(0.1),
            randomly_flip: false,
        }
    }
}

impl RandomCropperInit {
    pub fn build(self) -> Result<RandomCropper> {
        let Self {
            chip_dims,
            min_object_length_long_dim,
            min_object_length_short_dim,
            max_object_size,
            background_crops_fraction,
            translate_amount,
            randomly_flip,
        } = self;

        ensure!(
            chip_dims.h > 0 && chip_dims.w > 0,
            "chip_dims must be positive"
        );
        ensure!(
            min_object_length_short_dim <= min_object_length_long_dim,
            "min_object_length_short_dim must not exceed min_object_length_long_dim"
        );
        ensure!(
            max_object_size.raw() > 0.0 && max_object_size.raw() <= 1.0,
            "max_object_size must be in range (0, 1]"
        );
        ensure!(
            (0.0..=1.0).contains(&background_crops_fraction.raw()),
            "background_crops_fraction must be in range [0, 1]"
        );
        ensure!(
            translate_amount.raw() >= 0.0,
            "translate_amount must be non-negative"
        );

        Ok(RandomCropper {
            chip_dims,
            min_object_length_long_dim: min_object_length_long_dim as f64,
            min_object_length_short_dim: min_object_length_short_dim as f64,
            max_object_size: max_object_size.raw(),
            background_crops_fraction: background_crops_fraction.raw(),
            translate_amount: translate_amount.raw(),
            randomly_flip,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RandomCropper {
    chip_dims: HW<usize>,
    min_object_length_long_dim: f64,
    min_object_length_short_dim: f64,
    max_object_size: f64,
    background_crops_fraction: f64,
    translate_amount: f64,
    randomly_flip: bool,
}

impl RandomCropper {
    /// Draw `num_crops` crops from randomly chosen images.
    ///
    /// Returns the chips of shape `[num_crops, 3, chip_height, chip_width]`
    /// and the boxes of every chip.
    pub fn sample_batch<R>(
        &self,
        num_crops: usize,
        images: &[LabeledImage],
        rng: &mut R,
    ) -> Result<(Tensor, Vec<Vec<MmodRect>>)>
    where
        R: Rng,
    {
        ensure!(!images.is_empty(), "cannot crop from an empty image set");
        let (chips, boxes): (Vec<_>, Vec<_>) = (0..num_crops)
            .map(|_| -> Result<_> {
                let index = rng.gen_range(0..images.len());
                self.sample(&images[index], rng)
            })
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .unzip();
        Ok((Tensor::stack(&chips, 0), boxes))
    }

    /// Draw one crop from an image.
    pub fn sample<R>(&self, image: &LabeledImage, rng: &mut R) -> Result<(Tensor, Vec<MmodRect>)>
    where
        R: Rng,
    {
        let crop_rect = self.make_crop_plan(image, rng)?;
        let chip_rect = TLBR::from_tlhw([
            0.0,
            0.0,
            self.chip_dims.h as f64,
            self.chip_dims.w as f64,
        ]);
        let transform = Transform::from_rects(&crop_rect, &chip_rect);

        let chip = self.extract_chip(&image.image, &crop_rect)?;
        let boxes: Vec<_> = image
            .boxes
            .iter()
            .filter_map(|bbox| {
                let rect = &transform * &bbox.rect;
                let [cy, cx, _, _] = rect.cycxhw();
                if !chip_rect.contains_point(cy, cx) {
                    return None;
                }

                let [h, w] = rect.hw();
                let size = HW { h, w };
                let too_small = size.long_side() < self.min_object_length_long_dim
                    || size.short_side() < self.min_object_length_short_dim;
                let mostly_outside = rect.covered_ratio_by(&chip_rect) < 0.5;

                Some(MmodRect {
                    rect,
                    label: bbox.label.clone(),
                    ignore: bbox.ignore || too_small || mostly_outside,
                })
            })
            .collect();

        if self.randomly_flip && rng.gen_bool(0.5) {
            let chip_width = self.chip_dims.w as f64;
            let flipped_boxes = boxes
                .into_iter()
                .map(|bbox| MmodRect {
                    rect: bbox.rect.flip_horizontal(chip_width),
                    ..bbox
                })
                .collect();
            Ok((chip.flip(&[2]), flipped_boxes))
        } else {
            Ok((chip, boxes))
        }
    }

    /// Pick the region of the source image that is mapped onto the chip.
    fn make_crop_plan<R>(&self, image: &LabeledImage, rng: &mut R) -> Result<TLBR<f64>>
    where
        R: Rng,
    {
        let image_h = image.height() as f64;
        let image_w = image.width() as f64;
        let chip_h = self.chip_dims.h as f64;
        let chip_w = self.chip_dims.w as f64;

        let objects: Vec<_> = image.boxes.iter().filter(|bbox| !bbox.ignore).collect();
        let background = objects.is_empty() || rng.gen_bool(self.background_crops_fraction);

        let rect = if background {
            // a crop at least as large as the chip, covering at most the short image side
            let min_scale = 1.0;
            let max_scale = (image_h / chip_h).min(image_w / chip_w).max(min_scale);
            let scale = if max_scale > min_scale {
                rng.gen_range(min_scale..=max_scale)
            } else {
                min_scale
            };
            let crop_h = chip_h * scale;
            let crop_w = chip_w * scale;
            let t = rng.gen_range(0.0..=(image_h - crop_h).max(0.0));
            let l = rng.gen_range(0.0..=(image_w - crop_w).max(0.0));
            TLBR::try_from_tlhw([t, l, crop_h, crop_w])?
        } else {
            let object = objects[rng.gen_range(0..objects.len())];
            let [cy, cx, h, w] = object.rect.cycxhw();
            let object_long = h.max(w).max(1.0);

            // the object long side in the chip
            let min_size = self.min_object_length_long_dim;
            let max_size =
                (self.max_object_size * self.chip_dims.long_side() as f64).max(min_size);
            let target_size = if max_size > min_size {
                rng.gen_range(min_size..=max_size)
            } else {
                min_size
            };
            let scale = object_long / target_size;

            let translate = self.translate_amount;
            let offset_y = if translate > 0.0 {
                rng.gen_range(-translate..=translate) * h
            } else {
                0.0
            };
            let offset_x = if translate > 0.0 {
                rng.gen_range(-translate..=translate) * w
            } else {
                0.0
            };

            TLBR::try_from_cycxhw([cy + offset_y, cx + offset_x, chip_h * scale, chip_w * scale])?
        };

        Ok(rect)
    }

    /// Copy the crop region into a zero padded canvas and resize it to the chip.
    fn extract_chip(&self, image: &Tensor, crop: &TLBR<f64>) -> Result<Tensor> {
        let (_channels, image_h, image_w) = image.size3()?;
        let crop_t = crop.t().floor() as i64;
        let crop_l = crop.l().floor() as i64;
        let crop_h = (crop.h().round() as i64).max(1);
        let crop_w = (crop.w().round() as i64).max(1);

        let canvas = tch::no_grad(|| -> Result<_> {
            let canvas = Tensor::zeros(&[3, crop_h, crop_w], (Kind::Float, image.device()));

            // the visible part in source coordinates
            let src_t = crop_t.max(0);
            let src_l = crop_l.max(0);
            let src_b = (crop_t + crop_h).min(image_h);
            let src_r = (crop_l + crop_w).min(image_w);

            if src_b > src_t && src_r > src_l {
                let src = image.i((.., src_t..src_b, src_l..src_r));
                let dst_t = src_t - crop_t;
                let dst_l = src_l - crop_l;
                canvas
                    .i((
                        ..,
                        dst_t..(dst_t + src_b - src_t),
                        dst_l..(dst_l + src_r - src_l),
                    ))
                    .f_copy_(&src)?;
            }
            Ok(canvas)
        })?;

        canvas.resize2d_exact(self.chip_dims.h as i64, self.chip_dims.w as i64)
    }
}

impl Display for RandomCropper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "random_cropper{{")?;
        writeln!(
            f,
            "    chip_dims.rows:              {}",
            self.chip_dims.h
        )?;
        writeln!(
            f,
            "    chip_dims.cols:              {}",
            self.chip_dims.w
        )?;
        writeln!(
            f,
            "    randomly_flip:               {}",
            self.randomly_flip
        )?;
        writeln!(
            f,
            "    background_crops_fraction:   {}",
            self.background_crops_fraction
        )?;
        writeln!(
            f,
            "    translate_amount:            {}",
            self.translate_amount
        )?;
        writeln!(
            f,
            "    min_object_length_long_dim:  {}",
            self.min_object_length_long_dim
        )?;
        writeln!(
            f,
            "    min_object_length_short_dim: {}",
            self.min_object_length_short_dim
        )?;
        writeln!(
            f,
            "    max_object_size:             {}",
            self.max_object_size
        )?;
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labeled_image(boxes: Vec<MmodRect>) -> LabeledImage {
        LabeledImage {
            path: PathBuf::from("image.png"),
            image: Tensor::rand(&[3, 400, 600], FLOAT_CPU),
            boxes,
        }
    }

    fn cropper(background_crops_fraction: f64) -> RandomCropper {
        RandomCropperInit {
            chip_dims: HW { h: 100, w: 100 },
            min_object_length_long_dim: 30,
            min_object_length_short_dim: 5,
            max_object_size: r64(0.7),
            background_crops_fraction: r64(background_crops_fraction),
            translate_amount: r64(0.1),
            randomly_flip: true,
        }
        .build()
        .unwrap()
    }

    #[test]
    fn object_crops_keep_object_in_size_range() -> Result<()> {
        let cropper = cropper(0.0);
        let object = MmodRect::new(TLBR::from_tlhw([100.0, 200.0, 80.0, 60.0]), "T");
        let image = labeled_image(vec![object]);
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..20 {
            let (chip, boxes) = cropper.sample(&image, &mut rng)?;
            assert_eq!(chip.size(), [3, 100, 100]);

            let bbox = boxes
                .iter()
                .find(|bbox| bbox.label == "T")
                .expect("the cropped object must be kept");
            assert!(!bbox.ignore);
            let [_, _, h, w] = bbox.rect.tlhw();
            let long = h.max(w);
            assert!(long >= 30.0 - 1e-6 && long <= 70.0 + 1e-6, "long side {}", long);
        }
        Ok(())
    }

    #[test]
    fn background_crops_from_images_without_objects() -> Result<()> {
        let cropper = cropper(0.0);
        let image = labeled_image(vec![]);
        let mut rng = StdRng::seed_from_u64(7);

        let (chips, boxes) = cropper.sample_batch(4, &[image], &mut rng)?;
        assert_eq!(chips.size(), [4, 3, 100, 100]);
        assert!(boxes.iter().all(|boxes| boxes.is_empty()));
        Ok(())
    }

    #[test]
    fn small_objects_are_ignored() -> Result<()> {
        let cropper = cropper(0.0);
        let large = MmodRect::new(TLBR::from_tlhw([100.0, 100.0, 100.0, 100.0]), "T");
        // whichever object is cropped, the short side of the thin one shrinks below 5
        let thin = MmodRect::new(TLBR::from_tlhw([100.0, 150.0, 100.0, 2.0]), "C");
        let image = labeled_image(vec![large, thin]);
        let mut rng = StdRng::seed_from_u64(3);

        for _ in 0..10 {
            let (_chip, boxes) = cropper.sample(&image, &mut rng)?;
            boxes
                .iter()
                .filter(|bbox| bbox.label == "C")
                .for_each(|bbox| assert!(bbox.ignore));
        }
        Ok(())
    }

    #[test]
    fn reject_invalid_cropper() {
        let init = RandomCropperInit {
            max_object_size: r64(1.5),
            ..Default::default()
        };
        assert!(init.build().is_err());
    }
}
