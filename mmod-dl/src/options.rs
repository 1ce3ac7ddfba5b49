//! Sliding-window geometry and suppression thresholds derived from annotations.

use crate::{common::*, label::MmodRect, loss::OverlapTester};

/// A sliding window shape in pixels at pyramid scale 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorWindow {
    pub label: String,
    pub height: f64,
    pub width: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorOptionsInit {
    /// The long side of every window in pixels.
    pub target_size: NonZeroUsize,
    /// The lower bound of the short side of every window.
    pub min_target_size: NonZeroUsize,
    pub min_detector_window_overlap_iou: R64,
}

impl Default for DetectorOptionsInit {
    fn default() -> Self {
        Self {
            target_size: NonZeroUsize::new(100).unwrap(),
            min_target_size: NonZeroUsize::new(6).unwrap(),
            min_detector_window_overlap_iou: r64(0.75),
        }
    }
}

impl DetectorOptionsInit {
    /// Derive the detector options from the boxes of all training images.
    pub fn build(&self, boxes: &[Vec<MmodRect>]) -> Result<DetectorOptions> {
        let Self {
            target_size,
            min_target_size,
            min_detector_window_overlap_iou,
        } = *self;
        let target_size = target_size.get() as f64;
        let min_target_size = min_target_size.get() as f64;
        let min_iou = min_detector_window_overlap_iou.raw();
        ensure!(
            min_iou > 0.5 && min_iou < 1.0,
            "min_detector_window_overlap_iou must be in range (0.5, 1)"
        );
        ensure!(
            min_target_size <= target_size,
            "min_target_size must not exceed target_size"
        );

        // group aspect ratios by label in first appearance order
        let mut ratios_per_label: IndexMap<&str, Vec<f64>> = IndexMap::new();
        boxes
            .iter()
            .flatten()
            .filter(|bbox| !bbox.ignore)
            .for_each(|bbox| {
                let [_, _, h, w] = bbox.rect.tlhw();
                if h > 0.0 && w > 0.0 {
                    ratios_per_label
                        .entry(bbox.label.as_str())
                        .or_default()
                        .push(w / h);
                }
            });
        ensure!(
            !ratios_per_label.is_empty(),
            "no non-ignored boxes with positive area found in the dataset"
        );

        let detector_windows: Vec<_> = ratios_per_label
            .into_iter()
            .flat_map(|(label, ratios)| {
                find_covering_aspect_ratios(ratios, min_iou)
                    .into_iter()
                    .map(move |ratio| {
                        let (width, height) = window_size(ratio, target_size, min_target_size);
                        DetectorWindow {
                            label: label.to_string(),
                            height: height.round(),
                            width: width.round(),
                        }
                    })
            })
            .collect();

        let overlaps_nms = {
            let rects_per_image: Vec<Vec<TLBR<f64>>> = boxes
                .iter()
                .map(|bboxes| {
                    bboxes
                        .iter()
                        .filter(|bbox| !bbox.ignore)
                        .map(|bbox| bbox.rect)
                        .collect()
                })
                .collect();
            OverlapTester::tightest_for(rects_per_image.iter().map(|rects| rects.as_slice()))
                .relax(0.1)
        };

        Ok(DetectorOptions {
            detector_windows,
            overlaps_nms,
            overlaps_ignore: OverlapTester {
                iou_thresh: 0.5,
                percent_covered_thresh: 0.95,
            },
            loss_per_false_alarm: 1.0,
            loss_per_missed_target: 1.0,
            truth_match_iou_threshold: 0.5,
        })
    }
}

/// The detector configuration. It is computed once from the training boxes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorOptions {
    /// One window per label and aspect ratio cluster.
    pub detector_windows: Vec<DetectorWindow>,
    pub overlaps_nms: OverlapTester,
    /// Detections overlapping an ignored box under this tester are not penalized.
    pub overlaps_ignore: OverlapTester,
    pub loss_per_false_alarm: f64,
    pub loss_per_missed_target: f64,
    pub truth_match_iou_threshold: f64,
}

impl DetectorOptions {
    pub fn new(
        boxes: &[Vec<MmodRect>],
        target_size: usize,
        min_target_size: usize,
    ) -> Result<Self> {
        DetectorOptionsInit {
            target_size: NonZeroUsize::new(target_size)
                .ok_or_else(|| format_err!("target_size must be positive"))?,
            min_target_size: NonZeroUsize::new(min_target_size)
                .ok_or_else(|| format_err!("min_target_size must be positive"))?,
            ..Default::default()
        }
        .build(boxes)
    }

    pub fn num_windows(&self) -> usize {
        self.detector_windows.len()
    }

    /// The smallest window height and width over all windows.
    pub fn min_window_hw(&self) -> (f64, f64) {
        self.detector_windows.iter().fold(
            (f64::INFINITY, f64::INFINITY),
            |(min_h, min_w), window| (min_h.min(window.height), min_w.min(window.width)),
        )
    }

    /// The labels of all windows in first appearance order.
    pub fn labels(&self) -> IndexSet<String> {
        self.detector_windows
            .iter()
            .map(|window| window.label.clone())
            .collect()
    }
}

impl Display for DetectorOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "num detector windows: {}", self.detector_windows.len())?;
        for window in &self.detector_windows {
            writeln!(
                f,
                "detector window width by height: {} x {} ({})",
                window.width, window.height, window.label
            )?;
        }
        writeln!(
            f,
            "overlap NMS IOU thresh:             {}",
            self.overlaps_nms.iou_thresh
        )?;
        write!(
            f,
            "overlap NMS percent covered thresh: {}",
            self.overlaps_nms.percent_covered_thresh
        )
    }
}

/// The window width and height for an aspect ratio `width / height`.
///
/// The long side is `target_size`. If the short side falls below
/// `min_target_size`, it is raised to that value and the long side follows.
fn window_size(ratio: f64, target_size: f64, min_target_size: f64) -> (f64, f64) {
    if ratio < 1.0 {
        let width = ratio * target_size;
        if width < min_target_size {
            (min_target_size, min_target_size / ratio)
        } else {
            (width, target_size)
        }
    } else {
        let height = target_size / ratio;
        if height < min_target_size {
            (min_target_size * ratio, min_target_size)
        } else {
            (target_size, height)
        }
    }
}

/// Greedily cluster aspect ratios so that each ratio is represented by a
/// window whose centered, equal-area box overlaps it by at least `min_iou`.
fn find_covering_aspect_ratios(mut ratios: Vec<f64>, min_iou: f64) -> Vec<f64> {
    ratios.sort_by(|lhs, rhs| lhs.partial_cmp(rhs).unwrap_or(Ordering::Equal));

    let centered_iou = |lhs: f64, rhs: f64| {
        let (lhs_w, lhs_h) = (lhs.sqrt(), 1.0 / lhs.sqrt());
        let (rhs_w, rhs_h) = (rhs.sqrt(), 1.0 / rhs.sqrt());
        let inter = lhs_w.min(rhs_w) * lhs_h.min(rhs_h);
        inter / (2.0 - inter)
    };

    let mut clusters: Vec<(f64, f64)> = vec![];
    for ratio in ratios {
        match clusters.last_mut() {
            Some((first, last)) if centered_iou(*first, ratio) >= min_iou => {
                *last = ratio;
            }
            _ => clusters.push((ratio, ratio)),
        }
    }

    clusters
        .into_iter()
        .map(|(first, last)| (first * last).sqrt())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(t: f64, l: f64, size: f64, label: &str) -> MmodRect {
        MmodRect::new(TLBR::from_tlhw([t, l, size, size]), label)
    }

    #[test]
    fn aspect_ratio_clustering() {
        let ratios = find_covering_aspect_ratios(vec![1.0, 1.05, 0.95, 4.0], 0.75);
        assert_eq!(ratios.len(), 2);
        assert_abs_diff_eq!(ratios[0], (0.95f64 * 1.05).sqrt(), epsilon = 1e-9);
        assert_abs_diff_eq!(ratios[1], 4.0);
    }

    #[test]
    fn windows_per_label() -> Result<()> {
        let boxes = vec![
            vec![square(0.0, 0.0, 50.0, "T"), square(100.0, 100.0, 60.0, "C")],
            vec![
                square(0.0, 0.0, 80.0, "T"),
                MmodRect::ignored(TLBR::from_tlhw([0.0, 0.0, 10.0, 90.0]), "L"),
            ],
        ];
        let options = DetectorOptions::new(&boxes, 40, 6)?;

        assert_eq!(options.num_windows(), 2);
        assert_eq!(options.detector_windows[0].label, "T");
        assert_eq!(options.detector_windows[1].label, "C");
        assert_abs_diff_eq!(options.detector_windows[0].width, 40.0);
        assert_abs_diff_eq!(options.detector_windows[0].height, 40.0);
        assert_eq!(options.min_window_hw(), (40.0, 40.0));

        // no truth pairs overlap, so the thresholds are the relaxation amount
        assert_abs_diff_eq!(options.overlaps_nms.iou_thresh, 0.1);
        assert_abs_diff_eq!(options.overlaps_nms.percent_covered_thresh, 0.1);
        Ok(())
    }

    #[test]
    fn short_side_is_enlarged() -> Result<()> {
        let wide = MmodRect::new(TLBR::from_tlhw([0.0, 0.0, 10.0, 160.0]), "NB");
        let options = DetectorOptions::new(&[vec![wide]], 40, 20)?;
        let window = &options.detector_windows[0];
        // ratio 16 gives 40 x 2.5, enlarged to a short side of 20
        assert_abs_diff_eq!(window.width, 320.0);
        assert_abs_diff_eq!(window.height, 20.0);
        Ok(())
    }

    #[test]
    fn long_side_matches_target_size() -> Result<()> {
        let boxes = vec![vec![
            MmodRect::new(TLBR::from_tlhw([0.0, 0.0, 50.0, 100.0]), "T"),
            MmodRect::new(TLBR::from_tlhw([200.0, 0.0, 100.0, 50.0]), "C"),
        ]];
        let options = DetectorOptions::new(&boxes, 100, 6)?;

        let wide = &options.detector_windows[0];
        assert_abs_diff_eq!(wide.width, 100.0);
        assert_abs_diff_eq!(wide.height, 50.0);
        let tall = &options.detector_windows[1];
        assert_abs_diff_eq!(tall.width, 50.0);
        assert_abs_diff_eq!(tall.height, 100.0);

        // the smallest object the cropper keeps still matches the window
        let window = TLBR::from_cycxhw([0.0, 0.0, wide.height, wide.width]);
        let object = TLBR::from_cycxhw([0.0, 0.0, 42.0, 84.0]);
        assert!(window.iou_with(&object, 0.0) >= options.truth_match_iou_threshold);
        Ok(())
    }

    #[test]
    fn reject_invalid_window_overlap() {
        let boxes = vec![vec![square(0.0, 0.0, 50.0, "T")]];
        for iou in [0.3, 0.5, 1.0] {
            let init = DetectorOptionsInit {
                min_detector_window_overlap_iou: r64(iou),
                ..Default::default()
            };
            assert!(init.build(&boxes).is_err());
        }
    }

    #[test]
    fn reject_dataset_without_boxes() {
        let boxes = vec![vec![MmodRect::ignored(
            TLBR::from_tlhw([0.0, 0.0, 10.0, 10.0]),
            "T",
        )]];
        assert!(DetectorOptions::new(&boxes, 40, 6).is_err());
    }
}
