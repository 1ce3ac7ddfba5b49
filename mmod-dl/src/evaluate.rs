//! Precision, recall and average precision of a detector on annotated images.

use crate::{
    common::*,
    dataset::LabeledImage,
    label::{Detection, MmodRect},
    loss::OverlapTester,
    model::Detector,
};

/// The minimum IoU for a detection to hit a truth box.
pub const MATCH_IOU_THRESH: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionMetrics {
    pub precision: f64,
    pub recall: f64,
    pub average_precision: f64,
}

impl Display for DetectionMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "precision: {:.4}  recall: {:.4}  average precision: {:.4}",
            self.precision, self.recall, self.average_precision
        )
    }
}

/// Run the detector on every image and score the detections against the annotations.
pub fn test_detector(
    detector: &Detector,
    images: &[LabeledImage],
    adjust_threshold: f64,
) -> Result<DetectionMetrics> {
    let detections: Vec<_> = images
        .iter()
        .map(|image| detector.detect(&image.image, adjust_threshold))
        .try_collect()?;
    let truths: Vec<_> = images.iter().map(|image| image.boxes.clone()).collect();

    evaluate_detections(
        &detections,
        &truths,
        MATCH_IOU_THRESH,
        &detector.options().overlaps_ignore,
    )
}

/// Score detections against truth boxes image by image.
///
/// Detections are greedily matched in descending confidence order to the
/// unmatched truth of the same label with the largest IoU not below
/// `iou_thresh`. Unmatched detections overlapping an ignored box are neither
/// hits nor false alarms.
pub fn evaluate_detections(
    detections: &[Vec<Detection>],
    truths: &[Vec<MmodRect>],
    iou_thresh: f64,
    overlaps_ignore: &OverlapTester,
) -> Result<DetectionMetrics> {
    ensure!(
        detections.len() == truths.len(),
        "the number of detection lists {} does not match the number of truth lists {}",
        detections.len(),
        truths.len()
    );

    let mut ranked: Vec<(f64, bool)> = vec![];
    let mut num_truths = 0;
    let mut num_hits = 0;

    for (image_detections, image_truths) in izip!(detections, truths) {
        let (ignores, positives): (Vec<_>, Vec<_>) =
            image_truths.iter().partition(|truth| truth.ignore);
        num_truths += positives.len();

        let mut matched = vec![false; positives.len()];
        let sorted = image_detections
            .iter()
            .sorted_by(|lhs, rhs| {
                rhs.confidence
                    .partial_cmp(&lhs.confidence)
                    .unwrap_or(Ordering::Equal)
            });

        for detection in sorted {
            let best = positives
                .iter()
                .enumerate()
                .filter(|(index, truth)| !matched[*index] && truth.label == detection.label)
                .map(|(index, truth)| (index, truth.rect.iou_with(&detection.rect, 0.0)))
                .filter(|(_, iou)| *iou >= iou_thresh)
                .max_by(|(_, lhs), (_, rhs)| lhs.partial_cmp(rhs).unwrap_or(Ordering::Equal));

            match best {
                Some((index, _)) => {
                    matched[index] = true;
                    num_hits += 1;
                    ranked.push((detection.confidence, true));
                }
                None => {
                    let ignored = ignores
                        .iter()
                        .any(|truth| overlaps_ignore.overlaps(&truth.rect, &detection.rect));
                    if !ignored {
                        ranked.push((detection.confidence, false));
                    }
                }
            }
        }
    }

    let num_detections = ranked.len();
    let precision = if num_detections == 0 {
        1.0
    } else {
        num_hits as f64 / num_detections as f64
    };
    let recall = if num_truths == 0 {
        1.0
    } else {
        num_hits as f64 / num_truths as f64
    };

    ranked.sort_by(|(lhs, _), (rhs, _)| rhs.partial_cmp(lhs).unwrap_or(Ordering::Equal));
    let average_precision = average_precision(&ranked, num_truths - num_hits);

    Ok(DetectionMetrics {
        precision,
        recall,
        average_precision,
    })
}

/// Average precision of a ranked list of `(score, is_hit)` pairs.
///
/// The precision at each hit is replaced by its envelope, the maximum precision
/// at any later rank. Truths never detected count as hits with zero precision.
fn average_precision(ranked: &[(f64, bool)], num_missing: usize) -> f64 {
    let precisions: Vec<f64> = ranked
        .iter()
        .enumerate()
        .scan(0usize, |num_hits, (rank, &(_, is_hit))| {
            if is_hit {
                *num_hits += 1;
                Some(Some(*num_hits as f64 / (rank + 1) as f64))
            } else {
                Some(None)
            }
        })
        .flatten()
        .collect();

    let num_relevant = precisions.len() + num_missing;
    if num_relevant == 0 {
        return 1.0;
    }

    let sum: f64 = precisions
        .iter()
        .rev()
        .scan(0.0f64, |envelope, &precision| {
            *envelope = envelope.max(precision);
            Some(*envelope)
        })
        .sum();
    sum / num_relevant as f64
}
