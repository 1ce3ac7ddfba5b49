use crate::common::*;

/// Decides whether two boxes overlap enough to be treated as duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverlapTester {
    pub iou_thresh: f64,
    pub percent_covered_thresh: f64,
}

impl OverlapTester {
    pub fn new(iou_thresh: f64, percent_covered_thresh: f64) -> Result<Self> {
        ensure!(
            (0.0..=1.0).contains(&iou_thresh),
            "iou_thresh must be in range [0, 1], but get {}",
            iou_thresh
        );
        ensure!(
            (0.0..=1.0).contains(&percent_covered_thresh),
            "percent_covered_thresh must be in range [0, 1], but get {}",
            percent_covered_thresh
        );
        Ok(Self {
            iou_thresh,
            percent_covered_thresh,
        })
    }

    pub fn overlaps<R>(&self, lhs: &R, rhs: &R) -> bool
    where
        R: Rect<Type = f64>,
    {
        let inter = lhs.intersection_area_with(rhs);
        if inter <= 0.0 {
            return false;
        }
        let union = lhs.area() + rhs.area() - inter;
        inter / union > self.iou_thresh
            || inter / lhs.area() > self.percent_covered_thresh
            || inter / rhs.area() > self.percent_covered_thresh
    }

    /// Relax both thresholds by `amount`, saturating at 1.
    pub fn relax(&self, amount: f64) -> Self {
        Self {
            iou_thresh: (self.iou_thresh + amount).min(1.0),
            percent_covered_thresh: (self.percent_covered_thresh + amount).min(1.0),
        }
    }

    /// The tightest tester under which no pair of boxes in the same image overlaps.
    pub fn tightest_for<'a, I>(images: I) -> Self
    where
        I: IntoIterator<Item = &'a [TLBR<f64>]>,
    {
        let mut iou_thresh = 0.0f64;
        let mut percent_covered_thresh = 0.0f64;

        images.into_iter().for_each(|rects| {
            rects.iter().tuple_combinations().for_each(|(lhs, rhs)| {
                iou_thresh = iou_thresh.max(lhs.iou_with(rhs, 0.0));
                percent_covered_thresh = percent_covered_thresh
                    .max(lhs.covered_ratio_by(rhs))
                    .max(rhs.covered_ratio_by(lhs));
            });
        });

        Self {
            iou_thresh,
            percent_covered_thresh,
        }
    }
}

impl Default for OverlapTester {
    fn default() -> Self {
        Self {
            iou_thresh: 0.5,
            percent_covered_thresh: 1.0,
        }
    }
}

/// Greedy non-maximum suppression.
///
/// Candidates are visited in descending score order. A candidate is kept if it
/// overlaps none of the already kept candidates. Returns the indices of the kept
/// candidates in descending score order.
pub fn nms<T, F>(candidates: &[T], tester: &OverlapTester, mut key: F) -> Vec<usize>
where
    F: FnMut(&T) -> (TLBR<f64>, f64),
{
    let mut order: Vec<_> = candidates
        .iter()
        .enumerate()
        .map(|(index, candidate)| {
            let (rect, score) = key(candidate);
            (index, rect, score)
        })
        .collect();
    order.sort_by(|(_, _, lhs), (_, _, rhs)| rhs.partial_cmp(lhs).unwrap_or(Ordering::Equal));

    let mut kept: Vec<(usize, TLBR<f64>)> = vec![];
    for (index, rect, _score) in order {
        let suppressed = kept
            .iter()
            .any(|(_, kept_rect)| tester.overlaps(&rect, kept_rect));
        if !suppressed {
            kept.push((index, rect));
        }
    }

    kept.into_iter().map(|(index, _)| index).collect()
}
