//! Labeled boxes for annotations and detections.

use crate::common::*;

/// An annotated box in pixel units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MmodRect {
    pub rect: TLBR<f64>,
    pub label: String,
    /// Ignored boxes are neither positives nor negatives during training.
    pub ignore: bool,
}

impl MmodRect {
    pub fn new(rect: TLBR<f64>, label: impl Into<String>) -> Self {
        Self {
            rect,
            label: label.into(),
            ignore: false,
        }
    }

    pub fn ignored(rect: TLBR<f64>, label: impl Into<String>) -> Self {
        Self {
            rect,
            label: label.into(),
            ignore: true,
        }
    }
}

/// A box reported by the detector in pixel units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub rect: TLBR<f64>,
    pub label: String,
    pub confidence: f64,
}

impl Display for Detection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [t, l, b, r] = self.rect.tlbr();
        write!(
            f,
            "{} {:.3} [t: {:.1}, l: {:.1}, b: {:.1}, r: {:.1}]",
            self.label, self.confidence, t, l, b, r
        )
    }
}
