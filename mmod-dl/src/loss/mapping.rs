use crate::{common::*, label::MmodRect, options::DetectorWindow};

/// The shape of one score map and the scale of its pyramid level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelGeometry {
    /// The ratio of the level size to the input image size.
    pub scale: f64,
    pub height: i64,
    pub width: i64,
}

/// Locates a score cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellIndex {
    pub level: usize,
    pub window: usize,
    pub y: i64,
    pub x: i64,
}

/// Maps score cells to boxes in input image coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellMapper {
    pub stride: i64,
}

impl CellMapper {
    pub fn new(stride: i64) -> Self {
        Self { stride }
    }

    /// The box covered by a window centered at cell `(y, x)`.
    ///
    /// The stride-2 convolutions are padded by half their kernel, so cell `y`
    /// is centered on level pixel `y * stride`.
    pub fn cell_rect(&self, scale: f64, window: &DetectorWindow, y: i64, x: i64) -> TLBR<f64> {
        let stride = self.stride as f64;
        let cy = y as f64 * stride / scale;
        let cx = x as f64 * stride / scale;
        TLBR::from_cycxhw([cy, cx, window.height / scale, window.width / scale])
    }

    /// The cell whose center is closest to the point `(cy, cx)` in input image
    /// coordinates, clamped to the score map.
    pub fn nearest_cell(&self, geometry: &LevelGeometry, cy: f64, cx: f64) -> (i64, i64) {
        let stride = self.stride as f64;
        let to_cell = |v: f64, size: i64| -> i64 {
            let cell = (v * geometry.scale / stride).round() as i64;
            cell.max(0).min(size - 1)
        };
        (to_cell(cy, geometry.height), to_cell(cx, geometry.width))
    }

    /// Find the cell and window that best matches a box of the same label.
    ///
    /// Returns the cell together with the IoU of its window box and the target box.
    pub fn best_cell(
        &self,
        levels: &[LevelGeometry],
        windows: &[DetectorWindow],
        target: &MmodRect,
    ) -> Option<(CellIndex, f64)> {
        let [cy, cx, _h, _w] = target.rect.cycxhw();

        iproduct!(levels.iter().enumerate(), windows.iter().enumerate())
            .filter(|(_, (_, window))| window.label == target.label)
            .filter(|((_, geometry), _)| geometry.height > 0 && geometry.width > 0)
            .map(|((level, geometry), (window_index, window))| {
                let (y, x) = self.nearest_cell(geometry, cy, cx);
                let rect = self.cell_rect(geometry.scale, window, y, x);
                let iou = rect.iou_with(&target.rect, 1e-8);
                let cell = CellIndex {
                    level,
                    window: window_index,
                    y,
                    x,
                };
                (cell, iou)
            })
            .max_by(|(_, lhs), (_, rhs)| lhs.partial_cmp(rhs).unwrap_or(Ordering::Equal))
    }
}
