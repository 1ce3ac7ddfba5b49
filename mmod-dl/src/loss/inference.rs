use super::{nms, CellIndex, CellMapper};
use crate::{common::*, label::Detection, model::LevelOutput, options::DetectorOptions};

/// A scored window before suppression.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub cell: CellIndex,
    pub rect: TLBR<f64>,
    pub score: f64,
}

/// Copy the scores of one image of a level to a flat vector laid out as
/// `[num_windows, height, width]`.
pub(crate) fn level_scores(output: &LevelOutput, batch_index: i64) -> Vec<f32> {
    let scores = output
        .scores
        .select(0, batch_index)
        .detach()
        .to_device(Device::Cpu)
        .to_kind(Kind::Float)
        .contiguous();
    Vec::<f32>::from(&scores)
}

/// Collect the windows of one image scoring above `threshold`.
pub(crate) fn collect_candidates(
    outputs: &[LevelOutput],
    batch_index: i64,
    options: &DetectorOptions,
    mapper: &CellMapper,
    threshold: f64,
) -> Result<Vec<Candidate>> {
    let mut candidates = vec![];

    for (level, output) in outputs.iter().enumerate() {
        let geometry = output.geometry()?;
        let scores = level_scores(output, batch_index);
        let (height, width) = (geometry.height as usize, geometry.width as usize);

        for (window_index, window) in options.detector_windows.iter().enumerate() {
            let window_scores = &scores[window_index * height * width..][..height * width];

            window_scores
                .iter()
                .enumerate()
                .filter(|(_, &score)| score as f64 > threshold)
                .for_each(|(offset, &score)| {
                    let y = (offset / width) as i64;
                    let x = (offset % width) as i64;
                    candidates.push(Candidate {
                        cell: CellIndex {
                            level,
                            window: window_index,
                            y,
                            x,
                        },
                        rect: mapper.cell_rect(geometry.scale, window, y, x),
                        score: score as f64,
                    });
                });
        }
    }

    Ok(candidates)
}

/// Turns score maps into non-overlapping detections.
#[derive(Debug, Clone)]
pub struct MmodInference {
    options: DetectorOptions,
    mapper: CellMapper,
}

impl MmodInference {
    pub fn new(options: DetectorOptions, stride: i64) -> Self {
        Self {
            options,
            mapper: CellMapper::new(stride),
        }
    }

    /// Produce the detections of every image in the batch, sorted by descending confidence.
    pub fn forward(
        &self,
        outputs: &[LevelOutput],
        adjust_threshold: f64,
    ) -> Result<Vec<Vec<Detection>>> {
        let batch_size = match outputs.first() {
            Some(output) => output.scores.size4()?.0,
            None => return Ok(vec![]),
        };

        (0..batch_size)
            .map(|batch_index| -> Result<_> {
                let candidates = collect_candidates(
                    outputs,
                    batch_index,
                    &self.options,
                    &self.mapper,
                    adjust_threshold,
                )?;
                let kept = nms(&candidates, &self.options.overlaps_nms, |candidate| {
                    (candidate.rect, candidate.score)
                });
                let detections = kept
                    .into_iter()
                    .map(|index| {
                        let Candidate { cell, rect, score } = &candidates[index];
                        Detection {
                            rect: *rect,
                            label: self.options.detector_windows[cell.window].label.clone(),
                            confidence: *score,
                        }
                    })
                    .collect();
                Ok(detections)
            })
            .try_collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{loss::OverlapTester, options::DetectorWindow};

    fn single_window_options(label: &str, size: f64) -> DetectorOptions {
        DetectorOptions {
            detector_windows: vec![DetectorWindow {
                label: label.into(),
                height: size,
                width: size,
            }],
            overlaps_nms: OverlapTester::new(0.3, 0.9).unwrap(),
            overlaps_ignore: OverlapTester::new(0.5, 0.95).unwrap(),
            loss_per_false_alarm: 1.0,
            loss_per_missed_target: 1.0,
            truth_match_iou_threshold: 0.5,
        }
    }

    #[test]
    fn inference_thresholds_and_suppresses() -> Result<()> {
        let options = single_window_options("T", 16.0);
        let scores = Tensor::full(&[1, 1, 6, 6], -1.0, FLOAT_CPU);
        let _ = scores.i((0, 0, 1, 1)).fill_(2.0);
        // adjacent cell heavily overlaps the best one
        let _ = scores.i((0, 0, 1, 2)).fill_(1.0);
        let _ = scores.i((0, 0, 4, 4)).fill_(0.5);
        let outputs = vec![LevelOutput { scale: 1.0, scores }];

        let detections = MmodInference::new(options, 8).forward(&outputs, 0.0)?;
        assert_eq!(detections.len(), 1);
        let detections = &detections[0];
        assert_eq!(detections.len(), 2);

        assert_eq!(detections[0].label, "T");
        assert_abs_diff_eq!(detections[0].confidence, 2.0);
        assert_eq!(detections[0].rect.tlbr(), [0.0, 0.0, 16.0, 16.0]);
        assert_abs_diff_eq!(detections[1].confidence, 0.5);
        Ok(())
    }

    #[test]
    fn inference_maps_levels_to_input_coordinates() -> Result<()> {
        let options = single_window_options("C", 16.0);
        let scores = Tensor::full(&[1, 1, 3, 3], -1.0, FLOAT_CPU);
        let _ = scores.i((0, 0, 0, 0)).fill_(1.0);
        let outputs = vec![LevelOutput { scale: 0.5, scores }];

        let detections = MmodInference::new(options, 8).forward(&outputs, 0.0)?;
        assert_eq!(detections[0][0].rect.tlbr(), [-16.0, -16.0, 16.0, 16.0]);
        Ok(())
    }
}
