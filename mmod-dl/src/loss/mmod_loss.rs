use super::{collect_candidates, nms, CellIndex, CellMapper, LevelGeometry};
use crate::{common::*, label::MmodRect, model::LevelOutput, options::DetectorOptions};

/// The max-margin object detection loss.
///
/// Every detectable truth box pulls the score of its best matching window above
/// `+1`. Every window scoring above `-1` that survives suppression and matches
/// neither a truth nor an ignored box is pushed below `-1`.
#[derive(Debug, Clone)]
pub struct MmodLoss {
    options: DetectorOptions,
    mapper: CellMapper,
}

/// Flat score indices of the penalized cells in one level.
#[derive(Debug, Default)]
struct LevelTargets {
    missed: Vec<i64>,
    false_alarm: Vec<i64>,
}

impl MmodLoss {
    pub fn new(options: DetectorOptions, stride: i64) -> Self {
        Self {
            options,
            mapper: CellMapper::new(stride),
        }
    }

    pub fn forward(&self, outputs: &[LevelOutput], truths: &[Vec<MmodRect>]) -> Result<Tensor> {
        let first = outputs
            .first()
            .ok_or_else(|| format_err!("the network produced no pyramid level"))?;
        let (batch_size, _, _, _) = first.scores.size4()?;
        ensure!(
            batch_size as usize == truths.len(),
            "batch size {} does not match the number of truth lists {}",
            batch_size,
            truths.len()
        );
        let geometries: Vec<_> = outputs.iter().map(|output| output.geometry()).try_collect()?;

        let DetectorOptions {
            loss_per_false_alarm,
            loss_per_missed_target,
            ..
        } = self.options;

        // keep the graph alive when no cell is penalized
        let mut loss = first.scores.sum(Kind::Float) * 0.0;

        for (batch_index, image_truths) in truths.iter().enumerate() {
            let batch_index = batch_index as i64;
            let targets = self.find_targets(outputs, &geometries, batch_index, image_truths)?;

            for (output, targets) in izip!(outputs, targets) {
                let LevelTargets {
                    missed,
                    false_alarm,
                } = targets;
                let scores = output.scores.select(0, batch_index).reshape(&[-1]);
                let device = scores.device();

                if !missed.is_empty() {
                    let index = Tensor::of_slice(&missed).to_device(device);
                    let selected = scores.index_select(0, &index);
                    loss += (-selected + 1.0).relu().sum(Kind::Float) * loss_per_missed_target;
                }

                if !false_alarm.is_empty() {
                    let index = Tensor::of_slice(&false_alarm).to_device(device);
                    let selected = scores.index_select(0, &index);
                    loss += (selected + 1.0).relu().sum(Kind::Float) * loss_per_false_alarm;
                }
            }
        }

        Ok(loss / batch_size as f64)
    }

    fn find_targets(
        &self,
        outputs: &[LevelOutput],
        geometries: &[LevelGeometry],
        batch_index: i64,
        truths: &[MmodRect],
    ) -> Result<Vec<LevelTargets>> {
        let DetectorOptions {
            ref detector_windows,
            ref overlaps_nms,
            ref overlaps_ignore,
            truth_match_iou_threshold,
            ..
        } = self.options;

        let flat_index = |cell: &CellIndex| -> i64 {
            let LevelGeometry { height, width, .. } = geometries[cell.level];
            (cell.window as i64 * height + cell.y) * width + cell.x
        };
        let mut targets: Vec<LevelTargets> =
            geometries.iter().map(|_| LevelTargets::default()).collect();

        // assign each truth to its best window
        let mut ignores: Vec<TLBR<f64>> = vec![];
        let mut positives: HashSet<CellIndex> = HashSet::new();
        let mut detectable: Vec<&MmodRect> = vec![];

        for truth in truths {
            if truth.ignore {
                ignores.push(truth.rect);
                continue;
            }

            match self.mapper.best_cell(geometries, detector_windows, truth) {
                Some((cell, iou)) if iou >= truth_match_iou_threshold => {
                    if positives.insert(cell) {
                        targets[cell.level].missed.push(flat_index(&cell));
                    }
                    detectable.push(truth);
                }
                _ => {
                    debug!(
                        "box {:?} labeled '{}' cannot be matched by any detector window, treated as ignored",
                        truth.rect.tlbr(),
                        truth.label
                    );
                    ignores.push(truth.rect);
                }
            }
        }

        // penalize surviving windows that match nothing
        let candidates: Vec<_> =
            collect_candidates(outputs, batch_index, &self.options, &self.mapper, -1.0)?
                .into_iter()
                .filter(|candidate| !positives.contains(&candidate.cell))
                .collect();
        let kept = nms(&candidates, overlaps_nms, |candidate| {
            (candidate.rect, candidate.score)
        });

        kept.into_iter().for_each(|index| {
            let candidate = &candidates[index];
            let label = &detector_windows[candidate.cell.window].label;

            let hits_truth = detectable.iter().any(|truth| {
                &truth.label == label
                    && truth.rect.iou_with(&candidate.rect, 1e-8) >= truth_match_iou_threshold
            });
            let hits_ignore = ignores
                .iter()
                .any(|rect| overlaps_ignore.overlaps(rect, &candidate.rect));

            if !hits_truth && !hits_ignore {
                targets[candidate.cell.level]
                    .false_alarm
                    .push(flat_index(&candidate.cell));
            }
        });

        Ok(targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{loss::OverlapTester, options::DetectorWindow};

    fn options() -> DetectorOptions {
        DetectorOptions {
            detector_windows: vec![DetectorWindow {
                label: "T".into(),
                height: 16.0,
                width: 16.0,
            }],
            overlaps_nms: OverlapTester::new(0.3, 0.9).unwrap(),
            overlaps_ignore: OverlapTester::new(0.5, 0.95).unwrap(),
            loss_per_false_alarm: 1.0,
            loss_per_missed_target: 1.0,
            truth_match_iou_threshold: 0.5,
        }
    }

    fn truth_at_cell_1_1() -> MmodRect {
        MmodRect::new(TLBR::from_tlbr([0.0, 0.0, 16.0, 16.0]), "T")
    }

    #[test]
    fn missed_target_hinge() -> Result<()> {
        let scores = Tensor::full(&[1, 1, 4, 4], -2.0, FLOAT_CPU).set_requires_grad(true);
        let outputs = vec![LevelOutput {
            scale: 1.0,
            scores: scores.shallow_clone(),
        }];
        let loss = MmodLoss::new(options(), 8).forward(&outputs, &[vec![truth_at_cell_1_1()]])?;
        assert_abs_diff_eq!(f64::from(&loss), 3.0, epsilon = 1e-6);

        loss.backward();
        let grad = scores.grad();
        assert_abs_diff_eq!(f64::from(grad.i((0, 0, 1, 1))), -1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(f64::from(grad.abs().sum(Kind::Float)), 1.0, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn false_alarm_hinge() -> Result<()> {
        let scores = Tensor::full(&[1, 1, 4, 4], -2.0, FLOAT_CPU);
        let _ = scores.i((0, 0, 1, 1)).fill_(2.0);
        let _ = scores.i((0, 0, 3, 3)).fill_(0.5);
        let outputs = vec![LevelOutput { scale: 1.0, scores }];

        let loss = MmodLoss::new(options(), 8).forward(&outputs, &[vec![truth_at_cell_1_1()]])?;
        assert_abs_diff_eq!(f64::from(&loss), 1.5, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn ignored_boxes_are_not_penalized() -> Result<()> {
        let scores = Tensor::full(&[1, 1, 4, 4], -2.0, FLOAT_CPU);
        let _ = scores.i((0, 0, 3, 3)).fill_(0.5);
        let outputs = vec![LevelOutput { scale: 1.0, scores }];

        let ignored = MmodRect::ignored(TLBR::from_tlbr([16.0, 16.0, 32.0, 32.0]), "T");
        let loss = MmodLoss::new(options(), 8).forward(&outputs, &[vec![ignored]])?;
        assert_abs_diff_eq!(f64::from(&loss), 0.0, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn loss_is_averaged_over_batch() -> Result<()> {
        let scores = Tensor::full(&[2, 1, 4, 4], -2.0, FLOAT_CPU);
        let outputs = vec![LevelOutput { scale: 1.0, scores }];
        let loss = MmodLoss::new(options(), 8)
            .forward(&outputs, &[vec![truth_at_cell_1_1()], vec![]])?;
        assert_abs_diff_eq!(f64::from(&loss), 1.5, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn reject_mismatched_batch() {
        let scores = Tensor::zeros(&[2, 1, 4, 4], FLOAT_CPU);
        let outputs = vec![LevelOutput { scale: 1.0, scores }];
        assert!(MmodLoss::new(options(), 8)
            .forward(&outputs, &[vec![]])
            .is_err());
    }
}
