use super::{count_steps_without_decrease, count_steps_without_decrease_robust};
use crate::common::*;

const PROBABILITY_OF_DECREASE: f64 = 0.51;
const QUANTILE_DISCARD: f64 = 0.10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateauSchedulerInit {
    pub initial_lr: R64,
    /// The number of recent losses inspected for progress.
    pub iterations_without_progress_threshold: NonZeroUsize,
    pub learning_rate_shrink_factor: R64,
}

impl Default for PlateauSchedulerInit {
    fn default() -> Self {
        Self {
            initial_lr: r64(0.15),
            iterations_without_progress_threshold: NonZeroUsize::new(40000).unwrap(),
            learning_rate_shrink_factor: r64(0.1),
        }
    }
}

impl PlateauSchedulerInit {
    pub fn build(&self) -> Result<PlateauScheduler> {
        let Self {
            initial_lr,
            iterations_without_progress_threshold,
            learning_rate_shrink_factor,
        } = *self;
        ensure!(initial_lr.raw() > 0.0, "initial_lr must be positive");
        ensure!(
            learning_rate_shrink_factor.raw() > 0.0 && learning_rate_shrink_factor.raw() < 1.0,
            "learning_rate_shrink_factor must be in range (0, 1)"
        );

        Ok(PlateauScheduler {
            lr: initial_lr.raw(),
            threshold: iterations_without_progress_threshold.get(),
            shrink_factor: learning_rate_shrink_factor.raw(),
            history: VecDeque::new(),
        })
    }
}

/// Shrinks the learning rate when the recent losses stop decreasing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateauScheduler {
    lr: f64,
    threshold: usize,
    shrink_factor: f64,
    history: VecDeque<f64>,
}

impl PlateauScheduler {
    pub fn lr(&self) -> f64 {
        self.lr
    }

    pub fn history(&self) -> &VecDeque<f64> {
        &self.history
    }

    /// The number of recent steps without loss decrease.
    pub fn steps_without_progress(&self) -> usize {
        count_steps_without_decrease(&self.history, PROBABILITY_OF_DECREASE)
    }

    /// Record the loss of a finished step and return the learning rate for the next step.
    pub fn step(&mut self, loss: f64) -> f64 {
        self.history.push_back(loss);
        if self.history.len() > self.threshold {
            self.history.pop_front();
        }

        if self.history.len() >= self.threshold {
            let values = self.history.make_contiguous();
            let plain = count_steps_without_decrease(values.iter(), PROBABILITY_OF_DECREASE);
            let no_progress = plain >= self.threshold
                && count_steps_without_decrease_robust(
                    values,
                    PROBABILITY_OF_DECREASE,
                    QUANTILE_DISCARD,
                ) >= self.threshold;

            if no_progress {
                let new_lr = self.lr * self.shrink_factor;
                info!(
                    "no progress within {} steps, shrink learning rate from {} to {}",
                    self.threshold, self.lr, new_lr
                );
                self.lr = new_lr;
                self.history.clear();
            }
        }

        self.lr
    }
}

/// Run `step` until the learning rate it reports falls below `floor`.
///
/// The learning rate is checked only after each completed step, so `step` runs
/// at least once. Returns the number of steps.
pub fn run_until_floor<F>(floor: f64, mut step: F) -> Result<usize>
where
    F: FnMut() -> Result<f64>,
{
    ensure!(floor > 0.0, "the learning rate floor must be positive");
    let mut count = 0;

    loop {
        let lr = step()?;
        count += 1;
        if lr < floor {
            break;
        }
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler(threshold: usize) -> PlateauScheduler {
        PlateauSchedulerInit {
            initial_lr: r64(0.1),
            iterations_without_progress_threshold: NonZeroUsize::new(threshold).unwrap(),
            learning_rate_shrink_factor: r64(0.1),
        }
        .build()
        .unwrap()
    }

    #[test]
    fn plateau_shrinks_lr() {
        let mut scheduler = scheduler(50);
        let lrs: Vec<_> = (0..50)
            .map(|index| scheduler.step(if index % 2 == 0 { 1.0 } else { 1.1 }))
            .collect();
        assert!(lrs[..49].iter().all(|&lr| lr == 0.1));
        assert_abs_diff_eq!(lrs[49], 0.01, epsilon = 1e-12);
        assert!(scheduler.history().is_empty());
    }

    #[test]
    fn decreasing_loss_keeps_lr() {
        let mut scheduler = scheduler(50);
        (0..200).for_each(|index| {
            scheduler.step(100.0 - index as f64);
        });
        assert_eq!(scheduler.lr(), 0.1);
        assert_eq!(scheduler.history().len(), 50);
    }

    #[test]
    fn run_until_floor_terminates_on_decay() -> Result<()> {
        let mut lr = 1.0;
        let steps = run_until_floor(1e-4, || {
            lr *= 0.5;
            Ok(lr)
        })?;
        // 0.5^14 is the first power below 1e-4
        assert_eq!(steps, 14);
        Ok(())
    }

    #[test]
    fn run_until_floor_checks_after_step() -> Result<()> {
        // already below the floor, yet one step is taken
        let steps = run_until_floor(1e-4, || Ok(1e-6))?;
        assert_eq!(steps, 1);
        Ok(())
    }

    #[test]
    fn run_until_floor_with_plateau_scheduler() -> Result<()> {
        let mut scheduler = scheduler(20);
        let mut index = 0;
        let steps = run_until_floor(1e-4, || {
            index += 1;
            Ok(scheduler.step(if index % 2 == 0 { 1.0 } else { 1.1 }))
        })?;
        // four shrinks are needed, each after a full window of flat losses
        assert!(scheduler.lr() < 1e-4);
        assert!(steps >= 80 && steps <= 100, "took {} steps", steps);
        Ok(())
    }

    #[test]
    fn run_until_floor_propagates_errors() {
        let result = run_until_floor(1e-4, || -> Result<f64> { bail!("step failed") });
        assert!(result.is_err());
    }
}
