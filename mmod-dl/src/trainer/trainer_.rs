use super::{run_until_floor, PlateauSchedulerInit, RateCounter, SyncFiles, TrainerState};
use crate::{
    common::*,
    dataset::LabeledImage,
    model::Detector,
    processor::{ColorJitter, RandomCropper},
};
use chrono::Local;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerInit {
    pub learning_rate: R64,
    pub weight_decay: R64,
    pub momentum: R64,
    pub learning_rate_shrink_factor: R64,
    /// Training stops once the learning rate falls below this value.
    pub min_learning_rate: R64,
    pub iterations_without_progress_threshold: NonZeroUsize,
    pub mini_batch_size: NonZeroUsize,
    /// The base path of the synchronization files. Disabled if absent.
    pub sync_file: Option<PathBuf>,
    pub sync_interval_secs: u64,
    /// The interval between progress messages.
    pub log_interval_secs: u64,
}

impl Default for TrainerInit {
    fn default() -> Self {
        Self {
            learning_rate: r64(0.15),
            weight_decay: r64(0.00005),
            momentum: r64(0.9),
            learning_rate_shrink_factor: r64(0.1),
            min_learning_rate: r64(1e-4),
            iterations_without_progress_threshold: NonZeroUsize::new(40000).unwrap(),
            mini_batch_size: NonZeroUsize::new(87).unwrap(),
            sync_file: Some(PathBuf::from("mmod_sync")),
            sync_interval_secs: 300,
            log_interval_secs: 60,
        }
    }
}

impl TrainerInit {
    pub fn build(self) -> Result<Trainer> {
        ensure!(
            self.weight_decay.raw() >= 0.0,
            "weight_decay must be non-negative"
        );
        ensure!(
            (0.0..1.0).contains(&self.momentum.raw()),
            "momentum must be in range [0, 1)"
        );
        ensure!(
            self.min_learning_rate.raw() > 0.0,
            "min_learning_rate must be positive"
        );
        // validate the scheduler settings early
        self.scheduler_init().build()?;

        Ok(Trainer { init: self })
    }

    fn scheduler_init(&self) -> PlateauSchedulerInit {
        PlateauSchedulerInit {
            initial_lr: self.learning_rate,
            iterations_without_progress_threshold: self.iterations_without_progress_threshold,
            learning_rate_shrink_factor: self.learning_rate_shrink_factor,
        }
    }
}

/// The outcome of a training run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSummary {
    /// The total number of steps, including resumed ones.
    pub steps: usize,
    pub final_learning_rate: f64,
    pub final_loss: f64,
    pub elapsed: Duration,
}

/// Trains a detector with SGD on random crops until the learning rate decays below the floor.
#[derive(Debug, Clone)]
pub struct Trainer {
    init: TrainerInit,
}

impl Trainer {
    pub fn init(&self) -> &TrainerInit {
        &self.init
    }

    pub fn train<R>(
        &self,
        detector: &mut Detector,
        images: &[LabeledImage],
        cropper: &RandomCropper,
        jitter: &ColorJitter,
        rng: &mut R,
    ) -> Result<TrainingSummary>
    where
        R: Rng,
    {
        let TrainerInit {
            weight_decay,
            momentum,
            min_learning_rate,
            mini_batch_size,
            ref sync_file,
            sync_interval_secs,
            log_interval_secs,
            ..
        } = self.init;
        ensure!(!images.is_empty(), "the training set is empty");

        let start = Instant::now();
        let sync = sync_file.as_ref().map(SyncFiles::new);
        let sync_interval = Duration::from_secs(sync_interval_secs);

        // resume from synchronization files
        let mut scheduler = self.init.scheduler_init().build()?;
        let mut step = 0;
        if let Some(sync) = &sync {
            if let Some(state) = sync.load(&mut detector.vs)? {
                info!(
                    "resume from step {} at learning rate {}, momentum restarts at zero",
                    state.step,
                    state.scheduler.lr()
                );
                step = state.step;
                scheduler = state.scheduler;
            }
        }

        let mut optimizer = nn::Sgd {
            momentum: momentum.raw(),
            dampening: 0.0,
            wd: weight_decay.raw(),
            nesterov: false,
        }
        .build(&detector.vs, scheduler.lr())?;

        let device = detector.device();
        let loss_fn = detector.loss();
        let network = &detector.network;
        let vs = &detector.vs;

        let mut rate_counter = RateCounter::new(Duration::from_secs(log_interval_secs));
        let mut last_sync = Instant::now();
        let mut final_loss = f64::NAN;

        let save_state = |step: usize, scheduler: &super::PlateauScheduler| -> Result<()> {
            if let Some(sync) = &sync {
                sync.save(
                    vs,
                    &TrainerState {
                        step,
                        scheduler: scheduler.clone(),
                        saved_at: Local::now(),
                    },
                )?;
            }
            Ok(())
        };

        run_until_floor(min_learning_rate.raw(), || {
            let (chips, truths) = cropper.sample_batch(mini_batch_size.get(), images, rng)?;
            let chips = jitter.forward_batch(&chips, rng)?.to_device(device);

            let outputs = network.forward_t(&chips, true)?;
            let loss = loss_fn.forward(&outputs, &truths)?;
            let loss_value = f64::from(&loss);
            ensure!(
                loss_value.is_finite(),
                "the loss becomes non-finite at step {}",
                step
            );
            optimizer.backward_step(&loss);

            let lr = scheduler.step(loss_value);
            optimizer.set_lr(lr);
            step += 1;
            final_loss = loss_value;

            rate_counter.add(1.0);
            if let Some(rate) = rate_counter.rate() {
                let history = scheduler.history();
                let average_loss = history.iter().sum::<f64>() / history.len().max(1) as f64;
                info!(
                    "step#: {}  learning rate: {}  average loss: {:.6}  steps without apparent progress: {}  ({:.2} steps/s)",
                    step,
                    lr,
                    average_loss,
                    scheduler.steps_without_progress(),
                    rate
                );
            }

            if last_sync.elapsed() >= sync_interval {
                save_state(step, &scheduler)?;
                last_sync = Instant::now();
            }

            Ok(lr)
        })?;

        save_state(step, &scheduler)?;

        Ok(TrainingSummary {
            steps: step,
            final_learning_rate: scheduler.lr(),
            final_loss,
            elapsed: start.elapsed(),
        })
    }
}

impl Display for Trainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let TrainerInit {
            learning_rate,
            weight_decay,
            momentum,
            learning_rate_shrink_factor,
            min_learning_rate,
            iterations_without_progress_threshold,
            mini_batch_size,
            ref sync_file,
            ..
        } = self.init;
        let sync_file = sync_file
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "disabled".into());

        writeln!(f, "trainer details:")?;
        writeln!(f, "   synchronization file:                  {}", sync_file)?;
        writeln!(
            f,
            "   solver:                                sgd: weight_decay={}, momentum={}",
            weight_decay, momentum
        )?;
        writeln!(f, "   initial learning rate:                 {}", learning_rate)?;
        writeln!(
            f,
            "   learning rate shrink factor:           {}",
            learning_rate_shrink_factor
        )?;
        writeln!(f, "   min learning rate:                     {}", min_learning_rate)?;
        writeln!(
            f,
            "   iterations without progress threshold: {}",
            iterations_without_progress_threshold
        )?;
        write!(f, "   mini-batch size:                       {}", mini_batch_size)
    }
}
