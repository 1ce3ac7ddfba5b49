use super::PlateauScheduler;
use crate::common::*;
use chrono::{DateTime, Local};

/// The trainer progress stored next to the weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerState {
    pub step: usize,
    pub scheduler: PlateauScheduler,
    pub saved_at: DateTime<Local>,
}

/// A pair of files `<base>.ckpt` and `<base>.json` holding the weights and the
/// trainer state. SGD momentum buffers are not stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFiles {
    base: PathBuf,
}

impl SyncFiles {
    pub fn new<P>(base: P) -> Self
    where
        P: Into<PathBuf>,
    {
        Self { base: base.into() }
    }

    fn with_suffix(&self, suffix: &str) -> PathBuf {
        let mut path = self.base.clone().into_os_string();
        path.push(suffix);
        PathBuf::from(path)
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.with_suffix(".ckpt")
    }

    pub fn state_path(&self) -> PathBuf {
        self.with_suffix(".json")
    }

    pub fn exists(&self) -> bool {
        self.checkpoint_path().is_file() && self.state_path().is_file()
    }

    /// Write the weights and the state. Each file is written to a temporary
    /// path first and then renamed.
    pub fn save(&self, vs: &nn::VarStore, state: &TrainerState) -> Result<()> {
        let checkpoint_path = self.checkpoint_path();
        let state_path = self.state_path();
        let checkpoint_tmp = self.with_suffix(".ckpt.tmp");
        let state_tmp = self.with_suffix(".json.tmp");

        vs.save(&checkpoint_tmp)
            .with_context(|| format!("unable to write '{}'", checkpoint_tmp.display()))?;
        std::fs::write(&state_tmp, serde_json::to_string(state)?)
            .with_context(|| format!("unable to write '{}'", state_tmp.display()))?;
        std::fs::rename(&checkpoint_tmp, &checkpoint_path)?;
        std::fs::rename(&state_tmp, &state_path)?;

        debug!(
            "synchronized trainer state at step {} to '{}'",
            state.step,
            state_path.display()
        );
        Ok(())
    }

    /// Restore the weights into `vs` and return the stored state. Returns
    /// `None` if the files do not exist.
    pub fn load(&self, vs: &mut nn::VarStore) -> Result<Option<TrainerState>> {
        if !self.exists() {
            return Ok(None);
        }

        let state_path = self.state_path();
        let text = std::fs::read_to_string(&state_path)
            .with_context(|| format!("unable to read '{}'", state_path.display()))?;
        let state: TrainerState = serde_json::from_str(&text)
            .with_context(|| format!("invalid trainer state '{}'", state_path.display()))?;

        let checkpoint_path = self.checkpoint_path();
        vs.load(&checkpoint_path)
            .with_context(|| format!("unable to load '{}'", checkpoint_path.display()))?;

        info!(
            "resume from '{}' saved at {}, step {}, learning rate {}",
            checkpoint_path.display(),
            state.saved_at,
            state.step,
            state.scheduler.lr()
        );
        Ok(Some(state))
    }
}
