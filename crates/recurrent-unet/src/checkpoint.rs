//! Best-model checkpoint bundle.
//!
//! A bundle shares one prefix, `{artifact_dir}/{arch}_{dataset}_best_model`:
//!
//! ```text
//! {prefix}.model.mpk    model parameters
//! {prefix}.optim.mpk    optimizer state
//! {prefix}.state.json   iteration, best mean IoU, learning rate
//! ```
//!
//! Parameters and optimizer moments are stored at full precision so a resumed
//! run continues from exactly the saved weights.

use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Result};
use burn::{
    config::Config,
    module::AutodiffModule,
    optim::Optimizer,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
    tensor::backend::AutodiffBackend,
};

type BundleRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Training progress stored next to the parameters.
#[derive(Config, Debug, PartialEq)]
pub struct CheckpointState {
    /// Iterations completed when the bundle was written.
    pub iteration: usize,
    pub best_iou: f64,
    /// Learning rate of the last completed iteration.
    pub learning_rate: f64,
}

/// File locations of one checkpoint bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointPaths {
    prefix: PathBuf,
}

impl CheckpointPaths {
    /// Best-model bundle of `arch` trained on `dataset`.
    pub fn best_model(artifact_dir: impl AsRef<Path>, arch: &str, dataset: &str) -> Self {
        Self::from_prefix(
            artifact_dir
                .as_ref()
                .join(format!("{arch}_{dataset}_best_model")),
        )
    }

    pub fn from_prefix(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn model(&self) -> PathBuf {
        self.with_suffix(".model.mpk")
    }

    pub fn optimizer(&self) -> PathBuf {
        self.with_suffix(".optim.mpk")
    }

    pub fn state(&self) -> PathBuf {
        self.with_suffix(".state.json")
    }

    /// Whether every file of the bundle is present.
    pub fn exists(&self) -> bool {
        self.model().is_file() && self.optimizer().is_file() && self.state().is_file()
    }

    fn with_suffix(&self, suffix: &str) -> PathBuf {
        let mut path = OsString::from(self.prefix.as_os_str());
        path.push(suffix);
        PathBuf::from(path)
    }

    /// Writes the bundle, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be written.
    pub fn save<B, M, O>(&self, model: &M, optimizer: &O, state: &CheckpointState) -> Result<()>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        if let Some(parent) = self.prefix.parent() {
            fs::create_dir_all(parent)?;
        }
        let recorder = BundleRecorder::new();

        model
            .clone()
            .save_file(self.model(), &recorder)
            .map_err(|e| anyhow!("failed to save model to {}: {e}", self.model().display()))?;
        Recorder::<B>::record(&recorder, optimizer.to_record(), self.optimizer()).map_err(
            |e| {
                anyhow!(
                    "failed to save optimizer state to {}: {e}",
                    self.optimizer().display()
                )
            },
        )?;
        state.save(self.state())?;

        tracing::debug!(
            prefix = %self.prefix.display(),
            iteration = state.iteration,
            "checkpoint written"
        );
        Ok(())
    }

    /// Restores the model and optimizer from the bundle.
    ///
    /// # Errors
    ///
    /// Returns an error if a file is missing or does not match the model.
    pub fn load<B, M, O>(
        &self,
        model: M,
        optimizer: O,
        device: &B::Device,
    ) -> Result<(M, O, CheckpointState)>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        let recorder = BundleRecorder::new();

        let model = model
            .load_file(self.model(), &recorder, device)
            .map_err(|e| anyhow!("failed to load model from {}: {e}", self.model().display()))?;
        let record = Recorder::<B>::load::<O::Record>(&recorder, self.optimizer(), device)
            .map_err(|e| {
                anyhow!(
                    "failed to load optimizer state from {}: {e}",
                    self.optimizer().display()
                )
            })?;
        let state = CheckpointState::load(self.state()).map_err(|e| {
            anyhow!(
                "failed to read checkpoint state from {}: {e}",
                self.state().display()
            )
        })?;

        Ok((model, optimizer.load_record(record), state))
    }
}
