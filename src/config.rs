// --- File: src/config.rs ---

//! Run parameters of a training job.
//!
//! The whole job is described by one JSON document:
//!
//! ```json
//! {
//!   "family": "mapping",
//!   "model": {"name": "linear", "params": {}},
//!   "data": {
//!     "train": {"pipeline": [{"name": "toy_regression", "params": {"nb": 100, "nb_features": 3}}]},
//!     "transformers": [{"name": "Standardize", "params": {}}]
//!   },
//!   "report": {"outdir": "out", "metrics": ["mean_squared_error"],
//!              "checkpoint": {"loss": "train_mean_squared_error"}},
//!   "optim": {"algo": {"name": "adam", "params": {"lr": 0.01}},
//!             "loss": "mean_squared_error", "max_nb_epochs": 10, "batch_size": 32}
//! }
//! ```
//!
//! Collaborator parameters (`params` objects) stay untyped here and are
//! deserialized by the component that owns them, see [`parse_params`].

use crate::error::{Error, Result};
use crate::metrics::Mode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Kind of model pipeline. Families differ enough in their training
/// procedure that they are not interchangeable (e.g. GANs vs autoencoders).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    #[default]
    Mapping,
    Gan,
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelFamily::Mapping => write!(f, "mapping"),
            ModelFamily::Gan => write!(f, "gan"),
        }
    }
}

/// A named component together with its free-form parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedParams {
    pub name: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl NamedParams {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            params: serde_json::Value::Null,
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Params {
    #[serde(default)]
    pub family: ModelFamily,
    pub model: NamedParams,
    pub data: DataConfig,
    pub report: ReportConfig,
    pub optim: OptimConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub train: PipelineConfig,
    #[serde(default)]
    pub transformers: Vec<NamedParams>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub pipeline: Vec<NamedParams>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    pub outdir: PathBuf,
    #[serde(default)]
    pub metrics: Vec<String>,
    #[serde(default)]
    pub checkpoint: Option<CheckpointConfig>,
}

/// Model checkpointing policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Name of the monitored entry of the epoch logs.
    pub loss: String,
    #[serde(default = "default_true")]
    pub save_best_only: bool,
    #[serde(default = "default_period")]
    pub period: usize,
    #[serde(default)]
    pub mode: Mode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimConfig {
    pub algo: NamedParams,
    pub loss: String,
    pub max_nb_epochs: usize,
    pub batch_size: usize,
    #[serde(default = "default_pred_batch_size")]
    pub pred_batch_size: usize,
    /// Wall-clock budget in seconds, `None` means unlimited.
    #[serde(default)]
    pub budget_secs: Option<f64>,
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_lr_schedule")]
    pub lr_schedule: NamedParams,
    #[serde(default = "default_early_stopping")]
    pub early_stopping: NamedParams,
}

fn default_true() -> bool {
    true
}

fn default_period() -> usize {
    1
}

fn default_pred_batch_size() -> usize {
    128
}

fn default_lr_schedule() -> NamedParams {
    NamedParams::new("constant")
}

fn default_early_stopping() -> NamedParams {
    NamedParams::new("none")
}

impl Params {
    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Checks the values that serde cannot express as types.
    pub fn validate(&self) -> Result<()> {
        let optim = &self.optim;
        if optim.batch_size == 0 {
            return Err(Error::Config("optim.batch_size must be positive".into()));
        }
        if optim.pred_batch_size == 0 {
            return Err(Error::Config(
                "optim.pred_batch_size must be positive".into(),
            ));
        }
        if let Some(budget) = optim.budget_secs {
            if budget.is_nan() || budget < 0.0 {
                return Err(Error::Config(format!(
                    "optim.budget_secs must be a non-negative number, got {budget}"
                )));
            }
        }
        if let Some(checkpoint) = &self.report.checkpoint {
            if checkpoint.period == 0 {
                return Err(Error::Config(
                    "report.checkpoint.period must be positive".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Deserializes the `params` object of a named component.
///
/// `null` is accepted as an empty object so that `params` can be omitted.
pub(crate) fn parse_params<T: DeserializeOwned>(
    context: &str,
    params: &serde_json::Value,
) -> Result<T> {
    let params = match params {
        serde_json::Value::Null => serde_json::Value::Object(Default::default()),
        other => other.clone(),
    };
    serde_json::from_value(params).map_err(|source| Error::InvalidParams {
        context: context.to_string(),
        source,
    })
}
