//! Crate-level error type.
//!
//! Each subsystem keeps its own error enum (`DataError`, `TransformerError`,
//! `SafeTensorsError`, `CheckpointError`); this type wraps them together with
//! the lookup and precondition failures raised while assembling a training run.

use crate::config::ModelFamily;
use crate::data::DataError;
use crate::serialization::{CheckpointError, SafeTensorsError};
use crate::transformers::TransformerError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A transformer/optimizer/loss/metric/builder/... name is not registered.
    #[error("unknown {kind}: '{name}'")]
    UnknownName { kind: &'static str, name: String },

    #[error("expected family to be '{expected}', got '{got}'")]
    WrongModelFamily {
        expected: ModelFamily,
        got: ModelFamily,
    },

    #[error("wrong {what}, expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("invalid parameters for {context}: {source}")]
    InvalidParams {
        context: String,
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("the model has not been compiled yet")]
    NotCompiled,

    #[error("model parameter '{0}' is missing")]
    MissingParameter(String),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Transformer(#[from] TransformerError),

    #[error(transparent)]
    SafeTensors(#[from] SafeTensorsError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn unknown(kind: &'static str, name: &str) -> Self {
        Error::UnknownName {
            kind,
            name: name.to_string(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
