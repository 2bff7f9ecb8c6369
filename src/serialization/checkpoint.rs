// --- Файл: src/serialization/checkpoint.rs ---

//! Чекпоинты модели.
//!
//! Структура директории:
//! ```text
//! outdir/
//! ├── checkpoint.json      # эпоха, отслеживаемая метрика, ее значение
//! └── model.safetensors    # веса модели
//! ```

use super::safetensors_io::{load_safetensors, save_safetensors, SafeTensorsError};
use crate::optimizers::Parameters;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const WEIGHTS_FILE: &str = "model.safetensors";
pub const CHECKPOINT_FILE: &str = "checkpoint.json";

const FORMAT_VERSION: &str = "1.0";

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    SafeTensors(#[from] SafeTensorsError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("checkpoint file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("unsupported checkpoint version '{0}'")]
    UnsupportedVersion(String),
}

type Result<T> = std::result::Result<T, CheckpointError>;

/// Метаданные чекпоинта (`checkpoint.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub version: String,
    pub model_name: String,
    /// Эпоха (с нуля), на которой сохранены веса.
    pub epoch: usize,
    /// Имя отслеживаемой метрики.
    pub monitor: String,
    /// Значение метрики, `None` если она не была вычислена (`NaN`).
    pub value: Option<f64>,
    pub input_shape: Vec<usize>,
    pub output_shape: Vec<usize>,
}

impl CheckpointMeta {
    pub fn new(model_name: &str, epoch: usize, monitor: &str, value: f64) -> Self {
        Self {
            version: FORMAT_VERSION.to_string(),
            model_name: model_name.to_string(),
            epoch,
            monitor: monitor.to_string(),
            value: value.is_finite().then_some(value),
            input_shape: Vec::new(),
            output_shape: Vec::new(),
        }
    }

    pub fn with_shapes(mut self, input_shape: &[usize], output_shape: &[usize]) -> Self {
        self.input_shape = input_shape.to_vec();
        self.output_shape = output_shape.to_vec();
        self
    }
}

/// Полный чекпоинт: метаданные и веса.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub meta: CheckpointMeta,
    pub weights: Parameters,
}

/// Сохраняет веса и метаданные в `dir` (создается при необходимости).
///
/// Веса пишутся первыми: `checkpoint.json` появляется только рядом с
/// полностью записанным `model.safetensors`.
pub fn save_checkpoint<P: AsRef<Path>>(dir: P, weights: &Parameters, meta: &CheckpointMeta) -> Result<()> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;

    save_safetensors(dir.join(WEIGHTS_FILE), weights)?;
    let json = serde_json::to_string_pretty(meta)?;
    fs::write(dir.join(CHECKPOINT_FILE), json)?;
    Ok(())
}

/// Читает только метаданные.
pub fn load_checkpoint_meta<P: AsRef<Path>>(dir: P) -> Result<CheckpointMeta> {
    let path = dir.as_ref().join(CHECKPOINT_FILE);
    if !path.exists() {
        return Err(CheckpointError::FileNotFound(path));
    }
    let meta: CheckpointMeta = serde_json::from_str(&fs::read_to_string(&path)?)?;
    if meta.version != FORMAT_VERSION {
        return Err(CheckpointError::UnsupportedVersion(meta.version));
    }
    Ok(meta)
}

pub fn load_checkpoint<P: AsRef<Path>>(dir: P) -> Result<Checkpoint> {
    let dir = dir.as_ref();
    let meta = load_checkpoint_meta(dir)?;

    let weights_path = dir.join(WEIGHTS_FILE);
    if !weights_path.exists() {
        return Err(CheckpointError::FileNotFound(weights_path));
    }
    let weights = load_safetensors(&weights_path)?;
    Ok(Checkpoint { meta, weights })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayD;

    #[test]
    fn test_save_load_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut weights = Parameters::new();
        weights.insert("W".to_string(), ArrayD::ones(ndarray::IxDyn(&[3, 1])));

        let meta = CheckpointMeta::new("linear", 4, "train_mean_squared_error", 0.25)
            .with_shapes(&[3], &[1]);
        save_checkpoint(dir.path(), &weights, &meta).unwrap();

        let loaded = load_checkpoint(dir.path()).unwrap();
        assert_eq!(loaded.meta, meta);
        assert_eq!(loaded.weights, weights);
    }

    #[test]
    fn test_nan_value_is_stored_as_null() {
        let meta = CheckpointMeta::new("linear", 0, "loss", f64::NAN);
        assert_eq!(meta.value, None);
        let json = serde_json::to_value(&meta).unwrap();
        assert!(json["value"].is_null());
    }

    #[test]
    fn test_missing_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_checkpoint(dir.path()),
            Err(CheckpointError::FileNotFound(_))
        ));
    }
}
