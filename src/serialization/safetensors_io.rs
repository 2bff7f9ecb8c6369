// --- Файл: src/serialization/safetensors_io.rs ---

//! Модуль для работы с форматом SafeTensors.
//!
//! Веса модели ([`Parameters`]) сохраняются как тензоры F32; при загрузке
//! F64 приводится к F32, остальные типы не поддерживаются.

use crate::optimizers::Parameters;
use ndarray::ArrayD;
use safetensors::serialize_to_file;
use safetensors::tensor::{SafeTensors, TensorView};
use safetensors::Dtype;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SafeTensorsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("safetensors error: {0}")]
    Format(#[from] safetensors::SafeTensorError),

    #[error("unsupported dtype: {0}")]
    UnsupportedDtype(String),

    #[error("tensor '{name}' has {len} values, which does not fit shape {shape:?}")]
    ShapeMismatch {
        name: String,
        shape: Vec<usize>,
        len: usize,
    },

    #[error("tensor '{0}' not found")]
    TensorNotFound(String),
}

type Result<T> = std::result::Result<T, SafeTensorsError>;

/// Сохраняет параметры в файл SafeTensors.
///
/// # Пример
///
/// ```rust,ignore
/// let mut weights = Parameters::new();
/// weights.insert("W".to_string(), ArrayD::zeros(ndarray::IxDyn(&[4, 1])));
/// save_safetensors("model.safetensors", &weights)?;
/// ```
pub fn save_safetensors<P: AsRef<Path>>(path: P, tensors: &Parameters) -> Result<()> {
    // Байты должны пережить TensorView, которые на них ссылаются.
    let storage: Vec<(&str, Vec<usize>, Vec<u8>)> = tensors
        .iter()
        .map(|(name, arr)| {
            let data = arr.iter().flat_map(|&x| x.to_le_bytes()).collect();
            (name.as_str(), arr.shape().to_vec(), data)
        })
        .collect();

    let mut views: Vec<(&str, TensorView<'_>)> = Vec::with_capacity(storage.len());
    for (name, shape, data) in &storage {
        views.push((*name, TensorView::new(Dtype::F32, shape.clone(), data)?));
    }

    serialize_to_file(views, &None, path.as_ref())?;
    Ok(())
}

/// Загружает все тензоры из файла SafeTensors.
pub fn load_safetensors<P: AsRef<Path>>(path: P) -> Result<Parameters> {
    let buffer = fs::read(path)?;
    let tensors = SafeTensors::deserialize(&buffer)?;

    let mut result = Parameters::new();
    for (name, tensor) in tensors.tensors() {
        let floats: Vec<f32> = match tensor.dtype() {
            Dtype::F32 => tensor
                .data()
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
            Dtype::F64 => tensor
                .data()
                .chunks_exact(8)
                .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f32)
                .collect(),
            other => return Err(SafeTensorsError::UnsupportedDtype(format!("{other:?}"))),
        };

        let shape = tensor.shape().to_vec();
        let len = floats.len();
        let arr = ArrayD::from_shape_vec(ndarray::IxDyn(&shape), floats).map_err(|_| {
            SafeTensorsError::ShapeMismatch {
                name: name.clone(),
                shape: shape.clone(),
                len,
            }
        })?;
        result.insert(name, arr);
    }
    Ok(result)
}

/// Загружает конкретный тензор по имени.
pub fn load_tensor<P: AsRef<Path>>(path: P, name: &str) -> Result<ArrayD<f32>> {
    let mut tensors = load_safetensors(path)?;
    tensors
        .remove(name)
        .ok_or_else(|| SafeTensorsError::TensorNotFound(name.to_string()))
}

/// Информация о тензорах в файле (имя, форма, тип), отсортированная по имени.
pub fn tensor_info<P: AsRef<Path>>(path: P) -> Result<Vec<(String, Vec<usize>, String)>> {
    let buffer = fs::read(path)?;
    let tensors = SafeTensors::deserialize(&buffer)?;

    let mut info: Vec<_> = tensors
        .tensors()
        .into_iter()
        .map(|(name, tensor)| (name, tensor.shape().to_vec(), format!("{:?}", tensor.dtype())))
        .collect();
    info.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights() -> Parameters {
        let mut weights = Parameters::new();
        weights.insert(
            "W".to_string(),
            ArrayD::from_shape_vec(ndarray::IxDyn(&[2, 3]), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0])
                .unwrap(),
        );
        weights.insert(
            "b".to_string(),
            ArrayD::from_shape_vec(ndarray::IxDyn(&[3]), vec![0.1, 0.2, 0.3]).unwrap(),
        );
        weights
    }

    #[test]
    fn test_save_load_safetensors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");

        save_safetensors(&path, &weights()).unwrap();
        let loaded = load_safetensors(&path).unwrap();

        assert_eq!(loaded, weights());
    }

    #[test]
    fn test_tensor_info_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        save_safetensors(&path, &weights()).unwrap();

        let info = tensor_info(&path).unwrap();
        assert_eq!(info.len(), 2);
        assert_eq!(info[0].0, "W");
        assert_eq!(info[0].1, vec![2, 3]);
        assert_eq!(info[1].0, "b");

        assert_eq!(load_tensor(&path, "b").unwrap().len(), 3);
        assert!(matches!(
            load_tensor(&path, "missing"),
            Err(SafeTensorsError::TensorNotFound(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_safetensors(dir.path().join("nope.safetensors")),
            Err(SafeTensorsError::Io(_))
        ));
    }
}
