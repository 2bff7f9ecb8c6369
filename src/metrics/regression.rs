// --- Файл: src/metrics/regression.rs ---

//! Метрики для задач регрессии.
//!
//! Каждая метрика возвращает одно значение на пример: ошибка усредняется
//! по всем осям, кроме первой.

use crate::error::{Error, Result};
use ndarray::{Array1, ArrayD, Axis};

fn per_example<F>(y_true: &ArrayD<f32>, y_pred: &ArrayD<f32>, f: F) -> Result<Array1<f32>>
where
    F: Fn(f32, f32) -> f32,
{
    if y_true.shape() != y_pred.shape() {
        return Err(Error::ShapeMismatch {
            what: "prediction shape",
            expected: y_true.shape().to_vec(),
            got: y_pred.shape().to_vec(),
        });
    }
    if y_true.ndim() == 0 {
        return Ok(Array1::from_elem(1, f(y_true[[]], y_pred[[]])));
    }

    let n = y_true.shape()[0];
    let m = y_true.len().checked_div(n).unwrap_or(0);
    let errors = ndarray::Zip::from(y_true)
        .and(y_pred)
        .map_collect(|&t, &p| f(t, p));
    let errors = errors.into_shape_with_order((n, m))?;
    if m == 0 {
        return Ok(Array1::from_elem(n, f32::NAN));
    }
    Ok(errors.mean_axis(Axis(1)).unwrap_or_else(|| Array1::zeros(n)))
}

/// MSE = mean((y_pred - y_true)²) по каждому примеру.
pub fn mean_squared_error(y_true: &ArrayD<f32>, y_pred: &ArrayD<f32>) -> Result<Array1<f32>> {
    per_example(y_true, y_pred, |t, p| (p - t) * (p - t))
}

/// MAE = mean(|y_pred - y_true|) по каждому примеру.
pub fn mean_absolute_error(y_true: &ArrayD<f32>, y_pred: &ArrayD<f32>) -> Result<Array1<f32>> {
    per_example(y_true, y_pred, |t, p| (p - t).abs())
}
