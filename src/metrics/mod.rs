// --- File: src/metrics/mod.rs ---

//! Metrics recorded during training.
//!
//! A metric maps `(y_true, y_pred)` for a batch to one score per example.
//! [`compute_metric`] concatenates those scores over all batches and
//! [`mean_score`] reduces them to the value stored in the epoch logs.
//!
//! # Example
//!
//! ```rust,ignore
//! use machinedesign::metrics::{get_metric, compute_metric, mean_score};
//!
//! let metric = get_metric("mean_squared_error")?;
//! let scores = compute_metric(batches.map(|b| Ok((b.y, model.predict(&b.x)?))), metric)?;
//! println!("mse: {:.4}", mean_score(&scores));
//! ```

pub mod regression;
pub mod running;

pub use regression::{mean_absolute_error, mean_squared_error};
pub use running::{format_logs, History, Logs, Mode, Monitor, RunningMean};

use crate::error::{Error, Result};
use ndarray::{Array1, ArrayD, Axis};

/// Per-example metric: `(y_true, y_pred) -> scores`.
pub type MetricFn = fn(&ArrayD<f32>, &ArrayD<f32>) -> Result<Array1<f32>>;

/// Looks a metric up by name. Unknown names are a lookup error.
pub fn get_metric(name: &str) -> Result<MetricFn> {
    match name {
        "mean_squared_error" | "mse" => Ok(mean_squared_error),
        "mean_absolute_error" | "mae" => Ok(mean_absolute_error),
        other => Err(Error::unknown("metric", other)),
    }
}

/// Scores of every example, concatenated over the batches in order.
pub fn compute_metric<I>(batches: I, metric: MetricFn) -> Result<Array1<f32>>
where
    I: IntoIterator<Item = Result<(ArrayD<f32>, ArrayD<f32>)>>,
{
    let mut parts = Vec::new();
    for batch in batches {
        let (y_true, y_pred) = batch?;
        parts.push(metric(&y_true, &y_pred)?);
    }
    if parts.is_empty() {
        return Ok(Array1::zeros(0));
    }
    let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
    Ok(ndarray::concatenate(Axis(0), &views)?)
}

/// Mean of the scores, `NaN` when there are none.
pub fn mean_score(scores: &Array1<f32>) -> f64 {
    if scores.is_empty() {
        return f64::NAN;
    }
    scores.iter().map(|&s| f64::from(s)).sum::<f64>() / scores.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_get_metric() {
        assert!(get_metric("mean_squared_error").is_ok());
        assert!(get_metric("mae").is_ok());
        assert!(matches!(
            get_metric("f1"),
            Err(Error::UnknownName { kind: "metric", .. })
        ));
    }

    #[test]
    fn test_compute_metric_concatenates() {
        let batches = vec![
            Ok((array![[1.0f32], [2.0]].into_dyn(), array![[1.0f32], [4.0]].into_dyn())),
            Ok((array![[0.0f32]].into_dyn(), array![[3.0f32]].into_dyn())),
        ];
        let scores = compute_metric(batches, mean_squared_error).unwrap();
        assert_eq!(scores, array![0.0f32, 4.0, 9.0]);
        assert!((mean_score(&scores) - 13.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_is_nan() {
        let scores = compute_metric(Vec::new(), mean_absolute_error).unwrap();
        assert!(scores.is_empty());
        assert!(mean_score(&scores).is_nan());
    }

    #[test]
    fn test_batch_error_propagates() {
        let batches = vec![Err(Error::NotCompiled)];
        assert!(compute_metric(batches, mean_absolute_error).is_err());
    }
}
