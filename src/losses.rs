// --- File: src/losses.rs ---

//! Loss functions used to fit a model.
//!
//! Losses operate directly on prediction/target arrays and return both the
//! scalar value and its gradient w.r.t. the predictions, which is what a
//! model needs for one optimization step.
//!
//! # Available Loss Functions
//!
//! - **MSE (Mean Squared Error)**: `mean_squared_error`, alias `mse`
//! - **MAE (Mean Absolute Error)**: `mean_absolute_error`, alias `mae`

use crate::error::{Error, Result};
use ndarray::{ArrayD, ArrayViewD, Zip};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loss {
    MeanSquaredError,
    MeanAbsoluteError,
}

/// Looks a loss up by name.
pub fn get_loss(name: &str) -> Result<Loss> {
    match name {
        "mean_squared_error" | "mse" => Ok(Loss::MeanSquaredError),
        "mean_absolute_error" | "mae" => Ok(Loss::MeanAbsoluteError),
        other => Err(Error::unknown("loss", other)),
    }
}

impl Loss {
    pub fn name(&self) -> &'static str {
        match self {
            Loss::MeanSquaredError => "mean_squared_error",
            Loss::MeanAbsoluteError => "mean_absolute_error",
        }
    }

    fn check(y_pred: &ArrayViewD<f32>, y_true: &ArrayViewD<f32>) -> Result<()> {
        if y_pred.shape() == y_true.shape() {
            Ok(())
        } else {
            Err(Error::ShapeMismatch {
                what: "target shape",
                expected: y_pred.shape().to_vec(),
                got: y_true.shape().to_vec(),
            })
        }
    }

    /// Mean of the element-wise error over the whole batch.
    ///
    /// Formula: `MSE = mean((y_pred - y_true)^2)`, `MAE = mean(|y_pred - y_true|)`.
    pub fn value(&self, y_pred: ArrayViewD<f32>, y_true: ArrayViewD<f32>) -> Result<f32> {
        Self::check(&y_pred, &y_true)?;
        if y_pred.is_empty() {
            return Ok(0.0);
        }
        let mut total = 0.0f64;
        Zip::from(&y_pred).and(&y_true).for_each(|&p, &t| {
            let e = f64::from(p - t);
            total += match self {
                Loss::MeanSquaredError => e * e,
                Loss::MeanAbsoluteError => e.abs(),
            };
        });
        Ok((total / y_pred.len() as f64) as f32)
    }

    /// Gradient of [`Loss::value`] w.r.t. `y_pred`.
    pub fn gradient(&self, y_pred: ArrayViewD<f32>, y_true: ArrayViewD<f32>) -> Result<ArrayD<f32>> {
        Self::check(&y_pred, &y_true)?;
        let n = y_pred.len().max(1) as f32;
        let grad = Zip::from(&y_pred)
            .and(&y_true)
            .map_collect(|&p, &t| match self {
                Loss::MeanSquaredError => 2.0 * (p - t) / n,
                // Subgradient 0 at p == t.
                Loss::MeanAbsoluteError => {
                    if p > t {
                        1.0 / n
                    } else if p < t {
                        -1.0 / n
                    } else {
                        0.0
                    }
                }
            });
        Ok(grad)
    }
}
