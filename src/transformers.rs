// --- File: src/transformers.rs ---

//! Stateful preprocessing fitted incrementally on the training inputs.
//!
//! A transformer is fitted batch by batch with [`Transformer::partial_fit`]
//! and then maps inputs with [`Transformer::transform`] /
//! [`Transformer::inverse_transform`]. Pipelines are plain slices of
//! transformers applied in order; [`AnyTransformer`] is the registry of the
//! named, serializable transformers.

use crate::config::{parse_params, NamedParams};
use crate::data::{DataError, Sample};
use crate::error::{Error, Result};
use ndarray::{ArrayD, Axis};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Default value added to the standard deviation in the `transform` denominator.
pub const EPS: f32 = 1e-10;

#[derive(Error, Debug)]
pub enum TransformerError {
    #[error("{0} must be fitted before being used")]
    NotFitted(&'static str),

    #[error("{name}: expected feature shape {expected:?}, got {got:?}")]
    ShapeMismatch {
        name: &'static str,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("{0}: expected a batch with a leading example axis")]
    NotBatched(&'static str),
}

pub trait Transformer {
    fn name(&self) -> &'static str;

    /// Updates the statistics with a batch (leading axis = examples).
    fn partial_fit(&mut self, x: &ArrayD<f32>) -> Result<(), TransformerError>;

    /// Accepts either a batch or a single example.
    fn transform(&self, x: &ArrayD<f32>) -> Result<ArrayD<f32>, TransformerError>;

    fn inverse_transform(&self, x: &ArrayD<f32>) -> Result<ArrayD<f32>, TransformerError>;

    fn is_fitted(&self) -> bool;
}

/// Incremental standardization: `(x - mean) / (std + eps)`.
///
/// Keeps the running sum and sum of squares over the example axis and
/// recomputes `mean = sum / n`, `std = sqrt(sum_sqr / n - mean²)` after
/// every call. The accumulators are `f64`; the naive variance formula is
/// kept (a single streaming pass) and rounding below zero is clamped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standardize {
    eps: f32,
    n: usize,
    sum: Option<ArrayD<f64>>,
    sum_sqr: Option<ArrayD<f64>>,
    mean: Option<ArrayD<f32>>,
    std: Option<ArrayD<f32>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StandardizeParams {
    #[serde(default = "default_eps")]
    eps: f32,
}

fn default_eps() -> f32 {
    EPS
}

impl Default for Standardize {
    fn default() -> Self {
        Self::new(EPS)
    }
}

impl Standardize {
    pub fn new(eps: f32) -> Self {
        Self {
            eps,
            n: 0,
            sum: None,
            sum_sqr: None,
            mean: None,
            std: None,
        }
    }

    /// Number of examples seen so far.
    pub fn n(&self) -> usize {
        self.n
    }

    pub fn eps(&self) -> f32 {
        self.eps
    }

    pub fn mean(&self) -> Option<&ArrayD<f32>> {
        self.mean.as_ref()
    }

    pub fn std(&self) -> Option<&ArrayD<f32>> {
        self.std.as_ref()
    }

    fn fitted(&self) -> Result<(&ArrayD<f32>, &ArrayD<f32>), TransformerError> {
        match (&self.mean, &self.std) {
            (Some(mean), Some(std)) => Ok((mean, std)),
            _ => Err(TransformerError::NotFitted("Standardize")),
        }
    }

    fn check_features(&self, x: &ArrayD<f32>, features: &[usize]) -> Result<(), TransformerError> {
        let shape = x.shape();
        let single = shape == features;
        let batched = shape.len() == features.len() + 1 && &shape[1..] == features;
        if single || batched {
            Ok(())
        } else {
            Err(TransformerError::ShapeMismatch {
                name: self.name(),
                expected: features.to_vec(),
                got: shape.to_vec(),
            })
        }
    }
}

impl Transformer for Standardize {
    fn name(&self) -> &'static str {
        "Standardize"
    }

    fn partial_fit(&mut self, x: &ArrayD<f32>) -> Result<(), TransformerError> {
        if x.ndim() == 0 {
            return Err(TransformerError::NotBatched(self.name()));
        }
        let nb = x.shape()[0];
        if nb == 0 {
            return Ok(());
        }

        let xd = x.mapv(f64::from);
        let batch_sum = xd.sum_axis(Axis(0));
        let batch_sum_sqr = xd.mapv(|v| v * v).sum_axis(Axis(0));

        match (&mut self.sum, &mut self.sum_sqr) {
            (Some(sum), Some(sum_sqr)) => {
                if sum.shape() != batch_sum.shape() {
                    return Err(TransformerError::ShapeMismatch {
                        name: "Standardize",
                        expected: sum.shape().to_vec(),
                        got: batch_sum.shape().to_vec(),
                    });
                }
                *sum += &batch_sum;
                *sum_sqr += &batch_sum_sqr;
            }
            _ => {
                self.sum = Some(batch_sum);
                self.sum_sqr = Some(batch_sum_sqr);
            }
        }
        self.n += nb;

        if let (Some(sum), Some(sum_sqr)) = (&self.sum, &self.sum_sqr) {
            let n = self.n as f64;
            let mean = sum.mapv(|s| s / n);
            let var = sum_sqr.mapv(|s| s / n) - mean.mapv(|m| m * m);
            self.std = Some(var.mapv(|v| v.max(0.0).sqrt() as f32));
            self.mean = Some(mean.mapv(|m| m as f32));
        }
        Ok(())
    }

    fn transform(&self, x: &ArrayD<f32>) -> Result<ArrayD<f32>, TransformerError> {
        let (mean, std) = self.fitted()?;
        self.check_features(x, mean.shape())?;
        let denom = std.mapv(|s| s + self.eps);
        Ok((x - mean) / &denom)
    }

    fn inverse_transform(&self, x: &ArrayD<f32>) -> Result<ArrayD<f32>, TransformerError> {
        let (mean, std) = self.fitted()?;
        self.check_features(x, mean.shape())?;
        Ok(x * std + mean)
    }

    fn is_fitted(&self) -> bool {
        self.mean.is_some()
    }
}

/// Named transformers, serialized as `{"name": ..., "state": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "state")]
pub enum AnyTransformer {
    Standardize(Standardize),
}

impl AnyTransformer {
    pub fn from_params(spec: &NamedParams) -> Result<Self> {
        let context = format!("transformer '{}'", spec.name);
        match spec.name.as_str() {
            "Standardize" => {
                let p: StandardizeParams = parse_params(&context, &spec.params)?;
                Ok(AnyTransformer::Standardize(Standardize::new(p.eps)))
            }
            other => Err(Error::unknown("transformer", other)),
        }
    }

    fn inner(&self) -> &dyn Transformer {
        match self {
            AnyTransformer::Standardize(t) => t,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Transformer {
        match self {
            AnyTransformer::Standardize(t) => t,
        }
    }
}

impl Transformer for AnyTransformer {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn partial_fit(&mut self, x: &ArrayD<f32>) -> Result<(), TransformerError> {
        self.inner_mut().partial_fit(x)
    }

    fn transform(&self, x: &ArrayD<f32>) -> Result<ArrayD<f32>, TransformerError> {
        self.inner().transform(x)
    }

    fn inverse_transform(&self, x: &ArrayD<f32>) -> Result<ArrayD<f32>, TransformerError> {
        self.inner().inverse_transform(x)
    }

    fn is_fitted(&self) -> bool {
        self.inner().is_fitted()
    }
}

/// Instantiates the (unfitted) transformers of a pipeline; unknown names fail fast.
pub fn make_transformers_pipeline(specs: &[NamedParams]) -> Result<Vec<AnyTransformer>> {
    specs.iter().map(AnyTransformer::from_params).collect()
}

/// Fits the transformers one after the other.
///
/// Transformer `i` is fitted on a fresh pass of `iter_generator`, with the
/// already fitted transformers `0..i` applied to every batch.
pub fn fit_transformers<T, F, I>(
    transformers: &mut [T],
    iter_generator: F,
) -> Result<(), TransformerError>
where
    T: Transformer,
    F: Fn() -> I,
    I: IntoIterator<Item = ArrayD<f32>>,
{
    for i in 0..transformers.len() {
        let (fitted, rest) = transformers.split_at_mut(i);
        let current = &mut rest[0];
        for x in iter_generator() {
            let x = transform_array(x, fitted)?;
            current.partial_fit(&x)?;
        }
        tracing::debug!(transformer = current.name(), "fitted transformer");
    }
    Ok(())
}

/// Applies the pipeline in order.
pub fn transform_array<T: Transformer>(
    x: ArrayD<f32>,
    transformers: &[T],
) -> Result<ArrayD<f32>, TransformerError> {
    transformers.iter().try_fold(x, |x, t| t.transform(&x))
}

/// Undoes the pipeline, last transformer first.
pub fn inverse_transform_array<T: Transformer>(
    x: ArrayD<f32>,
    transformers: &[T],
) -> Result<ArrayD<f32>, TransformerError> {
    transformers
        .iter()
        .rev()
        .try_fold(x, |x, t| t.inverse_transform(&x))
}

/// Returns a copy of `sample` with column `col` transformed by the pipeline.
pub fn transform_sample<T: Transformer>(
    sample: &Sample,
    transformers: &[T],
    col: &str,
) -> Result<Sample> {
    let mut out = sample.clone();
    let arr = out
        .remove(col)
        .ok_or_else(|| DataError::MissingColumn(col.to_string()))?;
    out.insert(col.to_string(), transform_array(arr, transformers)?);
    Ok(out)
}

pub fn save_transformers<P: AsRef<Path>>(path: P, transformers: &[AnyTransformer]) -> Result<()> {
    let json = serde_json::to_string_pretty(transformers)?;
    fs::write(path, json)?;
    Ok(())
}

pub fn load_transformers<P: AsRef<Path>>(path: P) -> Result<Vec<AnyTransformer>> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::minibatch_ranges;
    use ndarray::{array, Slice};

    fn data() -> ArrayD<f32> {
        array![[1.0f32, 10.0], [2.0, 20.0], [3.0, 30.0], [4.0, 40.0], [5.0, 50.0]].into_dyn()
    }

    fn assert_close(a: &ArrayD<f32>, b: &ArrayD<f32>, tol: f32) {
        assert_eq!(a.shape(), b.shape());
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < tol, "{x} vs {y}");
        }
    }

    #[test]
    fn test_single_fit_gives_exact_statistics() {
        let mut t = Standardize::default();
        t.partial_fit(&data()).unwrap();

        assert_eq!(t.n(), 5);
        assert_close(t.mean().unwrap(), &array![3.0f32, 30.0].into_dyn(), 1e-6);
        let std1 = 2.0f32.sqrt();
        assert_close(t.std().unwrap(), &array![std1, 10.0 * std1].into_dyn(), 1e-5);
    }

    #[test]
    fn test_incremental_fit_matches_single_fit() {
        let x = data();
        let mut whole = Standardize::default();
        whole.partial_fit(&x).unwrap();

        let mut parts = Standardize::default();
        for r in minibatch_ranges(5, 2) {
            parts
                .partial_fit(&x.slice_axis(Axis(0), Slice::from(r)).to_owned())
                .unwrap();
        }
        assert_eq!(parts.n(), 5);
        assert_close(parts.mean().unwrap(), whole.mean().unwrap(), 1e-6);
        assert_close(parts.std().unwrap(), whole.std().unwrap(), 1e-5);
    }

    #[test]
    fn test_transform_before_fit_fails() {
        let t = Standardize::default();
        assert!(!t.is_fitted());
        assert!(matches!(t.transform(&data()), Err(TransformerError::NotFitted(_))));
        assert!(matches!(
            t.inverse_transform(&data()),
            Err(TransformerError::NotFitted(_))
        ));
    }

    #[test]
    fn test_transform_then_inverse_is_identity() {
        let x = data();
        let mut t = Standardize::default();
        t.partial_fit(&x).unwrap();

        let z = t.transform(&x).unwrap();
        for col in z.axis_iter(Axis(1)) {
            assert!(col.mean().unwrap().abs() < 1e-5);
        }
        assert_close(&t.inverse_transform(&z).unwrap(), &x, 1e-4);

        // A single example is accepted as well.
        let one = array![3.0f32, 30.0].into_dyn();
        assert_close(&t.transform(&one).unwrap(), &array![0.0f32, 0.0].into_dyn(), 1e-6);
    }

    #[test]
    fn test_constant_feature_uses_eps() {
        let x = array![[2.0f32], [2.0], [2.0]].into_dyn();
        let mut t = Standardize::default();
        t.partial_fit(&x).unwrap();
        assert_eq!(t.std().unwrap()[[0]], 0.0);
        let z = t.transform(&x).unwrap();
        assert!(z.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_shape_errors() {
        let mut t = Standardize::default();
        assert!(matches!(
            t.partial_fit(&ArrayD::from_elem(ndarray::IxDyn(&[]), 1.0)),
            Err(TransformerError::NotBatched(_))
        ));

        t.partial_fit(&data()).unwrap();
        let wrong = array![[1.0f32, 2.0, 3.0]].into_dyn();
        assert!(matches!(
            t.partial_fit(&wrong),
            Err(TransformerError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            t.transform(&wrong),
            Err(TransformerError::ShapeMismatch { .. })
        ));

        // Empty batches leave the state untouched.
        let before = t.clone();
        t.partial_fit(&ArrayD::zeros(ndarray::IxDyn(&[0, 2]))).unwrap();
        assert_eq!(t, before);
    }

    #[test]
    fn test_fit_transformers_chains() {
        let x = data() * 3.0 + 7.0;
        let mut pipeline = make_transformers_pipeline(&[
            NamedParams::new("Standardize"),
            NamedParams::new("Standardize").with_params(serde_json::json!({"eps": 1e-6})),
        ])
        .unwrap();

        fit_transformers(&mut pipeline, || {
            minibatch_ranges(5, 2).map(|r| x.slice_axis(Axis(0), Slice::from(r)).to_owned())
        })
        .unwrap();

        // The second transformer sees standardized data.
        let AnyTransformer::Standardize(second) = &pipeline[1];
        assert_eq!(second.eps(), 1e-6);
        assert!(second.mean().unwrap().iter().all(|m| m.abs() < 1e-5));
        assert!(second.std().unwrap().iter().all(|s| (s - 1.0).abs() < 1e-4));

        let z = transform_array(x.clone(), &pipeline).unwrap();
        let back = inverse_transform_array(z, &pipeline).unwrap();
        assert_close(&back, &x, 1e-3);
    }

    #[test]
    fn test_unknown_transformer() {
        let err = make_transformers_pipeline(&[NamedParams::new("Whiten")]).unwrap_err();
        assert!(matches!(err, Error::UnknownName { kind: "transformer", .. }));
    }

    #[test]
    fn test_transform_sample() {
        let mut t = Standardize::default();
        t.partial_fit(&data()).unwrap();

        let mut sample = Sample::new();
        sample.insert("X".to_string(), array![3.0f32, 30.0].into_dyn());
        sample.insert("y".to_string(), array![1.0f32].into_dyn());

        let out = transform_sample(&sample, &[t.clone()], "X").unwrap();
        assert_close(&out["X"], &array![0.0f32, 0.0].into_dyn(), 1e-6);
        assert_eq!(out["y"], sample["y"]);

        assert!(transform_sample(&sample, &[t], "Z").is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transformers.json");

        let mut pipeline = make_transformers_pipeline(&[NamedParams::new("Standardize")]).unwrap();
        pipeline[0].partial_fit(&data()).unwrap();
        save_transformers(&path, &pipeline).unwrap();

        let loaded = load_transformers(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].is_fitted());
        assert_close(
            &loaded[0].transform(&data()).unwrap(),
            &pipeline[0].transform(&data()).unwrap(),
            1e-6,
        );
    }
}
