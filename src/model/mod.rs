//! # Model Module
//!
//! The contract between the training loop and a model, and the registry of
//! model builders.
//!
//! A model owns its parameters and, once compiled, its optimizer and loss.
//! The loop only calls [`Model::fit_batch`] / [`Model::predict`] and reads
//! or changes the learning rate through the model.
//!
//! ## Key Components
//!
//! - [`Model`]: fit/predict/persist interface
//! - [`Builders`]: name -> [`ModelBuilder`] registry, `linear` by default
//! - [`linear::Linear`]: affine reference model `y = x·W + b`

pub mod linear;

pub use linear::Linear;

use crate::config::ModelFamily;
use crate::data::minibatch_ranges;
use crate::error::{Error, Result};
use crate::losses::Loss;
use crate::optimizers::{Optimizer, Parameters};
use crate::serialization::{load_safetensors, save_safetensors};
use ndarray::{ArrayD, Axis, Slice};
use std::collections::BTreeMap;
use std::path::Path;

pub trait Model {
    fn name(&self) -> &str;

    /// Per-example input shape (without the example axis).
    fn input_shape(&self) -> &[usize];

    /// Per-example output shape (without the example axis).
    fn output_shape(&self) -> &[usize];

    /// Attaches the optimizer and the loss used by [`Model::fit_batch`].
    fn compile(&mut self, optimizer: Box<dyn Optimizer>, loss: Loss);

    fn is_compiled(&self) -> bool;

    /// One optimization step on a minibatch; returns the loss before the update.
    fn fit_batch(&mut self, x: &ArrayD<f32>, y: &ArrayD<f32>) -> Result<f32>;

    fn predict(&self, x: &ArrayD<f32>) -> Result<ArrayD<f32>>;

    /// `None` before `compile`.
    fn learning_rate(&self) -> Option<f32>;

    fn set_learning_rate(&mut self, lr: f32) -> Result<()>;

    fn parameters(&self) -> &Parameters;

    /// Replaces every parameter; names and shapes must match the current ones.
    fn load_parameters(&mut self, parameters: Parameters) -> Result<()>;

    fn count_params(&self) -> usize {
        self.parameters().values().map(|p| p.len()).sum()
    }

    fn save(&self, path: &Path) -> Result<()> {
        save_safetensors(path, self.parameters())?;
        Ok(())
    }

    fn load_weights(&mut self, path: &Path) -> Result<()> {
        let parameters = load_safetensors(path)?;
        self.load_parameters(parameters)
    }
}

/// What a builder receives to construct a model.
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
    pub params: &'a serde_json::Value,
    pub input_shape: &'a [usize],
    pub output_shape: &'a [usize],
    pub seed: u64,
}

pub type ModelBuilder = fn(&BuildContext<'_>) -> Result<Box<dyn Model>>;

/// Registry of model builders by name.
#[derive(Clone)]
pub struct Builders {
    builders: BTreeMap<String, ModelBuilder>,
}

impl Default for Builders {
    fn default() -> Self {
        let mut builders = Self::empty();
        builders.register("linear", linear::build);
        builders
    }
}

impl Builders {
    pub fn empty() -> Self {
        Self {
            builders: BTreeMap::new(),
        }
    }

    /// Adds or replaces a builder.
    pub fn register(&mut self, name: &str, builder: ModelBuilder) -> &mut Self {
        self.builders.insert(name.to_string(), builder);
        self
    }

    pub fn get(&self, name: &str) -> Result<ModelBuilder> {
        self.builders
            .get(name)
            .copied()
            .ok_or_else(|| Error::unknown("model builder", name))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.builders.keys().map(String::as_str)
    }
}

/// Only the `mapping` family can be trained by this crate.
pub fn check_family(family: ModelFamily) -> Result<()> {
    match family {
        ModelFamily::Mapping => Ok(()),
        got => Err(Error::WrongModelFamily {
            expected: ModelFamily::Mapping,
            got,
        }),
    }
}

pub fn check_model_shape(model: &dyn Model, output_shape: &[usize]) -> Result<()> {
    if model.output_shape() == output_shape {
        Ok(())
    } else {
        Err(Error::ShapeMismatch {
            what: "model output shape",
            expected: output_shape.to_vec(),
            got: model.output_shape().to_vec(),
        })
    }
}

pub fn show_model_info(model: &dyn Model) {
    tracing::info!(
        model = model.name(),
        input_shape = ?model.input_shape(),
        output_shape = ?model.output_shape(),
        nb_params = model.count_params(),
        "model built"
    );
}

/// Predicts `x` in chunks of `batch_size` examples and concatenates the outputs.
pub fn predict_batched(model: &dyn Model, x: &ArrayD<f32>, batch_size: usize) -> Result<ArrayD<f32>> {
    if x.ndim() == 0 {
        return Err(Error::ShapeMismatch {
            what: "model input shape",
            expected: model.input_shape().to_vec(),
            got: Vec::new(),
        });
    }
    let n = x.shape()[0];
    if n == 0 || batch_size >= n {
        return model.predict(x);
    }
    let parts = minibatch_ranges(n, batch_size)
        .map(|r| model.predict(&x.slice_axis(Axis(0), Slice::from(r)).to_owned()))
        .collect::<Result<Vec<_>>>()?;
    let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
    Ok(ndarray::concatenate(Axis(0), &views)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builders_registry() {
        let builders = Builders::default();
        assert!(builders.get("linear").is_ok());
        assert_eq!(builders.names().collect::<Vec<_>>(), vec!["linear"]);
        assert!(matches!(
            builders.get("convnet"),
            Err(Error::UnknownName { kind: "model builder", .. })
        ));
        assert!(Builders::empty().get("linear").is_err());
    }

    #[test]
    fn test_check_family() {
        check_family(ModelFamily::Mapping).unwrap();
        assert!(matches!(
            check_family(ModelFamily::Gan),
            Err(Error::WrongModelFamily { got: ModelFamily::Gan, .. })
        ));
    }

    #[test]
    fn test_check_model_shape_and_batched_predict() {
        let params = json!({});
        let ctx = BuildContext {
            params: &params,
            input_shape: &[3],
            output_shape: &[2],
            seed: 0,
        };
        let model = linear::build(&ctx).unwrap();
        check_model_shape(model.as_ref(), &[2]).unwrap();
        assert!(matches!(
            check_model_shape(model.as_ref(), &[1]),
            Err(Error::ShapeMismatch { .. })
        ));

        let x = ArrayD::from_shape_fn(ndarray::IxDyn(&[7, 3]), |ix| (ix[0] + ix[1]) as f32);
        let whole = model.predict(&x).unwrap();
        let chunked = predict_batched(model.as_ref(), &x, 3).unwrap();
        assert_eq!(chunked.shape(), &[7, 2]);
        for (a, b) in whole.iter().zip(chunked.iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }
}
