//! Модель, реализующая полносвязный (линейный) слой `y = xW + b`.
//!
//! Входы и выходы разворачиваются в векторы: `x` формы `[n, ..input_shape]`
//! превращается в матрицу `[n, d_in]`, выход `[n, d_out]` сворачивается
//! обратно в `[n, ..output_shape]`. Градиенты считаются вручную:
//! `dW = xᵀ·g`, `db = Σ g` по примерам, где `g = dL/dy`.

use super::{BuildContext, Model};
use crate::config::parse_params;
use crate::error::{Error, Result};
use crate::losses::Loss;
use crate::optimizers::{Optimizer, Parameters};
use ndarray::{Array1, Array2, ArrayD, ArrayView2, Axis, Ix1, Ix2, IxDyn};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;

const WEIGHTS: &str = "W";
const BIAS: &str = "b";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LinearParams {
    /// Веса инициализируются из `U(-init_scale, init_scale)`.
    #[serde(default = "default_init_scale")]
    init_scale: f32,
}

fn default_init_scale() -> f32 {
    0.1
}

/// Builder registered as `linear`.
pub fn build(ctx: &BuildContext<'_>) -> Result<Box<dyn Model>> {
    let p: LinearParams = parse_params("model 'linear'", ctx.params)?;
    if !(p.init_scale >= 0.0) {
        return Err(Error::Config(format!(
            "linear: init_scale must be non-negative, got {}",
            p.init_scale
        )));
    }
    Ok(Box::new(Linear::new(
        ctx.input_shape,
        ctx.output_shape,
        p.init_scale,
        ctx.seed,
    )))
}

pub struct Linear {
    input_shape: Vec<usize>,
    output_shape: Vec<usize>,
    d_in: usize,
    d_out: usize,
    params: Parameters,
    compiled: Option<(Box<dyn Optimizer>, Loss)>,
}

impl Linear {
    pub fn new(input_shape: &[usize], output_shape: &[usize], init_scale: f32, seed: u64) -> Self {
        let d_in = input_shape.iter().product();
        let d_out = output_shape.iter().product();

        let mut rng = StdRng::seed_from_u64(seed);
        let weights = if init_scale > 0.0 {
            Array2::random_using((d_in, d_out), Uniform::new(-init_scale, init_scale), &mut rng)
        } else {
            Array2::zeros((d_in, d_out))
        };

        let mut params = Parameters::new();
        params.insert(WEIGHTS.to_string(), weights.into_dyn());
        params.insert(BIAS.to_string(), Array1::<f32>::zeros(d_out).into_dyn());

        Self {
            input_shape: input_shape.to_vec(),
            output_shape: output_shape.to_vec(),
            d_in,
            d_out,
            params,
            compiled: None,
        }
    }

    fn param(&self, name: &str) -> Result<&ArrayD<f32>> {
        self.params
            .get(name)
            .ok_or_else(|| Error::MissingParameter(name.to_string()))
    }

    /// `[n, ..input_shape]` -> `[n, d_in]`.
    fn flatten_inputs(&self, x: &ArrayD<f32>) -> Result<Array2<f32>> {
        if x.ndim() == 0 || x.shape()[1..] != self.input_shape[..] {
            return Err(Error::ShapeMismatch {
                what: "model input shape",
                expected: self.input_shape.clone(),
                got: x.shape().get(1..).unwrap_or_default().to_vec(),
            });
        }
        let n = x.shape()[0];
        Ok(x.to_shape((n, self.d_in))?.into_owned())
    }

    fn forward(&self, x2: ArrayView2<f32>) -> Result<Array2<f32>> {
        let w = self.param(WEIGHTS)?.view().into_dimensionality::<Ix2>()?;
        let b = self.param(BIAS)?.view().into_dimensionality::<Ix1>()?;
        Ok(x2.dot(&w) + &b)
    }

    fn unflatten_outputs(&self, y2: Array2<f32>) -> Result<ArrayD<f32>> {
        let mut shape = vec![y2.nrows()];
        shape.extend_from_slice(&self.output_shape);
        Ok(y2.into_shape_with_order(IxDyn(&shape))?)
    }
}

impl Model for Linear {
    fn name(&self) -> &str {
        "linear"
    }

    fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    fn output_shape(&self) -> &[usize] {
        &self.output_shape
    }

    fn compile(&mut self, optimizer: Box<dyn Optimizer>, loss: Loss) {
        self.compiled = Some((optimizer, loss));
    }

    fn is_compiled(&self) -> bool {
        self.compiled.is_some()
    }

    fn fit_batch(&mut self, x: &ArrayD<f32>, y: &ArrayD<f32>) -> Result<f32> {
        let x2 = self.flatten_inputs(x)?;
        let y_pred = self.unflatten_outputs(self.forward(x2.view())?)?;

        let Some((optimizer, loss)) = self.compiled.as_mut() else {
            return Err(Error::NotCompiled);
        };
        let value = loss.value(y_pred.view(), y.view())?;
        let grad = loss.gradient(y_pred.view(), y.view())?;

        let n = x2.nrows();
        let g2 = grad.into_shape_with_order((n, self.d_out))?;
        let mut gradients = Parameters::new();
        gradients.insert(WEIGHTS.to_string(), x2.t().dot(&g2).into_dyn());
        gradients.insert(BIAS.to_string(), g2.sum_axis(Axis(0)).into_dyn());

        optimizer.step(&mut self.params, &gradients);
        Ok(value)
    }

    fn predict(&self, x: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        let x2 = self.flatten_inputs(x)?;
        self.unflatten_outputs(self.forward(x2.view())?)
    }

    fn learning_rate(&self) -> Option<f32> {
        self.compiled.as_ref().map(|(opt, _)| opt.learning_rate())
    }

    fn set_learning_rate(&mut self, lr: f32) -> Result<()> {
        let (optimizer, _) = self.compiled.as_mut().ok_or(Error::NotCompiled)?;
        optimizer.set_learning_rate(lr);
        Ok(())
    }

    fn parameters(&self) -> &Parameters {
        &self.params
    }

    fn load_parameters(&mut self, mut parameters: Parameters) -> Result<()> {
        let mut loaded = Parameters::new();
        for (name, current) in &self.params {
            let value = parameters
                .remove(name)
                .ok_or_else(|| Error::MissingParameter(name.clone()))?;
            if value.shape() != current.shape() {
                return Err(Error::ShapeMismatch {
                    what: "parameter shape",
                    expected: current.shape().to_vec(),
                    got: value.shape().to_vec(),
                });
            }
            loaded.insert(name.clone(), value);
        }
        self.params = loaded;
        Ok(())
    }
}
