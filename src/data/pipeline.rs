// --- File: src/data/pipeline.rs ---

//! Data pipelines: named steps producing the list of training samples.
//!
//! Source steps append samples, processing steps rewrite the samples
//! produced so far:
//!
//! - `toy_regression` (source): `nb`, `nb_features`, `nb_outputs`, `noise`, `random_state`
//! - `json_file` (source): `path` to a JSON array of `{column: number | nested array}`
//! - `shuffle`: `random_state`
//! - `divide_by`: `value`, `col`
//! - `limit`: `nb`

use super::sample::Sample;
use super::DataError;
use crate::config::{parse_params, NamedParams};
use crate::error::{Error, Result};
use ndarray::{Array1, Array2, ArrayD, Axis, IxDyn};
use ndarray_rand::rand_distr::{Normal, Uniform};
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ToyRegressionParams {
    nb: usize,
    nb_features: usize,
    #[serde(default = "default_nb_outputs")]
    nb_outputs: usize,
    #[serde(default)]
    noise: f32,
    #[serde(default)]
    random_state: u64,
}

fn default_nb_outputs() -> usize {
    1
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct JsonFileParams {
    path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ShuffleParams {
    #[serde(default)]
    random_state: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct DivideByParams {
    value: f32,
    #[serde(default = "default_col")]
    col: String,
}

fn default_col() -> String {
    "X".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct LimitParams {
    nb: usize,
}

/// A parsed pipeline step.
#[derive(Debug, Clone)]
enum Step {
    ToyRegression(ToyRegressionParams),
    JsonFile(JsonFileParams),
    Shuffle(ShuffleParams),
    DivideBy(DivideByParams),
    Limit(LimitParams),
}

impl Step {
    fn from_spec(spec: &NamedParams) -> Result<Self> {
        let context = format!("pipeline step '{}'", spec.name);
        let step = match spec.name.as_str() {
            "toy_regression" => Step::ToyRegression(parse_params(&context, &spec.params)?),
            "json_file" => Step::JsonFile(parse_params(&context, &spec.params)?),
            "shuffle" => Step::Shuffle(parse_params(&context, &spec.params)?),
            "divide_by" => Step::DivideBy(parse_params(&context, &spec.params)?),
            "limit" => Step::Limit(parse_params(&context, &spec.params)?),
            other => return Err(Error::unknown("pipeline step", other)),
        };
        Ok(step)
    }

    fn apply(&self, samples: &mut Vec<Sample>) -> Result<()> {
        match self {
            Step::ToyRegression(p) => samples.extend(toy_regression(p)?),
            Step::JsonFile(p) => samples.extend(json_file(p)?),
            Step::Shuffle(p) => {
                let mut rng = StdRng::seed_from_u64(p.random_state);
                samples.shuffle(&mut rng);
            }
            Step::DivideBy(p) => {
                if p.value == 0.0 {
                    return Err(Error::Config("divide_by: value must be non-zero".into()));
                }
                for sample in samples.iter_mut() {
                    let arr = sample
                        .get_mut(&p.col)
                        .ok_or_else(|| DataError::MissingColumn(p.col.clone()))?;
                    arr.mapv_inplace(|v| v / p.value);
                }
            }
            Step::Limit(p) => samples.truncate(p.nb),
        }
        Ok(())
    }
}

/// Parses every step without loading any data, so that unknown names and
/// malformed parameters are reported before training starts.
pub fn check_pipeline(steps: &[NamedParams]) -> Result<()> {
    for spec in steps {
        Step::from_spec(spec)?;
    }
    Ok(())
}

/// Runs the pipeline and returns the resulting samples.
pub fn pipeline_load(steps: &[NamedParams]) -> Result<Vec<Sample>> {
    let steps = steps
        .iter()
        .map(Step::from_spec)
        .collect::<Result<Vec<_>>>()?;

    let mut samples = Vec::new();
    for step in &steps {
        step.apply(&mut samples)?;
    }
    Ok(samples)
}

/// Number of samples produced by the pipeline (0 for an empty pipeline).
pub fn get_nb_samples(steps: &[NamedParams]) -> Result<usize> {
    Ok(pipeline_load(steps)?.len())
}

/// `y = X·W + b (+ noise)` with `X ~ U(-1, 1)` and `W, b` drawn from the same seeded generator.
fn toy_regression(p: &ToyRegressionParams) -> Result<Vec<Sample>> {
    let mut rng = StdRng::seed_from_u64(p.random_state);
    let unit = Uniform::new(-1.0f32, 1.0);

    let w = Array2::random_using((p.nb_features, p.nb_outputs), unit, &mut rng);
    let b = Array1::random_using(p.nb_outputs, unit, &mut rng);
    let x = Array2::random_using((p.nb, p.nb_features), unit, &mut rng);
    let mut y = x.dot(&w) + &b;

    if p.noise > 0.0 {
        let normal = Normal::new(0.0f32, p.noise)
            .map_err(|e| Error::Config(format!("toy_regression: {e}")))?;
        y += &Array2::random_using((p.nb, p.nb_outputs), normal, &mut rng);
    }

    let samples = x
        .axis_iter(Axis(0))
        .zip(y.axis_iter(Axis(0)))
        .map(|(xi, yi)| {
            let mut sample = Sample::new();
            sample.insert("X".to_string(), xi.to_owned().into_dyn());
            sample.insert("y".to_string(), yi.to_owned().into_dyn());
            sample
        })
        .collect();
    Ok(samples)
}

fn json_file(p: &JsonFileParams) -> Result<Vec<Sample>> {
    let invalid = |reason: String| DataError::InvalidFile {
        path: p.path.clone(),
        reason,
    };

    let contents = fs::read_to_string(&p.path)?;
    let value: serde_json::Value = serde_json::from_str(&contents)?;
    let rows = value
        .as_array()
        .ok_or_else(|| invalid("expected a JSON array of objects".into()))?;

    let mut samples = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let object = row
            .as_object()
            .ok_or_else(|| invalid(format!("row {i} is not an object")))?;
        let mut sample = Sample::new();
        for (col, cell) in object {
            let arr = json_to_array(cell)
                .ok_or_else(|| invalid(format!("row {i}, column '{col}': not a numeric array")))?;
            sample.insert(col.clone(), arr);
        }
        samples.push(sample);
    }
    Ok(samples)
}

/// Converts a number or a (rectangular) nested array of numbers.
fn json_to_array(value: &serde_json::Value) -> Option<ArrayD<f32>> {
    let mut shape = Vec::new();
    let mut cursor = value;
    while let serde_json::Value::Array(items) = cursor {
        shape.push(items.len());
        match items.first() {
            Some(first) => cursor = first,
            None => break,
        }
    }

    let mut flat = Vec::new();
    flatten_json(value, &mut flat)?;
    ArrayD::from_shape_vec(IxDyn(&shape), flat).ok()
}

fn flatten_json(value: &serde_json::Value, out: &mut Vec<f32>) -> Option<()> {
    match value {
        serde_json::Value::Number(n) => out.push(n.as_f64()? as f32),
        serde_json::Value::Array(items) => {
            for item in items {
                flatten_json(item, out)?;
            }
        }
        _ => return None,
    }
    Some(())
}
