//! # Training Entry Points
//!
//! [`train`] runs a whole job described by [`Params`]:
//!
//! 1. validate the parameters and resolve every named component (optimizer,
//!    loss, metrics, transformers, schedules, model builder, pipeline steps);
//! 2. load the training data and fit the transformers on the input column,
//!    then write `transformers.json` and `params.json` into the output folder;
//! 3. build and compile the model;
//! 4. run the epoch loop, dispatching the callbacks at every lifecycle point,
//!    until the epoch limit is reached or a callback requests a stop.
//!
//! [`load`] restores a trained run from its output folder.

use crate::callbacks::{
    build_early_stopping_callback, build_lr_schedule_callback, Callback, CallbackAction,
    CallbackContainer, CallbackContext, ModelCheckpoint, RecordEachEpoch, StopReason, TimeBudget,
};
use crate::config::Params;
use crate::data::{
    check_pipeline, get_shapes, nb_minibatches, pipeline_load, minibatch_ranges, Batch,
    BatchIterator, DataError, Sample,
};
use crate::error::{Error, Result};
use crate::losses::get_loss;
use crate::metrics::{
    compute_metric, format_logs, get_metric, mean_score, History, Logs, MetricFn, RunningMean,
};
use crate::model::{
    check_family, check_model_shape, predict_batched, show_model_info, BuildContext, Builders,
    Model,
};
use crate::optimizers::build_optimizer;
use crate::serialization::{load_checkpoint, save_checkpoint, CheckpointMeta};
use crate::transformers::{
    fit_transformers, load_transformers, make_transformers_pipeline, save_transformers,
    transform_array, transform_sample, AnyTransformer,
};
use ndarray::{ArrayD, Axis, Slice};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Instant;

pub const PARAMS_FILE: &str = "params.json";
pub const TRANSFORMERS_FILE: &str = "transformers.json";

/// Run-time options that are not part of the serialized parameters.
pub struct TrainContext {
    inputs: String,
    outputs: String,
    callbacks: Vec<Box<dyn Callback>>,
}

impl Default for TrainContext {
    fn default() -> Self {
        Self {
            inputs: "X".to_string(),
            outputs: "y".to_string(),
            callbacks: Vec::new(),
        }
    }
}

impl TrainContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of the input column (default `X`).
    pub fn with_inputs(mut self, col: &str) -> Self {
        self.inputs = col.to_string();
        self
    }

    /// Name of the output column (default `y`).
    pub fn with_outputs(mut self, col: &str) -> Self {
        self.outputs = col.to_string();
        self
    }

    /// Adds a user callback, run after the built-in ones and before the time budget.
    pub fn with_callback(mut self, callback: Box<dyn Callback>) -> Self {
        self.callbacks.push(callback);
        self
    }
}

/// Result of a completed [`train`] call.
pub struct TrainOutcome {
    pub model: Box<dyn Model>,
    pub transformers: Vec<AnyTransformer>,
    pub history: History,
    /// Number of completed epochs.
    pub epochs: usize,
    pub stop_reason: StopReason,
}

/// Lazily clones the shared samples, one pass per call of the data source.
struct SharedSamples {
    data: Rc<Vec<Sample>>,
    pos: usize,
}

impl Iterator for SharedSamples {
    type Item = Sample;

    fn next(&mut self) -> Option<Sample> {
        let sample = self.data.get(self.pos)?.clone();
        self.pos += 1;
        Some(sample)
    }
}

/// State owned by the loop and lent to the callbacks.
struct LoopState {
    model: Box<dyn Model>,
    logs: Logs,
    history: History,
}

impl LoopState {
    fn context(&mut self, epoch: usize) -> CallbackContext<'_> {
        CallbackContext {
            model: self.model.as_mut(),
            logs: &mut self.logs,
            history: &self.history,
            epoch,
        }
    }
}

/// Trains the model described by `params`.
pub fn train(params: &Params, builders: &Builders, ctx: TrainContext) -> Result<TrainOutcome> {
    let TrainContext {
        inputs,
        outputs,
        callbacks: user_callbacks,
    } = ctx;
    let optim = &params.optim;
    let outdir = &params.report.outdir;

    // Everything named is resolved before touching the data or the disk.
    params.validate()?;
    check_family(params.family)?;
    let optimizer = build_optimizer(&optim.algo.name, &optim.algo.params)?;
    let loss = get_loss(&optim.loss)?;
    let metrics = params
        .report
        .metrics
        .iter()
        .map(|name| Ok((name.clone(), get_metric(name)?)))
        .collect::<Result<Vec<(String, MetricFn)>>>()?;
    let mut transformers = make_transformers_pipeline(&params.data.transformers)?;
    let lr_schedule = build_lr_schedule_callback(&optim.lr_schedule)?;
    let early_stopping = build_early_stopping_callback(&optim.early_stopping)?;
    let checkpoint = params
        .report
        .checkpoint
        .as_ref()
        .map(|config| ModelCheckpoint::new(outdir, config));
    let monitoring: [Option<&dyn Callback>; 3] = [
        lr_schedule.as_deref(),
        early_stopping.as_deref(),
        checkpoint.as_ref().map(|c| c as &dyn Callback),
    ];
    check_monitors(&metrics, monitoring)?;
    let time_budget = optim.budget_secs.map(TimeBudget::new).transpose()?;
    let builder = builders.get(&params.model.name)?;
    check_pipeline(&params.data.train.pipeline)?;

    tracing::info!("loading training data");
    let samples = pipeline_load(&params.data.train.pipeline)?;
    if samples.is_empty() {
        return Err(DataError::Empty.into());
    }
    let nb_samples = samples.len();
    tracing::info!(nb_samples, "training data loaded");

    if !transformers.is_empty() {
        tracing::info!(nb_transformers = transformers.len(), "fitting transformers");
        let x = Batch::stack(&samples, std::slice::from_ref(&inputs))?;
        let x = x.column(&inputs)?;
        fit_transformers(&mut transformers, || {
            minibatch_ranges(nb_samples, optim.batch_size)
                .map(move |r| x.slice_axis(Axis(0), Slice::from(r)).to_owned())
        })?;
    }

    fs::create_dir_all(outdir)?;
    save_transformers(outdir.join(TRANSFORMERS_FILE), &transformers)?;
    params.save(outdir.join(PARAMS_FILE))?;

    let samples = samples
        .iter()
        .map(|s| transform_sample(s, &transformers, &inputs))
        .collect::<Result<Vec<_>>>()?;
    let shapes = get_shapes(&samples[0]);
    let input_shape = shapes
        .get(&inputs)
        .cloned()
        .ok_or_else(|| DataError::MissingColumn(inputs.clone()))?;
    let output_shape = shapes
        .get(&outputs)
        .cloned()
        .ok_or_else(|| DataError::MissingColumn(outputs.clone()))?;

    let data = Rc::new(samples);
    let source = move || SharedSamples {
        data: Rc::clone(&data),
        pos: 0,
    };
    let train_iter = BatchIterator::new(source.clone(), [inputs.as_str(), outputs.as_str()]);

    let mut model = builder(&BuildContext {
        params: &params.model.params,
        input_shape: &input_shape,
        output_shape: &output_shape,
        seed: optim.seed,
    })?;
    check_model_shape(model.as_ref(), &output_shape)?;
    model.compile(optimizer, loss);
    show_model_info(model.as_ref());

    let mut callbacks = CallbackContainer::new();
    for (name, metric) in metrics {
        let eval_iter = BatchIterator::new(source.clone(), [inputs.as_str(), outputs.as_str()]);
        let (inputs, outputs) = (inputs.clone(), outputs.clone());
        let pred_batch_size = optim.pred_batch_size;
        callbacks.push(Box::new(RecordEachEpoch::new(
            &format!("train_{name}"),
            move |model: &dyn Model| {
                let batches = eval_iter.flow(pred_batch_size, false).map(
                    |batch| -> Result<(ArrayD<f32>, ArrayD<f32>)> {
                        let batch = batch?;
                        let y_pred = model.predict(batch.column(&inputs)?)?;
                        Ok((batch.column(&outputs)?.clone(), y_pred))
                    },
                );
                Ok(mean_score(&compute_metric(batches, metric)?))
            },
        )));
    }
    callbacks.extend(lr_schedule);
    callbacks.extend(early_stopping);
    let checkpoint_saves = checkpoint.as_ref().map(ModelCheckpoint::saved_counter);
    if let Some(checkpoint) = checkpoint {
        callbacks.push(Box::new(checkpoint));
    }
    callbacks.extend(user_callbacks);
    if let Some(budget) = time_budget {
        callbacks.push(Box::new(budget));
    }

    let nb_batches = nb_minibatches(nb_samples, optim.batch_size);
    tracing::info!(
        max_nb_epochs = optim.max_nb_epochs,
        nb_batches,
        callbacks = ?callbacks.names(),
        "start training"
    );

    let mut state = LoopState {
        model,
        logs: Logs::new(),
        history: History::new(),
    };
    let mut flow = train_iter.flow(optim.batch_size, true);
    let started = Instant::now();

    let mut stop = match callbacks.on_train_begin(&mut state.context(0))? {
        CallbackAction::Stop(reason) => Some(reason),
        CallbackAction::Continue => None,
    };
    let mut epochs = 0;
    while stop.is_none() && epochs < optim.max_nb_epochs {
        let epoch = epochs;
        state.logs.clear();

        let mut action = callbacks.on_epoch_begin(&mut state.context(epoch))?;
        let mut epoch_loss = RunningMean::new();
        for batch_index in 0..nb_batches {
            if action.is_stop() {
                break;
            }
            let batch = flow.next().ok_or(DataError::Empty)??;
            action = action.or(callbacks.on_batch_begin(&mut state.context(epoch), batch_index)?);

            let loss = state
                .model
                .fit_batch(batch.column(&inputs)?, batch.column(&outputs)?)?;
            epoch_loss.update(f64::from(loss));

            action = action.or(callbacks.on_batch_end(
                &mut state.context(epoch),
                batch_index,
                loss,
            )?);
        }
        state.logs.insert("loss".to_string(), epoch_loss.compute());

        action = action.or(callbacks.on_epoch_end(&mut state.context(epoch))?);
        state.history.record(&state.logs);
        epochs += 1;
        tracing::info!(epoch, "{}", format_logs(&state.logs));

        if let CallbackAction::Stop(reason) = action {
            stop = Some(reason);
        }
    }

    callbacks.on_train_end(&mut state.context(epochs.saturating_sub(1)))?;
    let stop_reason = stop.unwrap_or(StopReason::EpochLimit);
    tracing::info!(
        epochs,
        elapsed_secs = started.elapsed().as_secs_f64(),
        %stop_reason,
        "training finished"
    );

    // When no checkpoint was written the final weights are what `load` restores.
    if checkpoint_saves.map_or(0, |saves| saves.get()) == 0 {
        let monitor = params
            .report
            .checkpoint
            .as_ref()
            .map_or("loss", |c| c.loss.as_str());
        let value = state.history.last(monitor).unwrap_or(f64::NAN);
        let meta = CheckpointMeta::new(state.model.name(), epochs.saturating_sub(1), monitor, value)
            .with_shapes(&input_shape, &output_shape);
        save_checkpoint(outdir, state.model.parameters(), &meta)?;
        tracing::info!(outdir = %outdir.display(), "saved final weights");
    }

    Ok(TrainOutcome {
        model: state.model,
        transformers,
        history: state.history,
        epochs,
        stop_reason,
    })
}

/// Every monitored log entry must be `loss` or `train_<metric>` of a tracked metric.
fn check_monitors<'a>(
    metrics: &[(String, MetricFn)],
    callbacks: impl IntoIterator<Item = Option<&'a dyn Callback>>,
) -> Result<()> {
    let known: Vec<String> = std::iter::once("loss".to_string())
        .chain(metrics.iter().map(|(name, _)| format!("train_{name}")))
        .collect();
    for callback in callbacks.into_iter().flatten() {
        if let Some(monitor) = callback.monitor() {
            if !known.iter().any(|k| k == monitor) {
                return Err(Error::Config(format!(
                    "{} monitors '{monitor}', which is never logged (logged entries: {})",
                    callback.name(),
                    known.join(", ")
                )));
            }
        }
    }
    Ok(())
}

/// A trained run restored by [`load`].
pub struct TrainedModel {
    pub params: Params,
    pub transformers: Vec<AnyTransformer>,
    pub model: Box<dyn Model>,
    /// Epoch at which the restored weights were saved.
    pub epoch: usize,
    folder: PathBuf,
}

impl TrainedModel {
    /// Applies the fitted transformers to `x` (a batch of inputs) and predicts.
    pub fn predict(&self, x: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        let x = transform_array(x.clone(), &self.transformers)?;
        predict_batched(self.model.as_ref(), &x, self.params.optim.pred_batch_size)
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }
}

/// Restores the transformers, the parameters and the saved weights of a run.
pub fn load<P: AsRef<Path>>(folder: P, builders: &Builders) -> Result<TrainedModel> {
    let folder = folder.as_ref();
    let params = Params::from_file(folder.join(PARAMS_FILE))?;
    let transformers = load_transformers(folder.join(TRANSFORMERS_FILE))?;
    let checkpoint = load_checkpoint(folder)?;

    let builder = builders.get(&params.model.name)?;
    let mut model = builder(&BuildContext {
        params: &params.model.params,
        input_shape: &checkpoint.meta.input_shape,
        output_shape: &checkpoint.meta.output_shape,
        seed: params.optim.seed,
    })?;
    model.load_parameters(checkpoint.weights)?;
    tracing::info!(
        folder = %folder.display(),
        model = model.name(),
        epoch = checkpoint.meta.epoch,
        "loaded trained model"
    );

    Ok(TrainedModel {
        params,
        transformers,
        model,
        epoch: checkpoint.meta.epoch,
        folder: folder.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use serde_json::json;

    #[test]
    fn test_shared_samples_restart() {
        let mut sample = Sample::new();
        sample.insert("X".to_string(), array![1.0f32].into_dyn());
        let data = Rc::new(vec![sample.clone(), sample]);
        let source = move || SharedSamples {
            data: Rc::clone(&data),
            pos: 0,
        };
        assert_eq!(source().count(), 2);
        assert_eq!(source().count(), 2);
    }

    #[test]
    fn test_train_context_defaults() {
        let ctx = TrainContext::new();
        assert_eq!(ctx.inputs, "X");
        assert_eq!(ctx.outputs, "y");
        let ctx = ctx.with_inputs("images").with_outputs("labels");
        assert_eq!((ctx.inputs.as_str(), ctx.outputs.as_str()), ("images", "labels"));
    }

    #[test]
    fn test_missing_output_column() {
        let dir = tempfile::tempdir().unwrap();
        let params = Params::from_json_str(
            &json!({
                "model": {"name": "linear"},
                "data": {"train": {"pipeline": [
                    {"name": "toy_regression", "params": {"nb": 10, "nb_features": 2}}
                ]}},
                "report": {"outdir": dir.path().join("out")},
                "optim": {"algo": {"name": "sgd"}, "loss": "mse", "max_nb_epochs": 1, "batch_size": 4}
            })
            .to_string(),
        )
        .unwrap();
        let err = train(&params, &Builders::default(), TrainContext::new().with_outputs("z"))
            .err()
            .unwrap();
        assert!(matches!(err, crate::Error::Data(DataError::MissingColumn(ref c)) if c == "z"));
    }
}
