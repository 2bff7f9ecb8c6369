//! Model checkpointing.

use super::{Callback, CallbackAction, CallbackContext};
use crate::config::CheckpointConfig;
use crate::error::Result;
use crate::metrics::Monitor;
use crate::serialization::{save_checkpoint, CheckpointMeta};
use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Saves `model.safetensors` and `checkpoint.json` into `outdir`.
///
/// Every `period` epochs the monitored log entry is read; with
/// `save_best_only` the model is written only when that value improves on
/// the best one seen so far, otherwise it is written unconditionally.
#[derive(Debug, Clone)]
pub struct ModelCheckpoint {
    outdir: PathBuf,
    monitor: Monitor,
    save_best_only: bool,
    period: usize,
    nb_saved: Rc<Cell<usize>>,
}

impl ModelCheckpoint {
    pub fn new<P: AsRef<Path>>(outdir: P, config: &CheckpointConfig) -> Self {
        Self {
            outdir: outdir.as_ref().to_path_buf(),
            monitor: Monitor::new(&config.loss, config.mode, 0),
            save_best_only: config.save_best_only,
            period: config.period.max(1),
            nb_saved: Rc::new(Cell::new(0)),
        }
    }

    /// Number of times the model was written.
    pub fn nb_saved(&self) -> usize {
        self.nb_saved.get()
    }

    /// Handle on the save count that stays readable after the callback is boxed.
    pub fn saved_counter(&self) -> Rc<Cell<usize>> {
        Rc::clone(&self.nb_saved)
    }

    pub fn best_value(&self) -> Option<f64> {
        self.monitor.best_value()
    }
}

impl Callback for ModelCheckpoint {
    fn name(&self) -> &str {
        "model_checkpoint"
    }

    fn monitor(&self) -> Option<&str> {
        Some(self.monitor.metric_name())
    }

    fn on_epoch_end(&mut self, ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        if (ctx.epoch + 1) % self.period != 0 {
            return Ok(CallbackAction::Continue);
        }

        let metric = self.monitor.metric_name();
        let Some(&value) = ctx.logs.get(metric) else {
            tracing::warn!(metric, "checkpoint: monitored metric is missing from the logs");
            return Ok(CallbackAction::Continue);
        };

        let improved = self.monitor.update(value, ctx.epoch);
        if self.save_best_only && !improved {
            return Ok(CallbackAction::Continue);
        }

        let model = &*ctx.model;
        let meta = CheckpointMeta::new(model.name(), ctx.epoch, self.monitor.metric_name(), value)
            .with_shapes(model.input_shape(), model.output_shape());
        save_checkpoint(&self.outdir, model.parameters(), &meta)?;
        self.nb_saved.set(self.nb_saved.get() + 1);

        tracing::info!(
            epoch = ctx.epoch,
            metric = self.monitor.metric_name(),
            value,
            outdir = %self.outdir.display(),
            "saved checkpoint"
        );
        Ok(CallbackAction::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::metrics::{History, Logs, Mode};
    use crate::serialization::load_checkpoint;

    fn config(save_best_only: bool, period: usize) -> CheckpointConfig {
        CheckpointConfig {
            loss: "loss".to_string(),
            save_best_only,
            period,
            mode: Mode::Auto,
        }
    }

    fn run(cb: &mut ModelCheckpoint, losses: &[f64]) {
        let mut model = compiled_model(0.1);
        let history = History::new();
        for (epoch, &loss) in losses.iter().enumerate() {
            let mut logs: Logs = logs(&[("loss", loss)]);
            let mut ctx = CallbackContext {
                model: &mut model,
                logs: &mut logs,
                history: &history,
                epoch,
            };
            cb.on_epoch_end(&mut ctx).unwrap();
        }
    }

    #[test]
    fn test_saves_only_on_improvement() {
        let dir = tempfile::tempdir().unwrap();
        let mut cb = ModelCheckpoint::new(dir.path(), &config(true, 1));
        run(&mut cb, &[1.0, 0.5, 0.7, 0.4, 0.6]);

        assert_eq!(cb.nb_saved(), 3);
        assert_eq!(cb.best_value(), Some(0.4));

        let checkpoint = load_checkpoint(dir.path()).unwrap();
        assert_eq!(checkpoint.meta.epoch, 3);
        assert_eq!(checkpoint.meta.value, Some(0.4));
        assert_eq!(checkpoint.meta.monitor, "loss");
        assert_eq!(checkpoint.meta.input_shape, vec![2]);
        assert!(checkpoint.weights.contains_key("W"));
    }

    #[test]
    fn test_period_and_save_all() {
        let dir = tempfile::tempdir().unwrap();
        let mut cb = ModelCheckpoint::new(dir.path(), &config(false, 2));
        run(&mut cb, &[1.0, 2.0, 3.0, 4.0, 5.0]);

        // Epochs 1 and 3.
        assert_eq!(cb.nb_saved(), 2);
        assert_eq!(load_checkpoint(dir.path()).unwrap().meta.epoch, 3);
    }

    #[test]
    fn test_nothing_written_without_metric() {
        let dir = tempfile::tempdir().unwrap();
        let outdir = dir.path().join("out");
        let mut cb = ModelCheckpoint::new(&outdir, &config(true, 1));
        cb.monitor = Monitor::new("val_loss", Mode::Auto, 0);
        run(&mut cb, &[1.0]);
        assert_eq!(cb.nb_saved(), 0);
        assert!(!outdir.exists());
    }

    #[test]
    fn test_saved_counter_tracks_boxed_callback() {
        let dir = tempfile::tempdir().unwrap();
        let cb = ModelCheckpoint::new(dir.path(), &config(true, 1));
        let counter = cb.saved_counter();
        assert_eq!(cb.monitor(), Some("loss"));

        let mut boxed: Box<dyn Callback> = Box::new(cb);
        let mut model = compiled_model(0.1);
        let history = History::new();
        let mut logs: Logs = logs(&[("loss", f64::NAN)]);
        let mut ctx = CallbackContext {
            model: &mut model,
            logs: &mut logs,
            history: &history,
            epoch: 0,
        };
        boxed.on_epoch_end(&mut ctx).unwrap();
        // NaN never improves, so nothing is written.
        assert_eq!(counter.get(), 0);

        ctx.logs.insert("loss".to_string(), 0.5);
        boxed.on_epoch_end(&mut ctx).unwrap();
        assert_eq!(counter.get(), 1);
    }
}
