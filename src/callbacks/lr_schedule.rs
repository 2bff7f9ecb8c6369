//! Learning-rate schedules.
//!
//! Policies (`optim.lr_schedule`):
//! - `constant`: no callback
//! - `decrease_when_stop_improving`: `loss`, `patience`, `shrink_factor`,
//!   `min_lr` (default 0), `mode` (default `auto`)
//! - `step`: `step_size`, `gamma`; `lr(epoch) = lr0 * gamma^(epoch / step_size)`

use super::{Callback, CallbackAction, CallbackContext};
use crate::config::{parse_params, NamedParams};
use crate::error::{Error, Result};
use crate::metrics::{Mode, Monitor};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PlateauParams {
    loss: String,
    patience: usize,
    shrink_factor: f32,
    #[serde(default)]
    min_lr: f32,
    #[serde(default)]
    mode: Mode,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StepParams {
    step_size: usize,
    gamma: f32,
}

/// Multiplies the learning rate by `shrink_factor` (never going below
/// `min_lr`) when the monitored metric has not improved for `patience` epochs.
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    monitor: Monitor,
    shrink_factor: f32,
    min_lr: f32,
}

impl ReduceLrOnPlateau {
    pub fn new(metric: &str, patience: usize, shrink_factor: f32, min_lr: f32, mode: Mode) -> Result<Self> {
        if !(shrink_factor > 0.0 && shrink_factor < 1.0) {
            return Err(Error::Config(format!(
                "decrease_when_stop_improving: shrink_factor must be in (0, 1), got {shrink_factor}"
            )));
        }
        Ok(Self {
            monitor: Monitor::new(metric, mode, patience),
            shrink_factor,
            min_lr,
        })
    }
}

impl Callback for ReduceLrOnPlateau {
    fn name(&self) -> &str {
        "decrease_when_stop_improving"
    }

    fn monitor(&self) -> Option<&str> {
        Some(self.monitor.metric_name())
    }

    fn on_epoch_end(&mut self, ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        let metric = self.monitor.metric_name();
        let Some(&value) = ctx.logs.get(metric) else {
            tracing::warn!(metric, "lr schedule: monitored metric is missing from the logs");
            return Ok(CallbackAction::Continue);
        };

        if self.monitor.update(value, ctx.epoch) || !self.monitor.is_exhausted() {
            return Ok(CallbackAction::Continue);
        }
        self.monitor.reset_counter();

        let lr = ctx.model.learning_rate().ok_or(Error::NotCompiled)?;
        let new_lr = (lr * self.shrink_factor).max(self.min_lr);
        if new_lr < lr {
            ctx.model.set_learning_rate(new_lr)?;
            tracing::debug!(epoch = ctx.epoch, old_lr = lr, new_lr, "decreasing learning rate");
        }
        Ok(CallbackAction::Continue)
    }
}

/// Multiplies the initial learning rate by `gamma` every `step_size` epochs.
#[derive(Debug, Clone)]
pub struct StepDecay {
    step_size: usize,
    gamma: f32,
    initial_lr: Option<f32>,
}

impl StepDecay {
    pub fn new(step_size: usize, gamma: f32) -> Result<Self> {
        if step_size == 0 {
            return Err(Error::Config("step: step_size must be positive".into()));
        }
        Ok(Self {
            step_size,
            gamma,
            initial_lr: None,
        })
    }

    pub fn lr(&self, initial_lr: f32, epoch: usize) -> f32 {
        let exponent = (epoch / self.step_size) as i32;
        initial_lr * self.gamma.powi(exponent)
    }
}

impl Callback for StepDecay {
    fn name(&self) -> &str {
        "step"
    }

    fn on_train_begin(&mut self, ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        self.initial_lr = Some(ctx.model.learning_rate().ok_or(Error::NotCompiled)?);
        Ok(CallbackAction::Continue)
    }

    fn on_epoch_begin(&mut self, ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        let initial_lr = match self.initial_lr {
            Some(lr) => lr,
            None => {
                let lr = ctx.model.learning_rate().ok_or(Error::NotCompiled)?;
                *self.initial_lr.insert(lr)
            }
        };
        let lr = self.lr(initial_lr, ctx.epoch);
        if ctx.model.learning_rate() != Some(lr) {
            ctx.model.set_learning_rate(lr)?;
            tracing::debug!(epoch = ctx.epoch, lr, "step learning rate");
        }
        Ok(CallbackAction::Continue)
    }
}

/// Builds the configured schedule; `constant` gives no callback.
pub fn build_lr_schedule_callback(spec: &NamedParams) -> Result<Option<Box<dyn Callback>>> {
    let context = format!("lr schedule '{}'", spec.name);
    match spec.name.as_str() {
        "constant" => Ok(None),
        "decrease_when_stop_improving" => {
            let p: PlateauParams = parse_params(&context, &spec.params)?;
            Ok(Some(Box::new(ReduceLrOnPlateau::new(
                &p.loss,
                p.patience,
                p.shrink_factor,
                p.min_lr,
                p.mode,
            )?)))
        }
        "step" => {
            let p: StepParams = parse_params(&context, &spec.params)?;
            Ok(Some(Box::new(StepDecay::new(p.step_size, p.gamma)?)))
        }
        other => Err(Error::unknown("lr schedule", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::metrics::{History, Logs};
    use crate::model::Model;
    use serde_json::json;

    #[test]
    fn test_plateau_shrinks_and_respects_min_lr() {
        let mut cb = ReduceLrOnPlateau::new("loss", 1, 0.5, 0.03, Mode::Auto).unwrap();
        let mut model = compiled_model(0.1);
        let history = History::new();

        let mut lrs = Vec::new();
        for (epoch, loss) in [1.0, 1.0, 1.0, 1.0].into_iter().enumerate() {
            let mut logs: Logs = logs(&[("loss", loss)]);
            let mut ctx = CallbackContext {
                model: &mut model,
                logs: &mut logs,
                history: &history,
                epoch,
            };
            cb.on_epoch_end(&mut ctx).unwrap();
            lrs.push(model.learning_rate().unwrap());
        }
        assert!((lrs[0] - 0.1).abs() < 1e-7);
        assert!((lrs[1] - 0.05).abs() < 1e-7);
        assert!((lrs[2] - 0.03).abs() < 1e-7);
        assert!((lrs[3] - 0.03).abs() < 1e-7);
    }

    #[test]
    fn test_step_decay() {
        let mut cb = StepDecay::new(2, 0.1).unwrap();
        let mut model = compiled_model(1.0);
        let mut logs = Logs::new();
        let history = History::new();

        let mut lrs = Vec::new();
        for epoch in 0..5 {
            let mut ctx = CallbackContext {
                model: &mut model,
                logs: &mut logs,
                history: &history,
                epoch,
            };
            if epoch == 0 {
                cb.on_train_begin(&mut ctx).unwrap();
            }
            cb.on_epoch_begin(&mut ctx).unwrap();
            lrs.push(model.learning_rate().unwrap());
        }
        let expected = [1.0, 1.0, 0.1, 0.1, 0.01];
        for (lr, e) in lrs.iter().zip(expected) {
            assert!((lr - e).abs() < 1e-6, "{lrs:?}");
        }
    }

    #[test]
    fn test_build() {
        assert!(build_lr_schedule_callback(&NamedParams::new("constant"))
            .unwrap()
            .is_none());

        let plateau = NamedParams::new("decrease_when_stop_improving").with_params(json!({
            "loss": "train_mean_squared_error", "patience": 2, "shrink_factor": 0.5
        }));
        assert!(build_lr_schedule_callback(&plateau).unwrap().is_some());

        let zero_step = NamedParams::new("step").with_params(json!({"step_size": 0, "gamma": 0.5}));
        assert!(matches!(
            build_lr_schedule_callback(&zero_step),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            build_lr_schedule_callback(&NamedParams::new("cosine")),
            Err(Error::UnknownName { .. })
        ));
    }
}
