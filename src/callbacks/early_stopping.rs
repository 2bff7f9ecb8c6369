//! Early stopping on a non-improving metric.
//!
//! Policies (`optim.early_stopping`):
//! - `none`: no callback
//! - `basic`: `patience_loss` (monitored log entry), `patience`,
//!   `min_delta` (default 0), `mode` (`auto`/`min`/`max`, default `auto`)

use super::{Callback, CallbackAction, CallbackContext, StopReason};
use crate::config::{parse_params, NamedParams};
use crate::error::{Error, Result};
use crate::metrics::{Mode, Monitor};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BasicParams {
    patience_loss: String,
    patience: usize,
    #[serde(default)]
    min_delta: f64,
    #[serde(default)]
    mode: Mode,
}

/// Requests [`StopReason::EarlyStopping`] once the monitored metric has not
/// improved for `patience` consecutive epochs.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    monitor: Monitor,
}

impl EarlyStopping {
    pub fn new(metric: &str, patience: usize, min_delta: f64, mode: Mode) -> Self {
        Self {
            monitor: Monitor::new(metric, mode, patience).with_min_delta(min_delta),
        }
    }

    pub fn monitor_state(&self) -> &Monitor {
        &self.monitor
    }
}

impl Callback for EarlyStopping {
    fn name(&self) -> &str {
        "early_stopping"
    }

    fn monitor(&self) -> Option<&str> {
        Some(self.monitor.metric_name())
    }

    fn on_epoch_end(&mut self, ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        let metric = self.monitor.metric_name();
        let Some(&value) = ctx.logs.get(metric) else {
            tracing::warn!(metric, "early stopping: monitored metric is missing from the logs");
            return Ok(CallbackAction::Continue);
        };

        if !self.monitor.update(value, ctx.epoch) && self.monitor.is_exhausted() {
            tracing::info!(
                epoch = ctx.epoch,
                metric = self.monitor.metric_name(),
                best = ?self.monitor.best_value(),
                best_epoch = self.monitor.best_epoch(),
                "early stopping"
            );
            return Ok(CallbackAction::Stop(StopReason::EarlyStopping));
        }
        Ok(CallbackAction::Continue)
    }
}

/// Builds the configured early-stopping policy; `none` gives no callback.
pub fn build_early_stopping_callback(spec: &NamedParams) -> Result<Option<Box<dyn Callback>>> {
    let context = format!("early stopping '{}'", spec.name);
    match spec.name.as_str() {
        "none" => Ok(None),
        "basic" => {
            let p: BasicParams = parse_params(&context, &spec.params)?;
            Ok(Some(Box::new(EarlyStopping::new(
                &p.patience_loss,
                p.patience,
                p.min_delta,
                p.mode,
            ))))
        }
        other => Err(Error::unknown("early stopping policy", other)),
    }
}
