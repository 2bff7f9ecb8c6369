//! Per-epoch metric recording.

use super::{Callback, CallbackAction, CallbackContext};
use crate::error::Result;
use crate::model::Model;

type ComputeFn = Box<dyn FnMut(&dyn Model) -> Result<f64>>;

/// Writes `logs[name] = compute(model)` at every epoch end.
pub struct RecordEachEpoch {
    name: String,
    compute: ComputeFn,
}

impl RecordEachEpoch {
    pub fn new<F>(name: &str, compute: F) -> Self
    where
        F: FnMut(&dyn Model) -> Result<f64> + 'static,
    {
        Self {
            name: name.to_string(),
            compute: Box::new(compute),
        }
    }
}

impl Callback for RecordEachEpoch {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_epoch_end(&mut self, ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        let value = (self.compute)(&*ctx.model)?;
        tracing::info!(epoch = ctx.epoch, metric = %self.name, value, "recorded metric");
        ctx.logs.insert(self.name.clone(), value);
        Ok(CallbackAction::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::error::Error;
    use crate::metrics::{History, Logs};

    #[test]
    fn test_records_into_logs() {
        let mut calls = 0;
        let mut record = RecordEachEpoch::new("train_nb_params", move |model| {
            calls += 1;
            Ok(model.count_params() as f64 + f64::from(calls))
        });

        let mut model = compiled_model(0.1);
        let mut logs = Logs::new();
        let history = History::new();
        let mut ctx = CallbackContext {
            model: &mut model,
            logs: &mut logs,
            history: &history,
            epoch: 0,
        };
        record.on_epoch_end(&mut ctx).unwrap();
        record.on_epoch_end(&mut ctx).unwrap();
        // W is 2x1, b is 1.
        assert_eq!(logs["train_nb_params"], 3.0 + 2.0);
    }

    #[test]
    fn test_error_propagates() {
        let mut record = RecordEachEpoch::new("broken", |_| Err(Error::NotCompiled));
        let mut model = compiled_model(0.1);
        let mut logs = Logs::new();
        let history = History::new();
        let mut ctx = CallbackContext {
            model: &mut model,
            logs: &mut logs,
            history: &history,
            epoch: 0,
        };
        assert!(record.on_epoch_end(&mut ctx).is_err());
        assert!(logs.is_empty());
    }
}
