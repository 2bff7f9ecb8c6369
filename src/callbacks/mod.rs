//! # Callbacks Module
//!
//! Units invoked by the training loop at lifecycle points. Every hook gets a
//! [`CallbackContext`] (the model, the logs of the current epoch and the
//! history so far) and returns a [`CallbackAction`]; a
//! `Stop(reason)` ends training after the current event.
//!
//! ## Key Components
//!
//! - [`Callback`]: one method per event, all defaulting to `Continue`
//! - [`CallbackContainer`]: dispatches an event to every callback in order
//! - [`RecordEachEpoch`]: writes a computed value into the epoch logs
//! - [`TimeBudget`]: stops once the wall-clock budget is spent
//! - [`EarlyStopping`], [`ReduceLrOnPlateau`], [`StepDecay`], [`ModelCheckpoint`]

pub mod budget;
pub mod checkpoint;
pub mod early_stopping;
pub mod lr_schedule;
pub mod record;

pub use budget::TimeBudget;
pub use checkpoint::ModelCheckpoint;
pub use early_stopping::{build_early_stopping_callback, EarlyStopping};
pub use lr_schedule::{build_lr_schedule_callback, ReduceLrOnPlateau, StepDecay};
pub use record::RecordEachEpoch;

use crate::error::Result;
use crate::metrics::{History, Logs};
use crate::model::Model;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why training ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EpochLimit,
    EarlyStopping,
    TimeBudget,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::EpochLimit => write!(f, "epoch limit reached"),
            StopReason::EarlyStopping => write!(f, "early stopping"),
            StopReason::TimeBudget => write!(f, "time budget exhausted"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallbackAction {
    #[default]
    Continue,
    Stop(StopReason),
}

impl CallbackAction {
    pub fn is_stop(&self) -> bool {
        matches!(self, CallbackAction::Stop(_))
    }

    /// Keeps the first stop request.
    pub fn or(self, other: CallbackAction) -> CallbackAction {
        match self {
            CallbackAction::Stop(_) => self,
            CallbackAction::Continue => other,
        }
    }
}

/// What a hook can see and change.
pub struct CallbackContext<'a> {
    pub model: &'a mut dyn Model,
    /// Logs of the current epoch; empty before `on_epoch_end`.
    pub logs: &'a mut Logs,
    pub history: &'a History,
    /// Zero-based index of the current (or last) epoch.
    pub epoch: usize,
}

pub trait Callback {
    fn name(&self) -> &str;

    /// Log entry this callback reads at epoch end, if any.
    fn monitor(&self) -> Option<&str> {
        None
    }

    fn on_train_begin(&mut self, _ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        Ok(CallbackAction::Continue)
    }

    fn on_train_end(&mut self, _ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        Ok(CallbackAction::Continue)
    }

    fn on_epoch_begin(&mut self, _ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        Ok(CallbackAction::Continue)
    }

    fn on_epoch_end(&mut self, _ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        Ok(CallbackAction::Continue)
    }

    fn on_batch_begin(
        &mut self,
        _ctx: &mut CallbackContext<'_>,
        _batch: usize,
    ) -> Result<CallbackAction> {
        Ok(CallbackAction::Continue)
    }

    fn on_batch_end(
        &mut self,
        _ctx: &mut CallbackContext<'_>,
        _batch: usize,
        _loss: f32,
    ) -> Result<CallbackAction> {
        Ok(CallbackAction::Continue)
    }
}

/// Ordered list of callbacks.
///
/// Every callback sees every event; when several request a stop, the first
/// one in order wins. An error aborts the dispatch immediately.
#[derive(Default)]
pub struct CallbackContainer {
    callbacks: Vec<Box<dyn Callback>>,
}

impl CallbackContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, callback: Box<dyn Callback>) {
        self.callbacks.push(callback);
    }

    pub fn extend(&mut self, callbacks: impl IntoIterator<Item = Box<dyn Callback>>) {
        self.callbacks.extend(callbacks);
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.callbacks.iter().map(|c| c.name()).collect()
    }

    fn dispatch<F>(&mut self, mut f: F) -> Result<CallbackAction>
    where
        F: FnMut(&mut dyn Callback) -> Result<CallbackAction>,
    {
        let mut action = CallbackAction::Continue;
        for callback in &mut self.callbacks {
            action = action.or(f(callback.as_mut())?);
        }
        Ok(action)
    }

    pub fn on_train_begin(&mut self, ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        self.dispatch(|c| c.on_train_begin(ctx))
    }

    pub fn on_train_end(&mut self, ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        self.dispatch(|c| c.on_train_end(ctx))
    }

    pub fn on_epoch_begin(&mut self, ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        self.dispatch(|c| c.on_epoch_begin(ctx))
    }

    pub fn on_epoch_end(&mut self, ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        self.dispatch(|c| c.on_epoch_end(ctx))
    }

    pub fn on_batch_begin(
        &mut self,
        ctx: &mut CallbackContext<'_>,
        batch: usize,
    ) -> Result<CallbackAction> {
        self.dispatch(|c| c.on_batch_begin(ctx, batch))
    }

    pub fn on_batch_end(
        &mut self,
        ctx: &mut CallbackContext<'_>,
        batch: usize,
        loss: f32,
    ) -> Result<CallbackAction> {
        self.dispatch(|c| c.on_batch_end(ctx, batch, loss))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Helpers shared by the callback tests.

    use super::*;
    use crate::losses::Loss;
    use crate::model::Linear;
    use crate::optimizers::Sgd;

    pub fn compiled_model(lr: f32) -> Linear {
        let mut model = Linear::new(&[2], &[1], 0.1, 0);
        model.compile(Box::new(Sgd::new(lr)), Loss::MeanSquaredError);
        model
    }

    pub fn logs(entries: &[(&str, f64)]) -> Logs {
        entries
            .iter()
            .map(|(name, value)| (name.to_string(), *value))
            .collect()
    }
}
