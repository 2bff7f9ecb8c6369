//! Wall-clock training budget.

use super::{Callback, CallbackAction, CallbackContext, StopReason};
use crate::error::{Error, Result};
use std::time::{Duration, Instant};

/// Requests [`StopReason::TimeBudget`] at the first epoch end where the time
/// elapsed since `on_train_begin` reaches the budget.
///
/// The check only happens at epoch boundaries, so an epoch is never cut short.
#[derive(Debug, Clone)]
pub struct TimeBudget {
    budget: Duration,
    start: Option<Instant>,
}

impl TimeBudget {
    /// Budgets too large for a `Duration` (including infinity) never expire.
    pub fn new(budget_secs: f64) -> Result<Self> {
        if budget_secs.is_nan() || budget_secs < 0.0 {
            return Err(Error::Config(format!(
                "invalid time budget {budget_secs}: must be a non-negative number of seconds"
            )));
        }
        let budget = Duration::try_from_secs_f64(budget_secs).unwrap_or(Duration::MAX);
        Ok(Self::from_duration(budget))
    }

    pub fn from_duration(budget: Duration) -> Self {
        Self {
            budget,
            start: None,
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn elapsed(&self) -> Duration {
        self.start.map(|s| s.elapsed()).unwrap_or_default()
    }
}

impl Callback for TimeBudget {
    fn name(&self) -> &str {
        "time_budget"
    }

    fn on_train_begin(&mut self, _ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        self.start = Some(Instant::now());
        Ok(CallbackAction::Continue)
    }

    fn on_epoch_end(&mut self, ctx: &mut CallbackContext<'_>) -> Result<CallbackAction> {
        let elapsed = self.elapsed();
        if elapsed >= self.budget {
            tracing::info!(
                epoch = ctx.epoch,
                elapsed_secs = elapsed.as_secs_f64(),
                budget_secs = self.budget.as_secs_f64(),
                "time budget exhausted, stopping"
            );
            return Ok(CallbackAction::Stop(StopReason::TimeBudget));
        }
        Ok(CallbackAction::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::metrics::{History, Logs};

    fn run_epoch_end(budget: &mut TimeBudget) -> CallbackAction {
        let mut model = compiled_model(0.1);
        let mut logs = Logs::new();
        let history = History::new();
        let mut ctx = CallbackContext {
            model: &mut model,
            logs: &mut logs,
            history: &history,
            epoch: 0,
        };
        budget.on_train_begin(&mut ctx).unwrap();
        budget.on_epoch_end(&mut ctx).unwrap()
    }

    #[test]
    fn test_zero_budget_stops() {
        let mut budget = TimeBudget::new(0.0).unwrap();
        assert_eq!(
            run_epoch_end(&mut budget),
            CallbackAction::Stop(StopReason::TimeBudget)
        );
    }

    #[test]
    fn test_large_budget_continues() {
        let mut budget = TimeBudget::new(3600.0).unwrap();
        assert_eq!(run_epoch_end(&mut budget), CallbackAction::Continue);
        assert!(budget.elapsed() < budget.budget());
    }

    #[test]
    fn test_huge_budget_is_unlimited() {
        for secs in [1e20, f64::MAX, f64::INFINITY] {
            let mut budget = TimeBudget::new(secs).unwrap();
            assert_eq!(budget.budget(), Duration::MAX);
            assert_eq!(run_epoch_end(&mut budget), CallbackAction::Continue);
        }
    }

    #[test]
    fn test_invalid_budget() {
        assert!(TimeBudget::new(-1.0).is_err());
        assert!(TimeBudget::new(f64::NAN).is_err());
    }
}
