// --- Файл: src/metrics/running.rs ---

//! Отслеживание метрик по ходу обучения.
//!
//! - [`RunningMean`]: инкрементальное среднее (loss по минибатчам эпохи)
//! - [`Logs`] / [`History`]: значения метрик текущей эпохи и их история
//! - [`Monitor`]: счетчик терпения для early stopping, LR schedule и чекпоинтов

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Значения метрик одной эпохи: имя -> значение.
pub type Logs = BTreeMap<String, f64>;

/// Онлайн вычисление среднего значения.
#[derive(Debug, Clone, Default)]
pub struct RunningMean {
    mean: f64,
    count: usize,
}

impl RunningMean {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
    }

    /// Текущее среднее, `NaN` если значений не было.
    pub fn compute(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.mean
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn reset(&mut self) {
        self.mean = 0.0;
        self.count = 0;
    }
}

/// Направление улучшения отслеживаемой метрики.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// `Max` для метрик, в имени которых есть "acc", иначе `Min`.
    #[default]
    Auto,
    Min,
    Max,
}

impl Mode {
    /// Разрешает `Auto` по имени метрики.
    pub fn resolve(self, metric: &str) -> Mode {
        match self {
            Mode::Auto if metric.contains("acc") => Mode::Max,
            Mode::Auto => Mode::Min,
            other => other,
        }
    }

    /// `value` лучше `best` как минимум на `min_delta`.
    ///
    /// `Auto` сравнивается как `Min`; используйте [`Mode::resolve`] заранее.
    pub fn is_better(self, value: f64, best: f64, min_delta: f64) -> bool {
        match self {
            Mode::Max => value > best + min_delta,
            Mode::Min | Mode::Auto => value < best - min_delta,
        }
    }
}

/// История метрик по эпохам.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    values: BTreeMap<String, Vec<f64>>,
    epochs: usize,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Добавляет логи завершенной эпохи.
    pub fn record(&mut self, logs: &Logs) {
        for (name, &value) in logs {
            self.values.entry(name.clone()).or_default().push(value);
        }
        self.epochs += 1;
    }

    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.values.get(name).map(Vec::as_slice)
    }

    pub fn last(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(|h| h.last().copied())
    }

    /// Лучшее значение и его индекс в истории метрики.
    pub fn best(&self, name: &str, mode: Mode) -> Option<(f64, usize)> {
        let mode = mode.resolve(name);
        let history = self.get(name)?;
        let mut best: Option<(f64, usize)> = None;
        for (i, &value) in history.iter().enumerate() {
            if value.is_nan() {
                continue;
            }
            best = match best {
                Some((b, _)) if !mode.is_better(value, b, 0.0) => best,
                _ => Some((value, i)),
            };
        }
        best
    }

    /// Количество записанных эпох.
    pub fn epochs(&self) -> usize {
        self.epochs
    }

    pub fn is_empty(&self) -> bool {
        self.epochs == 0
    }

    pub fn metric_names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

/// Форматирует логи эпохи для вывода: `loss: 0.123456 | train_mae: 0.2`.
pub fn format_logs(logs: &Logs) -> String {
    logs.iter()
        .map(|(name, value)| format!("{}: {:.6}", name, value))
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Счетчик эпох без улучшения отслеживаемой метрики.
#[derive(Debug, Clone)]
pub struct Monitor {
    metric_name: String,
    mode: Mode,
    patience: usize,
    min_delta: f64,
    counter: usize,
    best_value: Option<f64>,
    best_epoch: usize,
}

impl Monitor {
    pub fn new(metric_name: &str, mode: Mode, patience: usize) -> Self {
        Self {
            metric_name: metric_name.to_string(),
            mode: mode.resolve(metric_name),
            patience,
            min_delta: 0.0,
            counter: 0,
            best_value: None,
            best_epoch: 0,
        }
    }

    /// Устанавливает минимальное улучшение.
    pub fn with_min_delta(mut self, min_delta: f64) -> Self {
        self.min_delta = min_delta;
        self
    }

    /// Обновляет состояние; возвращает `true` если значение стало новым лучшим.
    ///
    /// `NaN` никогда не считается улучшением.
    pub fn update(&mut self, value: f64, epoch: usize) -> bool {
        let is_better = match self.best_value {
            _ if value.is_nan() => false,
            Some(best) => self.mode.is_better(value, best, self.min_delta),
            None => true,
        };

        if is_better {
            self.best_value = Some(value);
            self.best_epoch = epoch;
            self.counter = 0;
        } else {
            self.counter += 1;
        }
        is_better
    }

    /// Терпение исчерпано.
    pub fn is_exhausted(&self) -> bool {
        self.counter >= self.patience
    }

    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn best_value(&self) -> Option<f64> {
        self.best_value
    }

    pub fn best_epoch(&self) -> usize {
        self.best_epoch
    }

    pub fn counter(&self) -> usize {
        self.counter
    }

    /// Сбрасывает только счетчик терпения (лучшее значение сохраняется).
    pub fn reset_counter(&mut self) {
        self.counter = 0;
    }
}
