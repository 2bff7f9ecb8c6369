//! Модуль, содержащий реализации оптимизаторов для обновления весов модели.
//!
//! Оптимизаторы получают текущие веса и вычисленные градиенты (по имени
//! параметра) и применяют алгоритм обновления. Скорость обучения можно
//! менять между шагами (LR schedule).

use crate::config::parse_params;
use crate::error::{Error, Result};
use ndarray::ArrayD;
use serde::Deserialize;
use std::collections::HashMap;

/// Параметры модели: имя (например, "W", "b") -> значение.
pub type Parameters = HashMap<String, ArrayD<f32>>;

/// Трейт, определяющий общий интерфейс для всех оптимизаторов.
pub trait Optimizer {
    /// Выполняет один шаг оптимизации, обновляя веса.
    ///
    /// # Аргументы
    ///
    /// * `parameters` - текущие значения весов модели.
    /// * `gradients` - градиенты для этих весов; параметры без градиента не меняются.
    fn step(&mut self, parameters: &mut Parameters, gradients: &Parameters);

    fn learning_rate(&self) -> f32;

    fn set_learning_rate(&mut self, lr: f32);

    fn name(&self) -> &'static str;
}

/// Stochastic Gradient Descent с опциональным momentum.
///
/// `v = momentum * v - lr * grad; param += v`
pub struct Sgd {
    lr: f32,
    momentum: f32,
    velocity: Parameters,
}

impl Sgd {
    pub fn new(lr: f32) -> Self {
        Self::with_momentum(lr, 0.0)
    }

    pub fn with_momentum(lr: f32, momentum: f32) -> Self {
        Self {
            lr,
            momentum,
            velocity: Parameters::new(),
        }
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, parameters: &mut Parameters, gradients: &Parameters) {
        for (param_name, grad) in gradients {
            let Some(param) = parameters.get_mut(param_name) else {
                continue;
            };
            if self.momentum == 0.0 {
                // param = param - lr * grad
                ndarray::azip!((p in param, &g in grad) *p -= self.lr * g);
                continue;
            }
            let v = self
                .velocity
                .entry(param_name.clone())
                .or_insert_with(|| ArrayD::zeros(grad.raw_dim()));
            let (lr, momentum) = (self.lr, self.momentum);
            ndarray::azip!((p in param, v in v, &g in grad) {
                *v = momentum * *v - lr * g;
                *p += *v;
            });
        }
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn name(&self) -> &'static str {
        "sgd"
    }
}

/// Adam (Kingma & Ba) с коррекцией смещения моментов.
pub struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    t: i32,
    m: Parameters,
    v: Parameters,
}

impl Adam {
    pub fn new(lr: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            lr,
            beta1,
            beta2,
            epsilon,
            t: 0,
            m: Parameters::new(),
            v: Parameters::new(),
        }
    }
}

impl Optimizer for Adam {
    fn step(&mut self, parameters: &mut Parameters, gradients: &Parameters) {
        self.t += 1;
        let (b1, b2, eps) = (self.beta1, self.beta2, self.epsilon);
        let bias1 = 1.0 - b1.powi(self.t);
        let bias2 = 1.0 - b2.powi(self.t);
        let lr_t = self.lr * bias2.sqrt() / bias1;

        for (param_name, grad) in gradients {
            let Some(param) = parameters.get_mut(param_name) else {
                continue;
            };
            let m = self
                .m
                .entry(param_name.clone())
                .or_insert_with(|| ArrayD::zeros(grad.raw_dim()));
            let v = self
                .v
                .entry(param_name.clone())
                .or_insert_with(|| ArrayD::zeros(grad.raw_dim()));
            ndarray::azip!((p in param, m in m, v in v, &g in grad) {
                *m = b1 * *m + (1.0 - b1) * g;
                *v = b2 * *v + (1.0 - b2) * g * g;
                *p -= lr_t * *m / (v.sqrt() + eps);
            });
        }
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn name(&self) -> &'static str {
        "adam"
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SgdParams {
    #[serde(default = "default_sgd_lr")]
    lr: f32,
    #[serde(default)]
    momentum: f32,
}

fn default_sgd_lr() -> f32 {
    0.01
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AdamParams {
    #[serde(default = "default_adam_lr")]
    lr: f32,
    #[serde(default = "default_beta1")]
    beta1: f32,
    #[serde(default = "default_beta2")]
    beta2: f32,
    #[serde(default = "default_epsilon")]
    epsilon: f32,
}

fn default_adam_lr() -> f32 {
    0.001
}

fn default_beta1() -> f32 {
    0.9
}

fn default_beta2() -> f32 {
    0.999
}

fn default_epsilon() -> f32 {
    1e-8
}

/// Создает оптимизатор по имени (без учета регистра) и его параметрам.
pub fn build_optimizer(name: &str, params: &serde_json::Value) -> Result<Box<dyn Optimizer>> {
    let context = format!("optimizer '{name}'");
    match name.to_lowercase().as_str() {
        "sgd" => {
            let p: SgdParams = parse_params(&context, params)?;
            Ok(Box::new(Sgd::with_momentum(p.lr, p.momentum)))
        }
        "adam" => {
            let p: AdamParams = parse_params(&context, params)?;
            Ok(Box::new(Adam::new(p.lr, p.beta1, p.beta2, p.epsilon)))
        }
        _ => Err(Error::unknown("optimizer", name)),
    }
}
