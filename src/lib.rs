//! # machinedesign: Training-Loop Orchestration in Rust
//!
//! **machinedesign** turns a declarative JSON parameter document into a
//! complete training run: data pipeline, fitted input transformers, model
//! construction, optimizer and loss, and an epoch loop driven by callbacks
//! (metric recording, learning-rate schedules, early stopping, checkpointing
//! and a wall-clock budget).
//!
//! ## Usage Example
//!
//! ```no_run
//! use machinedesign::config::Params;
//! use machinedesign::interface::{train, TrainContext};
//! use machinedesign::model::Builders;
//!
//! let params = Params::from_file("configs/linear.json")?;
//! let outcome = train(&params, &Builders::default(), TrainContext::new())?;
//! println!("{} epochs, stopped by {}", outcome.epochs, outcome.stop_reason);
//! # Ok::<(), machinedesign::Error>(())
//! ```

pub mod callbacks;
pub mod config;
pub mod data;
pub mod error;
pub mod interface;
pub mod losses;
pub mod metrics;
pub mod model;
pub mod optimizers;
pub mod serialization;
pub mod transformers;

pub use error::{Error, Result};
pub use interface::{load, train, TrainContext, TrainOutcome, TrainedModel};
