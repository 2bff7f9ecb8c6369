//! # Data Module
//!
//! Minibatch iteration over column-oriented samples.
//!
//! ## Key Components
//!
//! - [`Sample`]: one example, a map from column name (`"X"`, `"y"`, ...) to an array
//! - [`Batch`]: samples stacked along a new leading axis
//! - [`minibatch_ranges`]: index ranges partitioning `n` items into batches
//! - [`BatchIterator`]: batches over a re-invocable data source, optionally cycling
//! - [`pipeline_load`]: builds the list of samples from named pipeline steps
//!
//! ## Example
//!
//! ```ignore
//! use machinedesign::data::BatchIterator;
//!
//! let it = BatchIterator::new(move || samples.clone(), ["X", "y"]);
//! for batch in it.flow(32, false) {
//!     let batch = batch?;
//!     println!("{} examples", batch.len());
//! }
//! ```

pub mod batch_iterator;
pub mod minibatch;
pub mod pipeline;
pub mod sample;

pub use batch_iterator::{BatchIterator, Flow};
pub use minibatch::{minibatch_ranges, nb_minibatches, MinibatchRanges};
pub use pipeline::{check_pipeline, get_nb_samples, pipeline_load};
pub use sample::{get_shapes, Batch, Sample, Shapes};

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building or slicing batches.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("column '{0}' is missing from the sample")]
    MissingColumn(String),

    #[error("column '{column}' has inconsistent shapes: {expected:?} vs {got:?}")]
    InconsistentShape {
        column: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("column '{column}' has {got} examples, expected {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        got: usize,
    },

    #[error("the dataset is empty")]
    Empty,

    #[error("invalid data file {}: {reason}", path.display())]
    InvalidFile { path: PathBuf, reason: String },
}
