// --- File: src/data/sample.rs ---

//! Samples and batches of column-oriented data.

use super::minibatch::minibatch_ranges;
use super::DataError;
use ndarray::{ArrayD, ArrayViewD, Axis, Slice};
use std::collections::BTreeMap;
use std::ops::{Index, Range};

/// One example: column name -> array (without the example axis).
pub type Sample = BTreeMap<String, ArrayD<f32>>;

/// Column name -> per-example shape.
pub type Shapes = BTreeMap<String, Vec<usize>>;

/// Shape of every column of a sample.
pub fn get_shapes(sample: &Sample) -> Shapes {
    sample
        .iter()
        .map(|(name, arr)| (name.clone(), arr.shape().to_vec()))
        .collect()
}

/// Columns sharing the same leading (example) axis length.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    columns: BTreeMap<String, ArrayD<f32>>,
    len: usize,
}

impl Batch {
    /// Stacks the requested columns of `samples` along a new leading axis.
    pub fn stack(samples: &[Sample], cols: &[String]) -> Result<Self, DataError> {
        if samples.is_empty() {
            return Err(DataError::Empty);
        }

        let mut columns = BTreeMap::new();
        for col in cols {
            let mut views: Vec<ArrayViewD<'_, f32>> = Vec::with_capacity(samples.len());
            for sample in samples {
                let arr = sample
                    .get(col)
                    .ok_or_else(|| DataError::MissingColumn(col.clone()))?;
                if let Some(first) = views.first() {
                    if first.shape() != arr.shape() {
                        return Err(DataError::InconsistentShape {
                            column: col.clone(),
                            expected: first.shape().to_vec(),
                            got: arr.shape().to_vec(),
                        });
                    }
                }
                views.push(arr.view());
            }

            let stacked = ndarray::stack(Axis(0), &views).map_err(|_| {
                DataError::InconsistentShape {
                    column: col.clone(),
                    expected: views[0].shape().to_vec(),
                    got: Vec::new(),
                }
            })?;
            columns.insert(col.clone(), stacked);
        }

        Ok(Self {
            columns,
            len: samples.len(),
        })
    }

    /// Builds a batch from already stacked columns.
    pub fn from_columns(columns: BTreeMap<String, ArrayD<f32>>) -> Result<Self, DataError> {
        let mut len = None;
        for (name, arr) in &columns {
            if arr.ndim() == 0 {
                return Err(DataError::InconsistentShape {
                    column: name.clone(),
                    expected: vec![0],
                    got: Vec::new(),
                });
            }
            let n = arr.shape()[0];
            match len {
                None => len = Some(n),
                Some(expected) if expected != n => {
                    return Err(DataError::LengthMismatch {
                        column: name.clone(),
                        expected,
                        got: n,
                    })
                }
                Some(_) => {}
            }
        }

        Ok(Self {
            columns,
            len: len.unwrap_or(0),
        })
    }

    /// Number of examples.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, col: &str) -> Option<&ArrayD<f32>> {
        self.columns.get(col)
    }

    pub fn column(&self, col: &str) -> Result<&ArrayD<f32>, DataError> {
        self.get(col)
            .ok_or_else(|| DataError::MissingColumn(col.to_string()))
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn into_columns(self) -> BTreeMap<String, ArrayD<f32>> {
        self.columns
    }

    /// Every column cut to the same `range` of examples.
    ///
    /// # Panics
    ///
    /// Panics if `range` is out of bounds.
    pub fn slice(&self, range: Range<usize>) -> Batch {
        let len = range.len();
        let columns = self
            .columns
            .iter()
            .map(|(name, arr)| {
                let part = arr.slice_axis(Axis(0), Slice::from(range.clone()));
                (name.clone(), part.to_owned())
            })
            .collect();
        Batch { columns, len }
    }

    /// Splits the batch into consecutive minibatches of `batch_size` examples.
    pub fn minibatches(&self, batch_size: usize) -> impl Iterator<Item = Batch> + '_ {
        minibatch_ranges(self.len, batch_size).map(move |range| self.slice(range))
    }
}

/// Column access by name; see [`Batch::column`] for the fallible form.
///
/// # Panics
///
/// Panics if the batch has no column `col`.
impl Index<&str> for Batch {
    type Output = ArrayD<f32>;

    fn index(&self, col: &str) -> &Self::Output {
        &self.columns[col]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    fn sample(x: &[f32], y: f32) -> Sample {
        let mut s = Sample::new();
        s.insert(
            "X".to_string(),
            ArrayD::from_shape_vec(IxDyn(&[x.len()]), x.to_vec()).unwrap(),
        );
        s.insert("y".to_string(), ArrayD::from_elem(IxDyn(&[]), y));
        s
    }

    #[test]
    fn test_get_shapes() {
        assert!(get_shapes(&Sample::new()).is_empty());

        let shapes = get_shapes(&sample(&[1.0, 2.0, 3.0], 0.0));
        assert_eq!(shapes["X"], vec![3]);
        assert_eq!(shapes["y"], Vec::<usize>::new());
    }

    #[test]
    fn test_stack() {
        let samples = vec![sample(&[1.0, 2.0], 0.0), sample(&[3.0, 4.0], 1.0)];
        let cols = vec!["X".to_string(), "y".to_string()];
        let batch = Batch::stack(&samples, &cols).unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch["X"].shape(), &[2, 2]);
        assert_eq!(batch["y"].shape(), &[2]);
        assert_eq!(batch["X"][[1, 0]], 3.0);
    }

    #[test]
    fn test_stack_only_requested_columns() {
        let samples = vec![sample(&[1.0], 0.0)];
        let batch = Batch::stack(&samples, &["y".to_string()]).unwrap();
        assert_eq!(batch.column_names().collect::<Vec<_>>(), vec!["y"]);
        assert!(batch.get("X").is_none());
    }

    #[test]
    fn test_stack_errors() {
        let samples = vec![sample(&[1.0, 2.0], 0.0), sample(&[3.0], 1.0)];
        let err = Batch::stack(&samples, &["X".to_string()]).unwrap_err();
        assert!(matches!(err, DataError::InconsistentShape { .. }));

        let err = Batch::stack(&samples, &["Z".to_string()]).unwrap_err();
        assert!(matches!(err, DataError::MissingColumn(ref c) if c == "Z"));

        let err = Batch::stack(&[], &["X".to_string()]).unwrap_err();
        assert!(matches!(err, DataError::Empty));
    }

    #[test]
    fn test_from_columns_length_mismatch() {
        let mut columns = BTreeMap::new();
        columns.insert("X".to_string(), ArrayD::<f32>::zeros(IxDyn(&[4, 2])));
        columns.insert("y".to_string(), ArrayD::<f32>::zeros(IxDyn(&[3])));
        let err = Batch::from_columns(columns).unwrap_err();
        assert!(matches!(err, DataError::LengthMismatch { expected: 4, got: 3, .. }));
    }

    #[test]
    fn test_minibatches() {
        let mut columns = BTreeMap::new();
        columns.insert(
            "X".to_string(),
            ArrayD::from_shape_vec(IxDyn(&[5, 1]), vec![0.0, 1.0, 2.0, 3.0, 4.0]).unwrap(),
        );
        let batch = Batch::from_columns(columns).unwrap();

        let parts: Vec<_> = batch.minibatches(2).collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 2);
        assert_eq!(parts[2].len(), 1);
        assert_eq!(parts[2]["X"][[0, 0]], 4.0);
    }

    #[test]
    #[should_panic]
    fn test_index_missing_column_panics() {
        let batch = Batch::from_columns(BTreeMap::new()).unwrap();
        let _ = &batch["X"];
    }
}
