// --- File: src/data/batch_iterator.rs ---

//! Batches over a re-invocable data source.

use super::sample::{Batch, Sample};
use super::DataError;

/// Wraps a zero-argument source producing a fresh iterable of samples on
/// every call, and the columns to extract from them.
///
/// # Example
///
/// ```rust,ignore
/// let it = BatchIterator::new(move || data.clone(), ["X", "y"]);
/// let batches: Vec<_> = it.flow(10, false).collect::<Result<_, _>>()?;
/// ```
#[derive(Debug, Clone)]
pub struct BatchIterator<F> {
    source: F,
    cols: Vec<String>,
}

impl<F, I> BatchIterator<F>
where
    F: Fn() -> I,
    I: IntoIterator<Item = Sample>,
{
    pub fn new<S: Into<String>>(source: F, cols: impl IntoIterator<Item = S>) -> Self {
        Self {
            source,
            cols: cols.into_iter().map(Into::into).collect(),
        }
    }

    pub fn cols(&self) -> &[String] {
        &self.cols
    }

    /// Yields batches of at most `batch_size` examples.
    ///
    /// With `repeat == false` the flow ends after one pass over the source.
    /// With `repeat == true` the source is invoked again each time it is
    /// exhausted, so the flow never ends unless the source is empty. The
    /// last, possibly partial, batch of a pass is always yielded before the
    /// next pass starts.
    pub fn flow(&self, batch_size: usize, repeat: bool) -> Flow<F, I>
    where
        F: Clone,
    {
        Flow {
            source: self.source.clone(),
            cols: self.cols.clone(),
            batch_size,
            repeat,
            current: None,
            yielded_in_pass: false,
            done: false,
        }
    }
}

/// Iterator returned by [`BatchIterator::flow`].
pub struct Flow<F, I: IntoIterator> {
    source: F,
    cols: Vec<String>,
    batch_size: usize,
    repeat: bool,
    current: Option<I::IntoIter>,
    yielded_in_pass: bool,
    done: bool,
}

impl<F, I> Flow<F, I>
where
    I: IntoIterator,
{
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn is_repeating(&self) -> bool {
        self.repeat
    }
}

impl<F, I> Iterator for Flow<F, I>
where
    F: Fn() -> I,
    I: IntoIterator<Item = Sample>,
{
    type Item = Result<Batch, DataError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.batch_size == 0 {
            return None;
        }

        loop {
            let source = &self.source;
            let samples = self.current.get_or_insert_with(|| source().into_iter());
            let chunk: Vec<Sample> = samples.by_ref().take(self.batch_size).collect();

            if chunk.is_empty() {
                self.current = None;
                // An empty pass would cycle forever.
                if !self.repeat || !self.yielded_in_pass {
                    self.done = true;
                    return None;
                }
                self.yielded_in_pass = false;
                continue;
            }

            self.yielded_in_pass = true;
            if chunk.len() < self.batch_size {
                self.current = None;
                if !self.repeat {
                    self.done = true;
                }
                self.yielded_in_pass = false;
            }
            return Some(Batch::stack(&chunk, &self.cols));
        }
    }
}
