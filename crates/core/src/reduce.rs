//! Collective sums over the ranks that share one field.

use std::error::Error;

use thiserror::Error;

/// A collective sum that could not complete, wrapping the transport failure.
#[derive(Debug, Error)]
#[error("collective sum failed: {0}")]
pub struct ReduceError(#[source] Box<dyn Error + Send + Sync + 'static>);

impl ReduceError {
    pub fn new(cause: impl Into<Box<dyn Error + Send + Sync + 'static>>) -> Self {
        Self(cause.into())
    }

    /// The underlying failure, if it is an `E`.
    pub fn cause<E: Error + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref()
    }
}

/// All-reduce by summation; every participant ends with the same totals.
pub trait Reducer {
    fn sum_in_place(&self, values: &mut [f64]) -> Result<(), ReduceError>;
}

/// A field held entirely by one process.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalReducer;

impl Reducer for LocalReducer {
    fn sum_in_place(&self, _values: &mut [f64]) -> Result<(), ReduceError> {
        Ok(())
    }
}

impl<R: Reducer + ?Sized> Reducer for &R {
    fn sum_in_place(&self, values: &mut [f64]) -> Result<(), ReduceError> {
        (**self).sum_in_place(values)
    }
}
