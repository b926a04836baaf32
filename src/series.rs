//! Time grid and immutable time series shared across one pipeline run.

use std::sync::Arc;

/// Uniformly spaced day offsets on `[0, horizon_days]`.
///
/// Cloning is cheap; every series produced during a run shares the same grid.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeGrid {
    days: Arc<[f64]>,
}

impl TimeGrid {
    /// `linspace(0, horizon_days, sample_count)`, endpoint included.
    pub fn uniform(horizon_days: f64, sample_count: usize) -> Self {
        let days: Vec<f64> = match sample_count {
            0 => Vec::new(),
            1 => vec![0.0],
            n => {
                let step = horizon_days / (n - 1) as f64;
                (0..n)
                    .map(|i| if i == n - 1 { horizon_days } else { i as f64 * step })
                    .collect()
            }
        };
        Self { days: days.into() }
    }

    pub fn from_days(days: Vec<f64>) -> Self {
        Self { days: days.into() }
    }

    pub fn days(&self) -> &[f64] {
        &self.days
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    /// Spacing between consecutive samples (0 for fewer than two samples).
    pub fn step(&self) -> f64 {
        if self.days.len() < 2 {
            0.0
        } else {
            self.days[1] - self.days[0]
        }
    }
}

/// Sequence of `(day_offset, value)` pairs on a shared [`TimeGrid`].
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    grid: TimeGrid,
    values: Vec<f64>,
}

impl TimeSeries {
    /// Panics if `values` does not match the grid length.
    pub fn new(grid: TimeGrid, values: Vec<f64>) -> Self {
        assert_eq!(grid.len(), values.len(), "series length must match grid");
        Self { grid, values }
    }

    pub fn constant(grid: TimeGrid, value: f64) -> Self {
        let values = vec![value; grid.len()];
        Self { grid, values }
    }

    /// Evaluate `f(t)` at every grid point.
    pub fn from_fn(grid: TimeGrid, f: impl Fn(f64) -> f64) -> Self {
        let values = grid.days().iter().map(|&t| f(t)).collect();
        Self { grid, values }
    }

    pub fn grid(&self) -> &TimeGrid {
        &self.grid
    }

    pub fn days(&self) -> &[f64] {
        self.grid.days()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.grid.days().iter().copied().zip(self.values.iter().copied())
    }

    /// New series with `f(t, value)` applied sample-wise.
    pub fn map(&self, f: impl Fn(f64, f64) -> f64) -> Self {
        let values = self.iter().map(|(t, v)| f(t, v)).collect();
        Self {
            grid: self.grid.clone(),
            values,
        }
    }

    /// Sample-wise product; both series must share the grid length.
    pub fn mul(&self, other: &TimeSeries) -> Self {
        assert_eq!(self.len(), other.len(), "series length mismatch");
        let values = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| a * b)
            .collect();
        Self {
            grid: self.grid.clone(),
            values,
        }
    }

    pub fn scale(&self, k: f64) -> Self {
        self.map(|_, v| v * k)
    }

    /// Index of the first non-finite sample, if any.
    pub fn first_non_finite(&self) -> Option<usize> {
        self.values.iter().position(|v| !v.is_finite())
    }
}
