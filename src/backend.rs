//! Array backends that carry out the batch operations of the integrator.
//!
//! The integrator only talks to the [ArrayBackend] trait. A backend is chosen once per
//! integration through [Backend] and is never stored in global state.
//!
//! All backends produce bit-identical results: reductions and random draws are always
//! performed sequentially and in the same order, and only elementwise maps and sorts
//! may be spread over threads.

use std::fmt;

use rayon::{prelude::*, ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    grid::{BinIndex, HypercubeGrid},
    parameters::ParameterSpace,
    rng::MonteCarloRng,
};

/// The batch operations the integrator needs from an array library.
pub trait ArrayBackend: Send + Sync {
    /// A short name for logging.
    fn name(&self) -> &'static str;

    /// Compute `exp(v - shift)` for every value.
    fn exp_shifted(&self, values: &[f64], shift: f64) -> Vec<f64>;

    /// Sort the values in ascending order. Values must not be NaN.
    fn sort_ascending(&self, values: &mut [f64]);

    /// Return the distinct rows in lexicographic order.
    fn unique_rows(&self, rows: Vec<BinIndex>) -> Vec<BinIndex>;

    /// Map every point of the row-major `points` to its bin in `grid`.
    fn assign_bins(&self, grid: &HypercubeGrid, points: &[f64]) -> Vec<BinIndex>;

    /// Evaluate the joint prior density of `space` on every row of `points`.
    fn prior_density(&self, space: &ParameterSpace, points: &[f64]) -> Vec<f64>;

    fn sum(&self, values: &[f64]) -> f64 {
        values.iter().sum()
    }

    /// The maximum, or `-inf` for an empty array.
    fn max(&self, values: &[f64]) -> f64 {
        values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    /// The population variance, or 0 for an empty array.
    fn variance(&self, values: &[f64]) -> f64 {
        if values.is_empty() {
            return 0.;
        }

        let n = values.len() as f64;
        let mean = self.sum(values) / n;
        values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n
    }

    /// Compute `log(sum(exp(values)))` without overflow.
    fn log_sum_exp(&self, values: &[f64]) -> f64 {
        let max = self.max(values);
        if !max.is_finite() {
            return max;
        }

        max + self.sum(&self.exp_shifted(values, max)).ln()
    }

    /// Fill `out` with uniform draws on `[0, 1)`.
    fn fill_uniform(&self, rng: &mut MonteCarloRng, out: &mut [f64]) {
        for x in out {
            *x = rng.unit();
        }
    }
}

/// A backend that runs everything on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialBackend;

impl ArrayBackend for SerialBackend {
    fn name(&self) -> &'static str {
        "serial"
    }

    fn exp_shifted(&self, values: &[f64], shift: f64) -> Vec<f64> {
        values.iter().map(|v| (v - shift).exp()).collect()
    }

    fn sort_ascending(&self, values: &mut [f64]) {
        values.sort_unstable_by(f64::total_cmp);
    }

    fn unique_rows(&self, mut rows: Vec<BinIndex>) -> Vec<BinIndex> {
        rows.sort_unstable();
        rows.dedup();
        rows
    }

    fn assign_bins(&self, grid: &HypercubeGrid, points: &[f64]) -> Vec<BinIndex> {
        if grid.dimensions() == 0 {
            return vec![];
        }

        points
            .chunks_exact(grid.dimensions())
            .map(|p| grid.bin_of(p))
            .collect()
    }

    fn prior_density(&self, space: &ParameterSpace, points: &[f64]) -> Vec<f64> {
        space.prior_density(points)
    }
}

/// A backend that spreads the elementwise work over a dedicated thread pool.
pub struct ParallelBackend {
    pool: ThreadPool,
}

impl fmt::Debug for ParallelBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelBackend")
            .field("threads", &self.pool.current_num_threads())
            .finish()
    }
}

impl ParallelBackend {
    /// Create a backend with `threads` worker threads. If `threads` is 0,
    /// the number of logical cores is used.
    pub fn new(threads: usize) -> Result<ParallelBackend, String> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("varaha-{}", i))
            .build()
            .map_err(|e| e.to_string())?;
        Ok(ParallelBackend { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl ArrayBackend for ParallelBackend {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn exp_shifted(&self, values: &[f64], shift: f64) -> Vec<f64> {
        self.pool
            .install(|| values.par_iter().map(|v| (v - shift).exp()).collect())
    }

    fn sort_ascending(&self, values: &mut [f64]) {
        self.pool
            .install(|| values.par_sort_unstable_by(f64::total_cmp));
    }

    fn unique_rows(&self, mut rows: Vec<BinIndex>) -> Vec<BinIndex> {
        self.pool.install(|| rows.par_sort_unstable());
        rows.dedup();
        rows
    }

    fn assign_bins(&self, grid: &HypercubeGrid, points: &[f64]) -> Vec<BinIndex> {
        if grid.dimensions() == 0 {
            return vec![];
        }

        self.pool.install(|| {
            points
                .par_chunks_exact(grid.dimensions())
                .map(|p| grid.bin_of(p))
                .collect()
        })
    }

    fn prior_density(&self, space: &ParameterSpace, points: &[f64]) -> Vec<f64> {
        if space.is_empty() {
            return vec![];
        }

        self.pool.install(|| {
            points
                .par_chunks_exact(space.dimensions())
                .map(|row| space.prior_density_row(row))
                .collect()
        })
    }
}

/// The choice of array backend for an integration.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Serial,
    /// Use a thread pool with `threads` threads, or one thread per core if `threads` is 0.
    Parallel { threads: usize },
}

impl Backend {
    /// Construct the backend. A parallel backend whose thread pool cannot be built
    /// falls back to the serial backend, which yields the same numbers.
    pub fn instantiate(&self) -> Box<dyn ArrayBackend> {
        match self {
            Backend::Serial => Box::new(SerialBackend),
            Backend::Parallel { threads } => match ParallelBackend::new(*threads) {
                Ok(b) => {
                    debug!("Using parallel backend with {} threads", b.threads());
                    Box::new(b)
                }
                Err(e) => {
                    warn!(
                        "Could not start the parallel backend ({}), falling back to the serial backend",
                        e
                    );
                    Box::new(SerialBackend)
                }
            },
        }
    }
}

#[cfg(test)]
mod test {
    use crate::{grid::HypercubeGrid, parameters::ParameterSpace};

    use super::{ArrayBackend, Backend, ParallelBackend, SerialBackend};

    #[test]
    fn reductions() {
        let b = SerialBackend;
        let v = [1., 2., 3., 4.];
        assert_eq!(b.sum(&v), 10.);
        assert_eq!(b.max(&v), 4.);
        assert_eq!(b.variance(&v), 1.25);
        assert_eq!(b.max(&[]), f64::NEG_INFINITY);
        assert_eq!(b.variance(&[]), 0.);

        let lse = b.log_sum_exp(&[1000., 1000.]);
        assert!((lse - (1000. + 2f64.ln())).abs() < 1e-12);
        assert_eq!(b.log_sum_exp(&[]), f64::NEG_INFINITY);
        assert_eq!(
            b.log_sum_exp(&[f64::NEG_INFINITY, f64::NEG_INFINITY]),
            f64::NEG_INFINITY
        );
    }

    #[test]
    fn parallel_matches_serial() {
        let p = ParallelBackend::new(2).unwrap();
        let s = SerialBackend;

        let values: Vec<f64> = (0..1000).map(|i| ((i * 7919) % 1000) as f64 * 0.01).collect();
        assert_eq!(s.exp_shifted(&values, 3.), p.exp_shifted(&values, 3.));

        let mut a = values.clone();
        let mut b = values.clone();
        s.sort_ascending(&mut a);
        p.sort_ascending(&mut b);
        assert_eq!(a, b);

        let mut grid = HypercubeGrid::new(&[[0., 10.], [0., 10.]], 100);
        grid.set_bin_count(7);
        let bins_s = s.assign_bins(&grid, &values);
        let bins_p = p.assign_bins(&grid, &values);
        assert_eq!(bins_s, bins_p);
        assert_eq!(s.unique_rows(bins_s), p.unique_rows(bins_p));

        let mut space = ParameterSpace::new();
        space
            .add_group(
                &["x", "y"],
                Some(std::sync::Arc::new(|c: &[f64]| c[0] * c[1])),
                &[0., 0.],
                &[10., 10.],
            )
            .unwrap();
        assert_eq!(
            s.prior_density(&space, &values),
            p.prior_density(&space, &values)
        );
    }

    #[test]
    fn instantiate() {
        assert_eq!(Backend::Serial.instantiate().name(), "serial");
        assert_eq!(
            Backend::Parallel { threads: 2 }.instantiate().name(),
            "parallel"
        );
    }
}
