use tracing::trace;

use crate::backend::ArrayBackend;

/// The result of a threshold update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdUpdate {
    /// The new log-integrand threshold. Live samples at or below it are discarded.
    pub threshold: f64,
    /// The normalized probability mass of the samples strictly below the new threshold.
    pub truncated_probability: f64,
}

/// Choose the next log-integrand threshold from the order statistics of the live samples.
///
/// Two candidates are computed: the smallest value at which the empirical CDF of the
/// normalized weights `exp(v - max(v))` reaches the discard target, and the `n_select`-th
/// largest value, which limits how many of the best samples can be cut in one go. The lower
/// of the two is used.
///
/// The threshold never decreases, and it is never raised to the largest live value, since
/// that would discard every live sample.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdEstimator {
    n_select: usize,
}

impl Default for ThresholdEstimator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_N_SELECT)
    }
}

impl ThresholdEstimator {
    pub const DEFAULT_N_SELECT: usize = 1000;

    pub fn new(n_select: usize) -> ThresholdEstimator {
        ThresholdEstimator { n_select }
    }

    pub fn n_select(&self) -> usize {
        self.n_select
    }

    /// Compute the threshold that discards approximately `discard_target` of the probability
    /// mass of `values`. NaN and `+inf` values are ignored.
    pub fn next_threshold(
        &self,
        values: &[f64],
        previous: f64,
        discard_target: f64,
        backend: &dyn ArrayBackend,
    ) -> ThresholdUpdate {
        let unchanged = ThresholdUpdate {
            threshold: previous,
            truncated_probability: 0.,
        };

        let mut sorted: Vec<f64> = values
            .iter()
            .copied()
            .filter(|v| !v.is_nan() && *v != f64::INFINITY)
            .collect();

        if sorted.is_empty() {
            return unchanged;
        }

        backend.sort_ascending(&mut sorted);
        let max = sorted[sorted.len() - 1];
        if max == f64::NEG_INFINITY {
            return unchanged;
        }

        let weights = backend.exp_shifted(&sorted, max);
        let sum = backend.sum(&weights);

        let mut cdf = 0.;
        let mut prob_stop = max;
        for (v, w) in sorted.iter().zip(&weights) {
            cdf += w / sum;
            if cdf >= discard_target {
                prob_stop = *v;
                break;
            }
        }

        let lkl_stop = if sorted.len() > self.n_select {
            sorted[sorted.len() - 1 - self.n_select]
        } else {
            sorted[0]
        };

        let mut threshold = prob_stop.min(lkl_stop).max(previous);
        if threshold >= max {
            threshold = previous;
        }

        let below = sorted.partition_point(|v| *v < threshold);
        let truncated_probability = backend.sum(&weights[..below]) / sum;

        trace!(
            prob_stop,
            lkl_stop,
            threshold,
            truncated_probability,
            "threshold update"
        );

        ThresholdUpdate {
            threshold,
            truncated_probability,
        }
    }
}
