use std::fmt;

use serde::{Deserialize, Serialize};
use smartstring::alias::String as SmartString;

use crate::statistics::format_uncertainty;

/// The stopping predicate that ended an integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// The requested number of effective samples was reached.
    EffectiveSamples,
    /// The maximal number of points was drawn before reaching the requested effective samples.
    SampleBudget,
    /// The cycle limit was hit before any other stopping condition.
    CycleLimit,
}

impl StopReason {
    /// Returns `true` if the integration stopped because it reached its target.
    pub fn is_converged(&self) -> bool {
        *self == StopReason::EffectiveSamples
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::EffectiveSamples => f.write_str("effective samples reached"),
            StopReason::SampleBudget => f.write_str("sample budget exhausted"),
            StopReason::CycleLimit => f.write_str("cycle limit reached"),
        }
    }
}

/// The state of the integrator at the end of one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleSummary {
    pub cycle: usize,
    /// The total number of points drawn so far.
    pub total_drawn: u64,
    /// The number of points drawn in this cycle.
    pub drawn: usize,
    /// The number of new points that passed the threshold at admission.
    pub admitted: usize,
    /// The size of the sample set the volume shrinkage was measured on.
    pub injected: usize,
    /// The number of live samples after re-filtering.
    pub retained: usize,
    /// The live-volume fraction.
    pub volume: f64,
    pub threshold: f64,
    /// The probability mass discarded by all threshold updates so far.
    pub discarded_probability: f64,
    /// The number of bins per dimension of the next partition.
    pub bin_count: usize,
    pub occupied_bins: usize,
    /// The stopping statistic `sum(w) / max(w)`.
    pub eff_samp: f64,
    /// The Kish effective sample size `sum(w)^2 / sum(w^2)`.
    pub kish_neff: f64,
    pub max_log_integrand: f64,
    /// No live sample survived, so the volume and partition were kept.
    pub stalled: bool,
}

/// Information about the course of an integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub stop_reason: StopReason,
    pub cycles: usize,
    pub total_drawn: u64,
    pub final_volume: f64,
    pub final_threshold: f64,
    pub discarded_probability: f64,
    pub stalled_cycles: usize,
    /// The number of NaN or `+inf` integrand values, which were excluded.
    pub non_finite_evaluations: usize,
    /// The Kish effective sample size of the final live set.
    pub effective_sample_size: f64,
    /// The plain Monte Carlo estimate from the points that were drawn uniformly over the whole
    /// domain, before the first partition refinement.
    pub uniform_log_integral: f64,
    /// The standard error on [`Diagnostics::uniform_log_integral`].
    pub uniform_log_integral_error: f64,
    /// The number of evaluations behind [`Diagnostics::uniform_log_integral`], without NaN and `+inf`.
    pub uniform_evaluations: usize,
    pub backend: SmartString,
    pub history: Vec<CycleSummary>,
}

/// The live samples at the end of an integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleCache {
    pub names: Vec<SmartString>,
    /// One column per dimension, in the order of `names`.
    pub columns: Vec<Vec<f64>>,
    /// The log-likelihood, without the prior.
    pub log_integrand: Vec<f64>,
    pub log_joint_prior: Vec<f64>,
    /// The log density of uniform sampling over the final live volume.
    pub log_joint_sampling_prior: Vec<f64>,
}

impl SampleCache {
    /// The values of the dimension called `name`.
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.columns[i].as_slice())
    }

    pub fn len(&self) -> usize {
        self.log_integrand.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log_integrand.is_empty()
    }

    /// The log importance weight `log_integrand + log_joint_prior - log_joint_sampling_prior`
    /// of every sample.
    pub fn log_weights(&self) -> Vec<f64> {
        self.log_integrand
            .iter()
            .zip(&self.log_joint_prior)
            .zip(&self.log_joint_sampling_prior)
            .map(|((l, p), s)| l + p - s)
            .collect()
    }
}

/// The estimate of an integral.
///
/// The estimate is always returned, also when the integration did not converge.
/// Check [`IntegrationResult::is_converged`] or [`Diagnostics::stop_reason`] before relying on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationResult {
    /// The natural log of the integral.
    pub log_integral: f64,
    /// The variance of the importance weights normalized to a maximum of 1.
    pub relative_variance: f64,
    /// The sum of the importance weights normalized to a maximum of 1.
    pub effective_sample_count: f64,
    /// The number of live samples the estimate is based on.
    pub count: usize,
    pub diagnostics: Diagnostics,
    pub samples: Option<SampleCache>,
}

impl IntegrationResult {
    /// The value of the integral.
    pub fn integral(&self) -> f64 {
        self.log_integral.exp()
    }

    /// The first-order standard error on [`IntegrationResult::log_integral`] from the spread of
    /// the importance weights.
    ///
    /// The uncertainty of the live-volume estimate is not included, so this is a lower bound on
    /// the true error. Compare runs with different seeds for a complete estimate.
    pub fn log_integral_error(&self) -> f64 {
        if self.effective_sample_count <= 0. {
            return f64::INFINITY;
        }
        (self.relative_variance * self.count as f64).sqrt() / self.effective_sample_count
    }

    pub fn is_converged(&self) -> bool {
        self.diagnostics.stop_reason.is_converged()
    }
}

impl fmt::Display for IntegrationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ln I = {}, neff = {:.1}, {} cycles, {} points: {}",
            format_uncertainty(self.log_integral, self.log_integral_error()),
            self.effective_sample_count,
            self.diagnostics.cycles,
            self.diagnostics.total_drawn,
            self.diagnostics.stop_reason
        )
    }
}

#[cfg(test)]
mod test {
    use smartstring::alias::String as SmartString;

    use super::{Diagnostics, IntegrationResult, StopReason};

    fn result(relative_variance: f64, effective_sample_count: f64, count: usize) -> IntegrationResult {
        IntegrationResult {
            log_integral: 0.,
            relative_variance,
            effective_sample_count,
            count,
            diagnostics: Diagnostics {
                stop_reason: StopReason::EffectiveSamples,
                cycles: 1,
                total_drawn: count as u64,
                final_volume: 1.,
                final_threshold: -1e15,
                discarded_probability: 0.,
                stalled_cycles: 0,
                non_finite_evaluations: 0,
                effective_sample_size: effective_sample_count,
                uniform_log_integral: 0.,
                uniform_log_integral_error: 0.,
                uniform_evaluations: count,
                backend: SmartString::from("serial"),
                history: vec![],
            },
            samples: None,
        }
    }

    #[test]
    fn weight_error() {
        // 100 samples with normalized weights of variance 0.04 and sum 50
        let r = result(0.04, 50., 100);
        assert!((r.log_integral_error() - 0.04).abs() < 1e-15);

        assert_eq!(result(0., 100., 100).log_integral_error(), 0.);
        assert_eq!(result(0., 0., 0).log_integral_error(), f64::INFINITY);
        assert!(r.to_string().starts_with("ln I = 0.000(40)"));
    }
}
