//! The adaptive-volume integrator.
//!
//! The integrator estimates `∫ exp(ln L(x)) π(x) dx` over a rectangular domain. Every cycle it
//! draws points uniformly from the occupied bins of a hypercube grid, keeps the points whose
//! log integrand lies above a threshold, raises the threshold to discard a small amount of
//! probability mass, and estimates the shrinking live volume from the fraction of samples that
//! survive. The grid is then refined so that the bins follow the live volume.
//!
//! The algorithm is VARAHA, described in [arXiv:2303.01463](https://arxiv.org/abs/2303.01463).
//!
//! # Example
//!
//! ```
//! use varaha::{
//!     integrator::AdaptiveVolumeSampler, options::IntegrationOptions, parameters::ParameterSpace,
//!     sampler::SampleBatch,
//! };
//!
//! let mut space = ParameterSpace::new();
//! space.add_parameter("x", None, -5., 5.).unwrap();
//! let sampler = AdaptiveVolumeSampler::new(space);
//!
//! // a normalized Gaussian
//! let ln_l = |batch: &SampleBatch| -> Vec<f64> {
//!     let ln_norm = -0.5 * (2. * std::f64::consts::PI).ln();
//!     batch.column("x").unwrap().iter().map(|x| ln_norm - 0.5 * x * x).collect()
//! };
//!
//! let opts = IntegrationOptions::default().with_neff(1000.).with_nmax(1_000_000).with_batch_size(20_000);
//! let r = sampler.integrate_log(&ln_l, &opts).unwrap();
//! assert!(r.log_integral.abs() < 0.1);
//! ```

mod result;

use colored::Colorize;
use smartstring::alias::String as SmartString;
use tracing::{debug, info, warn};

pub use self::result::{CycleSummary, Diagnostics, IntegrationResult, SampleCache, StopReason};
use crate::{
    backend::ArrayBackend,
    error::IntegrationError,
    grid::HypercubeGrid,
    options::IntegrationOptions,
    parameters::{ParameterSpace, Prior},
    rng::MonteCarloRng,
    sampler::{BinSampler, SampleBatch},
    statistics::LogAccumulator,
    threshold::ThresholdEstimator,
};

/// A vectorized log-likelihood: it maps a batch of samples to one log value per sample.
///
/// It is implemented for every closure `Fn(&SampleBatch) -> Vec<f64>`.
pub trait LogIntegrand {
    fn evaluate(&self, batch: &SampleBatch) -> Vec<f64>;
}

impl<F> LogIntegrand for F
where
    F: Fn(&SampleBatch) -> Vec<f64>,
{
    fn evaluate(&self, batch: &SampleBatch) -> Vec<f64> {
        self(batch)
    }
}

/// An integrator of log-likelihoods over a [ParameterSpace], using adaptive volume
/// shrinkage.
///
/// The sampler only holds configuration. Every call to [`AdaptiveVolumeSampler::integrate_log`]
/// starts from the full domain with a fresh run state, so repeated calls do not influence
/// each other.
#[derive(Debug, Clone, Default)]
pub struct AdaptiveVolumeSampler {
    space: ParameterSpace,
    threshold: ThresholdEstimator,
}

impl AdaptiveVolumeSampler {
    /// The fraction of the probability mass that the threshold updates aim to keep.
    pub const ENCLOSED_PROBABILITY: f64 = 0.999;
    /// The threshold of the first cycle, which admits every finite sample.
    pub const INITIAL_THRESHOLD: f64 = -1e15;
    /// The maximal number of cycles.
    pub const MAX_CYCLES: usize = 1000;

    pub fn new(space: ParameterSpace) -> AdaptiveVolumeSampler {
        AdaptiveVolumeSampler {
            space,
            threshold: ThresholdEstimator::default(),
        }
    }

    pub fn space(&self) -> &ParameterSpace {
        &self.space
    }

    /// Register a scalar parameter, see [`ParameterSpace::add_parameter`].
    pub fn add_parameter(
        &mut self,
        name: &str,
        prior: Option<Prior>,
        left: f64,
        right: f64,
    ) -> Result<(), IntegrationError> {
        self.space.add_parameter(name, prior, left, right)
    }

    /// Register a joint group of parameters, see [`ParameterSpace::add_group`].
    pub fn add_group(
        &mut self,
        names: &[&str],
        prior: Option<Prior>,
        left: &[f64],
        right: &[f64],
    ) -> Result<(), IntegrationError> {
        self.space.add_group(names, prior, left, right)
    }

    /// Remove all parameters.
    pub fn clear(&mut self) {
        self.space.clear();
    }

    /// Integrate `exp(integrand) * prior` over the domain.
    ///
    /// Configuration problems are reported before any sample is drawn. Once sampling has
    /// started, the only error is an integrand that returns the wrong number of values; all
    /// other problems are recorded in the [Diagnostics] of the result.
    pub fn integrate_log<I: LogIntegrand + ?Sized>(
        &self,
        integrand: &I,
        options: &IntegrationOptions,
    ) -> Result<IntegrationResult, IntegrationError> {
        self.space.check_bounded()?;
        options.validate()?;

        let backend = options.backend.instantiate();
        let mut run = Run::new(self, options, backend.as_ref());

        if options.verbose {
            eprintln!(
                "{}",
                format!(
                    "{:>6} {:>12} {:>12} {:>10} {:>12} {:>9} {:>10} {:>12} {:>9} {:>12} {:>10}",
                    "cycle",
                    "ntotal",
                    "eff_samp",
                    "neff",
                    "max_lnL",
                    "n_live",
                    "mean_bins",
                    "V",
                    "n_bins",
                    "threshold",
                    "trunc_p"
                )
                .bold()
            );
        }

        let stop_reason = loop {
            let summary = run.step(integrand)?;

            debug!(
                cycle = summary.cycle,
                total_drawn = summary.total_drawn,
                retained = summary.retained,
                volume = summary.volume,
                threshold = summary.threshold,
                eff_samp = summary.eff_samp,
                "cycle finished"
            );

            if options.verbose {
                eprintln!(
                    "{:>6} {:>12} {:>12.2} {:>10.0} {:>12.1} {:>9} {:>10.1} {:>12.4e} {:>9} {:>12.1} {:>10.3e}",
                    summary.cycle,
                    summary.total_drawn,
                    summary.eff_samp,
                    summary.kish_neff,
                    summary.max_log_integrand,
                    summary.retained,
                    run.grid.mean_bin_count(),
                    summary.volume,
                    summary.occupied_bins,
                    summary.threshold,
                    summary.discarded_probability
                );
            }

            let eff_samp = summary.eff_samp;
            let cycle = summary.cycle;
            run.history.push(summary);

            if eff_samp >= options.target_neff() {
                break StopReason::EffectiveSamples;
            }
            if run.total_drawn >= options.max_points() {
                break StopReason::SampleBudget;
            }
            if cycle >= Self::MAX_CYCLES {
                break StopReason::CycleLimit;
            }
        };

        let result = run.finish(stop_reason, options.save_samples);

        if !stop_reason.is_converged() && options.neff.is_some() {
            warn!(
                "Integration did not reach {} effective samples: {} after {} cycles",
                options.target_neff(),
                stop_reason,
                result.diagnostics.cycles
            );
        } else {
            info!("Integration finished: {}", stop_reason);
        }

        if options.verbose {
            eprintln!("{}", result);
        }

        Ok(result)
    }

    /// Integrate a non-negative `integrand` (not its logarithm) times the prior over the domain.
    ///
    /// Negative values cannot be handled in the log domain: they are counted as non-finite
    /// evaluations and excluded.
    pub fn integrate<F>(
        &self,
        integrand: F,
        options: &IntegrationOptions,
    ) -> Result<IntegrationResult, IntegrationError>
    where
        F: Fn(&SampleBatch) -> Vec<f64>,
    {
        let log_integrand =
            |batch: &SampleBatch| -> Vec<f64> { integrand(batch).into_iter().map(f64::ln).collect() };
        self.integrate_log(&log_integrand, options)
    }
}

/// The live samples, stored as parallel arrays.
#[derive(Debug, Default)]
struct LiveSet {
    ndim: usize,
    points: Vec<f64>,
    log_integrand: Vec<f64>,
    log_prior: Vec<f64>,
}

impl LiveSet {
    fn new(ndim: usize) -> LiveSet {
        LiveSet {
            ndim,
            ..Default::default()
        }
    }

    fn len(&self) -> usize {
        self.log_integrand.len()
    }

    fn is_empty(&self) -> bool {
        self.log_integrand.is_empty()
    }

    fn push(&mut self, point: &[f64], log_integrand: f64, log_prior: f64) {
        self.points.extend_from_slice(point);
        self.log_integrand.push(log_integrand);
        self.log_prior.push(log_prior);
    }

    /// Remove all samples at or below `threshold` and return the number of remaining samples.
    fn retain_above(&mut self, threshold: f64) -> usize {
        let mut j = 0;
        for i in 0..self.len() {
            if self.log_integrand[i] > threshold {
                if i != j {
                    self.log_integrand[j] = self.log_integrand[i];
                    self.log_prior[j] = self.log_prior[i];
                    self.points
                        .copy_within(i * self.ndim..(i + 1) * self.ndim, j * self.ndim);
                }
                j += 1;
            }
        }

        self.log_integrand.truncate(j);
        self.log_prior.truncate(j);
        self.points.truncate(j * self.ndim);
        j
    }
}

/// The mutable state of a single integration.
struct Run<'a> {
    sampler: &'a AdaptiveVolumeSampler,
    backend: &'a dyn ArrayBackend,
    rng: MonteCarloRng,
    batch_size: usize,
    grid: HypercubeGrid,
    live: LiveSet,
    volume: f64,
    threshold: f64,
    discarded: f64,
    cycle: usize,
    total_drawn: u64,
    uniform: Option<LogAccumulator>,
    stalled_cycles: usize,
    non_finite: usize,
    history: Vec<CycleSummary>,
}

impl<'a> Run<'a> {
    fn new(
        sampler: &'a AdaptiveVolumeSampler,
        options: &IntegrationOptions,
        backend: &'a dyn ArrayBackend,
    ) -> Run<'a> {
        let batch_size = options.batch_size();
        let ndim = sampler.space.dimensions();

        Run {
            sampler,
            backend,
            rng: MonteCarloRng::new(options.seed),
            batch_size,
            grid: HypercubeGrid::new(&sampler.space.domain_bounds(), batch_size),
            live: LiveSet::new(ndim),
            volume: 1.,
            threshold: AdaptiveVolumeSampler::INITIAL_THRESHOLD,
            discarded: 0.,
            cycle: 0,
            total_drawn: 0,
            uniform: None,
            stalled_cycles: 0,
            non_finite: 0,
            history: vec![],
        }
    }

    /// Returns `true` when the discarded probability is within one sample of the target, after
    /// which the threshold is frozen.
    fn at_final_threshold(&self) -> bool {
        let enc = AdaptiveVolumeSampler::ENCLOSED_PROBABILITY;
        self.discarded > 0. && (enc / self.discarded).round() == (enc / (1. - enc)).round()
    }

    fn step<I: LogIntegrand + ?Sized>(
        &mut self,
        integrand: &I,
    ) -> Result<CycleSummary, IntegrationError> {
        self.cycle += 1;
        let sampler = self.sampler;
        let space = &sampler.space;
        let ndim = space.dimensions();

        // draw
        let points = BinSampler.draw(&self.grid, &mut self.rng, self.backend);
        let drawn = points.len() / ndim;
        self.total_drawn += drawn as u64;

        let ln_l = integrand.evaluate(&SampleBatch::from_rows(space, &points));
        if ln_l.len() != drawn {
            return Err(IntegrationError::IntegrandShape {
                expected: drawn,
                found: ln_l.len(),
            });
        }

        let log_prior: Vec<f64> = self
            .backend
            .prior_density(space, &points)
            .into_iter()
            .map(f64::ln)
            .collect();
        let log_integrand: Vec<f64> = ln_l.iter().zip(&log_prior).map(|(l, p)| l + p).collect();

        // while the batches are uniform over the whole domain, they also give a plain
        // Monte Carlo estimate
        let uniform_over_domain = self.volume == 1. && self.grid.is_whole_domain();
        if uniform_over_domain {
            match &mut self.uniform {
                Some(a) => a.fold(&log_integrand),
                None => self.uniform = Some(LogAccumulator::from_log_values(&log_integrand)),
            }
        }

        // admit
        let previous_live = self.live.len();
        let mut admitted = 0;
        let mut non_finite = 0;
        for ((p, v), lp) in points.chunks_exact(ndim).zip(&log_integrand).zip(&log_prior) {
            if v.is_nan() || *v == f64::INFINITY {
                non_finite += 1;
            } else if *v > self.threshold {
                self.live.push(p, *v, *lp);
                admitted += 1;
            }
        }

        if non_finite > 0 {
            if self.non_finite == 0 {
                warn!(
                    "The integrand evaluated to NaN or +inf for {} points in cycle {}; they are excluded",
                    non_finite, self.cycle
                );
            }
            self.non_finite += non_finite;
        }

        // while the live set and the new batch are both uniform over the full domain,
        // points rejected at admission measure the volume too
        let injected = if uniform_over_domain {
            previous_live + drawn
        } else {
            self.live.len()
        };

        // re-threshold
        if !self.at_final_threshold() && !self.live.is_empty() {
            let update = sampler.threshold.next_threshold(
                &self.live.log_integrand,
                self.threshold,
                1. - AdaptiveVolumeSampler::ENCLOSED_PROBABILITY - self.discarded,
                self.backend,
            );
            self.threshold = update.threshold;
            self.discarded += update.truncated_probability;
        }

        let retained = self.live.retain_above(self.threshold);

        // shrink and re-partition
        let stalled = injected == 0 || retained == 0;
        if stalled {
            if self.stalled_cycles == 0 {
                warn!(
                    "No live samples left in cycle {}; keeping volume {:e} and the previous partition",
                    self.cycle, self.volume
                );
            }
            self.stalled_cycles += 1;
        } else {
            self.volume *= retained as f64 / injected as f64;
            let bin_volume = self.volume / (retained as f64).sqrt();
            let count = HypercubeGrid::bin_count_for_volume(bin_volume, ndim);
            self.grid
                .repartition(count, &self.live.points, self.batch_size, self.backend);
        }

        // statistics
        let (eff_samp, kish_neff, max_log_integrand) = if self.live.is_empty() {
            (0., 0., f64::NEG_INFINITY)
        } else {
            let max = self.backend.max(&self.live.log_integrand);
            let w = self.backend.exp_shifted(&self.live.log_integrand, max);
            let sum = self.backend.sum(&w);
            let sum_sq: f64 = w.iter().map(|w| w * w).sum();
            (sum / self.backend.max(&w), sum * sum / sum_sq, max)
        };

        Ok(CycleSummary {
            cycle: self.cycle,
            total_drawn: self.total_drawn,
            drawn,
            admitted,
            injected,
            retained,
            volume: self.volume,
            threshold: self.threshold,
            discarded_probability: self.discarded,
            bin_count: self.grid.bin_counts().first().copied().unwrap_or(1),
            occupied_bins: self.grid.occupied().len(),
            eff_samp,
            kish_neff,
            max_log_integrand,
            stalled,
        })
    }

    /// Compute the integral from the live samples.
    fn finish(self, stop_reason: StopReason, save_samples: bool) -> IntegrationResult {
        let backend = self.backend;
        let live = self.live;

        // uniform sampling over the live volume, relative to the original domain
        let log_domain_volume: f64 = self.grid.domain_widths().iter().map(|w| w.ln()).sum();
        let log_sampling_prior = -self.volume.ln() - log_domain_volume;

        let ln_l: Vec<f64> = live
            .log_integrand
            .iter()
            .zip(&live.log_prior)
            .map(|(v, p)| v - p)
            .collect();
        let log_weights: Vec<f64> = ln_l
            .iter()
            .zip(&live.log_prior)
            .map(|(l, p)| l + p - log_sampling_prior)
            .collect();

        let count = live.len();
        let (log_integral, relative_variance, effective_sample_count, effective_sample_size) =
            if count == 0 {
                (f64::NEG_INFINITY, 0., 0., 0.)
            } else {
                let max = backend.max(&log_weights);
                let w = backend.exp_shifted(&log_weights, max);
                let sum = backend.sum(&w);
                let sum_sq: f64 = w.iter().map(|w| w * w).sum();
                (
                    backend.log_sum_exp(&log_weights) - (count as f64).ln(),
                    backend.variance(&w),
                    sum,
                    sum * sum / sum_sq,
                )
            };

        let (uniform_log_integral, uniform_log_integral_error, uniform_evaluations) =
            match &self.uniform {
                Some(a) => {
                    let log_mean = a.log_mean();
                    let error = if a.count() < 2 || log_mean == f64::NEG_INFINITY {
                        f64::INFINITY
                    } else {
                        (0.5 * a.log_variance_of_mean() - log_mean).exp()
                    };
                    (log_mean + log_domain_volume, error, a.count())
                }
                None => (f64::NEG_INFINITY, f64::INFINITY, 0),
            };

        if count == 0 {
            warn!("The live set is empty; the integral estimate is zero");
        }

        let samples = if save_samples {
            let names = self.sampler.space.names().to_vec();
            let mut columns = vec![Vec::with_capacity(count); names.len()];
            for row in live.points.chunks_exact(names.len().max(1)) {
                for (c, x) in columns.iter_mut().zip(row) {
                    c.push(*x);
                }
            }

            Some(SampleCache {
                names,
                columns,
                log_integrand: ln_l,
                log_joint_sampling_prior: vec![log_sampling_prior; count],
                log_joint_prior: live.log_prior,
            })
        } else {
            None
        };

        let result = IntegrationResult {
            log_integral,
            relative_variance,
            effective_sample_count,
            count,
            diagnostics: Diagnostics {
                stop_reason,
                cycles: self.cycle,
                total_drawn: self.total_drawn,
                final_volume: self.volume,
                final_threshold: self.threshold,
                discarded_probability: self.discarded,
                stalled_cycles: self.stalled_cycles,
                non_finite_evaluations: self.non_finite,
                effective_sample_size,
                uniform_log_integral,
                uniform_log_integral_error,
                uniform_evaluations,
                backend: SmartString::from(backend.name()),
                history: self.history,
            },
            samples,
        };

        debug!("Final estimate from {} live samples: {}", count, result);
        result
    }
}

#[cfg(test)]
mod test {
    use crate::{backend::SerialBackend, options::IntegrationOptions};

    use super::{AdaptiveVolumeSampler, LiveSet, Run};

    #[test]
    fn live_set_filter() {
        let mut live = LiveSet::new(2);
        live.push(&[0., 1.], -1., 0.);
        live.push(&[2., 3.], 5., 0.5);
        live.push(&[4., 5.], 0., 0.);
        live.push(&[6., 7.], 3., 0.25);

        assert_eq!(live.retain_above(0.), 2);
        assert_eq!(live.points, vec![2., 3., 6., 7.]);
        assert_eq!(live.log_integrand, vec![5., 3.]);
        assert_eq!(live.log_prior, vec![0.5, 0.25]);

        assert_eq!(live.retain_above(10.), 0);
        assert!(live.is_empty());
        assert!(live.points.is_empty());
    }

    #[test]
    fn final_threshold_freeze() {
        let mut sampler = AdaptiveVolumeSampler::default();
        sampler.add_parameter("x", None, 0., 1.).unwrap();
        let opts = IntegrationOptions::default();
        let mut run = Run::new(&sampler, &opts, &SerialBackend);

        // nothing discarded yet
        assert!(!run.at_final_threshold());

        run.discarded = 0.0009;
        assert!(!run.at_final_threshold());
        run.discarded = 0.001;
        assert!(run.at_final_threshold());
        run.discarded = 0.0010004;
        assert!(run.at_final_threshold());
        run.discarded = 0.0011;
        assert!(!run.at_final_threshold());
    }
}
