//! Varaha is an adaptive-volume Monte Carlo integrator for log-likelihoods.
//!
//! It estimates the evidence `Z = ∫ L(x) π(x) dx` of a likelihood `L` and a prior `π` over a
//! rectangular domain, by sampling uniformly from a hypercube partition that shrinks along
//! with the volume where the likelihood is large.
//!
//! For example:
//!
//! ```
//! use varaha::{AdaptiveVolumeSampler, IntegrationOptions, ParameterSpace, SampleBatch};
//!
//! fn main() {
//!     let mut space = ParameterSpace::new();
//!     space.add_parameter("x", None, 0., 1.).unwrap();
//!     space.add_parameter("y", None, 0., 1.).unwrap();
//!
//!     // the indicator of a small box
//!     let ln_l = |batch: &SampleBatch| -> Vec<f64> {
//!         let (x, y) = (batch.column("x").unwrap(), batch.column("y").unwrap());
//!         x.iter()
//!             .zip(y)
//!             .map(|(x, y)| if *x < 0.1 && *y < 0.1 { 0. } else { f64::NEG_INFINITY })
//!             .collect()
//!     };
//!
//!     let sampler = AdaptiveVolumeSampler::new(space);
//!     let opts = IntegrationOptions::default().with_neff(2000.).with_nmax(1_000_000).with_batch_size(100_000);
//!     let r = sampler.integrate_log(&ln_l, &opts).unwrap();
//!     println!("{}", r);
//!     assert!((r.log_integral - 0.01f64.ln()).abs() < 0.1);
//! }
//! ```
//!
//! Logging goes through [tracing](https://docs.rs/tracing); install a subscriber to see the
//! progress of an integration, or set [`IntegrationOptions::verbose`] for a table per cycle.

pub mod backend;
pub mod error;
pub mod grid;
pub mod integrator;
pub mod options;
pub mod parameters;
pub mod rng;
pub mod sampler;
pub mod statistics;
pub mod threshold;

pub use backend::{ArrayBackend, Backend, ParallelBackend, SerialBackend};
pub use error::IntegrationError;
pub use integrator::{
    AdaptiveVolumeSampler, CycleSummary, Diagnostics, IntegrationResult, LogIntegrand,
    SampleCache, StopReason,
};
pub use options::IntegrationOptions;
pub use parameters::{uniform_prior, ParameterSpace, Prior};
pub use sampler::SampleBatch;
