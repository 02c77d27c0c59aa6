use serde::{Deserialize, Serialize};

use crate::{backend::Backend, error::IntegrationError};

/// The largest batch size that is used when no batch size is given.
pub const DEFAULT_BATCH_SIZE: usize = 100_000;

/// Settings of a single integration.
///
/// Options can be built in code or parsed from JSON with [`IntegrationOptions::from_json`],
/// where unknown keys are rejected. For example:
///
/// ```
/// use varaha::options::IntegrationOptions;
///
/// let opts = IntegrationOptions::from_json(r#"{"neff": 1000, "nmax": 1000000, "seed": 3}"#).unwrap();
/// assert_eq!(opts.batch_size(), 100_000);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct IntegrationOptions {
    /// The maximal number of points to draw. Unbounded if `None`.
    pub nmax: Option<u64>,
    /// The number of effective samples after which to stop. Unbounded if `None`.
    pub neff: Option<f64>,
    /// The number of points drawn per cycle. Defaults to `min(100000, nmax)`.
    pub n: Option<usize>,
    /// Print a progress line for every cycle to stderr.
    pub verbose: bool,
    /// The seed of the random number generator.
    pub seed: u64,
    /// Return the live samples with the result.
    pub save_samples: bool,
    pub backend: Backend,
}

impl Default for IntegrationOptions {
    fn default() -> Self {
        IntegrationOptions {
            nmax: None,
            neff: None,
            n: None,
            verbose: false,
            seed: 0,
            save_samples: true,
            backend: Backend::Serial,
        }
    }
}

impl IntegrationOptions {
    /// Parse options from a JSON object.
    pub fn from_json(json: &str) -> Result<IntegrationOptions, IntegrationError> {
        let opts: IntegrationOptions =
            serde_json::from_str(json).map_err(|e| IntegrationError::OptionParse(e.to_string()))?;
        opts.validate()?;
        Ok(opts)
    }

    pub fn with_nmax(mut self, nmax: u64) -> Self {
        self.nmax = Some(nmax);
        self
    }

    pub fn with_neff(mut self, neff: f64) -> Self {
        self.neff = Some(neff);
        self
    }

    pub fn with_batch_size(mut self, n: usize) -> Self {
        self.n = Some(n);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_save_samples(mut self, save_samples: bool) -> Self {
        self.save_samples = save_samples;
        self
    }

    /// Check that all options have sensible values.
    pub fn validate(&self) -> Result<(), IntegrationError> {
        if self.nmax == Some(0) {
            return Err(IntegrationError::InvalidOption {
                option: "nmax",
                reason: "at least one point must be drawn".to_owned(),
            });
        }

        if let Some(neff) = self.neff {
            if neff.is_nan() || neff <= 0. {
                return Err(IntegrationError::InvalidOption {
                    option: "neff",
                    reason: format!("expected a positive number, got {}", neff),
                });
            }
        }

        if self.n == Some(0) {
            return Err(IntegrationError::InvalidOption {
                option: "n",
                reason: "the batch size must be positive".to_owned(),
            });
        }

        Ok(())
    }

    /// The maximal number of points to draw.
    pub fn max_points(&self) -> u64 {
        self.nmax.unwrap_or(u64::MAX)
    }

    /// The number of effective samples to reach.
    pub fn target_neff(&self) -> f64 {
        self.neff.unwrap_or(f64::INFINITY)
    }

    /// The number of points to draw per cycle.
    pub fn batch_size(&self) -> usize {
        match self.n {
            Some(n) => n,
            None => self
                .nmax
                .map(|m| m.min(DEFAULT_BATCH_SIZE as u64) as usize)
                .unwrap_or(DEFAULT_BATCH_SIZE),
        }
    }
}

#[cfg(test)]
mod test {
    use crate::{backend::Backend, error::IntegrationError};

    use super::IntegrationOptions;

    #[test]
    fn defaults() {
        let o = IntegrationOptions::default();
        assert_eq!(o.max_points(), u64::MAX);
        assert_eq!(o.target_neff(), f64::INFINITY);
        assert_eq!(o.batch_size(), 100_000);
        assert!(o.save_samples);
        assert_eq!(o.backend, Backend::Serial);

        assert_eq!(IntegrationOptions::default().with_nmax(5000).batch_size(), 5000);
        assert_eq!(
            IntegrationOptions::default()
                .with_nmax(5000)
                .with_batch_size(100)
                .batch_size(),
            100
        );
    }

    #[test]
    fn json() {
        let o = IntegrationOptions::from_json(
            r#"{"nmax": 20000, "neff": 50.5, "verbose": true, "backend": {"parallel": {"threads": 2}}}"#,
        )
        .unwrap();
        assert_eq!(o.nmax, Some(20000));
        assert_eq!(o.neff, Some(50.5));
        assert!(o.verbose);
        assert_eq!(o.backend, Backend::Parallel { threads: 2 });
        assert_eq!(o.batch_size(), 20000);
    }

    #[test]
    fn unknown_keys() {
        assert!(matches!(
            IntegrationOptions::from_json(r#"{"nmax": 10, "tempering_exp": 0.5}"#),
            Err(IntegrationError::OptionParse(_))
        ));
    }

    #[test]
    fn invalid_values() {
        assert!(matches!(
            IntegrationOptions::from_json(r#"{"neff": -1}"#),
            Err(IntegrationError::InvalidOption { option: "neff", .. })
        ));
        assert!(IntegrationOptions::default().with_nmax(0).validate().is_err());
        assert!(IntegrationOptions::default()
            .with_batch_size(0)
            .validate()
            .is_err());
        assert!(IntegrationOptions::default()
            .with_neff(f64::NAN)
            .validate()
            .is_err());
    }
}
