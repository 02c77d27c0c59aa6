use serde::{Deserialize, Serialize};

/// Compute `log(exp(a) + exp(b))` without overflow.
#[inline]
pub fn log_add_exp(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }

    let (hi, lo) = if a > b { (a, b) } else { (b, a) };
    hi + (lo - hi).exp().ln_1p()
}

/// Keep track of the running sum and sum of squares of `exp(x)`, for samples `x` that are
/// given in the log domain.
///
/// Start an accumulator with [`LogAccumulator::from_log_values()`] and add batches with
/// [`LogAccumulator::fold()`]. NaN and `+inf` values are skipped, `-inf` values count as
/// samples that evaluate to zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogAccumulator {
    count: usize,
    log_sum: f64,
    log_sum_sq: f64,
    max: f64,
}

impl Default for LogAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl LogAccumulator {
    /// Create an empty accumulator.
    pub fn new() -> LogAccumulator {
        LogAccumulator {
            count: 0,
            log_sum: f64::NEG_INFINITY,
            log_sum_sq: f64::NEG_INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    /// Create an accumulator from a first batch of log values.
    pub fn from_log_values(values: &[f64]) -> LogAccumulator {
        let mut acc = LogAccumulator::new();
        acc.fold(values);
        acc
    }

    /// Add a batch of log values to the accumulator.
    pub fn fold(&mut self, values: &[f64]) {
        let mut max = f64::NEG_INFINITY;
        let mut n = 0;
        for v in values {
            if v.is_nan() || *v == f64::INFINITY {
                continue;
            }
            max = max.max(*v);
            n += 1;
        }

        if n == 0 {
            return;
        }

        self.count += n;
        if max == f64::NEG_INFINITY {
            return;
        }

        let (mut sum, mut sum_sq) = (0., 0.);
        for v in values {
            if v.is_nan() || *v == f64::INFINITY {
                continue;
            }
            let e = (v - max).exp();
            sum += e;
            sum_sq += e * e;
        }

        self.log_sum = log_add_exp(self.log_sum, max + sum.ln());
        self.log_sum_sq = log_add_exp(self.log_sum_sq, 2. * max + sum_sq.ln());
        self.max = self.max.max(max);
    }

    /// The number of samples added.
    pub fn count(&self) -> usize {
        self.count
    }

    /// The largest log value added.
    pub fn max(&self) -> f64 {
        self.max
    }

    /// The log of the mean of `exp(x)`.
    pub fn log_mean(&self) -> f64 {
        if self.count == 0 {
            return f64::NEG_INFINITY;
        }
        self.log_sum - (self.count as f64).ln()
    }

    /// The log of the variance of the mean of `exp(x)`.
    pub fn log_variance_of_mean(&self) -> f64 {
        if self.count < 2 {
            return f64::NEG_INFINITY;
        }

        let ln_n = (self.count as f64).ln();
        let second = self.log_sum_sq - ln_n;
        let first_sq = 2. * (self.log_sum - ln_n);
        if first_sq >= second {
            return f64::NEG_INFINITY;
        }

        second + (-(first_sq - second).exp()).ln_1p() - ((self.count - 1) as f64).ln()
    }
}

/// Format `mean ± sdev` as `mean(sdev)`, where the error is given with two significant digits
/// in units of the last digit of the mean. Very small or large numbers are written
/// with a shared exponent, for example `1.500(20)e-7`.
pub fn format_uncertainty(mean: f64, sdev: f64) -> String {
    if mean.is_nan() || sdev.is_nan() {
        return format!("{:e} ± {:e}", mean, sdev);
    }
    if mean.is_infinite() || sdev.is_infinite() {
        return format!("{} ± {}", mean, sdev);
    }
    if sdev <= 0. {
        return format!("{}(0)", mean);
    }
    if mean != 0. && sdev > 1e4 * mean.abs() {
        return format!("{:.1e} ± {:.2e}", mean, sdev);
    }

    let scale = mean.abs().max(sdev);
    if !(1e-5..1e6).contains(&scale) {
        let exponent = scale.log10().floor() as i32;
        let fac = 10f64.powi(exponent);
        return format!("{}e{}", format_uncertainty(mean / fac, sdev / fac), exponent);
    }

    let decimals = (1 - sdev.log10().floor() as i32).max(0) as usize;
    if decimals == 0 {
        format!("{:.0}({:.0})", mean, sdev)
    } else {
        let digits = (sdev * 10f64.powi(decimals as i32)).round();
        format!("{:.*}({:.0})", decimals, mean, digits)
    }
}

#[cfg(test)]
mod test {
    use super::{format_uncertainty, log_add_exp, LogAccumulator};

    #[test]
    fn add_exp() {
        assert!((log_add_exp(0., 0.) - 2f64.ln()).abs() < 1e-15);
        assert_eq!(log_add_exp(f64::NEG_INFINITY, 3.), 3.);
        assert!((log_add_exp(800., 700.) - 800.).abs() < 1e-12);
    }

    #[test]
    fn running_mean() {
        let values = [0f64.ln(), 1f64.ln(), 2f64.ln(), 3f64.ln()];
        let mut acc = LogAccumulator::from_log_values(&values[..2]);
        acc.fold(&values[2..]);
        acc.fold(&[f64::NAN, f64::INFINITY]);

        assert_eq!(acc.count(), 4);
        assert!((acc.log_mean() - 1.5f64.ln()).abs() < 1e-12);

        // sample variance of [0, 1, 2, 3] is 5/3, the variance of the mean is 5/12
        assert!((acc.log_variance_of_mean() - (5. / 12f64).ln()).abs() < 1e-12);
        assert_eq!(acc.max(), 3f64.ln());
    }

    #[test]
    fn empty() {
        let acc = LogAccumulator::from_log_values(&[]);
        assert_eq!(acc.count(), 0);
        assert_eq!(acc.log_mean(), f64::NEG_INFINITY);
        assert_eq!(acc.log_variance_of_mean(), f64::NEG_INFINITY);

        let zeros = LogAccumulator::from_log_values(&[f64::NEG_INFINITY; 3]);
        assert_eq!(zeros.count(), 3);
        assert_eq!(zeros.log_mean(), f64::NEG_INFINITY);
    }

    #[test]
    fn uncertainty() {
        assert_eq!(format_uncertainty(1.5, 0.25), "1.50(25)");
        assert_eq!(format_uncertainty(100., 12.), "100(12)");
        assert_eq!(format_uncertainty(1.5e-7, 2e-9), "1.500(20)e-7");
        assert_eq!(format_uncertainty(2., 0.), "2(0)");
        assert_eq!(format_uncertainty(1., f64::INFINITY), "1 ± inf");
    }
}
