use smartstring::alias::String as SmartString;
use thiserror::Error;

/// Errors that stop an integration before any sample is drawn, or that
/// signal a misbehaving integrand.
///
/// Numerical degeneracies such as an empty live set or non-finite integrand
/// values are not errors: the integrator recovers from them and records them
/// in its [Diagnostics](crate::integrator::Diagnostics).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IntegrationError {
    #[error("Invalid bounds for parameter {name}: left limit {left} must be smaller than right limit {right}")]
    InvalidBounds {
        name: SmartString,
        left: f64,
        right: f64,
    },
    #[error("Parameter group ({names}) has {names_len} names but {left} left and {right} right limits")]
    GroupLengthMismatch {
        names: SmartString,
        names_len: usize,
        left: usize,
        right: usize,
    },
    #[error("Parameter {0} is already registered")]
    DuplicateParameter(SmartString),
    #[error("No parameters registered")]
    NoParameters,
    #[error("Parameter {name} has an unbounded domain and cannot be sampled uniformly")]
    UnboundedDomain { name: SmartString },
    #[error("Invalid value for option {option}: {reason}")]
    InvalidOption {
        option: &'static str,
        reason: String,
    },
    #[error("Could not parse options: {0}")]
    OptionParse(String),
    #[error("Integrand returned {found} values for a batch of {expected} samples")]
    IntegrandShape { expected: usize, found: usize },
}
