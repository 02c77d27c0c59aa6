//! Named integration dimensions with their domains and prior densities.

use std::{fmt, sync::Arc};

use ahash::AHashMap;
use smartstring::alias::String as SmartString;
use tracing::debug;

use crate::error::IntegrationError;

/// A prior density, evaluated on the components of one parameter (a single value for a scalar
/// parameter, or all components of a joint group in registration order).
pub type Prior = Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>;

/// The normalized uniform density on `[left, right]`.
pub fn uniform_prior(left: f64, right: f64) -> Prior {
    let density = 1. / (right - left);
    Arc::new(move |x: &[f64]| {
        if x.iter().all(|x| *x >= left && *x <= right) {
            density
        } else {
            0.
        }
    })
}

/// A registered parameter: either a single named dimension or a group of dimensions that share
/// one joint prior.
#[derive(Clone)]
pub struct Parameter {
    names: Vec<SmartString>,
    left: Vec<f64>,
    right: Vec<f64>,
    prior: Option<Prior>,
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameter")
            .field("names", &self.names)
            .field("left", &self.left)
            .field("right", &self.right)
            .field("prior", &self.prior.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl Parameter {
    /// The names of the dimensions of this parameter.
    pub fn names(&self) -> &[SmartString] {
        &self.names
    }

    /// The number of dimensions this parameter spans.
    pub fn dimensions(&self) -> usize {
        self.names.len()
    }

    pub fn left(&self) -> &[f64] {
        &self.left
    }

    pub fn right(&self) -> &[f64] {
        &self.right
    }

    /// Evaluate the prior on the components of this parameter. A parameter without
    /// a prior has density 1.
    #[inline]
    pub fn prior_density(&self, components: &[f64]) -> f64 {
        match &self.prior {
            Some(p) => p(components),
            None => 1.,
        }
    }

    fn label(&self) -> SmartString {
        if self.names.len() == 1 {
            self.names[0].clone()
        } else {
            let mut s = SmartString::new();
            for (i, n) in self.names.iter().enumerate() {
                if i > 0 {
                    s.push_str(", ");
                }
                s.push_str(n);
            }
            s
        }
    }
}

/// An ordered set of parameters that span the rectangular integration domain.
///
/// The order of registration fixes the column order of every sample batch. Each dimension
/// can also be looked up by name, see [`ParameterSpace::index_of`].
#[derive(Clone, Debug, Default)]
pub struct ParameterSpace {
    parameters: Vec<Parameter>,
    names: Vec<SmartString>,
    index: AHashMap<SmartString, usize>,
}

impl ParameterSpace {
    pub fn new() -> ParameterSpace {
        ParameterSpace::default()
    }

    /// Register a scalar parameter `name` with an optional `prior` on the inclusive
    /// domain `[left, right]`.
    ///
    /// Infinite limits are accepted here, but an integration over them will fail.
    pub fn add_parameter(
        &mut self,
        name: &str,
        prior: Option<Prior>,
        left: f64,
        right: f64,
    ) -> Result<(), IntegrationError> {
        self.add_group(&[name], prior, &[left], &[right])
    }

    /// Register a group of dimensions `names` that are sampled together and share the
    /// joint `prior`. The limits are given per component.
    pub fn add_group(
        &mut self,
        names: &[&str],
        prior: Option<Prior>,
        left: &[f64],
        right: &[f64],
    ) -> Result<(), IntegrationError> {
        let parameter = Parameter {
            names: names.iter().map(|n| SmartString::from(*n)).collect(),
            left: left.to_vec(),
            right: right.to_vec(),
            prior,
        };

        if names.is_empty() || names.len() != left.len() || names.len() != right.len() {
            return Err(IntegrationError::GroupLengthMismatch {
                names: parameter.label(),
                names_len: names.len(),
                left: left.len(),
                right: right.len(),
            });
        }

        for ((n, l), r) in parameter.names.iter().zip(left).zip(right) {
            // also rejects NaN limits
            if !(l < r) {
                return Err(IntegrationError::InvalidBounds {
                    name: n.clone(),
                    left: *l,
                    right: *r,
                });
            }

            if self.index.contains_key(n) || parameter.names.iter().filter(|x| *x == n).count() > 1
            {
                return Err(IntegrationError::DuplicateParameter(n.clone()));
            }
        }

        debug!(
            "Adding parameter ({}) with limits {:?} {:?}",
            parameter.label(),
            left,
            right
        );

        for n in &parameter.names {
            self.index.insert(n.clone(), self.names.len());
            self.names.push(n.clone());
        }
        self.parameters.push(parameter);

        Ok(())
    }

    /// Remove all registered parameters.
    pub fn clear(&mut self) {
        self.parameters.clear();
        self.names.clear();
        self.index.clear();
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// The names of all dimensions, in column order.
    pub fn names(&self) -> &[SmartString] {
        &self.names
    }

    /// The total number of dimensions.
    pub fn dimensions(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// The column of the dimension called `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// The `[left, right]` limits of every dimension, in column order.
    pub fn domain_bounds(&self) -> Vec<[f64; 2]> {
        self.parameters
            .iter()
            .flat_map(|p| p.left.iter().zip(&p.right).map(|(l, r)| [*l, *r]))
            .collect()
    }

    /// Check that every dimension has a finite domain, which is required for uniform sampling.
    pub fn check_bounded(&self) -> Result<(), IntegrationError> {
        if self.is_empty() {
            return Err(IntegrationError::NoParameters);
        }

        for (n, [l, r]) in self.names.iter().zip(self.domain_bounds()) {
            if !l.is_finite() || !r.is_finite() {
                return Err(IntegrationError::UnboundedDomain { name: n.clone() });
            }
        }
        Ok(())
    }

    /// Evaluate the product of all priors on a single sample `row`.
    pub fn prior_density_row(&self, row: &[f64]) -> f64 {
        let mut offset = 0;
        let mut p = 1.;
        for param in &self.parameters {
            let d = param.dimensions();
            p *= param.prior_density(&row[offset..offset + d]);
            offset += d;
        }
        p
    }

    /// Evaluate the product of all priors on every row of the row-major `points`.
    pub fn prior_density(&self, points: &[f64]) -> Vec<f64> {
        let ndim = self.dimensions();
        if ndim == 0 {
            return vec![];
        }

        points
            .chunks_exact(ndim)
            .map(|row| self.prior_density_row(row))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use crate::error::IntegrationError;

    use super::{uniform_prior, ParameterSpace};

    #[test]
    fn bounds_in_order() {
        let mut space = ParameterSpace::new();
        space.add_parameter("x", None, 0., 1.).unwrap();
        space
            .add_group(&["ra", "dec"], None, &[0., -1.5], &[6.2, 1.5])
            .unwrap();
        space.add_parameter("z", None, -2., 3.).unwrap();

        assert_eq!(space.dimensions(), 4);
        assert_eq!(
            space.domain_bounds(),
            vec![[0., 1.], [0., 6.2], [-1.5, 1.5], [-2., 3.]]
        );
        assert_eq!(space.index_of("dec"), Some(2));
        assert_eq!(space.index_of("y"), None);
    }

    #[test]
    fn malformed_bounds() {
        let mut space = ParameterSpace::new();
        assert!(matches!(
            space.add_parameter("x", None, 1., 1.),
            Err(IntegrationError::InvalidBounds { .. })
        ));
        assert!(matches!(
            space.add_parameter("x", None, 2., 1.),
            Err(IntegrationError::InvalidBounds { .. })
        ));
        assert!(matches!(
            space.add_parameter("x", None, f64::NAN, 1.),
            Err(IntegrationError::InvalidBounds { .. })
        ));
        assert!(matches!(
            space.add_group(&["a", "b"], None, &[0.], &[1., 2.]),
            Err(IntegrationError::GroupLengthMismatch { .. })
        ));
        assert!(space.is_empty());
    }

    #[test]
    fn duplicate_names() {
        let mut space = ParameterSpace::new();
        space.add_parameter("x", None, 0., 1.).unwrap();
        assert_eq!(
            space.add_parameter("x", None, 0., 1.),
            Err(IntegrationError::DuplicateParameter("x".into()))
        );
        assert!(space.add_group(&["y", "y"], None, &[0., 0.], &[1., 1.]).is_err());
        assert_eq!(space.dimensions(), 1);
    }

    #[test]
    fn unbounded() {
        let mut space = ParameterSpace::new();
        assert_eq!(space.check_bounded(), Err(IntegrationError::NoParameters));
        space.add_parameter("x", None, 0., f64::INFINITY).unwrap();
        assert!(matches!(
            space.check_bounded(),
            Err(IntegrationError::UnboundedDomain { .. })
        ));
    }

    #[test]
    fn prior_product() {
        let mut space = ParameterSpace::new();
        space
            .add_parameter("x", Some(uniform_prior(0., 2.)), 0., 2.)
            .unwrap();
        space
            .add_group(
                &["a", "b"],
                Some(Arc::new(|c: &[f64]| c[0] + c[1])),
                &[0., 0.],
                &[1., 1.],
            )
            .unwrap();
        space.add_parameter("flat", None, 0., 10.).unwrap();

        let points = [1., 0.25, 0.5, 3., 0.5, 0.5, 0.5, 7.];
        let p = space.prior_density(&points);
        assert_eq!(p, vec![0.5 * 0.75, 0.5 * 1.]);

        space.clear();
        assert!(space.is_empty());
        assert_eq!(space.index_of("x"), None);
    }
}
