//! Gradient estimation.
//!
//! A [`GradientEstimator`] fills a gradient buffer for the current point and
//! returns its Euclidean norm. The finite-difference estimator perturbs one
//! coordinate of `x` at a time and restores it before moving on, so callers
//! see `x` unchanged when the call returns. It needs `&mut` access to the
//! point for the duration of the call and nobody else may read it meanwhile.

use crate::linalg::{hypot, nrm2};
use crate::BfgsError;
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Which finite-difference formula to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifferenceScheme {
    /// `(f(x + h e_i) - f(x)) / h`
    Forward,
    /// `(f(x) - f(x - h e_i)) / h`
    Backward,
    /// `(f(x + h e_i) - f(x - h e_i)) / 2h`
    #[default]
    Central,
}

/// Produces a gradient estimate at `x` and returns its 2-norm.
pub trait GradientEstimator {
    fn estimate<F>(
        &mut self,
        x: &mut Array1<f64>,
        f: &mut F,
        grad: &mut Array1<f64>,
    ) -> Result<f64, BfgsError>
    where
        F: FnMut(&Array1<f64>) -> f64;
}

/// Constant-step finite differences.
#[derive(Debug, Clone)]
pub struct FiniteDifference {
    scheme: DifferenceScheme,
    steps: Array1<f64>,
}

impl FiniteDifference {
    /// Uses the same step `delta` for each of the `n` coordinates.
    pub fn new(scheme: DifferenceScheme, delta: f64, n: usize) -> Self {
        Self {
            scheme,
            steps: Array1::from_elem(n, delta),
        }
    }

    pub fn forward(delta: f64, n: usize) -> Self {
        Self::new(DifferenceScheme::Forward, delta, n)
    }

    pub fn backward(delta: f64, n: usize) -> Self {
        Self::new(DifferenceScheme::Backward, delta, n)
    }

    pub fn central(delta: f64, n: usize) -> Self {
        Self::new(DifferenceScheme::Central, delta, n)
    }

    pub fn scheme(&self) -> DifferenceScheme {
        self.scheme
    }

    pub fn dimension(&self) -> usize {
        self.steps.len()
    }
}

impl GradientEstimator for FiniteDifference {
    fn estimate<F>(
        &mut self,
        x: &mut Array1<f64>,
        f: &mut F,
        grad: &mut Array1<f64>,
    ) -> Result<f64, BfgsError>
    where
        F: FnMut(&Array1<f64>) -> f64,
    {
        let n = self.steps.len();
        if x.len() != n {
            return Err(BfgsError::DimensionMismatch {
                expected: n,
                found: x.len(),
            });
        }
        if grad.len() != n {
            return Err(BfgsError::DimensionMismatch {
                expected: n,
                found: grad.len(),
            });
        }

        let mut norm = 0.0;
        match self.scheme {
            DifferenceScheme::Forward => {
                let fx0 = f(x);
                for i in 0..n {
                    let xi = x[i];
                    let h = self.steps[i];
                    x[i] = xi + h;
                    let fxh = f(x);
                    x[i] = xi;
                    grad[i] = (fxh - fx0) / h;
                    norm = hypot(norm, grad[i]);
                }
            }
            DifferenceScheme::Backward => {
                let fx0 = f(x);
                for i in 0..n {
                    let xi = x[i];
                    let h = self.steps[i];
                    x[i] = xi - h;
                    let fxh = f(x);
                    x[i] = xi;
                    grad[i] = (fx0 - fxh) / h;
                    norm = hypot(norm, grad[i]);
                }
            }
            DifferenceScheme::Central => {
                for i in 0..n {
                    let xi = x[i];
                    let h = self.steps[i];
                    x[i] = xi + h;
                    let f_plus = f(x);
                    x[i] = xi - h;
                    let f_minus = f(x);
                    x[i] = xi;
                    grad[i] = (f_plus - f_minus) / (2.0 * h);
                    norm = hypot(norm, grad[i]);
                }
            }
        }
        Ok(norm)
    }
}

/// Wraps a closure that writes the exact gradient of the objective into its
/// second argument.
pub struct AnalyticGradient<G>(pub G);

impl<G> GradientEstimator for AnalyticGradient<G>
where
    G: FnMut(&Array1<f64>, &mut Array1<f64>),
{
    fn estimate<F>(
        &mut self,
        x: &mut Array1<f64>,
        _f: &mut F,
        grad: &mut Array1<f64>,
    ) -> Result<f64, BfgsError>
    where
        F: FnMut(&Array1<f64>) -> f64,
    {
        if grad.len() != x.len() {
            return Err(BfgsError::DimensionMismatch {
                expected: x.len(),
                found: grad.len(),
            });
        }
        (self.0)(x, grad);
        Ok(nrm2(grad))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};
    use spectral::prelude::*;

    // f(x, y) = x^3 + 2 x y^2, grad = (3x^2 + 2y^2, 4xy)
    fn cubic(x: &Array1<f64>) -> f64 {
        x[0].powi(3) + 2.0 * x[0] * x[1].powi(2)
    }

    fn cubic_grad(x: &Array1<f64>) -> Array1<f64> {
        array![3.0 * x[0].powi(2) + 2.0 * x[1].powi(2), 4.0 * x[0] * x[1]]
    }

    fn estimate_error(mut estimator: FiniteDifference, point: &Array1<f64>) -> f64 {
        let mut x = point.clone();
        let mut grad = Array1::zeros(x.len());
        let mut f = cubic;
        estimator.estimate(&mut x, &mut f, &mut grad).unwrap();
        let err = &grad - &cubic_grad(point);
        err.dot(&err).sqrt()
    }

    #[test]
    fn test_every_scheme_fills_gradient_and_norm() {
        let point = array![1.0, 2.0];
        for scheme in [
            DifferenceScheme::Forward,
            DifferenceScheme::Backward,
            DifferenceScheme::Central,
        ] {
            let mut x = point.clone();
            let mut grad = Array1::zeros(2);
            let mut f = cubic;
            let norm = FiniteDifference::new(scheme, 1e-6, 2)
                .estimate(&mut x, &mut f, &mut grad)
                .unwrap();
            assert_that!(&grad[0]).is_close_to(11.0, 1e-4);
            assert_that!(&grad[1]).is_close_to(8.0, 1e-4);
            assert_that!(&norm).is_close_to(grad.dot(&grad).sqrt(), 1e-12);
        }
    }

    #[test]
    fn test_central_error_is_second_order() {
        let point = array![1.0, 2.0];
        let h = 1e-3;
        let forward = estimate_error(FiniteDifference::forward(h, 2), &point);
        let backward = estimate_error(FiniteDifference::backward(h, 2), &point);
        let central = estimate_error(FiniteDifference::central(h, 2), &point);

        // O(h) for the one-sided schemes, O(h^2) for central.
        assert_that!(&forward).is_greater_than(h);
        assert_that!(&backward).is_greater_than(h);
        assert_that!(&central).is_less_than(10.0 * h * h);
        assert_that!(&central).is_less_than(forward);
        assert_that!(&central).is_less_than(backward);

        // Halving h roughly halves the forward error and quarters the central one.
        let forward_half = estimate_error(FiniteDifference::forward(h / 2.0, 2), &point);
        let central_half = estimate_error(FiniteDifference::central(h / 2.0, 2), &point);
        assert_that!(&(forward / forward_half)).is_close_to(2.0, 0.1);
        assert_that!(&(central / central_half)).is_close_to(4.0, 0.2);
    }

    #[test]
    fn test_point_is_restored_and_evaluations_counted() {
        let point = array![0.3, -1.7, 2.5];
        let mut calls = 0;
        let mut f = |x: &Array1<f64>| {
            calls += 1;
            x.dot(x)
        };

        let mut x = point.clone();
        let mut grad = Array1::zeros(3);
        FiniteDifference::forward(1e-5, 3)
            .estimate(&mut x, &mut f, &mut grad)
            .unwrap();
        FiniteDifference::central(1e-5, 3)
            .estimate(&mut x, &mut f, &mut grad)
            .unwrap();
        assert_eq!(x, point);
        // n + 1 for forward, 2n for central.
        assert_eq!(calls, 4 + 6);
    }

    #[test]
    fn test_dimension_mismatch_is_reported() {
        let mut f = |x: &Array1<f64>| x.sum();
        let mut grad = Array1::zeros(3);
        let mut x = array![1.0, 2.0, 3.0, 4.0];
        let result = FiniteDifference::central(1e-4, 3).estimate(&mut x, &mut f, &mut grad);
        assert!(matches!(
            result,
            Err(BfgsError::DimensionMismatch {
                expected: 3,
                found: 4
            })
        ));

        let mut x3 = array![1.0, 2.0, 3.0];
        let mut short = Array1::zeros(2);
        assert!(FiniteDifference::forward(1e-4, 3)
            .estimate(&mut x3, &mut f, &mut short)
            .is_err());
    }

    #[test]
    fn test_analytic_gradient_passes_through() {
        let mut estimator = AnalyticGradient(|x: &Array1<f64>, g: &mut Array1<f64>| {
            g.assign(&cubic_grad(x));
        });
        let mut x = array![1.0, 2.0];
        let mut grad = Array1::zeros(2);
        let mut f = cubic;
        let norm = estimator.estimate(&mut x, &mut f, &mut grad).unwrap();
        assert_eq!(grad, array![11.0, 8.0]);
        assert_that!(&norm).is_close_to(185f64.sqrt(), 1e-12);
    }
}
