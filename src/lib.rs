//! A quasi-Newton minimizer built on a dogleg trust region with BFGS updates.
#![cfg_attr(feature = "unstable-bench", feature(test))]
//!
//! This crate minimizes smooth, unconstrained objectives `f: R^n -> R`. Each
//! outer iteration solves a trust-region subproblem against the current
//! quadratic model, then corrects both the Hessian approximation `B` and the
//! inverse approximation `Binv` with their own rank-2 secant formulas, in the
//! spirit of "Numerical Optimization" by Nocedal & Wright.
//!
//! # Features
//! - Dogleg steps: the quasi-Newton point when it fits the region, otherwise the
//!   Cauchy point cut to the boundary, otherwise the boundary crossing of the
//!   path between them.
//! - Trust-region radius adapted from the ratio of actual to predicted
//!   reduction; every knob is in [`TrustRegionConfig`].
//! - Forward, backward and central finite-difference gradients, or an exact
//!   gradient through [`AnalyticGradient`] / any [`GradientEstimator`].
//! - An alternative step strategy: parabolic line search along the normalized
//!   quasi-Newton direction ([`StepStrategy::ParabolicLineSearch`]).
//! - Plain-data [`SolveOptions`] that can be loaded with serde.
//!
//! ## Defaults
//! - Tolerance `1e-8`, at most `1000` outer iterations.
//! - Central differences with step `1e-4`.
//! - Trust region: initial radius `0.1`, maximum radius `1`, inner tolerance
//!   `1e-6`, at most `10000` inner iterations.
//!
//! # Example
//!
//! ```
//! use dogleg_bfgs::{AnalyticGradient, Bfgs, BfgsSolution};
//! use ndarray::{array, Array1};
//!
//! // A skewed quadratic bowl with its minimum at the origin.
//! let f = |x: &Array1<f64>| x[0].powi(2) - 2.0 * x[0] * x[1] + 4.0 * x[1].powi(2);
//! let grad = AnalyticGradient(|x: &Array1<f64>, g: &mut Array1<f64>| {
//!     g[0] = 2.0 * x[0] - 2.0 * x[1];
//!     g[1] = -2.0 * x[0] + 8.0 * x[1];
//! });
//!
//! let BfgsSolution {
//!     final_point,
//!     final_value,
//!     valid_solution,
//!     iterations,
//!     ..
//! } = Bfgs::new(array![-3.0, 1.0], f)
//!     .with_gradient(grad)
//!     .with_tolerance(1e-11)
//!     .run()
//!     .expect("solver failed");
//!
//! println!("f({final_point}) = {final_value:.3e} after {iterations} iterations");
//! assert!(valid_solution);
//! assert!(final_value <= 1e-11);
//! assert!(final_point[0].abs() < 1e-5);
//! ```

pub mod gradient;
pub mod line_search;
pub mod linalg;
pub mod secant;
pub mod trust_region;

#[cfg(all(test, feature = "unstable-bench"))]
mod benchmark;

pub use gradient::{AnalyticGradient, DifferenceScheme, FiniteDifference, GradientEstimator};
pub use line_search::parabolic_line_search;
pub use secant::{update_hessian, update_hessian_inverse};
pub use trust_region::{
    compute_trust_region, dogleg_step, DoglegStep, TrustRegionConfig, TrustRegionReport,
    TrustRegionWorkspace,
};

use linalg::{axpy, copy, gemv, scal, scaled_copy};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::mem;

/// An error type for clear diagnostics.
#[derive(Debug, thiserror::Error)]
pub enum BfgsError {
    #[error("Dimension mismatch: expected length {expected}, found {found}.")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("Index {index} is out of bounds for length {len}.")]
    IndexOutOfBounds { index: usize, len: usize },
    #[error(
        "The trust region did not converge within {max_iterations} iterations (gradient norm {gradient_norm:e})."
    )]
    TrustRegionExhausted {
        /// The inner iteration cap that was hit.
        max_iterations: usize,
        /// The gradient norm at the last inner iterate.
        gradient_norm: f64,
    },
    #[error("The secant update hit a degenerate curvature denominator ({denominator:e}).")]
    DegenerateCurvature { denominator: f64 },
    #[error(
        "The dogleg interpolation produced a negative discriminant ({discriminant:e}); the model is inconsistent."
    )]
    NegativeDiscriminant { discriminant: f64 },
    #[error(
        "The line search failed to bracket a minimum after {max_attempts} attempts. The objective may be unbounded along the search direction."
    )]
    LineSearchFailed { max_attempts: usize },
    #[error("The gradient norm was NaN or infinity, indicating numerical instability.")]
    GradientIsNaN,
    #[error("Invalid solver options: {0}")]
    InvalidOptions(String),
}

/// A summary of an optimization run.
///
/// Running out of outer iterations is not an error: the last point is
/// reported with `valid_solution == false`.
#[derive(Debug, Clone)]
pub struct BfgsSolution {
    /// The point the solver stopped at.
    pub final_point: Array1<f64>,
    /// The objective value at `final_point`.
    pub final_value: f64,
    /// The norm of the gradient estimate at `final_point`.
    pub final_gradient_norm: f64,
    /// The number of outer iterations performed.
    pub iterations: usize,
    /// The total number of objective evaluations, including those made by
    /// finite differencing.
    pub func_evals: usize,
    /// The total number of gradient estimates.
    pub grad_evals: usize,
    /// Whether either stopping criterion was met.
    pub valid_solution: bool,
}

/// Finite-difference settings used when no custom estimator is supplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradientStrategy {
    pub scheme: DifferenceScheme,
    /// See [`Bfgs::with_difference_scheme`] for the limit on one-sided steps.
    pub step_size: f64,
}

impl Default for GradientStrategy {
    fn default() -> Self {
        Self {
            scheme: DifferenceScheme::Central,
            step_size: 1e-4,
        }
    }
}

/// How each outer iteration moves from the current point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStrategy {
    /// Dogleg trust-region solve against the current `(B, Binv)` model.
    #[default]
    TrustRegion,
    /// Parabolic line search along `-Binv g / ||g||`.
    ParabolicLineSearch,
}

/// All solver settings as plain data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolveOptions {
    /// Threshold for both the objective change and the gradient norm.
    pub tolerance: f64,
    pub max_iterations: usize,
    pub gradient: GradientStrategy,
    pub step_strategy: StepStrategy,
    pub trust_region: TrustRegionConfig,
    /// Doubling cap for [`StepStrategy::ParabolicLineSearch`].
    pub line_search_max_attempts: usize,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            tolerance: 1e-8,
            max_iterations: 1000,
            gradient: GradientStrategy::default(),
            step_strategy: StepStrategy::default(),
            trust_region: TrustRegionConfig::default(),
            line_search_max_attempts: 100,
        }
    }
}

impl SolveOptions {
    /// Checks the settings without running anything.
    pub fn validate(&self) -> Result<(), BfgsError> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(BfgsError::InvalidOptions(format!(
                "tolerance must be positive and finite, got {}",
                self.tolerance
            )));
        }
        let h = self.gradient.step_size;
        if !(h.is_finite() && h > 0.0) {
            return Err(BfgsError::InvalidOptions(format!(
                "finite-difference step must be positive and finite, got {h}"
            )));
        }
        if self.line_search_max_attempts == 0 {
            return Err(BfgsError::InvalidOptions(
                "line_search_max_attempts must be at least 1".to_string(),
            ));
        }
        self.trust_region.validate()
    }
}

/// A configurable quasi-Newton solver.
///
/// `Grad` is the gradient estimator installed with [`Bfgs::with_gradient`].
/// Without one, a [`FiniteDifference`] estimator is built from
/// [`SolveOptions::gradient`] when the solver runs.
pub struct Bfgs<ObjFn, Grad = FiniteDifference> {
    x0: Array1<f64>,
    obj_fn: ObjFn,
    options: SolveOptions,
    gradient: Option<Grad>,
}

impl<ObjFn> Bfgs<ObjFn, FiniteDifference>
where
    ObjFn: FnMut(&Array1<f64>) -> f64,
{
    /// Creates a new solver.
    ///
    /// # Arguments
    /// * `x0` - The initial guess for the minimum.
    /// * `obj_fn` - The objective function.
    pub fn new(x0: Array1<f64>, obj_fn: ObjFn) -> Self {
        Self {
            x0,
            obj_fn,
            options: SolveOptions::default(),
            gradient: None,
        }
    }
}

impl<ObjFn, Grad> Bfgs<ObjFn, Grad>
where
    ObjFn: FnMut(&Array1<f64>) -> f64,
    Grad: GradientEstimator,
{
    /// Sets the convergence tolerance (default: 1e-8).
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.options.tolerance = tolerance;
        self
    }

    /// Sets the maximum number of outer iterations (default: 1000).
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.options.max_iterations = max_iterations;
        self
    }

    /// Selects the finite-difference formula and step. Ignored once a custom
    /// estimator is installed.
    ///
    /// A one-sided scheme biases each component by about `h·|f''|/2`, and the
    /// trust region cannot drive the estimate below that bias. Keep
    /// `h·|f''| < 2·trust_region.tolerance` or the solve fails with
    /// [`BfgsError::TrustRegionExhausted`]; with the default tolerance of `1e-6`
    /// a step of `1e-4` is already too large. The central scheme's bias is
    /// second order in `h`.
    pub fn with_difference_scheme(mut self, scheme: DifferenceScheme, step_size: f64) -> Self {
        self.options.gradient = GradientStrategy { scheme, step_size };
        self
    }

    pub fn with_step_strategy(mut self, strategy: StepStrategy) -> Self {
        self.options.step_strategy = strategy;
        self
    }

    pub fn with_trust_region(mut self, config: TrustRegionConfig) -> Self {
        self.options.trust_region = config;
        self
    }

    /// Replaces every setting at once.
    pub fn with_options(mut self, options: SolveOptions) -> Self {
        self.options = options;
        self
    }

    /// Installs a gradient estimator, e.g. an [`AnalyticGradient`].
    pub fn with_gradient<E: GradientEstimator>(self, estimator: E) -> Bfgs<ObjFn, E> {
        Bfgs {
            x0: self.x0,
            obj_fn: self.obj_fn,
            options: self.options,
            gradient: Some(estimator),
        }
    }

    pub fn options(&self) -> &SolveOptions {
        &self.options
    }

    /// Executes the optimization.
    pub fn run(&mut self) -> Result<BfgsSolution, BfgsError> {
        self.options.validate()?;
        if self.x0.is_empty() {
            return Err(BfgsError::InvalidOptions(
                "initial point must not be empty".to_string(),
            ));
        }
        match self.gradient.as_mut() {
            Some(estimator) => minimize(&self.x0, &mut self.obj_fn, estimator, &self.options),
            None => {
                let GradientStrategy { scheme, step_size } = self.options.gradient;
                let mut estimator = FiniteDifference::new(scheme, step_size, self.x0.len());
                minimize(&self.x0, &mut self.obj_fn, &mut estimator, &self.options)
            }
        }
    }
}

fn skip_degenerate(
    result: Result<(), BfgsError>,
    which: &str,
    iteration: usize,
) -> Result<(), BfgsError> {
    match result {
        Err(BfgsError::DegenerateCurvature { denominator }) => {
            log::warn!(
                "[BFGS] iter {iteration}: {which} update skipped (denominator {denominator:e})"
            );
            Ok(())
        }
        other => other,
    }
}

fn finite_gradient_norm(grad_norm: f64, iteration: usize) -> Result<f64, BfgsError> {
    if grad_norm.is_finite() {
        Ok(grad_norm)
    } else {
        log::warn!("[BFGS] iter {iteration}: gradient norm is {grad_norm}; aborting.");
        Err(BfgsError::GradientIsNaN)
    }
}

/// The outer quasi-Newton loop.
fn minimize<ObjFn, E>(
    x_start: &Array1<f64>,
    obj_fn: &mut ObjFn,
    estimator: &mut E,
    options: &SolveOptions,
) -> Result<BfgsSolution, BfgsError>
where
    ObjFn: FnMut(&Array1<f64>) -> f64,
    E: GradientEstimator,
{
    let n = x_start.len();
    let tol = options.tolerance;

    let func_evals = Cell::new(0usize);
    let mut f = |x: &Array1<f64>| {
        func_evals.set(func_evals.get() + 1);
        obj_fn(x)
    };
    let mut grad_evals = 0;

    // Current/next buffers, swapped at the end of each iteration.
    let mut x0 = x_start.clone();
    let mut x1 = Array1::<f64>::zeros(n);
    let mut g0 = Array1::<f64>::zeros(n);
    let mut g1 = Array1::<f64>::zeros(n);
    let mut dx = Array1::<f64>::zeros(n);
    let mut y = Array1::<f64>::zeros(n);
    let mut direction = Array1::<f64>::zeros(n);
    let mut b = Array2::<f64>::eye(n);
    let mut b_inv = Array2::<f64>::eye(n);
    let mut workspace = TrustRegionWorkspace::new(n);

    let mut f0 = f64::INFINITY;
    let mut f1 = f(&x0);
    let mut grad_norm = finite_gradient_norm(estimator.estimate(&mut x0, &mut f, &mut g0)?, 0)?;
    grad_evals += 1;
    if grad_norm > 0.0 {
        scaled_copy(-1.0 / grad_norm, &g0, &mut direction)?;
    }

    let mut iterations = 0;
    while (f1 - f0).abs() > tol && grad_norm.abs() > tol && iterations < options.max_iterations {
        match options.step_strategy {
            StepStrategy::TrustRegion => {
                let report = compute_trust_region(
                    &options.trust_region,
                    &x0,
                    &mut f,
                    &mut *estimator,
                    &mut x1,
                    &b,
                    &b_inv,
                    &mut workspace,
                )?;
                grad_evals += report.iterations + 1;
            }
            StepStrategy::ParabolicLineSearch => {
                parabolic_line_search(
                    &x0,
                    &direction,
                    &mut x1,
                    &mut f,
                    options.line_search_max_attempts,
                )?;
            }
        }

        grad_norm = finite_gradient_norm(
            estimator.estimate(&mut x1, &mut f, &mut g1)?,
            iterations + 1,
        )?;
        grad_evals += 1;
        f0 = f1;
        f1 = f(&x1);

        copy(&x1, &mut dx)?;
        axpy(-1.0, &x0, &mut dx)?;
        copy(&g1, &mut y)?;
        axpy(-1.0, &g0, &mut y)?;

        skip_degenerate(
            update_hessian_inverse(&mut b_inv, &y, &dx),
            "inverse Hessian",
            iterations,
        )?;
        skip_degenerate(update_hessian(&mut b, &y, &dx), "Hessian", iterations)?;

        if grad_norm > 0.0 {
            gemv(1.0, &b_inv, &g1, 0.0, &mut direction)?;
            scal(-1.0 / grad_norm, &mut direction);
        } else {
            direction.fill(0.0);
        }

        mem::swap(&mut x0, &mut x1);
        mem::swap(&mut g0, &mut g1);
        iterations += 1;

        log::debug!(
            "[BFGS] iter {iterations}: f = {f1:.6e}, |df| = {:.3e}, |g| = {grad_norm:.3e}",
            (f1 - f0).abs()
        );
    }

    let valid_solution = (f1 - f0).abs() <= tol || grad_norm.abs() <= tol;
    if valid_solution {
        log::info!(
            "[BFGS] converged after {iterations} iterations: f = {f1:.6e}, |g| = {grad_norm:.3e}"
        );
    } else {
        log::warn!(
            "[BFGS] stopped after {iterations} iterations without meeting the tolerance {tol:e} (|g| = {grad_norm:.3e})"
        );
    }

    Ok(BfgsSolution {
        final_point: x0,
        final_value: f1,
        final_gradient_norm: grad_norm,
        iterations,
        func_evals: func_evals.get(),
        grad_evals,
        valid_solution,
    })
}
