//! Dogleg trust-region inner solver.
//!
//! [`dogleg_step`] approximately minimizes the local model
//! `m(p) = g^T p + 0.5 p^T B p` over the ball `||p|| <= radius`, and
//! [`compute_trust_region`] drives it from a starting point until the gradient
//! norm drops below [`TrustRegionConfig::tolerance`], adapting the radius from
//! the ratio of actual to predicted reduction.

use crate::gradient::GradientEstimator;
use crate::linalg::{axpy, copy, dot, gemv, nrm2, scaled_copy};
use crate::BfgsError;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Tunables of the trust-region driver and dogleg step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustRegionConfig {
    /// Gradient-norm target for the inner loop (also the slack used when
    /// deciding whether a step reached the boundary).
    pub tolerance: f64,
    pub initial_radius: f64,
    /// Upper bound on the radius when it grows.
    pub max_radius: f64,
    /// Steps with a reduction ratio above this are accepted.
    pub acceptance_ratio: f64,
    /// Upper clamp for the dogleg path parameter.
    pub eta_max: f64,
    /// Ratio below which the radius shrinks.
    pub shrink_below: f64,
    pub shrink_factor: f64,
    /// Ratio above which a boundary step grows the radius.
    pub grow_above: f64,
    pub grow_factor: f64,
    /// Runaway guard. Reaching it aborts the whole solve.
    pub max_iterations: usize,
}

impl Default for TrustRegionConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            initial_radius: 0.1,
            max_radius: 1.0,
            acceptance_ratio: 1.0 / 16.0,
            eta_max: 2.0,
            shrink_below: 0.25,
            shrink_factor: 0.25,
            grow_above: 0.75,
            grow_factor: 2.0,
            max_iterations: 10_000,
        }
    }
}

impl TrustRegionConfig {
    pub(crate) fn validate(&self) -> Result<(), BfgsError> {
        let positive = |name: &str, v: f64| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(BfgsError::InvalidOptions(format!(
                    "trust region {name} must be positive and finite, got {v}"
                )))
            }
        };
        positive("tolerance", self.tolerance)?;
        positive("initial_radius", self.initial_radius)?;
        positive("max_radius", self.max_radius)?;
        positive("eta_max", self.eta_max)?;
        positive("shrink_factor", self.shrink_factor)?;
        positive("grow_factor", self.grow_factor)?;
        if self.shrink_factor >= 1.0 {
            return Err(BfgsError::InvalidOptions(format!(
                "trust region shrink_factor must be below 1, got {}",
                self.shrink_factor
            )));
        }
        if self.max_iterations == 0 {
            return Err(BfgsError::InvalidOptions(
                "trust region max_iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Which part of the dogleg path produced the step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DoglegStep {
    /// The quasi-Newton step `-Binv g` fits inside the region.
    Newton,
    /// The steepest-descent (Cauchy) step, cut back to the boundary.
    Cauchy,
    /// A point on the path between the Cauchy and Newton points, with the
    /// path parameter that located it.
    Interpolated { eta: f64 },
}

/// Scratch vectors for the trust-region loop, sized once per solve.
#[derive(Debug, Clone)]
pub struct TrustRegionWorkspace {
    gradient: Array1<f64>,
    dx: Array1<f64>,
    xk: Array1<f64>,
    trial: Array1<f64>,
    newton: Array1<f64>,
    cauchy: Array1<f64>,
}

impl TrustRegionWorkspace {
    pub fn new(n: usize) -> Self {
        Self {
            gradient: Array1::zeros(n),
            dx: Array1::zeros(n),
            xk: Array1::zeros(n),
            trial: Array1::zeros(n),
            newton: Array1::zeros(n),
            cauchy: Array1::zeros(n),
        }
    }

    pub fn dimension(&self) -> usize {
        self.xk.len()
    }
}

/// Outcome of one trust-region solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrustRegionReport {
    pub iterations: usize,
    pub accepted_steps: usize,
    pub final_radius: f64,
    pub gradient_norm: f64,
}

/// Computes a dogleg step for gradient `g` into `dx`.
///
/// Allocates its two scratch vectors; the driver uses the same algorithm on
/// preallocated buffers.
pub fn dogleg_step(
    g: &Array1<f64>,
    b: &Array2<f64>,
    b_inv: &Array2<f64>,
    radius: f64,
    eta_max: f64,
    dx: &mut Array1<f64>,
) -> Result<DoglegStep, BfgsError> {
    let mut newton = Array1::zeros(g.len());
    let mut cauchy = Array1::zeros(g.len());
    dogleg_into(g, b, b_inv, radius, eta_max, dx, &mut newton, &mut cauchy)
}

#[allow(clippy::too_many_arguments)]
fn dogleg_into(
    g: &Array1<f64>,
    b: &Array2<f64>,
    b_inv: &Array2<f64>,
    radius: f64,
    eta_max: f64,
    dx: &mut Array1<f64>,
    newton: &mut Array1<f64>,
    cauchy: &mut Array1<f64>,
) -> Result<DoglegStep, BfgsError> {
    if dx.len() != g.len() {
        return Err(BfgsError::DimensionMismatch {
            expected: g.len(),
            found: dx.len(),
        });
    }

    // Newton point
    gemv(-1.0, b_inv, g, 0.0, newton)?;
    if nrm2(newton) <= radius {
        copy(newton, dx)?;
        return Ok(DoglegStep::Newton);
    }

    // Cauchy point; without positive curvature go straight to the boundary.
    gemv(1.0, b, g, 0.0, cauchy)?;
    let g_b_g = dot(g, cauchy)?;
    if g_b_g > 0.0 {
        scaled_copy(-dot(g, g)? / g_b_g, g, cauchy)?;
    } else {
        scaled_copy(-radius / nrm2(g), g, cauchy)?;
    }
    let cauchy_norm = nrm2(cauchy);
    if cauchy_norm >= radius {
        scaled_copy(radius / cauchy_norm, cauchy, dx)?;
        return Ok(DoglegStep::Cauchy);
    }

    // Boundary crossing of pu + tau (pb - pu):
    //   a tau^2 + b tau + c = 0 with
    //   a = |pb - pu|^2, b = 2 pu^T (pb - pu), c = |pu|^2 - r^2.
    let pb: &Array1<f64> = newton;
    let pu: &Array1<f64> = cauchy;
    let pb_pb = dot(pb, pb)?;
    let pb_pu = dot(pb, pu)?;
    let pu_pu = dot(pu, pu)?;
    let qa = pb_pb - 2.0 * pb_pu + pu_pu;
    let qb = 2.0 * (pb_pu - pu_pu);
    let qc = pu_pu - radius * radius;

    // c < 0 here since |pu| < r, so the discriminant is at least b^2.
    let disc = qb * qb - 4.0 * qa * qc;
    if disc < 0.0 {
        return Err(BfgsError::NegativeDiscriminant {
            discriminant: disc,
        });
    }
    // eta in [0, 1] walks to the Cauchy point, eta in [1, 2] on to Newton.
    let mut eta = 1.0 + (-qb + disc.sqrt()) / (2.0 * qa);
    if eta < 0.0 {
        eta = 0.0;
    } else if eta > eta_max {
        eta = eta_max;
    }

    if eta <= 1.0 {
        scaled_copy(eta, pu, dx)?;
    } else {
        scaled_copy(eta - 1.0, pb, dx)?;
        axpy(-(eta - 1.0), pu, dx)?;
        axpy(1.0, pu, dx)?;
    }
    Ok(DoglegStep::Interpolated { eta })
}

/// Runs the trust-region iteration from `x0` and writes the final point into
/// `x1`.
///
/// The radius restarts at [`TrustRegionConfig::initial_radius`] on every call.
/// `b` and `b_inv` are only read. Hitting
/// [`TrustRegionConfig::max_iterations`] before the gradient norm reaches the
/// tolerance is reported as [`BfgsError::TrustRegionExhausted`].
#[allow(clippy::too_many_arguments)]
pub fn compute_trust_region<F, G>(
    config: &TrustRegionConfig,
    x0: &Array1<f64>,
    f: &mut F,
    estimator: &mut G,
    x1: &mut Array1<f64>,
    b: &Array2<f64>,
    b_inv: &Array2<f64>,
    ws: &mut TrustRegionWorkspace,
) -> Result<TrustRegionReport, BfgsError>
where
    F: FnMut(&Array1<f64>) -> f64,
    G: GradientEstimator,
{
    let n = x0.len();
    if ws.dimension() != n {
        return Err(BfgsError::DimensionMismatch {
            expected: n,
            found: ws.dimension(),
        });
    }
    if x1.len() != n {
        return Err(BfgsError::DimensionMismatch {
            expected: n,
            found: x1.len(),
        });
    }

    ws.dx.fill(0.0);
    copy(x0, &mut ws.xk)?;

    let mut radius = config.initial_radius;
    let mut iterations = 0;
    let mut accepted_steps = 0;
    let mut grad_norm = estimator.estimate(&mut ws.xk, &mut *f, &mut ws.gradient)?;
    check_gradient_norm(grad_norm, iterations)?;

    while grad_norm > config.tolerance && iterations < config.max_iterations {
        let step = dogleg_into(
            &ws.gradient,
            b,
            b_inv,
            radius,
            config.eta_max,
            &mut ws.dx,
            &mut ws.newton,
            &mut ws.cauchy,
        )?;

        // Actual vs. model reduction.
        let f0 = f(&ws.xk);
        gemv(1.0, b, &ws.dx, 0.0, &mut ws.trial)?;
        let fa0 = f0;
        let fa1 = f0 + dot(&ws.gradient, &ws.dx)? + 0.5 * dot(&ws.dx, &ws.trial)?;
        copy(&ws.xk, &mut ws.trial)?;
        axpy(1.0, &ws.dx, &mut ws.trial)?;
        let f1 = f(&ws.trial);
        let rho = (f0 - f1) / (fa0 - fa1);

        let step_norm = nrm2(&ws.dx);
        radius = next_radius(config, radius, rho, step_norm);

        let accepted = rho > config.acceptance_ratio;
        if accepted {
            axpy(1.0, &ws.dx, &mut ws.xk)?;
            accepted_steps += 1;
        }
        iterations += 1;
        grad_norm = estimator.estimate(&mut ws.xk, &mut *f, &mut ws.gradient)?;
        check_gradient_norm(grad_norm, iterations)?;

        log::trace!(
            "[TR] iter {iterations}: {step:?} |dx|={step_norm:.3e} rho={rho:.4} r={radius:.3e} accepted={accepted} |g|={grad_norm:.3e}"
        );
    }

    if grad_norm > config.tolerance && iterations >= config.max_iterations {
        log::error!(
            "[TR] no convergence after {} iterations (|g| = {:.3e}, r = {:.3e}).",
            iterations,
            grad_norm,
            radius
        );
        return Err(BfgsError::TrustRegionExhausted {
            max_iterations: config.max_iterations,
            gradient_norm: grad_norm,
        });
    }

    copy(&ws.xk, x1)?;
    log::debug!(
        "[TR] converged in {iterations} iterations ({accepted_steps} accepted), |g| = {grad_norm:.3e}"
    );
    Ok(TrustRegionReport {
        iterations,
        accepted_steps,
        final_radius: radius,
        gradient_norm: grad_norm,
    })
}

/// Radius for the next iteration: shrink on a poor ratio, grow (up to
/// `max_radius`) on a good ratio when the step reached the boundary.
fn next_radius(config: &TrustRegionConfig, radius: f64, rho: f64, step_norm: f64) -> f64 {
    if rho < config.shrink_below {
        radius * config.shrink_factor
    } else if rho > config.grow_above && radius - step_norm <= config.tolerance {
        (config.grow_factor * radius).min(config.max_radius)
    } else {
        radius
    }
}

// `NaN > tol` is false, so a non-finite norm would otherwise pass for convergence.
fn check_gradient_norm(grad_norm: f64, iterations: usize) -> Result<(), BfgsError> {
    if grad_norm.is_finite() {
        return Ok(());
    }
    log::warn!("[TR] gradient norm is {grad_norm} after {iterations} iterations; aborting.");
    Err(BfgsError::GradientIsNaN)
}
