//! Parabolic line search along a fixed direction.
//!
//! Expands the step geometrically until the objective stops decreasing, then
//! fits a parabola through three samples bracketing the minimum.

use crate::linalg::{axpy, copy};
use crate::BfgsError;
use ndarray::Array1;

const FIRST_STEP: f64 = 0.01;

/// Searches along `s` from `x0`, leaves the chosen point in `x` and returns
/// the objective there.
///
/// The bracket is grown by doubling the step; more than `max_attempts`
/// doublings without the objective turning up is a
/// [`BfgsError::LineSearchFailed`].
pub fn parabolic_line_search<F>(
    x0: &Array1<f64>,
    s: &Array1<f64>,
    x: &mut Array1<f64>,
    f: &mut F,
    max_attempts: usize,
) -> Result<f64, BfgsError>
where
    F: FnMut(&Array1<f64>) -> f64,
{
    if s.len() != x0.len() {
        return Err(BfgsError::DimensionMismatch {
            expected: x0.len(),
            found: s.len(),
        });
    }
    copy(x0, x)?;

    let mut eval_at = |alpha: f64, x: &mut Array1<f64>| -> Result<f64, BfgsError> {
        copy(x0, x)?;
        axpy(alpha, s, x)?;
        Ok(f(x))
    };

    // Ring of the last three (alpha, f) samples, slot j % 3 is the newest.
    let mut alphas = [0.0, FIRST_STEP, 2.0 * FIRST_STEP];
    let mut fs = [0.0; 3];
    for k in 0..3 {
        fs[k] = eval_at(alphas[k], x)?;
    }

    let mut j = 2;
    let mut alpha = alphas[2];
    let mut attempts = 0;
    while fs[(j - 1) % 3] - fs[j % 3] > 0.0 {
        if attempts >= max_attempts {
            log::warn!("[LS] objective still decreasing at alpha = {alpha:.3e}");
            return Err(BfgsError::LineSearchFailed { max_attempts });
        }
        attempts += 1;
        j += 1;
        alpha *= 2.0;
        alphas[j % 3] = alpha;
        fs[j % 3] = eval_at(alpha, x)?;
    }

    // Halfway back from the last sample gives three equally spaced points.
    let da = (alphas[j % 3] - alphas[(j - 1) % 3]) / 2.0;
    let a_last = alpha - da;
    let f_last = eval_at(a_last, x)?;

    let (a1, a2, a3, f1, f2, f3) = if fs[(j - 1) % 3] < f_last {
        (
            alphas[(j - 2) % 3],
            alphas[(j - 1) % 3],
            a_last,
            fs[(j - 2) % 3],
            fs[(j - 1) % 3],
            f_last,
        )
    } else {
        (alphas[(j - 1) % 3], a_last, alphas[j % 3], fs[(j - 1) % 3], f_last, fs[j % 3])
    };

    // Vertex of the parabola through the three samples. With spacing `da` on
    // both sides this is a2 + da (f1 - f3) / (2 (f1 - 2 f2 + f3)); the first
    // bracket (0, 0.01, 0.015) is uneven.
    let l = a2 - a1;
    let r = a2 - a3;
    let num = l * l * (f2 - f3) - r * r * (f2 - f1);
    let den = l * (f2 - f3) - r * (f2 - f1);
    let mut a_min = a2 - 0.5 * num / den;
    if !a_min.is_finite() {
        // Flat samples.
        a_min = a2;
    }
    log::trace!("[LS] {attempts} doublings, alpha = {a_min:.6e}");

    let value = eval_at(a_min, x)?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use spectral::prelude::*;

    #[test]
    fn test_parabola_is_recovered_exactly() {
        let x0 = array![0.0];
        let s = array![1.0];
        let mut x = Array1::zeros(1);
        let mut f = |x: &Array1<f64>| (x[0] - 3.0).powi(2);
        let value = parabolic_line_search(&x0, &s, &mut x, &mut f, 50).unwrap();
        assert_that!(&x[0]).is_close_to(3.0, 1e-10);
        assert_that!(&value).is_close_to(0.0, 1e-12);
    }

    #[test]
    fn test_search_along_direction_in_the_plane() {
        // Minimum of x^2 + 4 y^2 along (1, 1) from (-2, -2) is at t = 2.
        let x0 = array![-2.0, -2.0];
        let s = array![1.0, 1.0];
        let mut x = Array1::zeros(2);
        let mut f = |x: &Array1<f64>| x[0].powi(2) + 4.0 * x[1].powi(2);
        let value = parabolic_line_search(&x0, &s, &mut x, &mut f, 50).unwrap();
        assert_that!(&x[0]).is_close_to(0.0, 1e-9);
        assert_that!(&x[1]).is_close_to(0.0, 1e-9);
        assert_that!(&value).is_less_than(1e-12);
        assert_eq!(x0, array![-2.0, -2.0]);
    }

    #[test]
    fn test_minimum_before_first_samples() {
        let x0 = array![0.0];
        let s = array![1.0];
        let mut x = Array1::zeros(1);
        let mut f = |x: &Array1<f64>| (x[0] - 0.005).powi(2);
        parabolic_line_search(&x0, &s, &mut x, &mut f, 50).unwrap();
        assert_that!(&x[0]).is_close_to(0.005, 1e-12);
    }

    #[test]
    fn test_unbounded_direction_fails_after_max_attempts() {
        let x0 = array![0.0];
        let s = array![1.0];
        let mut x = Array1::zeros(1);
        let mut f = |x: &Array1<f64>| -x[0];
        let result = parabolic_line_search(&x0, &s, &mut x, &mut f, 20);
        assert!(matches!(
            result,
            Err(BfgsError::LineSearchFailed { max_attempts: 20 })
        ));
    }

    #[test]
    fn test_attempt_cap_counts_doublings() {
        // Reaching 3 from 0.02 takes 8 doublings.
        let x0 = array![0.0];
        let s = array![1.0];
        let mut x = Array1::zeros(1);
        let mut f = |x: &Array1<f64>| (x[0] - 3.0).powi(2);
        assert!(parabolic_line_search(&x0, &s, &mut x, &mut f, 5).is_err());
        assert!(parabolic_line_search(&x0, &s, &mut x, &mut f, 8).is_ok());
    }

    #[test]
    fn test_direction_length_must_match() {
        let x0 = array![0.0, 0.0];
        let s = array![1.0];
        let mut x = Array1::zeros(2);
        let mut f = |x: &Array1<f64>| x.sum();
        assert!(matches!(
            parabolic_line_search(&x0, &s, &mut x, &mut f, 10),
            Err(BfgsError::DimensionMismatch { .. })
        ));
    }
}
