//! Rank-2 secant corrections for the Hessian approximation `B` and, separately,
//! for the inverse approximation `Binv`.
//!
//! Nothing ties the two matrices together after initialization: each is
//! corrected with its own formula, so `B * Binv` only stays near the identity
//! up to accumulated rounding and any update that was skipped for one matrix
//! but not the other. The solver accepts that drift.
//!
//! Both updates compute their scalar coefficients before touching the matrix.
//! A zero or non-finite denominator (`y^T dx == 0`, `dx^T B dx == 0`) returns
//! [`BfgsError::DegenerateCurvature`] and leaves the matrix as it was.

use crate::linalg::{add_outer_product, dot, gemv};
use crate::BfgsError;
use ndarray::{Array1, Array2};

fn check_shapes(m: &Array2<f64>, y: &Array1<f64>, dx: &Array1<f64>) -> Result<(), BfgsError> {
    if y.len() != dx.len() {
        return Err(BfgsError::DimensionMismatch {
            expected: y.len(),
            found: dx.len(),
        });
    }
    if y.len() != m.nrows() {
        return Err(BfgsError::DimensionMismatch {
            expected: m.nrows(),
            found: y.len(),
        });
    }
    if dx.len() != m.ncols() {
        return Err(BfgsError::DimensionMismatch {
            expected: m.ncols(),
            found: dx.len(),
        });
    }
    Ok(())
}

#[inline]
fn nonzero_denominator(denominator: f64) -> Result<f64, BfgsError> {
    if denominator == 0.0 || !denominator.is_finite() {
        return Err(BfgsError::DegenerateCurvature { denominator });
    }
    Ok(denominator)
}

/// BFGS update of the Hessian approximation:
///
/// ```text
/// t = B dx
/// B <- B + (y y^T) / (y^T dx) - (t t^T) / (dx^T t)
/// ```
pub fn update_hessian(
    b: &mut Array2<f64>,
    y: &Array1<f64>,
    dx: &Array1<f64>,
) -> Result<(), BfgsError> {
    check_shapes(b, y, dx)?;

    let mut t = Array1::<f64>::zeros(y.len());
    gemv(1.0, b, dx, 0.0, &mut t)?;

    let a = 1.0 / nonzero_denominator(dot(y, dx)?)?;
    let c = -1.0 / nonzero_denominator(dot(dx, &t)?)?;

    add_outer_product(b, y, y, a)?;
    add_outer_product(b, &t, &t, c)?;
    Ok(())
}

/// BFGS update of the inverse Hessian approximation:
///
/// ```text
/// t = Binv y,  a = dx^T y,  b = y^T t,  c = 1 / a,  d = (1 + b / a) c
/// Binv <- Binv + d (dx dx^T) - c (dx t^T) - c (t dx^T)
/// ```
pub fn update_hessian_inverse(
    b_inv: &mut Array2<f64>,
    y: &Array1<f64>,
    dx: &Array1<f64>,
) -> Result<(), BfgsError> {
    check_shapes(b_inv, y, dx)?;

    let mut t = Array1::<f64>::zeros(y.len());
    gemv(1.0, b_inv, y, 0.0, &mut t)?;

    let a = nonzero_denominator(dot(dx, y)?)?;
    let b = dot(y, &t)?;
    let c = 1.0 / a;
    let d = (1.0 + b / a) * c;
    if !d.is_finite() {
        return Err(BfgsError::DegenerateCurvature { denominator: a });
    }

    add_outer_product(b_inv, dx, dx, d)?;
    add_outer_product(b_inv, dx, &t, -c)?;
    add_outer_product(b_inv, &t, dx, -c)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};
    use spectral::prelude::*;

    fn max_abs(m: &Array2<f64>) -> f64 {
        m.iter().fold(0.0, |acc: f64, v| acc.max(v.abs()))
    }

    #[test]
    fn test_updates_satisfy_secant_equations() {
        let dx = array![0.5, -1.0, 0.25];
        let y = array![1.0, -1.5, 0.75];

        let mut b = Array2::<f64>::eye(3);
        update_hessian(&mut b, &y, &dx).unwrap();
        // B_new dx = y
        let b_dx = b.dot(&dx);
        for i in 0..3 {
            assert_that!(&b_dx[i]).is_close_to(y[i], 1e-12);
        }

        let mut b_inv = Array2::<f64>::eye(3);
        update_hessian_inverse(&mut b_inv, &y, &dx).unwrap();
        // Binv_new y = dx
        let binv_y = b_inv.dot(&y);
        for i in 0..3 {
            assert_that!(&binv_y[i]).is_close_to(dx[i], 1e-12);
        }
    }

    #[test]
    fn test_pair_stays_finite_and_close_to_inverse() {
        // Start from an exact inverse pair.
        let mut b = array![[4.0, 1.0], [1.0, 3.0]];
        let mut b_inv = array![[3.0, -1.0], [-1.0, 4.0]] / 11.0;
        let steps = [
            (array![0.3, -0.2], array![1.1, -0.4]),
            (array![-0.1, 0.4], array![-0.2, 1.3]),
            (array![0.05, 0.05], array![0.3, 0.2]),
        ];
        for (dx, y) in steps.iter() {
            update_hessian_inverse(&mut b_inv, y, dx).unwrap();
            update_hessian(&mut b, y, dx).unwrap();
            assert_eq!(b.dim(), (2, 2));
            assert_eq!(b_inv.dim(), (2, 2));
            assert!(b.iter().all(|v| v.is_finite()));
            assert!(b_inv.iter().all(|v| v.is_finite()));
        }
        // With symmetric positive-curvature data the two formulas only drift
        // apart through rounding.
        let drift = max_abs(&(b.dot(&b_inv) - Array2::<f64>::eye(2)));
        assert_that!(&drift).is_less_than(1e-8);
    }

    #[test]
    fn test_degenerate_curvature_leaves_matrix_untouched() {
        let mut b = Array2::<f64>::eye(2);
        let mut b_inv = Array2::<f64>::eye(2);
        // y is orthogonal to dx.
        let dx = array![1.0, 1.0];
        let y = array![1.0, -1.0];

        assert!(matches!(
            update_hessian(&mut b, &y, &dx),
            Err(BfgsError::DegenerateCurvature { .. })
        ));
        assert!(matches!(
            update_hessian_inverse(&mut b_inv, &y, &dx),
            Err(BfgsError::DegenerateCurvature { .. })
        ));
        assert_eq!(b, Array2::<f64>::eye(2));
        assert_eq!(b_inv, Array2::<f64>::eye(2));

        // A zero step degenerates both denominators.
        let zero = array![0.0, 0.0];
        assert!(update_hessian(&mut b, &zero, &zero).is_err());
        assert!(update_hessian_inverse(&mut b_inv, &zero, &zero).is_err());
    }

    #[test]
    fn test_shape_checks() {
        let mut b = Array2::<f64>::eye(3);
        let dx = array![1.0, 2.0, 3.0];
        let y4 = array![1.0, 2.0, 3.0, 4.0];
        assert!(matches!(
            update_hessian(&mut b, &y4, &dx),
            Err(BfgsError::DimensionMismatch { .. })
        ));
        let y2 = array![1.0, 2.0];
        let dx2 = array![1.0, 2.0];
        assert!(matches!(
            update_hessian_inverse(&mut b, &y2, &dx2),
            Err(BfgsError::DimensionMismatch { .. })
        ));
        assert_eq!(b, Array2::<f64>::eye(3));
    }
}
