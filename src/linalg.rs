//! Dimension-checked vector and matrix kernels over `ndarray` storage.
//!
//! These are the BLAS-like primitives the solver is written against. Every
//! operation validates operand shapes up front and reports a
//! [`BfgsError::DimensionMismatch`] instead of truncating, and matrix element
//! access is bounds-checked. Norms are accumulated with [`hypot`] so extreme
//! components neither overflow nor underflow.

use crate::BfgsError;
use ndarray::{Array1, Array2};

#[inline]
fn check_len(expected: usize, found: usize) -> Result<(), BfgsError> {
    if expected != found {
        return Err(BfgsError::DimensionMismatch { expected, found });
    }
    Ok(())
}

#[inline]
fn check_index(index: usize, len: usize) -> Result<(), BfgsError> {
    if index >= len {
        return Err(BfgsError::IndexOutOfBounds { index, len });
    }
    Ok(())
}

/// x = alpha * x
pub fn scal(alpha: f64, x: &mut Array1<f64>) {
    x.mapv_inplace(|v| alpha * v);
}

/// Copies `x` into `y`.
pub fn copy(x: &Array1<f64>, y: &mut Array1<f64>) -> Result<(), BfgsError> {
    check_len(x.len(), y.len())?;
    y.assign(x);
    Ok(())
}

/// y = y + alpha * x
pub fn axpy(alpha: f64, x: &Array1<f64>, y: &mut Array1<f64>) -> Result<(), BfgsError> {
    check_len(x.len(), y.len())?;
    y.zip_mut_with(x, |yi, &xi| *yi += alpha * xi);
    Ok(())
}

/// y = alpha * x
pub fn scaled_copy(alpha: f64, x: &Array1<f64>, y: &mut Array1<f64>) -> Result<(), BfgsError> {
    check_len(x.len(), y.len())?;
    y.zip_mut_with(x, |yi, &xi| *yi = alpha * xi);
    Ok(())
}

/// Plain left-to-right dot product.
pub fn dot(x: &Array1<f64>, y: &Array1<f64>) -> Result<f64, BfgsError> {
    check_len(x.len(), y.len())?;
    Ok(x.iter().zip(y.iter()).fold(0.0, |acc, (a, b)| acc + a * b))
}

/// sqrt(a^2 + b^2) without intermediate overflow. Returns 0 for (0, 0).
pub fn hypot(a: f64, b: f64) -> f64 {
    if a == 0.0 && b == 0.0 {
        return 0.0;
    }
    // f64::max/min drop NaN operands; keep them visible instead.
    if a.is_nan() || b.is_nan() {
        return f64::NAN;
    }
    let x = a.abs();
    let y = b.abs();
    let u = x.max(y);
    if u.is_infinite() {
        return u;
    }
    let t = x.min(y) / u;
    u * (1.0 + t * t).sqrt()
}

/// Euclidean norm by repeated [`hypot`] accumulation. Empty vectors have norm 0.
pub fn nrm2(x: &Array1<f64>) -> f64 {
    x.iter().fold(0.0, |acc, &v| hypot(acc, v))
}

/// Sum of absolute values with Kahan compensation.
pub fn asum(x: &Array1<f64>) -> f64 {
    let mut sum = 0.0;
    let mut c = 0.0;
    for &v in x.iter() {
        let y = v.abs() - c;
        let t = sum + y;
        c = (t - sum) - y;
        sum = t;
    }
    sum
}

/// Index of the element with the largest magnitude (first one on ties).
///
/// An empty vector has no such element and is reported as out of bounds.
pub fn iamax(x: &Array1<f64>) -> Result<usize, BfgsError> {
    check_index(0, x.len())?;
    let mut best = f64::NEG_INFINITY;
    let mut index = 0;
    for (i, v) in x.iter().enumerate() {
        let m = v.abs();
        if m > best {
            best = m;
            index = i;
        }
    }
    Ok(index)
}

/// y = beta * y + alpha * A x
///
/// Shapes follow the kernel's historical convention: `A.rows == x.len()` and
/// `A.cols == y.len()`. Each row of `A` is dotted with `x`, so in practice the
/// matrix has to be square; anything else surfaces as a dimension mismatch
/// from the row product.
pub fn gemv(
    alpha: f64,
    a: &Array2<f64>,
    x: &Array1<f64>,
    beta: f64,
    y: &mut Array1<f64>,
) -> Result<(), BfgsError> {
    check_len(a.nrows(), x.len())?;
    check_len(a.ncols(), y.len())?;
    let mut row = Array1::<f64>::zeros(a.ncols());
    for i in 0..a.nrows() {
        get_row(a, i, &mut row)?;
        let ax = dot(&row, x)?;
        check_index(i, y.len())?;
        y[i] = beta * y[i] + alpha * ax;
    }
    Ok(())
}

/// C = beta * C + alpha * A B (naive triple loop).
pub fn gemm(
    alpha: f64,
    a: &Array2<f64>,
    b: &Array2<f64>,
    beta: f64,
    c: &mut Array2<f64>,
) -> Result<(), BfgsError> {
    check_len(a.ncols(), b.nrows())?;
    check_len(a.nrows(), c.nrows())?;
    check_len(b.ncols(), c.ncols())?;
    for i in 0..a.nrows() {
        for j in 0..b.ncols() {
            let mut sum = 0.0;
            for k in 0..a.ncols() {
                sum += a[[i, k]] * b[[k, j]];
            }
            c[[i, j]] = beta * c[[i, j]] + alpha * sum;
        }
    }
    Ok(())
}

/// Bounds-checked element read.
pub fn get(m: &Array2<f64>, i: usize, j: usize) -> Result<f64, BfgsError> {
    check_index(i, m.nrows())?;
    check_index(j, m.ncols())?;
    Ok(m[[i, j]])
}

/// Bounds-checked element write.
pub fn set(m: &mut Array2<f64>, i: usize, j: usize, value: f64) -> Result<(), BfgsError> {
    check_index(i, m.nrows())?;
    check_index(j, m.ncols())?;
    m[[i, j]] = value;
    Ok(())
}

/// Overwrites `m` with the identity (ones on the main diagonal of a possibly
/// rectangular matrix).
pub fn set_identity(m: &mut Array2<f64>) {
    m.fill(0.0);
    m.diag_mut().fill(1.0);
}

/// Copies `src` into `dst`; shapes must agree.
pub fn copy_matrix(src: &Array2<f64>, dst: &mut Array2<f64>) -> Result<(), BfgsError> {
    check_len(src.nrows(), dst.nrows())?;
    check_len(src.ncols(), dst.ncols())?;
    dst.assign(src);
    Ok(())
}

/// Extracts row `i` into `v` (`v.len() == m.ncols()`).
pub fn get_row(m: &Array2<f64>, i: usize, v: &mut Array1<f64>) -> Result<(), BfgsError> {
    check_index(i, m.nrows())?;
    check_len(m.ncols(), v.len())?;
    v.assign(&m.row(i));
    Ok(())
}

/// Extracts column `j` into `v` (`v.len() == m.nrows()`).
pub fn get_col(m: &Array2<f64>, j: usize, v: &mut Array1<f64>) -> Result<(), BfgsError> {
    check_index(j, m.ncols())?;
    check_len(m.nrows(), v.len())?;
    v.assign(&m.column(j));
    Ok(())
}

/// M = M + alpha * x y^T
pub fn add_outer_product(
    m: &mut Array2<f64>,
    x: &Array1<f64>,
    y: &Array1<f64>,
    alpha: f64,
) -> Result<(), BfgsError> {
    check_len(m.nrows(), x.len())?;
    check_len(m.ncols(), y.len())?;
    for (i, &xi) in x.iter().enumerate() {
        for (j, &yj) in y.iter().enumerate() {
            m[[i, j]] += alpha * xi * yj;
        }
    }
    Ok(())
}

/// M = alpha * x y^T
pub fn set_outer_product(
    m: &mut Array2<f64>,
    x: &Array1<f64>,
    y: &Array1<f64>,
    alpha: f64,
) -> Result<(), BfgsError> {
    check_len(m.nrows(), x.len())?;
    check_len(m.ncols(), y.len())?;
    for (i, &xi) in x.iter().enumerate() {
        for (j, &yj) in y.iter().enumerate() {
            m[[i, j]] = alpha * xi * yj;
        }
    }
    Ok(())
}
