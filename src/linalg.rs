//! Fixed-size linear algebra for the ambient dimension.
//!
//! The ambient dimension `D` is tiny (2, 3, or 4 in practice) and sits in
//! the innermost loops, so vectors and matrices are plain arrays and every
//! operation is written out, monomorphised per `D`.  Symmetric matrices
//! are stored in the **lower** triangle; operations that read one treat
//! it as symmetric and never touch entries above the diagonal.

use crate::types::CobarsError;

/// Point or direction in ℝ^D.
pub type Vector<const D: usize> = [f64; D];

/// Dense D×D matrix; symmetric users populate the lower triangle only.
pub type Matrix<const D: usize> = [[f64; D]; D];

// ─────────────────────────────────────────────────────────────
//  Vector primitives
// ─────────────────────────────────────────────────────────────

#[inline]
pub fn dot<const D: usize>(a: &Vector<D>, b: &Vector<D>) -> f64 {
    let mut sum = 0.0;
    for i in 0..D {
        sum += a[i] * b[i];
    }
    sum
}

#[inline]
pub fn squared_norm<const D: usize>(a: &Vector<D>) -> f64 {
    dot(a, a)
}

#[inline]
pub fn norm<const D: usize>(a: &Vector<D>) -> f64 {
    squared_norm(a).sqrt()
}

/// Scale `a` to unit length.  Undefined for the zero vector; callers
/// guarantee a non-zero input.
#[inline]
pub fn normalize<const D: usize>(a: &mut Vector<D>) {
    let scale = 1.0 / norm(a);
    for x in a.iter_mut() {
        *x *= scale;
    }
}

/// Angle ∈ [0, π] between two unit vectors, stable near 0 and π.
#[inline]
pub fn angle_between_unit<const D: usize>(a: &Vector<D>, b: &Vector<D>) -> f64 {
    let mut diff2 = 0.0;
    for i in 0..D {
        let d = a[i] - b[i];
        diff2 += d * d;
    }
    2.0 * (0.5 * diff2.sqrt()).min(1.0).asin()
}

/// Read one entry through a runtime index pair.
///
/// The dimension-specialised closed forms below address fixed entries of
/// a `Matrix<D>` whose existence depends on `D`; routing the access
/// through runtime indices keeps those branches compilable for every
/// instantiation of `D`.
#[inline]
pub(crate) fn entry<const D: usize>(a: &Matrix<D>, i: usize, j: usize) -> f64 {
    a[i][j]
}

// ─────────────────────────────────────────────────────────────
//  Cholesky factorisation and solve
// ─────────────────────────────────────────────────────────────

/// In-place Cholesky factorisation `A = L·Lᵀ` of a symmetric positive
/// definite matrix stored in the lower triangle.  On success the lower
/// triangle of `a` holds `L`.
pub fn cholesky<const D: usize>(a: &mut Matrix<D>) -> Result<(), CobarsError> {
    for j in 0..D {
        let mut pivot = a[j][j];
        for k in 0..j {
            pivot -= a[j][k] * a[j][k];
        }
        if pivot <= 0.0 {
            return Err(CobarsError::NonPositiveDefinite { pivot: j });
        }
        let ljj = pivot.sqrt();
        a[j][j] = ljj;
        let inv = 1.0 / ljj;
        for i in (j + 1)..D {
            let mut sum = a[i][j];
            for k in 0..j {
                sum -= a[i][k] * a[j][k];
            }
            a[i][j] = sum * inv;
        }
    }
    Ok(())
}

/// Solve `L·Lᵀ·x = b` in place, with `l` the factor from [`cholesky`].
pub fn cholesky_solve<const D: usize>(l: &Matrix<D>, b: &mut Vector<D>) {
    // Forward substitution  L·y = b
    for i in 0..D {
        for j in 0..i {
            b[i] -= l[i][j] * b[j];
        }
        b[i] /= l[i][i];
    }
    // Back substitution  Lᵀ·x = y
    for i in (0..D).rev() {
        for j in (i + 1)..D {
            b[i] -= l[j][i] * b[j];
        }
        b[i] /= l[i][i];
    }
}

// ─────────────────────────────────────────────────────────────
//  Symmetric eigenvalues
// ─────────────────────────────────────────────────────────────

/// Smallest eigenvalue of a symmetric matrix (lower triangle populated).
///
/// Closed forms for D = 2 and D = 3; Jacobi sweeps otherwise.
pub fn smallest_eigenvalue<const D: usize>(a: &Matrix<D>) -> f64 {
    if D == 2 {
        let a00 = entry(a, 0, 0);
        let a11 = entry(a, 1, 1);
        let a10 = entry(a, 1, 0);
        let gap = (a00 - a11) * (a00 - a11) + 4.0 * a10 * a10;
        return 0.5 * (a00 + a11 - gap.abs().sqrt());
    }

    if D == 3 {
        let a00 = entry(a, 0, 0);
        let a11 = entry(a, 1, 1);
        let a22 = entry(a, 2, 2);
        let a10 = entry(a, 1, 0);
        let a20 = entry(a, 2, 0);
        let a21 = entry(a, 2, 1);

        let p1 = a10 * a10 + a20 * a20 + a21 * a21;
        let diag2 = a00 * a00 + a11 * a11 + a22 * a22;
        if p1.sqrt() < f64::MIN_POSITIVE * diag2.sqrt() {
            // A is diagonal.
            return a00.min(a11).min(a22);
        }

        let q = (a00 + a11 + a22) / 3.0;
        let d0 = a00 - q;
        let d1 = a11 - q;
        let d2 = a22 - q;
        let p2 = d0 * d0 + d1 * d1 + d2 * d2 + 2.0 * p1;
        let p = (p2 / 6.0).sqrt();
        let pinv = 1.0 / p;
        let b00 = d0 * pinv;
        let b11 = d1 * pinv;
        let b22 = d2 * pinv;
        let b10 = a10 * pinv;
        let b20 = a20 * pinv;
        let b21 = a21 * pinv;

        // r = det(B) / 2 for the unit-scaled deviator B.
        let r = 0.5
            * (2.0 * b10 * b21 * b20 - b00 * b21 * b21 - b10 * b10 * b22
                + b00 * b11 * b22
                - b20 * b20 * b11);

        let phi = if r <= -1.0 {
            std::f64::consts::PI / 3.0
        } else if r >= 1.0 {
            0.0
        } else {
            r.acos() / 3.0
        };

        // Eigenvalues are q + 2p·cos(φ + 2kπ/3); k = 1 gives the smallest.
        return q + 2.0 * p * (phi + 2.0 * std::f64::consts::PI / 3.0).cos();
    }

    let lambda = symmetric_eigenvalues(a);
    let mut min = f64::INFINITY;
    for &l in lambda.iter() {
        min = min.min(l);
    }
    min
}

/// All eigenvalues of a symmetric matrix (lower triangle populated),
/// sorted ascending, via cyclic Jacobi sweeps.
pub fn symmetric_eigenvalues<const D: usize>(a: &Matrix<D>) -> Vector<D> {
    const MAX_SWEEPS: usize = 64;

    // Work on a full symmetric copy.
    let mut m = *a;
    let mut scale = 0.0;
    for i in 0..D {
        for j in (i + 1)..D {
            m[i][j] = m[j][i];
        }
        for j in 0..=i {
            scale += m[i][j] * m[i][j];
        }
    }

    for _ in 0..MAX_SWEEPS {
        let mut off = 0.0;
        for p in 0..D {
            for q in (p + 1)..D {
                off += m[p][q] * m[p][q];
            }
        }
        if off <= f64::EPSILON * f64::EPSILON * scale {
            break;
        }

        for p in 0..D {
            for q in (p + 1)..D {
                if m[p][q] == 0.0 {
                    continue;
                }
                let theta = (m[q][q] - m[p][p]) / (2.0 * m[p][q]);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                let mpp = m[p][p];
                let mqq = m[q][q];
                let mpq = m[p][q];
                m[p][p] = mpp - t * mpq;
                m[q][q] = mqq + t * mpq;
                m[p][q] = 0.0;
                m[q][p] = 0.0;
                for k in 0..D {
                    if k != p && k != q {
                        let mkp = m[k][p];
                        let mkq = m[k][q];
                        m[k][p] = c * mkp - s * mkq;
                        m[p][k] = m[k][p];
                        m[k][q] = s * mkp + c * mkq;
                        m[q][k] = m[k][q];
                    }
                }
            }
        }
    }

    let mut lambda = [0.0; D];
    for i in 0..D {
        lambda[i] = m[i][i];
    }
    lambda.sort_by(|x, y| x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal));
    lambda
}

// ─────────────────────────────────────────────────────────────
//  Tests
// ─────────────────────────────────────────────────────────────
