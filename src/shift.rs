//! Möbius shifts of unit-direction batches and the edge-space weight.
//!
//! A point `w` of the open unit ball acts on the sphere S^{D−1} by the
//! conformal (hyperbolic) shift φ_w.  The solver works at the origin of
//! the ball by shifting the whole direction measure; the change of
//! measure this induces on the product of spheres is the edge-space
//! sampling weight computed here.

use crate::linalg::{self, Matrix, Vector};
use crate::types::{CobarsError, BIG_ONE, NORM_THRESHOLD};

// ─────────────────────────────────────────────────────────────
//  Shift of a direction batch
// ─────────────────────────────────────────────────────────────

/// Apply `y_k = φ_w(x_k)` to every direction in the batch.
///
/// Requires `‖w‖ < 1` strictly.  Near the ball boundary
/// (`‖w‖² > 0.99² + 16ε`) the images are renormalised onto the unit
/// sphere to suppress round-off.
pub fn shift_directions<const D: usize>(x: &[Vector<D>], w: &Vector<D>, y: &mut [Vector<D>]) {
    let ww = linalg::squared_norm(w);
    let one_minus_ww = 1.0 - ww;
    let one_plus_ww = 1.0 + ww;
    let near_boundary = ww > NORM_THRESHOLD;

    for (xk, yk) in x.iter().zip(y.iter_mut()) {
        let wx = linalg::dot(w, xk);
        let w_coeff = 2.0 * wx - 2.0;
        let inv_denom = 1.0 / (one_plus_ww - 2.0 * wx);
        for i in 0..D {
            yk[i] = (one_minus_ww * xk[i] + w_coeff * w[i]) * inv_denom;
        }
        if near_boundary {
            linalg::normalize(yk);
        }
    }
}

/// Move the base point: `w ← φ_{−z}(w)` by the Poincaré-ball composition
/// law.  Combines a tangent step `z` taken at the origin with the current
/// base point.
pub fn inverse_shift<const D: usize>(w: &mut Vector<D>, z: &Vector<D>) {
    let ww = linalg::squared_norm(w);
    let zz = linalg::squared_norm(z);
    let wz2 = 2.0 * linalg::dot(w, z);

    let a = 1.0 - ww;
    let b = 1.0 + zz + wz2;
    let d = 1.0 / (BIG_ONE + wz2 + ww * zz);

    for i in 0..D {
        w[i] = (a * z[i] + b * w[i]) * d;
    }
}

// ─────────────────────────────────────────────────────────────
//  Edge-space sampling weight
// ─────────────────────────────────────────────────────────────

/// Jacobian of the shift-induced change of measure on the product of
/// spheres:
///
///   κ = (Π_k (1 + ‖w‖² + 2⟨w, y_k⟩))^{D−1} · √det(Γ) / det(C̄)
///
/// with Γ = Σ_k (r_k/ρ_k)²·(I − y_k y_kᵀ) and C̄ = Σ_k r_k·(I − y_k y_kᵀ).
/// The product is accumulated in log space so that large edge counts
/// cannot overflow.
pub fn edge_space_sampling_weight<const D: usize>(
    w: &Vector<D>,
    y: &[Vector<D>],
    r: &[f64],
    rho: &[f64],
) -> Result<f64, CobarsError> {
    let q = 1.0 + linalg::squared_norm(w);

    let mut log_prod = 0.0;
    let mut gamma: Matrix<D> = [[0.0; D]; D];
    let mut cbar: Matrix<D> = [[0.0; D]; D];
    let mut gamma_trace = 0.0;
    let mut cbar_trace = 0.0;

    for (k, yk) in y.iter().enumerate() {
        log_prod += (q + 2.0 * linalg::dot(w, yk)).ln();

        let g = (r[k] / rho[k]) * (r[k] / rho[k]);
        gamma_trace += g;
        cbar_trace += r[k];
        for i in 0..D {
            let gf = g * yk[i];
            let cf = r[k] * yk[i];
            for j in i..D {
                gamma[j][i] += gf * yk[j];
                cbar[j][i] += cf * yk[j];
            }
        }
    }

    // Σ c_k (I − y yᵀ)  =  (Σ c_k)·I  −  Σ c_k y yᵀ
    for i in 0..D {
        for j in i..D {
            if i == j {
                gamma[j][i] = gamma_trace - gamma[j][i];
                cbar[j][i] = cbar_trace - cbar[j][i];
            } else {
                gamma[j][i] = -gamma[j][i];
                cbar[j][i] = -cbar[j][i];
            }
        }
    }

    linalg::cholesky(&mut gamma)?;
    linalg::cholesky(&mut cbar)?;

    let mut log_det_gamma = 0.0;
    let mut log_det_cbar = 0.0;
    for i in 0..D {
        log_det_gamma += gamma[i][i].ln();
        log_det_cbar += cbar[i][i].ln();
    }
    log_det_gamma *= 2.0;
    log_det_cbar *= 2.0;

    Ok(((D - 1) as f64 * log_prod + 0.5 * log_det_gamma - log_det_cbar).exp())
}

// ─────────────────────────────────────────────────────────────
//  Tests
// ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::RngSource;
    use approx::assert_abs_diff_eq;

    fn random_directions<const D: usize>(n: usize, seed: u64) -> Vec<Vector<D>> {
        let mut rng = RngSource::from_seed(seed);
        (0..n).map(|_| rng.unit_vector::<D>()).collect()
    }

    #[test]
    fn shift_at_origin_is_identity() {
        let x = random_directions::<3>(8, 1);
        let mut y = vec![[0.0; 3]; 8];
        shift_directions(&x, &[0.0; 3], &mut y);
        for (xk, yk) in x.iter().zip(&y) {
            for i in 0..3 {
                assert_abs_diff_eq!(yk[i], xk[i], epsilon = 1e-15);
            }
        }
    }

    #[test]
    fn shift_preserves_unit_sphere() {
        let x = random_directions::<3>(32, 2);
        let mut y = vec![[0.0; 3]; 32];
        for &scale in &[0.3, 0.9, 0.99] {
            let w = [scale / 3f64.sqrt(); 3];
            shift_directions(&x, &w, &mut y);
            for yk in &y {
                assert_abs_diff_eq!(linalg::norm(yk), 1.0, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn shift_renormalises_near_boundary() {
        let x = random_directions::<2>(16, 3);
        let mut y = vec![[0.0; 2]; 16];
        let w = [0.995, 0.0];
        shift_directions(&x, &w, &mut y);
        for yk in &y {
            assert_abs_diff_eq!(linalg::norm(yk), 1.0, epsilon = 1e-14);
        }
    }

    #[test]
    fn inverse_shift_from_origin_returns_step() {
        let mut w = [0.0; 3];
        let z = [0.1, -0.2, 0.05];
        inverse_shift(&mut w, &z);
        for i in 0..3 {
            assert_abs_diff_eq!(w[i], z[i], epsilon = 1e-14);
        }
    }

    #[test]
    fn edge_space_weight_is_positive() {
        let y = random_directions::<3>(10, 4);
        let r = vec![1.0; 10];
        let rho = vec![1.0; 10];
        let w = [0.1, 0.2, -0.05];
        let kappa = edge_space_sampling_weight(&w, &y, &r, &rho).unwrap();
        assert!(kappa > 0.0 && kappa.is_finite(), "kappa = {kappa}");
    }
}
