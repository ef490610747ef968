//! Per-sample conformal-barycentre solver.
//!
//! A [`Sampler`] owns every buffer of one sample: the initial unit edge
//! directions `x`, the shifted directions `y`, the polygon vertices `p`,
//! the edge lengths `r`, the quotient weights `ρ`, and the full Newton
//! state.  `optimize` moves the shift vector `w` through the open unit
//! ball until the r-weighted mean of the shifted directions vanishes,
//! which closes the polygon.
//!
//! The iteration works at the origin of the ball: each step shifts the
//! direction measure by the current `w`, assembles gradient and Hessian
//! there, solves the regularised Newton system by Cholesky, line-searches
//! along the tangent direction with the hyperbolic potential as merit
//! function, and composes the accepted step back into `w`.

use crate::linalg::{self, entry, Matrix, Vector};
use crate::rng::RngSource;
use crate::shift;
use crate::types::{CobarsError, Settings, SMALL_ONE, BIG_ONE};
use ndarray::ArrayView2;

/// Derivative gain of the potential along the search direction; matches
/// the Abikoff–Ye scaling of the underlying gradient flow.
const GAIN_FACTOR: f64 = 4.0;

// ─────────────────────────────────────────────────────────────
//  tanhc
// ─────────────────────────────────────────────────────────────

/// tanh(t)/t, extended analytically at 0.
///
/// A (4,4) Padé approximant around 0 is used for t² ≤ 1; the direct
/// quotient loses accuracy there.  Beyond t² = 7, tanh is 1 to working
/// precision and the quotient collapses to 1/|t|.
pub(crate) fn tanhc(t: f64) -> f64 {
    const A0: f64 = 1.0;
    const A1: f64 = 7.0 / 51.0;
    const A2: f64 = 1.0 / 255.0;
    const A3: f64 = 2.0 / 69615.0;
    const A4: f64 = 1.0 / 34459425.0;

    const B0: f64 = 1.0;
    const B1: f64 = 8.0 / 17.0;
    const B2: f64 = 7.0 / 255.0;
    const B3: f64 = 4.0 / 9945.0;
    const B4: f64 = 1.0 / 765765.0;

    let t2 = t * t;
    if t2 <= 1.0 {
        (A0 + t2 * (A1 + t2 * (A2 + t2 * (A3 + t2 * A4))))
            / (B0 + t2 * (B1 + t2 * (B2 + t2 * (B3 + t2 * B4))))
    } else if t2 <= 7.0 {
        t.tanh() / t
    } else {
        1.0 / t.abs()
    }
}

// ─────────────────────────────────────────────────────────────
//  Sampler
// ─────────────────────────────────────────────────────────────

/// State and solver for one polygon sample in ambient dimension `D`.
#[derive(Debug, Clone)]
pub struct Sampler<const D: usize> {
    edge_count: usize,
    settings: Settings,

    // ── Per-edge buffers ───────────────────────────────────
    /// Initial unit edge directions.
    x: Vec<Vector<D>>,
    /// Directions after the Möbius shift by `w`.
    y: Vec<Vector<D>>,
    /// Polygon vertices (edge_count + 1 points, centroid at the origin).
    p: Vec<Vector<D>>,
    /// Edge lengths.
    r: Vec<f64>,
    /// Per-edge quotient-space weights.
    rho: Vec<f64>,
    total_r_inv: f64,

    // ── Newton state ───────────────────────────────────────
    /// Current point of the open unit ball.
    w: Vector<D>,
    /// Search direction.
    direction: Vector<D>,
    /// Tangent step fed to the inverse shift.
    step: Vector<D>,
    /// Right-hand side F of the Newton system.
    gradient: Vector<D>,
    /// Hessian of the shifted measure (lower triangle).
    hessian: Matrix<D>,

    rng: RngSource,

    // ── Counters, flags, diagnostics ───────────────────────
    iter: usize,
    squared_residual: f64,
    residual: f64,
    lambda_min: f64,
    kantorovich: f64,
    error_estimator: f64,
    edge_space_weight: f64,
    quotient_correction: f64,
    linesearch: bool,
    converged: bool,
    keep_going: bool,
    armijo: bool,
}

impl<const D: usize> Sampler<D> {
    /// Sampler for `edge_count` edges of equal length `1/edge_count` and
    /// unit quotient weights.
    pub fn new(edge_count: usize, settings: Settings) -> Result<Self, CobarsError> {
        if edge_count < 2 {
            return Err(CobarsError::InvalidInput(format!(
                "edge_count must be at least 2, got {edge_count}"
            )));
        }
        let r = vec![1.0 / edge_count as f64; edge_count];
        let rho = vec![1.0; edge_count];
        Self::from_parts(r, rho, settings)
    }

    /// Sampler with explicit edge lengths `r` and quotient weights `rho`.
    pub fn with_weights(r: &[f64], rho: &[f64], settings: Settings) -> Result<Self, CobarsError> {
        if r.len() < 2 {
            return Err(CobarsError::InvalidInput(format!(
                "edge_count must be at least 2, got {}", r.len()
            )));
        }
        if rho.len() != r.len() {
            return Err(CobarsError::InvalidInput(format!(
                "rho has {} entries for {} edges", rho.len(), r.len()
            )));
        }
        for (k, &rk) in r.iter().enumerate() {
            if !(rk > 0.0 && rk.is_finite()) {
                return Err(CobarsError::InvalidInput(format!(
                    "edge length r[{k}] must be positive and finite, got {rk}"
                )));
            }
        }
        for (k, &pk) in rho.iter().enumerate() {
            if !(pk > 0.0 && pk.is_finite()) {
                return Err(CobarsError::InvalidInput(format!(
                    "quotient weight rho[{k}] must be positive and finite, got {pk}"
                )));
            }
        }
        Self::from_parts(r.to_vec(), rho.to_vec(), settings)
    }

    fn from_parts(r: Vec<f64>, rho: Vec<f64>, settings: Settings) -> Result<Self, CobarsError> {
        if D < 2 {
            return Err(CobarsError::DimensionUnsupported { required: 2, actual: D });
        }
        settings.validate()?;
        let edge_count = r.len();
        let total: f64 = r.iter().sum();
        Ok(Self {
            edge_count,
            settings,
            x: vec![[0.0; D]; edge_count],
            y: vec![[0.0; D]; edge_count],
            p: vec![[0.0; D]; edge_count + 1],
            r,
            rho,
            total_r_inv: 1.0 / total,
            w: [0.0; D],
            direction: [0.0; D],
            step: [0.0; D],
            gradient: [0.0; D],
            hessian: [[0.0; D]; D],
            rng: RngSource::from_seed(0),
            iter: 0,
            squared_residual: 1.0,
            residual: 1.0,
            lambda_min: f64::MIN_POSITIVE,
            kantorovich: 1.0,
            error_estimator: f64::INFINITY,
            edge_space_weight: 0.0,
            quotient_correction: 0.0,
            linesearch: true,
            converged: false,
            keep_going: true,
            armijo: false,
        })
    }

    // ── Accessors ──────────────────────────────────────────

    pub fn ambient_dimension(&self) -> usize {
        D
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn edge_lengths(&self) -> &[f64] {
        &self.r
    }

    pub fn rho(&self) -> &[f64] {
        &self.rho
    }

    /// Total length R = Σ r_k.
    pub fn total_length(&self) -> f64 {
        1.0 / self.total_r_inv
    }

    pub fn initial_directions(&self) -> &[Vector<D>] {
        &self.x
    }

    pub fn shifted_directions(&self) -> &[Vector<D>] {
        &self.y
    }

    /// Vertices of the polygon; valid after [`Self::compute_space_coordinates`].
    pub fn space_coordinates(&self) -> &[Vector<D>] {
        &self.p
    }

    pub fn shift_vector(&self) -> &Vector<D> {
        &self.w
    }

    /// Norm of the r-weighted mean of the shifted directions.
    pub fn residual(&self) -> f64 {
        self.residual
    }

    /// Kantorovich error bound on the distance to the true barycentre;
    /// infinite while the Kantorovich condition is unmet.
    pub fn error_estimator(&self) -> f64 {
        self.error_estimator
    }

    /// Kantorovich indicator q; q < 1 guarantees quadratic convergence.
    pub fn kantorovich(&self) -> f64 {
        self.kantorovich
    }

    /// Smallest Hessian eigenvalue from the last termination check.
    pub fn smallest_hessian_eigenvalue(&self) -> f64 {
        self.lambda_min
    }

    pub fn iteration_count(&self) -> usize {
        self.iter
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    /// Whether the main loop would take another step; `false` after
    /// success, give-up, or a factorisation failure.
    pub fn should_continue(&self) -> bool {
        self.keep_going
    }

    /// Whether the last line-search step satisfied the Armijo predicate.
    pub fn armijo_satisfied(&self) -> bool {
        self.armijo
    }

    pub fn edge_space_weight(&self) -> f64 {
        self.edge_space_weight
    }

    pub fn quotient_correction(&self) -> f64 {
        self.quotient_correction
    }

    /// Product κ·χ: the quotient-space sampling weight.
    pub fn quotient_space_weight(&self) -> f64 {
        self.edge_space_weight * self.quotient_correction
    }

    // ── Input ──────────────────────────────────────────────

    pub fn set_seed(&mut self, seed: u64) {
        self.rng = RngSource::from_seed(seed);
    }

    /// Switch to the deterministic stream of one sample of a batch.
    pub fn reseed_for_sample(&mut self, master_seed: u64, sample_index: u64) {
        self.rng = RngSource::for_sample(master_seed, sample_index);
    }

    /// Draw fresh i.i.d. uniform unit directions.
    pub fn randomize_initial_directions(&mut self) {
        for xk in self.x.iter_mut() {
            *xk = self.rng.unit_vector::<D>();
        }
    }

    /// Load initial directions from an `[edge, dim]` array, optionally
    /// renormalising each row onto the unit sphere.
    pub fn set_initial_directions(
        &mut self,
        x_in: ArrayView2<'_, f64>,
        normalize: bool,
    ) -> Result<(), CobarsError> {
        let (n, d) = x_in.dim();
        if n != self.edge_count || d != D {
            return Err(CobarsError::InvalidInput(format!(
                "expected directions of shape [{}, {}], got [{n}, {d}]",
                self.edge_count, D
            )));
        }
        for (k, xk) in self.x.iter_mut().enumerate() {
            for i in 0..D {
                xk[i] = x_in[[k, i]];
            }
        }
        if normalize {
            self.normalize_initial_directions();
        }
        Ok(())
    }

    /// Renormalise every initial direction onto the unit sphere.
    pub fn normalize_initial_directions(&mut self) {
        for xk in self.x.iter_mut() {
            linalg::normalize(xk);
        }
    }

    /// Initialise `w` as the Euclidean barycentre of the initial
    /// directions, Σ r̂_k x_k.
    pub fn compute_shift_vector(&mut self) {
        let mut acc = [0.0; D];
        for (xk, &rk) in self.x.iter().zip(&self.r) {
            for i in 0..D {
                acc[i] += rk * xk[i];
            }
        }
        for i in 0..D {
            self.w[i] = acc[i] * self.total_r_inv;
        }
    }

    /// Use a caller-supplied starting point.  A point on or outside the
    /// usable ball is discarded in favour of the Euclidean barycentre.
    pub fn set_shift_vector(&mut self, w_in: &Vector<D>) {
        self.w = *w_in;
        if linalg::squared_norm(&self.w) > SMALL_ONE {
            self.compute_shift_vector();
        }
    }

    // ── Newton iteration ───────────────────────────────────

    /// Run the damped Newton iteration until the Kantorovich criterion
    /// is met, the residual falls below the give-up tolerance, or the
    /// iteration cap is reached.  The iterate is kept on any exit, so
    /// callers can read best-effort results after a failure.
    pub fn optimize(&mut self) -> Result<(), CobarsError> {
        let max_iter = self.settings.max_iter;

        self.iter = 0;
        self.converged = false;
        self.keep_going = true;
        self.armijo = false;
        self.linesearch = self.settings.use_linesearch;
        self.lambda_min = f64::MIN_POSITIVE;
        self.kantorovich = 1.0;
        self.error_estimator = f64::INFINITY;

        self.shift();
        self.differential_and_hessian();
        self.search_direction()?;

        while self.iter < max_iter && self.keep_going {
            self.iter += 1;

            self.line_search();
            self.differential_and_hessian();
            self.search_direction()?;
        }
        Ok(())
    }

    /// Shift the direction measure by the current `w`.
    fn shift(&mut self) {
        shift::shift_directions(&self.x, &self.w, &mut self.y);
    }

    /// Assemble F = −½·Σ r̂_k y_k and H = I − Σ r̂_k y_k y_kᵀ at the
    /// origin of the shifted measure, and refresh the residual.
    fn differential_and_hessian(&mut self) {
        let mut grad = [0.0; D];
        let mut hess = [[0.0; D]; D];

        for (yk, &rk) in self.y.iter().zip(&self.r) {
            for i in 0..D {
                let factor = rk * yk[i];
                grad[i] -= factor;
                for j in i..D {
                    hess[j][i] -= factor * yk[j];
                }
            }
        }

        // Normalise for edge lengths that do not sum to 1.
        self.squared_residual = 0.0;
        for i in 0..D {
            grad[i] *= self.total_r_inv;
            self.squared_residual += grad[i] * grad[i];
            grad[i] *= 0.5;
            for j in i..D {
                hess[j][i] *= self.total_r_inv;
            }
        }
        self.residual = self.squared_residual.sqrt();

        // Adding the identity after the accumulation costs less precision.
        for i in 0..D {
            hess[i][i] += 1.0;
        }

        self.gradient = grad;
        self.hessian = hess;
    }

    /// Decide termination, then solve `(H + c·I)·u = −F` by Cholesky.
    fn search_direction(&mut self) -> Result<(), CobarsError> {
        let tolerance = self.settings.tolerance;
        let give_up_tolerance = self.settings.give_up_tolerance;
        let linesearch_usable =
            self.settings.use_linesearch && self.settings.armijo_slope_factor > 0.0;

        if self.residual < 100.0 * tolerance {
            // The eigenvalue must come from the unregularised Hessian.
            self.lambda_min = linalg::smallest_eigenvalue(&self.hessian);
            self.kantorovich = GAIN_FACTOR * self.residual / (self.lambda_min * self.lambda_min);

            if self.kantorovich < 1.0 {
                self.error_estimator = 0.5 * self.lambda_min * self.kantorovich;
                // Line-searching this close to the solution runs into
                // precision limits.
                self.linesearch = false;
                self.keep_going = self.error_estimator > tolerance;
                self.converged = !self.keep_going;
            } else {
                // The residual cannot be pushed below machine noise; the
                // configuration is too ill-conditioned for the estimator.
                self.error_estimator = f64::INFINITY;
                self.linesearch = linesearch_usable;
                self.keep_going = self.residual > give_up_tolerance;
            }
        } else {
            self.kantorovich = BIG_ONE;
            self.lambda_min = f64::MIN_POSITIVE;
            self.error_estimator = f64::INFINITY;
            self.linesearch = linesearch_usable;
            self.keep_going = self.residual > give_up_tolerance.max(tolerance);
        }

        let c = self.settings.regularization * self.squared_residual;
        let mut a = self.hessian;
        for i in 0..D {
            a[i][i] += c;
        }
        if let Err(err) = linalg::cholesky(&mut a) {
            self.keep_going = false;
            return Err(err);
        }

        let mut u = [0.0; D];
        for i in 0..D {
            u[i] = -self.gradient[i];
        }
        linalg::cholesky_solve(&a, &mut u);
        self.direction = u;
        Ok(())
    }

    /// Hyperbolic potential of the current tangent step.
    fn potential(&self) -> f64 {
        let zz = linalg::squared_norm(&self.step);
        let a = BIG_ONE + zz;
        let b = 1.0 / (BIG_ONE - zz);

        let mut value = 0.0;
        for (yk, &rk) in self.y.iter().zip(&self.r) {
            let yz = linalg::dot(yk, &self.step);
            value += rk * ((a - 2.0 * yz) * b).abs().ln();
        }
        value * self.total_r_inv
    }

    /// Armijo back-tracking along the Newton direction with the
    /// potential as merit function; applies the accepted step to `w` and
    /// re-shifts the measure.
    fn line_search(&mut self) {
        let mut tau = 1.0;
        let u_norm = linalg::norm(&self.direction);

        // Exponential map shooting from the origin to τ·u.
        let scale = tau * tanhc(tau * u_norm);
        for i in 0..D {
            self.step[i] = scale * self.direction[i];
        }

        if self.linesearch {
            let gamma = self.settings.armijo_shrink_factor;
            let sigma = self.settings.armijo_slope_factor;

            let dphi_0 = GAIN_FACTOR * linalg::dot(&self.gradient, &self.direction);

            let mut backtrackings = 0;
            let mut phi_tau = self.potential();
            self.armijo = phi_tau - sigma * tau * dphi_0 < 0.0;

            while !self.armijo && backtrackings < self.settings.max_backtrackings {
                backtrackings += 1;

                let tau_1 = gamma * tau;
                // Quadratic-fit estimate of the step size.
                let tau_2 =
                    -0.5 * sigma * tau * tau * dphi_0 / (phi_tau - tau * dphi_0);
                tau = tau_1.max(tau_2);

                let scale = tau * tanhc(tau * u_norm);
                for i in 0..D {
                    self.step[i] = scale * self.direction[i];
                }
                phi_tau = self.potential();
                self.armijo = phi_tau - sigma * tau * dphi_0 < 0.0;
            }
        }

        shift::inverse_shift(&mut self.w, &self.step);
        self.shift();
    }

    // ── Derived quantities ─────────────────────────────────

    /// Vertex positions p_{k+1} = p_k + r_k y_k, with p_0 chosen so that
    /// the mean of the edge midpoints sits at the origin.  For a closed
    /// chain that mean is the polygon centroid.
    pub fn compute_space_coordinates(&mut self) {
        let mut centroid = [0.0; D];
        let mut acc = [0.0; D];
        for (yk, &rk) in self.y.iter().zip(&self.r) {
            for i in 0..D {
                let offset = rk * yk[i];
                centroid[i] += acc[i] + 0.5 * offset;
                acc[i] += offset;
            }
        }

        let scale = 1.0 / self.edge_count as f64;
        for i in 0..D {
            self.p[0][i] = -centroid[i] * scale;
        }
        for k in 0..self.edge_count {
            let rk = self.r[k];
            for i in 0..D {
                self.p[k + 1][i] = self.p[k][i] + rk * self.y[k][i];
            }
        }
    }

    /// Edge-space sampling weight κ of the current `(w, y)`; stored and
    /// returned.
    pub fn compute_edge_space_weight(&mut self) -> Result<f64, CobarsError> {
        self.edge_space_weight =
            shift::edge_space_sampling_weight(&self.w, &self.y, &self.r, &self.rho)?;
        Ok(self.edge_space_weight)
    }

    /// Rotation-quotient correction χ.
    ///
    /// χ = 1 in dimension 2.  In dimension 3 the pairwise eigenvalue
    /// products of Σ = Σ_k ρ_k²·y_k y_kᵀ reduce to a cubic polynomial in
    /// its entries, sparing the eigen-solve:
    ///
    ///   (λ₀+λ₁)(λ₀+λ₂)(λ₁+λ₂) = (tr(Σ²) − tr(Σ)²)·tr(Σ)/2 − det(Σ)
    ///
    /// In higher dimensions the eigenvalues are computed directly.
    pub fn compute_quotient_correction(&mut self) -> f64 {
        if D == 2 {
            self.quotient_correction = 1.0;
            return self.quotient_correction;
        }

        let mut sigma: Matrix<D> = [[0.0; D]; D];
        for (yk, &pk) in self.y.iter().zip(&self.rho) {
            let rho_squared = pk * pk;
            for i in 0..D {
                let factor = rho_squared * yk[i];
                for j in i..D {
                    sigma[j][i] += factor * yk[j];
                }
            }
        }

        if D == 3 {
            let a00 = entry(&sigma, 0, 0);
            let a11 = entry(&sigma, 1, 1);
            let a22 = entry(&sigma, 2, 2);
            let a10 = entry(&sigma, 1, 0);
            let a20 = entry(&sigma, 2, 0);
            let a21 = entry(&sigma, 2, 1);

            let d00 = a00 * a00;
            let d11 = a11 * a11;
            let d22 = a22 * a22;
            let d10 = a10 * a10;
            let d20 = a20 * a20;
            let d21 = a21 * a21;

            let det = (a00 * (d11 + d22 - d10 - d20)
                + a11 * (d00 + d22 - d10 - d21)
                + a22 * (d00 + d11 - d20 - d21)
                + 2.0 * (a00 * a11 * a22 - a10 * a20 * a21))
                .abs();
            self.quotient_correction = 1.0 / det.sqrt();
            return self.quotient_correction;
        }

        let lambda = linalg::symmetric_eigenvalues(&sigma);
        let mut det = 1.0;
        for i in 0..D {
            for j in (i + 1)..D {
                det *= lambda[i] + lambda[j];
            }
        }
        self.quotient_correction = 1.0 / det.sqrt();
        self.quotient_correction
    }
}

// ─────────────────────────────────────────────────────────────
//  Tests
// ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn tanhc_matches_quotient_on_pade_branch() {
        for &t in &[0.05, 0.3, 0.7, 0.99] {
            assert_relative_eq!(tanhc(t), t.tanh() / t, max_relative = 1e-9);
        }
    }

    #[test]
    fn tanhc_is_stable_near_zero() {
        // tanh(t)/t → 1 − t²/3 for small t.
        let t = 1e-8;
        assert_relative_eq!(tanhc(t), 1.0, max_relative = 1e-12);
        let t = 1e-3;
        assert_relative_eq!(tanhc(t), 1.0 - t * t / 3.0, max_relative = 1e-9);
    }

    #[test]
    fn tanhc_branches_agree_at_large_arguments() {
        assert_relative_eq!(tanhc(2.0), (2.0f64).tanh() / 2.0, max_relative = 1e-14);
        // Beyond t² = 7 tanh is 1 to within the branch's accuracy.
        assert_relative_eq!(tanhc(4.0), 1.0 / 4.0, max_relative = 1e-3);
    }

    fn prepared_pentagon() -> Sampler<3> {
        let mut s = Sampler::<3>::with_weights(&[1.0; 5], &[1.0; 5], Settings::default()).unwrap();
        s.reseed_for_sample(42, 0);
        s.randomize_initial_directions();
        s.compute_shift_vector();
        s.shift();
        s.differential_and_hessian();
        s
    }

    #[test]
    fn potential_slope_matches_gradient() {
        // dΦ/dτ at τ = 0 along the exponential of u equals 4·⟨F, u⟩.
        let mut s = prepared_pentagon();
        let u = [0.3, -0.2, 0.5];
        let expected = GAIN_FACTOR * linalg::dot(&s.gradient, &u);

        let mut phi_at = |tau: f64| {
            let scale = tau * tanhc(tau * linalg::norm(&u));
            for i in 0..3 {
                s.step[i] = scale * u[i];
            }
            s.potential()
        };
        let h = 1e-6;
        let fd = (phi_at(h) - phi_at(-h)) / (2.0 * h);
        assert_relative_eq!(fd, expected, max_relative = 1e-5);
    }

    #[test]
    fn first_line_search_step_satisfies_armijo() {
        let mut s = prepared_pentagon();
        s.search_direction().unwrap();
        assert!(s.linesearch, "far from the solution, line search is active");
        s.line_search();
        assert!(s.armijo_satisfied());
    }
}
