//! Built-in random variables of closed-polygon configurations.
//!
//! Each type implements [`RandomVariable`] and can be handed to
//! [`crate::Driver::sample_binned`].  They double as worked examples for
//! user-defined functionals.

use crate::linalg;
use crate::sampler::Sampler;
use crate::types::RandomVariable;

// ─────────────────────────────────────────────────────────────
//  Bending energy
// ─────────────────────────────────────────────────────────────

/// p-th power bending energy of the direction polygon:
///
///   (1/p) · Σ_k ℓ_k · (φ_k / ℓ_k)^p
///
/// where φ_k is the turning angle between consecutive unit edge
/// directions and ℓ_k = (r_k + r_{k+1})/2 the dual edge length.
#[derive(Debug, Clone)]
pub struct BendingEnergy {
    pub p: f64,
}

impl BendingEnergy {
    fn fold<const D: usize>(&self, sampler: &Sampler<D>, angle_of: impl Fn(usize, usize) -> f64) -> f64 {
        let n = sampler.edge_count();
        let r = sampler.edge_lengths();

        let mut sum = {
            let len = 0.5 * (r[n - 1] + r[0]);
            (angle_of(n - 1, 0) / len).powf(self.p) * len
        };
        for k in 0..n - 1 {
            let len = 0.5 * (r[k] + r[k + 1]);
            sum += (angle_of(k, k + 1) / len).powf(self.p) * len;
        }
        sum / self.p
    }
}

impl<const D: usize> RandomVariable<D> for BendingEnergy {
    fn evaluate(&self, sampler: &Sampler<D>) -> f64 {
        let y = sampler.shifted_directions();
        self.fold(sampler, |k, l| linalg::angle_between_unit(&y[k], &y[l]))
    }

    fn min_value(&self, _sampler: &Sampler<D>) -> f64 {
        0.0
    }

    fn max_value(&self, sampler: &Sampler<D>) -> f64 {
        // Every turning angle at its maximum π.
        self.fold(sampler, |_, _| std::f64::consts::PI)
    }

    fn tag(&self) -> String {
        format!("BendingEnergy({})", self.p)
    }

    fn clone_box(&self) -> Box<dyn RandomVariable<D>> {
        Box::new(self.clone())
    }
}

// ─────────────────────────────────────────────────────────────
//  Chord length
// ─────────────────────────────────────────────────────────────

/// Euclidean distance from vertex 0 to a fixed vertex of the polygon.
#[derive(Debug, Clone)]
pub struct ChordLength {
    pub vertex: usize,
}

impl<const D: usize> RandomVariable<D> for ChordLength {
    fn evaluate(&self, sampler: &Sampler<D>) -> f64 {
        let p = sampler.space_coordinates();
        let a = &p[self.vertex.min(sampler.edge_count())];
        let b = &p[0];
        let mut diff2 = 0.0;
        for i in 0..D {
            let d = a[i] - b[i];
            diff2 += d * d;
        }
        diff2.sqrt()
    }

    fn min_value(&self, _sampler: &Sampler<D>) -> f64 {
        0.0
    }

    fn max_value(&self, sampler: &Sampler<D>) -> f64 {
        sampler.total_length()
    }

    fn tag(&self) -> String {
        format!("ChordLength({})", self.vertex)
    }

    fn requires_space_curve(&self) -> bool {
        true
    }

    fn clone_box(&self) -> Box<dyn RandomVariable<D>> {
        Box::new(self.clone())
    }
}

// ─────────────────────────────────────────────────────────────
//  Hydrodynamic radius
// ─────────────────────────────────────────────────────────────

/// Hydrodynamic radius n² / Σ_{k<l} ‖p_k − p_l‖⁻¹ of the vertex cloud.
#[derive(Debug, Clone, Default)]
pub struct HydrodynamicRadius;

impl<const D: usize> RandomVariable<D> for HydrodynamicRadius {
    fn evaluate(&self, sampler: &Sampler<D>) -> f64 {
        let n = sampler.edge_count();
        let p = sampler.space_coordinates();

        let mut sum = 0.0;
        for k in 0..n {
            for l in (k + 1)..n {
                let mut diff2 = 0.0;
                for i in 0..D {
                    let d = p[k][i] - p[l][i];
                    diff2 += d * d;
                }
                sum += 1.0 / (diff2.sqrt() + f64::MIN_POSITIVE);
            }
        }
        (n * n) as f64 / sum
    }

    fn min_value(&self, _sampler: &Sampler<D>) -> f64 {
        0.0
    }

    fn max_value(&self, sampler: &Sampler<D>) -> f64 {
        sampler.total_length()
    }

    fn tag(&self) -> String {
        "HydrodynamicRadius".to_string()
    }

    fn requires_space_curve(&self) -> bool {
        true
    }

    fn clone_box(&self) -> Box<dyn RandomVariable<D>> {
        Box::new(self.clone())
    }
}
