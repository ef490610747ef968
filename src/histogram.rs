//! Binned accumulation of weighted random-variable values.
//!
//! Every worker thread owns a private [`BinnedAccumulator`]; the driver
//! merges them into one by plain addition, so the reduction is
//! order-independent up to floating-point associativity.
//!
//! Layout of the tensors (row-major):
//!
//! - `bins[weight, functional, bin]` with the weight rows
//!   0 = unweighted, 1 = edge-space weighted, 2 = quotient weighted;
//! - `moments[weight, functional, moment]`, where moment `j` holds the
//!   accumulated `value^j` under the row's weight (moment 0 is the total
//!   mass).

use crate::types::CobarsError;
use log::warn;
use ndarray::{s, Array3, ArrayView2};

/// Number of weighting schemes tracked side by side.
const WEIGHT_ROWS: usize = 3;

/// Thread-local histogram and moment accumulator.
#[derive(Debug, Clone)]
pub struct BinnedAccumulator {
    bins: Array3<f64>,
    moments: Array3<f64>,
    /// Per-functional `bin_count / (hi − lo)`.
    factors: Vec<f64>,
    range_lo: Vec<f64>,
    bin_count: usize,
    moment_count: usize,
}

impl BinnedAccumulator {
    /// Zeroed accumulator for `ranges.nrows()` functionals.
    ///
    /// `ranges` is `[functional, 2]` with `lo < hi` per row.
    pub fn new(
        ranges: ArrayView2<'_, f64>,
        bin_count: usize,
        moment_count: usize,
    ) -> Result<Self, CobarsError> {
        let (fun_count, two) = ranges.dim();
        if two != 2 {
            return Err(CobarsError::InvalidInput(format!(
                "ranges must have shape [functions, 2], got [{fun_count}, {two}]"
            )));
        }
        if fun_count == 0 {
            return Err(CobarsError::InvalidInput(
                "at least one functional range is required".to_string(),
            ));
        }
        if bin_count == 0 {
            return Err(CobarsError::InvalidInput(
                "bin_count must be at least 1".to_string(),
            ));
        }
        if moment_count == 0 {
            return Err(CobarsError::InvalidInput(
                "moment_count must be at least 1".to_string(),
            ));
        }

        let mut factors = Vec::with_capacity(fun_count);
        let mut range_lo = Vec::with_capacity(fun_count);
        for j in 0..fun_count {
            let lo = ranges[[j, 0]];
            let hi = ranges[[j, 1]];
            if !(hi > lo) {
                return Err(CobarsError::InvalidInput(format!(
                    "range of functional {j} must satisfy lo < hi, got [{lo}, {hi}]"
                )));
            }
            factors.push(bin_count as f64 / (hi - lo));
            range_lo.push(lo);
        }

        Ok(Self {
            bins: Array3::zeros((WEIGHT_ROWS, fun_count, bin_count)),
            moments: Array3::zeros((WEIGHT_ROWS, fun_count, moment_count)),
            factors,
            range_lo,
            bin_count,
            moment_count,
        })
    }

    pub fn function_count(&self) -> usize {
        self.factors.len()
    }

    pub fn bins(&self) -> &Array3<f64> {
        &self.bins
    }

    pub fn moments(&self) -> &Array3<f64> {
        &self.moments
    }

    /// Record one evaluated sample of functional `fun` with the given
    /// edge-space and quotient-space weights.  Non-finite values are
    /// dropped so that a failed sample cannot poison the tensors.
    pub fn record(&mut self, fun: usize, value: f64, edge_weight: f64, quotient_weight: f64) {
        if !value.is_finite() {
            return;
        }

        let position = (value - self.range_lo[fun]) * self.factors[fun];
        if position >= 0.0 && position < self.bin_count as f64 {
            let bin = position as usize;
            self.bins[[0, fun, bin]] += 1.0;
            self.bins[[1, fun, bin]] += edge_weight;
            self.bins[[2, fun, bin]] += quotient_weight;
        }

        let mut powers = [1.0, edge_weight, quotient_weight];
        for j in 0..self.moment_count {
            if j > 0 {
                for v in powers.iter_mut() {
                    *v *= value;
                }
            }
            for (row, &v) in powers.iter().enumerate() {
                self.moments[[row, fun, j]] += v;
            }
        }
    }

    /// Fold another accumulator of identical shape into this one.
    pub fn merge_from(&mut self, other: &BinnedAccumulator) {
        self.bins += &other.bins;
        self.moments += &other.moments;
    }

    /// Surrender the accumulated tensors.
    pub fn into_tensors(self) -> (Array3<f64>, Array3<f64>) {
        (self.bins, self.moments)
    }
}

// ─────────────────────────────────────────────────────────────
//  Normalisation
// ─────────────────────────────────────────────────────────────

/// Scale every `(weight row, functional)` slice of `bins` and `moments`
/// by the reciprocal of its total mass `moments[row, fun, 0]`, so that
/// the zeroth moment becomes 1 and the bins sum to the in-range mass
/// fraction.
pub fn normalize_binned(
    bins: &mut Array3<f64>,
    moments: &mut Array3<f64>,
) -> Result<(), CobarsError> {
    let (rows_b, fun_b, _) = bins.dim();
    let (rows_m, fun_m, moment_count) = moments.dim();
    if rows_b != WEIGHT_ROWS || rows_m != WEIGHT_ROWS || fun_b != fun_m {
        return Err(CobarsError::InvalidInput(format!(
            "bins {:?} and moments {:?} do not describe the same sample set",
            bins.dim(),
            moments.dim()
        )));
    }
    if moment_count == 0 {
        return Err(CobarsError::InvalidInput(
            "moments must hold at least the zeroth moment".to_string(),
        ));
    }

    for i in 0..WEIGHT_ROWS {
        for j in 0..fun_b {
            let mass = moments[[i, j, 0]];
            if mass == 0.0 {
                warn!("weight row {i} of functional {j} has zero mass; left unnormalised");
                continue;
            }
            let factor = 1.0 / mass;
            bins.slice_mut(s![i, j, ..]).mapv_inplace(|v| v * factor);
            moments.slice_mut(s![i, j, ..]).mapv_inplace(|v| v * factor);
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────
//  Tests
// ─────────────────────────────────────────────────────────────
