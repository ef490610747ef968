//! Parallel Monte-Carlo batch drivers.
//!
//! Every batch call runs its samples as independent `rayon` tasks on a
//! worker pool sized to the driver's thread count.  Per-sample results
//! are written into disjoint rows of the output tensors;
//! `sample_binned` folds per-task [`BinnedAccumulator`]s and reduces
//! them by plain addition, so the reduction is order-independent up to
//! floating-point associativity.
//!
//! Per-sample outputs are bitwise deterministic for any worker count,
//! because every sample owns a PRNG stream derived from
//! `(master_seed, sample index)`.  Reduced sums agree across worker
//! counts up to associativity; bitwise identity of the sums across
//! *different* worker counts is not guaranteed.

use crate::histogram::{self, BinnedAccumulator};
use crate::rng::RngSource;
use crate::sampler::Sampler;
use crate::types::{CobarsError, RandomVariable};
use log::{debug, warn};
use ndarray::{Array1, Array2, Array3, ArrayView2, ArrayView3, Axis};
use rayon::prelude::*;

// ─────────────────────────────────────────────────────────────
//  Batch outputs
// ─────────────────────────────────────────────────────────────

/// Result of [`Driver::optimize_batch`].
#[derive(Debug)]
pub struct BatchSolve {
    /// Shift vectors, `[sample, dim]`.
    pub w: Array2<f64>,
    /// Shifted (closed) edge directions, `[sample, edge, dim]`.
    pub y: Array3<f64>,
}

/// Result of [`Driver::random_closed_polygons`].
#[derive(Debug)]
pub struct ClosedPolygonBatch {
    /// Drawn initial directions, `[sample, edge, dim]`.
    pub x: Array3<f64>,
    /// Shift vectors, `[sample, dim]`.
    pub w: Array2<f64>,
    /// Shifted (closed) edge directions, `[sample, edge, dim]`.
    pub y: Array3<f64>,
    /// Edge-space weights κ; zero for samples that failed to converge.
    pub edge_space_weights: Array1<f64>,
    /// Quotient-space weights κ·χ; zero for samples that failed to
    /// converge.
    pub quotient_space_weights: Array1<f64>,
}

/// Result of [`Driver::sample_binned`].
#[derive(Debug)]
pub struct BinnedSamples {
    /// `[weight, functional, bin]`.
    pub bins: Array3<f64>,
    /// `[weight, functional, moment]`.
    pub moments: Array3<f64>,
}

impl BinnedSamples {
    /// Rescale so that every total mass `moments[i, j, 0]` becomes 1.
    pub fn normalize(&mut self) -> Result<(), CobarsError> {
        histogram::normalize_binned(&mut self.bins, &mut self.moments)
    }
}

// ─────────────────────────────────────────────────────────────
//  Driver
// ─────────────────────────────────────────────────────────────

/// Parallel batch front-end around a prototype [`Sampler`].
///
/// The prototype fixes edge lengths, quotient weights, and solver
/// settings for the whole batch; every worker task solves on a private
/// clone of it.
#[derive(Debug, Clone)]
pub struct Driver<const D: usize> {
    prototype: Sampler<D>,
    thread_count: usize,
    master_seed: u64,
}

impl<const D: usize> Driver<D> {
    pub fn new(prototype: Sampler<D>, thread_count: usize) -> Result<Self, CobarsError> {
        if thread_count == 0 {
            return Err(CobarsError::InvalidInput(
                "thread_count must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            prototype,
            thread_count,
            master_seed: 0,
        })
    }

    /// Replace the master seed all per-sample streams derive from.
    pub fn with_seed(mut self, master_seed: u64) -> Self {
        self.master_seed = master_seed;
        self
    }

    pub fn sampler(&self) -> &Sampler<D> {
        &self.prototype
    }

    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// Pool sized to this driver's worker count.
    fn worker_pool(&self) -> Result<rayon::ThreadPool, CobarsError> {
        Ok(rayon::ThreadPoolBuilder::new()
            .num_threads(self.thread_count)
            .build()?)
    }

    // ── optimize_batch ─────────────────────────────────────

    /// Solve every sample of a batch of caller-supplied initial
    /// directions of shape `[sample, edge, dim]`, optionally
    /// renormalising the directions first.
    pub fn optimize_batch(
        &self,
        x_in: ArrayView3<'_, f64>,
        normalize: bool,
    ) -> Result<BatchSolve, CobarsError> {
        let (sample_count, n, d) = x_in.dim();
        let edge_count = self.prototype.edge_count();
        if n != edge_count || d != D {
            return Err(CobarsError::InvalidInput(format!(
                "expected directions of shape [S, {edge_count}, {D}], got [{sample_count}, {n}, {d}]"
            )));
        }

        let mut w_out = Array2::<f64>::zeros((sample_count, D));
        let mut y_out = Array3::<f64>::zeros((sample_count, edge_count, D));

        self.worker_pool()?.install(|| {
            w_out
                .axis_iter_mut(Axis(0))
                .into_par_iter()
                .zip(y_out.axis_iter_mut(Axis(0)))
                .zip(x_in.axis_iter(Axis(0)))
                .enumerate()
                .for_each_init(
                    || self.prototype.clone(),
                    |worker, (k, ((mut w_row, mut y_row), x_row))| {
                        // The whole batch was shape-checked at entry.
                        if let Err(err) = worker.set_initial_directions(x_row, normalize) {
                            warn!("sample {k}: {err}; leaving row zeroed");
                            return;
                        }
                        worker.compute_shift_vector();
                        if let Err(err) = worker.optimize() {
                            warn!("sample {k}: {err}; keeping best iterate");
                        }

                        let w = worker.shift_vector();
                        for i in 0..D {
                            w_row[i] = w[i];
                        }
                        for (e, ye) in worker.shifted_directions().iter().enumerate() {
                            for i in 0..D {
                                y_row[[e, i]] = ye[i];
                            }
                        }
                    },
                );
        });

        Ok(BatchSolve { w: w_out, y: y_out })
    }

    // ── random_closed_polygons ─────────────────────────────

    /// Draw `sample_count` random closed polygons and record, per sample,
    /// the initial directions, the shift vector, the closed directions,
    /// and both sampling weights.  Samples that fail to converge keep
    /// their best iterate and get weight 0.
    pub fn random_closed_polygons(
        &self,
        sample_count: usize,
    ) -> Result<ClosedPolygonBatch, CobarsError> {
        let edge_count = self.prototype.edge_count();
        debug!(
            "random closed polygons: d = {D}, n = {edge_count}, samples = {sample_count}, threads = {}",
            self.thread_count
        );

        let mut x_out = Array3::<f64>::zeros((sample_count, edge_count, D));
        let mut w_out = Array2::<f64>::zeros((sample_count, D));
        let mut y_out = Array3::<f64>::zeros((sample_count, edge_count, D));
        let mut k_out = Array1::<f64>::zeros(sample_count);
        let mut kq_out = Array1::<f64>::zeros(sample_count);

        let master_seed = self.master_seed;

        self.worker_pool()?.install(|| {
            x_out
                .axis_iter_mut(Axis(0))
                .into_par_iter()
                .zip(w_out.axis_iter_mut(Axis(0)))
                .zip(y_out.axis_iter_mut(Axis(0)))
                .zip(k_out.axis_iter_mut(Axis(0)))
                .zip(kq_out.axis_iter_mut(Axis(0)))
                .enumerate()
                .for_each_init(
                    || self.prototype.clone(),
                    |worker, (k, ((((mut x_row, mut w_row), mut y_row), kappa_slot), kq_slot))| {
                        worker.reseed_for_sample(master_seed, k as u64);
                        worker.randomize_initial_directions();

                        for (e, xe) in worker.initial_directions().iter().enumerate() {
                            for i in 0..D {
                                x_row[[e, i]] = xe[i];
                            }
                        }

                        worker.compute_shift_vector();
                        let solved = worker.optimize();
                        if let Err(err) = &solved {
                            warn!("sample {k}: {err}; recording zero weight");
                        }

                        let w = worker.shift_vector();
                        for i in 0..D {
                            w_row[i] = w[i];
                        }
                        for (e, ye) in worker.shifted_directions().iter().enumerate() {
                            for i in 0..D {
                                y_row[[e, i]] = ye[i];
                            }
                        }

                        let (kappa, kappa_chi) = sample_weights(worker, solved.is_ok(), k);
                        *kappa_slot.into_scalar() = kappa;
                        *kq_slot.into_scalar() = kappa_chi;
                    },
                );
        });

        Ok(ClosedPolygonBatch {
            x: x_out,
            w: w_out,
            y: y_out,
            edge_space_weights: k_out,
            quotient_space_weights: kq_out,
        })
    }

    // ── sample_binned ──────────────────────────────────────

    /// Draw and solve `sample_count` polygons, evaluate every functional
    /// on each, and accumulate binned counts and moments under the three
    /// weighting schemes.
    ///
    /// `ranges` is `[functional, 2]`; values land in bin
    /// `⌊(v − lo)·B/(hi − lo)⌋` when that index lies in `[0, B)`.
    pub fn sample_binned(
        &self,
        functionals: &[Box<dyn RandomVariable<D>>],
        ranges: ArrayView2<'_, f64>,
        bin_count: usize,
        moment_count: usize,
        sample_count: usize,
    ) -> Result<BinnedSamples, CobarsError> {
        if functionals.is_empty() {
            return Err(CobarsError::InvalidInput(
                "at least one random variable is required".to_string(),
            ));
        }
        if ranges.dim().0 != functionals.len() {
            return Err(CobarsError::InvalidInput(format!(
                "{} ranges supplied for {} random variables",
                ranges.dim().0,
                functionals.len()
            )));
        }
        let template = BinnedAccumulator::new(ranges, bin_count, moment_count)?;
        let needs_curve = functionals.iter().any(|f| f.requires_space_curve());

        debug!(
            "binned sampling: d = {D}, n = {}, samples = {sample_count}, bins = {bin_count}, \
             moments = {moment_count}, threads = {}",
            self.prototype.edge_count(),
            self.thread_count
        );
        for f in functionals {
            debug!("  sampling {}", f.tag());
        }

        let master_seed = self.master_seed;

        let accumulated = self.worker_pool()?.install(|| {
            (0..sample_count)
                .into_par_iter()
                .fold(
                    || {
                        let worker = self.prototype.clone();
                        let task_functionals: Vec<Box<dyn RandomVariable<D>>> =
                            functionals.iter().map(|f| f.clone_box()).collect();
                        (worker, task_functionals, template.clone())
                    },
                    |(mut worker, task_functionals, mut acc), k| {
                        worker.reseed_for_sample(master_seed, k as u64);
                        worker.randomize_initial_directions();
                        worker.compute_shift_vector();

                        let solved = worker.optimize();
                        if let Err(err) = &solved {
                            warn!("sample {k}: {err}; recording zero weight");
                        }
                        if needs_curve {
                            worker.compute_space_coordinates();
                        }
                        let (kappa, kappa_chi) = sample_weights(&mut worker, solved.is_ok(), k);

                        for (j, f) in task_functionals.iter().enumerate() {
                            acc.record(j, f.evaluate(&worker), kappa, kappa_chi);
                        }
                        (worker, task_functionals, acc)
                    },
                )
                .map(|(_, _, acc)| acc)
                .reduce(
                    || template.clone(),
                    |mut merged, part| {
                        merged.merge_from(&part);
                        merged
                    },
                )
        });

        let (bins, moments) = accumulated.into_tensors();
        Ok(BinnedSamples { bins, moments })
    }

    // ── random_spherical_points ────────────────────────────

    /// Fill `[sample, edge, dim]` with i.i.d. uniform unit vectors using
    /// the same per-sample streams as the solving batch calls.
    pub fn random_spherical_points(&self, sample_count: usize) -> Result<Array3<f64>, CobarsError> {
        let edge_count = self.prototype.edge_count();
        let mut x_out = Array3::<f64>::zeros((sample_count, edge_count, D));
        let master_seed = self.master_seed;

        self.worker_pool()?.install(|| {
            x_out
                .axis_iter_mut(Axis(0))
                .into_par_iter()
                .enumerate()
                .for_each(|(k, mut sample)| {
                    let mut rng = RngSource::for_sample(master_seed, k as u64);
                    for e in 0..edge_count {
                        let v = rng.unit_vector::<D>();
                        for i in 0..D {
                            sample[[e, i]] = v[i];
                        }
                    }
                });
        });

        Ok(x_out)
    }
}

/// Weights of the current sample: κ and κ·χ on convergence, zeros for
/// best-effort samples so they cannot bias a weighted estimate.
fn sample_weights<const D: usize>(
    worker: &mut Sampler<D>,
    solve_ok: bool,
    sample_index: usize,
) -> (f64, f64) {
    if !(solve_ok && worker.converged()) {
        debug!(
            "sample {sample_index}: no convergence after {} iterations (residual {:.3e})",
            worker.iteration_count(),
            worker.residual()
        );
        return (0.0, 0.0);
    }
    match worker.compute_edge_space_weight() {
        Ok(kappa) => {
            let chi = worker.compute_quotient_correction();
            (kappa, kappa * chi)
        }
        Err(err) => {
            warn!("sample {sample_index}: weight computation failed ({err}); recording zero");
            (0.0, 0.0)
        }
    }
}
