//! **cobars** — conformal-barycentre sampling of closed polygons.
//!
//! This crate implements the complete CoBarS sampling pipeline:
//!
//! 1. **Tiny linear algebra** (`linalg`): fixed-size d-vectors, symmetric
//!    d×d matrices, Cholesky, smallest eigenvalue.
//! 2. **Möbius shifts** (`shift`): conformal shift of a direction batch by
//!    a point of the open unit ball, and the edge-space sampling weight.
//! 3. **Solver** (`sampler`): damped Newton iteration in the Poincaré ball
//!    with an Armijo line search and a Kantorovich stopping rule.
//! 4. **Monte-Carlo driver** (`driver`): parallel batch solving, random
//!    closed polygons, and binned statistics of random variables.
//! 5. **Random variables** (`random_variables`): built-in functionals;
//!    user-defined ones plug in through the [`RandomVariable`] trait.

pub mod driver;
pub mod histogram;
pub mod linalg;
pub mod random_variables;
pub mod rng;
pub mod sampler;
pub mod shift;
pub mod types;

pub use driver::{BatchSolve, BinnedSamples, ClosedPolygonBatch, Driver};
pub use histogram::{normalize_binned, BinnedAccumulator};
pub use rng::RngSource;
pub use sampler::Sampler;
pub use types::{CobarsError, RandomVariable, Settings};
