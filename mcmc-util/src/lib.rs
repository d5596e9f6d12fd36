//! Generic MCMC numerics shared by the samplers in this workspace.
//!
//! Nothing here knows about topic trees: log-domain categorical draws,
//! Gaussian densities, Dirichlet draws, a univariate slice sampler and
//! sample-chain summaries.

#![deny(missing_docs)]

/// Collected samples with their log densities
pub mod chain;

/// Log-domain random variates and densities
pub mod rvs;

/// Univariate stepping-out slice sampler
pub mod slice;

/// Traits for chain samples
pub mod traits;

pub use chain::McmcChain;
pub use rvs::*;
pub use slice::SliceSampler;
pub use traits::ChainSample;
