//! Supervised hierarchical topic regression.
//!
//! Documents are bags of sentences; every sentence follows one
//! root-to-leaf path of a shared nested Chinese restaurant process (nCRP)
//! tree, chosen through a per-document restaurant whose tables sit on
//! leaves. Tokens pick a level along the path from the table's truncated
//! GEM distribution. A document's response is Gaussian around the mean
//! of its tokens' node coefficients plus an optional sparse lexical term.
//!
//! Inference is collapsed Gibbs sampling with periodic regression
//! refits and optional slice sampling of the global hyperparameters.

/// Sampler configuration and global hyperparameters
pub mod config;

/// Tokenized documents with optional responses
pub mod corpus;

/// Collapsed Dirichlet-multinomial count model
pub mod dirichlet_multinomial;

/// Error type shared by every module
pub mod error;

/// Collapsed Gibbs sweeps and the run loop
pub mod gibbs;

/// Slice sampling of global hyperparameters
pub mod hyperparam;

/// Joint log-likelihood and regression fit summaries
pub mod likelihood;

/// Response prediction on unseen documents
pub mod predict;

/// Lasso and weighted ridge solvers
pub mod regression;

/// Top-word and trace reports
pub mod report;

/// Per-document Chinese restaurant
pub mod restaurant;

/// Mutable sampler state
pub mod state;

/// Gzipped JSON snapshots of a sampler state
pub mod state_codec;

/// Truncated GEM level distribution
pub mod stick_breaking;

/// nCRP topic tree
pub mod topic_tree;

/// Structural consistency checks
pub mod validate;

#[cfg(test)]
mod test;

pub use config::{Hyperparameters, PathAssumption, SamplerConfig};
pub use corpus::{Corpus, Document};
pub use error::{Result, SamplerError};
pub use gibbs::{GibbsSampler, RunTrace};
pub use state_codec::Snapshot;
