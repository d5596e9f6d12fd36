//! Response prediction for unseen documents.
//!
//! Each snapshot contributes a frozen tree (topics, coefficients and
//! lexical weights as recorded); the documents are seated on it and
//! swept without their responses, and the regression prediction is
//! recorded after burn-in every `lag` iterations.

use crate::config::SamplerConfig;
use crate::corpus::Corpus;
use crate::error::{Result, SamplerError};
use crate::gibbs::{iteration_progress_bar, GibbsSampler};
use crate::likelihood::LogLikelihoodTerms;
use crate::state::{SamplerState, INIT_ITERATION};
use crate::state_codec::Snapshot;

use log::info;
use mcmc_util::McmcChain;

/// Predicted responses of every recorded sample over all snapshots
pub fn predict_responses(
    corpus: &Corpus,
    snapshots: &[Snapshot],
    config: &SamplerConfig,
) -> Result<McmcChain<Vec<f64>>> {
    corpus.validate()?;
    if snapshots.is_empty() {
        return Err(SamplerError::Config("no snapshot to predict with".into()));
    }
    let mut chain = McmcChain::new();

    for (i, snapshot) in snapshots.iter().enumerate() {
        if snapshot.vocab_size != corpus.vocab_size {
            return Err(SamplerError::StateCodec(format!(
                "snapshot {} was trained on {} words, corpus has {}",
                i, snapshot.vocab_size, corpus.vocab_size
            )));
        }
        let samples = predict_with_snapshot(corpus, snapshot, config)?;
        info!(
            "snapshot {} (iteration {}): {} prediction samples",
            i,
            snapshot.iteration,
            samples.n_samples()
        );
        chain.extend(samples);
    }
    Ok(chain)
}

fn predict_with_snapshot(
    corpus: &Corpus,
    snapshot: &Snapshot,
    config: &SamplerConfig,
) -> Result<McmcChain<Vec<f64>>> {
    let model = snapshot.model(config.tree_priors())?;
    let mut state = SamplerState::new(corpus, model.tree, model.hyper, INIT_ITERATION);
    state.lexical_weights = model.lexical_weights;

    let mut sampler = GibbsSampler::with_state(corpus, config.clone(), state, None)?;
    sampler.seat_unseen_documents()?;

    let mut chain = McmcChain::new();
    let pb = iteration_progress_bar("Predicting", config.max_iter as u64);

    for iter in 0..config.max_iter {
        sampler.state_mut().iteration = iter as i64;
        sampler.predict_sweep()?;
        if iter >= config.burn_in && iter % config.lag == 0 {
            let llh = LogLikelihoodTerms::compute(sampler.state(), None).total();
            chain.push(sampler.state().predictions(), llh);
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    if chain.n_samples() == 0 {
        let llh = LogLikelihoodTerms::compute(sampler.state(), None).total();
        chain.push(sampler.state().predictions(), llh);
    }
    Ok(chain)
}
