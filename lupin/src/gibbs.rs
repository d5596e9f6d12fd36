//! Collapsed Gibbs sampler over token levels, sentence tables and table
//! paths.
//!
//! Every update follows remove -> score -> sample -> add: the variable's
//! own contribution is taken out of the shared counts (and out of the
//! document's cached topic weight when the response is observed) before
//! its full conditional is evaluated.

use crate::config::SamplerConfig;
use crate::corpus::Corpus;
use crate::dirichlet_multinomial::SymbolCounts;
use crate::error::{Result, SamplerError};
use crate::hyperparam::slice_sample_hyperparameters;
use crate::likelihood::{regression_fit, LogLikelihoodTerms};
use crate::regression::{lasso, weighted_ridge};
use crate::restaurant::Table;
use crate::state::{ChangeCounts, SamplerState, INIT_ITERATION};
use crate::topic_tree::{NodeId, TopicTree};
use crate::validate::validate_state;

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use mcmc_util::{log_normal_density, log_sum_exp, sample_categorical_log, McmcChain};
use nalgebra::{DMatrix, DVector};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::collections::BTreeMap;

/// Lexical weights below this magnitude after the initial lasso are dropped
pub const LEXICAL_SUPPORT_THRESHOLD: f64 = 0.1;

/// What a single conditional update is allowed to do
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepFlags {
    /// take the variable's current assignment out of the counts first
    pub remove: bool,
    /// put the sampled assignment into the counts
    pub add: bool,
    /// score the document's response
    pub observed: bool,
    /// allow new tree nodes
    pub extend: bool,
}

impl StepFlags {
    pub const OBSERVED: Self = Self {
        remove: true,
        add: true,
        observed: true,
        extend: true,
    };
    pub const UNOBSERVED: Self = Self {
        remove: true,
        add: true,
        observed: false,
        extend: true,
    };
    /// first placement during initialization
    pub const PLACE: Self = Self {
        remove: false,
        add: true,
        observed: false,
        extend: true,
    };
    /// fixed tree, as in prediction
    pub const FROZEN: Self = Self {
        remove: true,
        add: true,
        observed: false,
        extend: false,
    };
    pub const FROZEN_PLACE: Self = Self {
        remove: false,
        add: true,
        observed: false,
        extend: false,
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Initializing,
    BurnIn,
    Sampling,
    Stopped,
}

/// Traces collected over a run
#[derive(Clone, Debug, Default)]
pub struct RunTrace {
    /// joint log-likelihood after every iteration
    pub log_likelihoods: Vec<f64>,
    /// sampled hyperparameters, in `Hyperparameters::NAMES` order
    pub hyperparameters: McmcChain<Vec<f64>>,
}

pub struct GibbsSampler<'a> {
    corpus: &'a Corpus,
    config: SamplerConfig,
    responses: Option<Vec<f64>>,
    state: SamplerState,
    rng: SmallRng,
    phase: Phase,
}

impl<'a> GibbsSampler<'a> {
    /// A training sampler with an empty tree; every document needs a
    /// response.
    pub fn new(corpus: &'a Corpus, config: SamplerConfig) -> Result<Self> {
        corpus.validate()?;
        let responses = corpus.responses()?;
        let tree = TopicTree::new(
            config.height,
            corpus.vocab_size,
            config.tree_priors(),
            INIT_ITERATION,
        );
        let state = SamplerState::new(corpus, tree, config.hyper.clone(), INIT_ITERATION);
        Self::with_state(corpus, config, state, Some(responses))
    }

    /// Continue from an existing state, e.g. a restored snapshot
    pub fn with_state(
        corpus: &'a Corpus,
        config: SamplerConfig,
        state: SamplerState,
        responses: Option<Vec<f64>>,
    ) -> Result<Self> {
        config.validate()?;
        if state.height() != config.height || state.num_documents() != corpus.num_documents() {
            return Err(SamplerError::Config(format!(
                "state of height {} over {} documents does not match height {} over {} documents",
                state.height(),
                state.num_documents(),
                config.height,
                corpus.num_documents()
            )));
        }
        if let Some(y) = &responses {
            if y.len() != corpus.num_documents() {
                return Err(SamplerError::Config(format!(
                    "{} responses for {} documents",
                    y.len(),
                    corpus.num_documents()
                )));
            }
        }
        let rng = SmallRng::seed_from_u64(config.seed);
        Ok(Self {
            corpus,
            config,
            responses,
            state,
            rng,
            phase: Phase::Initializing,
        })
    }

    pub fn state(&self) -> &SamplerState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut SamplerState {
        &mut self.state
    }

    pub fn into_state(self) -> SamplerState {
        self.state
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn observed(&self, flags: StepFlags) -> bool {
        flags.observed && self.responses.is_some()
    }

    fn response(&self, d: usize) -> f64 {
        self.responses.as_ref().map_or(0.0, |y| y[d])
    }

    /////////////////////
    // initialization  //
    /////////////////////

    /// Random initialization: lexical support by lasso, then every
    /// sentence on its own fresh path, re-seated and re-leveled, then
    /// every table's path re-sampled.
    pub fn initialize(&mut self) -> Result<()> {
        self.phase = Phase::Initializing;
        info!(
            "Initializing {} documents, {} sentences, {} tokens",
            self.corpus.num_documents(),
            self.corpus.num_sentences(),
            self.corpus.num_tokens()
        );

        self.initialize_lexical_weights()?;
        self.initialize_random_assignments()?;

        self.state.update_document_topic_weights();
        self.state.update_document_lexical_weights(self.corpus);

        info!(
            "Initialized: {:?} nodes per level, {} tables",
            self.state.tree.nodes_per_level(),
            self.state.num_tables()
        );
        validate_state(&self.state, self.corpus)
    }

    fn initialize_lexical_weights(&mut self) -> Result<()> {
        self.state.lexical_weights.clear();
        let lambda = self.config.lexical_l1;
        let Some(y) = self.responses.as_ref() else {
            return Ok(());
        };
        if lambda <= 0.0 {
            return Ok(());
        }

        let freq = self.corpus.word_frequencies();
        let x = DMatrix::from_fn(freq.len(), self.corpus.vocab_size, |d, v| freq[d][v]);
        let w = lasso(&x, &DVector::from_column_slice(y), lambda)?;

        for (v, &wv) in w.iter().enumerate() {
            if wv.abs() >= LEXICAL_SUPPORT_THRESHOLD {
                self.state.lexical_weights.insert(v, wv);
            }
        }
        info!(
            "{} words selected for the lexical regression",
            self.state.lexical_weights.len()
        );
        Ok(())
    }

    fn initialize_random_assignments(&mut self) -> Result<()> {
        let corpus = self.corpus;
        for (d, doc) in corpus.documents.iter().enumerate() {
            for (s, sentence) in doc.sentences.iter().enumerate() {
                let t = self.open_table(d)?;
                let root = self.state.tree.root();
                let leaf = self
                    .state
                    .tree
                    .create_path(root, self.state.iteration, &mut self.rng)?;
                self.state.tree.add_customer(leaf);
                self.state.table_mut(d, t)?.set_leaf(Some(leaf));
                self.state.restaurants[d].add_customer_to_table(s, t)?;
                self.state.sentence_tables[d][s] = Some(t);

                for n in 0..sentence.len() {
                    self.sample_level_for_token(d, s, n, StepFlags::PLACE)?;
                }
                if d > 0 || s > 0 {
                    self.sample_table_for_sentence(d, s, StepFlags::UNOBSERVED)?;
                }
                for n in 0..sentence.len() {
                    self.sample_level_for_token(d, s, n, StepFlags::UNOBSERVED)?;
                }
            }
        }

        for d in 0..corpus.num_documents() {
            for t in self.state.restaurants[d].table_indices() {
                self.sample_path_for_table(d, t, StepFlags::UNOBSERVED)?;
            }
        }
        Ok(())
    }

    /// Seat unseen documents on a fixed tree: one table per sentence,
    /// every token at the deepest level, paths among existing leaves.
    pub fn seat_unseen_documents(&mut self) -> Result<()> {
        self.phase = Phase::Initializing;
        let corpus = self.corpus;
        let last = self.state.height() - 1;
        for (d, doc) in corpus.documents.iter().enumerate() {
            for (s, sentence) in doc.sentences.iter().enumerate() {
                let t = self.open_table(d)?;
                self.state.restaurants[d].add_customer_to_table(s, t)?;
                self.state.sentence_tables[d][s] = Some(t);
                for n in 0..sentence.len() {
                    self.state.token_levels[d][s][n] = last;
                    self.state.table_mut(d, t)?.stick_mut().increment(last)?;
                    self.state.change_sentence_level_count(d, s, last, 1)?;
                }
            }
        }
        for d in 0..corpus.num_documents() {
            for t in self.state.restaurants[d].table_indices() {
                self.sample_path_for_table(d, t, StepFlags::FROZEN_PLACE)?;
            }
        }
        self.state.update_document_topic_weights();
        self.state.update_document_lexical_weights(corpus);
        Ok(())
    }

    /// Open an empty table in document `d`, not yet on any path
    pub(crate) fn open_table(&mut self, d: usize) -> Result<usize> {
        let t = self.state.restaurants[d].next_table_index();
        let stick = self.state.new_stick();
        self.state.restaurants[d].add_table(Table::new(t, self.state.iteration, stick))?;
        Ok(t)
    }

    //////////////////////////
    // (a) level for token  //
    //////////////////////////

    pub fn sample_level_for_token(&mut self, d: usize, s: usize, n: usize, flags: StepFlags) -> Result<()> {
        let observed = self.observed(flags);
        let t = self.state.table_of(d, s)?;
        let path = self.state.tree.path_from_node(self.state.table_leaf(d, t)?);
        let word = self.corpus.documents[d].sentences[s][n];
        let current = self.state.token_levels[d][s][n];

        if observed {
            self.state.doc_topic_weights[d] -= self.state.tree[path[current]].regression();
        }
        if flags.remove {
            self.change_token(d, s, t, path[current], current, word, -1)?;
        }

        let log_probs = self.token_level_log_probs(d, t, &path, word, observed)?;
        let level = sample_categorical_log(&log_probs, &mut self.rng);
        if level != current {
            self.state.changes.tokens += 1;
        }
        self.state.token_levels[d][s][n] = level;

        if flags.add {
            self.change_token(d, s, t, path[level], level, word, 1)?;
        }
        if observed {
            self.state.doc_topic_weights[d] += self.state.tree[path[level]].regression();
        }
        Ok(())
    }

    /// Unnormalized log probabilities of every level for token `n` of
    /// sentence `s`, scored against the counts as they stand.
    pub fn level_log_probabilities(&self, d: usize, s: usize, n: usize, observed: bool) -> Result<Vec<f64>> {
        let t = self.state.table_of(d, s)?;
        let path = self.state.tree.path_from_node(self.state.table_leaf(d, t)?);
        let word = self.corpus.documents[d].sentences[s][n];
        self.token_level_log_probs(d, t, &path, word, observed && self.responses.is_some())
    }

    fn token_level_log_probs(
        &self,
        d: usize,
        t: usize,
        path: &[NodeId],
        word: usize,
        observed: bool,
    ) -> Result<Vec<f64>> {
        let stick = self.state.table(d, t)?.stick();
        let base = self.state.doc_topic_weights[d] + self.state.doc_lexical_weights[d];
        let num_tokens = self.state.doc_token_counts[d] as f64;
        let sd = self.state.hyper.rho.sqrt();

        Ok(path
            .iter()
            .enumerate()
            .map(|(l, &node)| {
                let node = &self.state.tree[node];
                let mut lp = stick.log_prob(l) + node.point_log_probability(word);
                if observed {
                    let mean = (base + node.regression()) / num_tokens;
                    lp += log_normal_density(self.response(d), mean, sd);
                }
                lp
            })
            .collect())
    }

    #[allow(clippy::too_many_arguments)]
    fn change_token(
        &mut self,
        d: usize,
        s: usize,
        t: usize,
        node: NodeId,
        level: usize,
        word: usize,
        delta: i64,
    ) -> Result<()> {
        self.state.table_mut(d, t)?.stick_mut().change_count(level, delta)?;
        self.state.change_sentence_level_count(d, s, level, delta)?;
        self.state.tree[node].content_mut().change_count(word, delta)
    }

    /////////////////////////////
    // (b) table for sentence  //
    /////////////////////////////

    pub fn sample_table_for_sentence(&mut self, d: usize, s: usize, flags: StepFlags) -> Result<()> {
        let observed = self.observed(flags);
        let obs = self.state.sentence_observations(self.corpus, d, s);
        let level_counts = self.state.sentence_level_counts[d][s].clone();
        let current = self.state.sentence_tables[d][s];

        if observed {
            self.state.doc_topic_weights[d] -= self.state.sentence_topic_weight(d, s);
        }
        if flags.remove {
            self.detach_sentence(d, s)?;
        }

        let mut candidates: Vec<Option<usize>> = vec![];
        let mut log_probs: Vec<f64> = vec![];
        let tree = &self.state.tree;

        for table in self.state.restaurants[d].tables() {
            let leaf = table.leaf().ok_or_else(|| {
                SamplerError::InvalidState(format!(
                    "table {} of document {} is not on a path",
                    table.index(),
                    d
                ))
            })?;
            let path = tree.path_from_node(leaf);

            let mut lp = (table.num_customers() as f64).ln() + table.stick().log_prob_counts(&level_counts);
            lp += path
                .iter()
                .zip(&obs)
                .map(|(&node, o)| tree[node].log_probability(o))
                .sum::<f64>();
            if observed {
                let added: f64 = path
                    .iter()
                    .zip(&level_counts)
                    .map(|(&node, &c)| tree[node].regression() * c as f64)
                    .sum();
                lp += self.response_log_likelihood(d, added, self.state.hyper.rho);
            }
            candidates.push(Some(table.index()));
            log_probs.push(lp);
        }

        let mut new_table_scores = None;
        if flags.extend {
            let scores = self.path_scores(d, &obs, &level_counts, observed, true);
            let marginal = log_sum_exp(&scores.iter().map(|&(_, lp)| lp).collect::<Vec<_>>());
            let lp = self.state.hyper.alpha.ln() + self.state.new_stick().log_prob_counts(&level_counts) + marginal;
            candidates.push(None);
            log_probs.push(lp);
            new_table_scores = Some(scores);
        }

        if candidates.is_empty() {
            return Err(SamplerError::InvalidState(format!(
                "no table can seat sentence {} of document {}",
                s, d
            )));
        }

        let t = match candidates[sample_categorical_log(&log_probs, &mut self.rng)] {
            Some(t) => t,
            None => {
                let scores = new_table_scores.unwrap_or_default();
                let leaf = self.sample_leaf(&scores)?;
                let t = self.open_table(d)?;
                self.state.table_mut(d, t)?.set_leaf(Some(leaf));
                self.state.tree.add_customer(leaf);
                t
            }
        };
        if current != Some(t) {
            self.state.changes.sentences += 1;
        }
        self.state.sentence_tables[d][s] = Some(t);

        if flags.add {
            self.attach_sentence(d, s, t)?;
        }
        if observed {
            self.state.doc_topic_weights[d] += self.state.sentence_topic_weight(d, s);
        }
        Ok(())
    }

    /// Take sentence `s` off its table and its tokens off the table's
    /// path; an emptied table is closed and its path pruned.
    pub(crate) fn detach_sentence(&mut self, d: usize, s: usize) -> Result<()> {
        let t = self.state.table_of(d, s)?;
        let leaf = self.state.table_leaf(d, t)?;
        let obs = self.state.sentence_observations(self.corpus, d, s);
        let level_counts = self.state.sentence_level_counts[d][s].clone();

        self.state.table_mut(d, t)?.stick_mut().decrease_counts(&level_counts)?;
        self.state.tree.remove_observations(leaf, &obs)?;
        let emptied = self.state.restaurants[d].remove_customer_from_table(s, t)?;
        self.state.sentence_tables[d][s] = None;

        if emptied {
            self.state.tree.remove_customer(leaf)?;
            self.state.restaurants[d].remove_table(t)?;
        }
        Ok(())
    }

    /// Seat sentence `s` at table `t`, which must already be on a path
    pub(crate) fn attach_sentence(&mut self, d: usize, s: usize, t: usize) -> Result<()> {
        let leaf = self.state.table_leaf(d, t)?;
        let obs = self.state.sentence_observations(self.corpus, d, s);
        let level_counts = self.state.sentence_level_counts[d][s].clone();

        self.state.table_mut(d, t)?.stick_mut().increase_counts(&level_counts)?;
        self.state.tree.add_observations(leaf, &obs)?;
        self.state.restaurants[d].add_customer_to_table(s, t)?;
        self.state.sentence_tables[d][s] = Some(t);
        Ok(())
    }

    //////////////////////////
    // (c) path for table   //
    //////////////////////////

    pub fn sample_path_for_table(&mut self, d: usize, t: usize, flags: StepFlags) -> Result<()> {
        let observed = self.observed(flags);
        let customers: Vec<usize> = self.state.table(d, t)?.customers().iter().copied().collect();
        let (obs, level_counts) = self.state.customers_observations(self.corpus, d, &customers);
        let current = self.state.table(d, t)?.leaf();
        let current_path = current.map(|leaf| self.state.tree.path_string(leaf));

        if observed {
            for &s in &customers {
                self.state.doc_topic_weights[d] -= self.state.sentence_topic_weight(d, s);
            }
        }
        if flags.remove {
            if let Some(leaf) = current {
                self.state.tree.remove_observations(leaf, &obs)?;
                self.state.tree.remove_customer(leaf)?;
            }
            self.state.table_mut(d, t)?.set_leaf(None);
        }

        let scores = self.path_scores(d, &obs, &level_counts, observed, flags.extend);
        let leaf = self.sample_leaf(&scores)?;
        if current_path.as_deref() != Some(self.state.tree.path_string(leaf).as_str()) {
            self.state.changes.tables += 1;
        }
        self.state.table_mut(d, t)?.set_leaf(Some(leaf));

        if flags.add {
            self.state.tree.add_customer(leaf);
            self.state.tree.add_observations(leaf, &obs)?;
        }
        if observed {
            for &s in &customers {
                self.state.doc_topic_weights[d] += self.state.sentence_topic_weight(d, s);
            }
        }
        Ok(())
    }

    /// `prior + words (+ response)` for every node a new table could
    /// follow; only leaves when the tree may not grow.
    fn path_scores(
        &self,
        d: usize,
        obs: &[SymbolCounts],
        level_counts: &[u32],
        observed: bool,
        extend: bool,
    ) -> Vec<(NodeId, f64)> {
        let tree = &self.state.tree;
        let priors = tree.path_log_prior();
        let words = tree.path_word_log_likelihood(obs);
        let responses = observed.then(|| self.path_response_log_likelihood(d, level_counts));

        priors
            .iter()
            .filter(|(id, _)| extend || tree.is_leaf(**id))
            .map(|(&id, &lp)| {
                let mut score = lp + words[&id];
                if let Some(res) = &responses {
                    score += res[&id];
                }
                (id, score)
            })
            .collect()
    }

    /// Draw a node from `scores`, growing a fresh path below it if it is
    /// internal.
    fn sample_leaf(&mut self, scores: &[(NodeId, f64)]) -> Result<NodeId> {
        if scores.is_empty() {
            return Err(SamplerError::InvalidState("no path to sample from".into()));
        }
        let log_probs: Vec<f64> = scores.iter().map(|&(_, lp)| lp).collect();
        let node = scores[sample_categorical_log(&log_probs, &mut self.rng)].0;
        if self.state.tree.is_leaf(node) {
            Ok(node)
        } else {
            self.state
                .tree
                .create_path(node, self.state.iteration, &mut self.rng)
        }
    }

    /// Response log-likelihood of document `d` if tokens with per-level
    /// counts `level_counts` were assigned along the path ending at each
    /// node. Levels below an internal node contribute the prior mean of
    /// their coefficient and inflate the variance by its prior variance.
    pub fn path_response_log_likelihood(&self, d: usize, level_counts: &[u32]) -> BTreeMap<NodeId, f64> {
        let tree = &self.state.tree;
        let priors = tree.priors();
        let height = tree.height();
        let num_tokens = self.state.doc_token_counts[d] as f64;
        let base = self.state.doc_topic_weights[d] + self.state.doc_lexical_weights[d];
        let y = self.response(d);

        let mut out = BTreeMap::new();
        let mut stack = vec![(tree.root(), 0.0)];
        while let Some((id, parent_sum)) = stack.pop() {
            let node = &tree[id];
            let sum = parent_sum + node.regression() * level_counts[node.level()] as f64;
            for child in node.children() {
                stack.push((child, sum));
            }

            let mut mean_sum = sum;
            let mut var = self.state.hyper.rho;
            for l in (node.level() + 1)..height {
                let c = level_counts[l] as f64;
                mean_sum += c * priors.mus[l];
                var += (c / num_tokens).powi(2) * priors.sigmas[l];
            }
            out.insert(id, log_normal_density(y, (base + mean_sum) / num_tokens, var.sqrt()));
        }
        out
    }

    fn response_log_likelihood(&self, d: usize, added_weight: f64, rho: f64) -> f64 {
        let num_tokens = self.state.doc_token_counts[d] as f64;
        let mean = (self.state.doc_topic_weights[d] + self.state.doc_lexical_weights[d] + added_weight) / num_tokens;
        log_normal_density(self.response(d), mean, rho.sqrt())
    }

    ////////////////
    // sweeps     //
    ////////////////

    /// Levels then table for every sentence, then every table's path
    pub fn sweep_document(&mut self, d: usize, flags: StepFlags) -> Result<()> {
        let corpus = self.corpus;
        let sentences = &corpus.documents[d].sentences;
        for (s, sentence) in sentences.iter().enumerate() {
            for n in 0..sentence.len() {
                self.sample_level_for_token(d, s, n, flags)?;
            }
            // a lone sentence has nowhere else to go on a fixed tree
            if flags.extend || sentences.len() > 1 {
                self.sample_table_for_sentence(d, s, flags)?;
            }
        }
        for t in self.state.restaurants[d].table_indices() {
            self.sample_path_for_table(d, t, flags)?;
        }
        Ok(())
    }

    /// One training iteration: a full sweep over documents, topic
    /// re-draws, then the lexical and topic regressions re-fit against
    /// each other's residuals.
    pub fn iterate(&mut self) -> Result<()> {
        let flags = if self.responses.is_some() {
            StepFlags::OBSERVED
        } else {
            StepFlags::UNOBSERVED
        };
        self.state.changes = ChangeCounts::default();

        for d in 0..self.state.num_documents() {
            self.sweep_document(d, flags)?;
        }

        self.state
            .tree
            .sample_topics(self.config.path_assumption, &mut self.rng);

        if self.responses.is_some() {
            // lexical weights are refit by lasso, not ridge
            if self.config.lexical_l1 > 0.0 && !self.state.lexical_weights.is_empty() {
                self.update_lexical_regression()?;
            }
            // ridge with penalty rho / sigma_l, centered at mu_l rather than 0
            self.update_topic_regression()?;

            if let Some(y) = &self.responses {
                let (mse, corr) = regression_fit(y, &self.state.predictions());
                info!("training MSE {:.6}, correlation {:.4}", mse, corr);
            }
        } else {
            self.state.update_document_topic_weights();
        }
        Ok(())
    }

    /// Iteration over a fixed tree without the response
    pub fn predict_sweep(&mut self) -> Result<()> {
        self.state.changes = ChangeCounts::default();
        for d in 0..self.state.num_documents() {
            self.sweep_document(d, StepFlags::FROZEN)?;
        }
        self.state.update_document_topic_weights();
        self.state.update_document_lexical_weights(self.corpus);
        Ok(())
    }

    /// Re-fit the selected lexical weights by lasso against the response
    /// minus the topic part.
    fn update_lexical_regression(&mut self) -> Result<()> {
        let Some(responses) = self.responses.as_ref() else {
            return Ok(());
        };
        let words: Vec<usize> = self.state.lexical_weights.keys().copied().collect();
        let column: BTreeMap<usize, usize> = words.iter().enumerate().map(|(j, &w)| (w, j)).collect();
        let num_docs = self.corpus.num_documents();

        let mut x = DMatrix::<f64>::zeros(num_docs, words.len());
        for (d, doc) in self.corpus.documents.iter().enumerate() {
            let num_tokens = doc.num_tokens() as f64;
            for w in doc.sentences.iter().flatten() {
                if let Some(&j) = column.get(w) {
                    x[(d, j)] += 1.0 / num_tokens;
                }
            }
        }
        let y = DVector::from_fn(num_docs, |d, _| {
            responses[d] - self.state.doc_topic_weights[d] / self.state.doc_token_counts[d] as f64
        });

        let w = lasso(&x, &y, self.config.lexical_l1)?;
        for (j, &v) in words.iter().enumerate() {
            self.state.lexical_weights.insert(v, w[j]);
        }
        self.state.update_document_lexical_weights(self.corpus);
        Ok(())
    }

    /// Re-fit every non-root node coefficient by ridge regression with
    /// penalty `rho / sigma_l` towards `mu_l`, against the response minus
    /// the lexical part.
    fn update_topic_regression(&mut self) -> Result<()> {
        let Some(responses) = self.responses.as_ref() else {
            return Ok(());
        };
        let nodes = self.state.tree.nodes_without_root();
        if nodes.is_empty() {
            return Ok(());
        }
        let column: BTreeMap<NodeId, usize> = nodes.iter().enumerate().map(|(j, &id)| (id, j)).collect();
        let num_docs = self.state.num_documents();

        let mut x = DMatrix::<f64>::zeros(num_docs, nodes.len());
        for d in 0..num_docs {
            let num_tokens = self.state.doc_token_counts[d] as f64;
            for s in 0..self.state.sentence_tables[d].len() {
                let Some(path) = self.state.sentence_path(d, s) else {
                    continue;
                };
                for (l, node) in path.iter().enumerate().skip(1) {
                    x[(d, column[node])] += self.state.sentence_level_counts[d][s][l] as f64 / num_tokens;
                }
            }
        }
        let y = DVector::from_fn(num_docs, |d, _| {
            responses[d] - self.state.doc_lexical_weights[d] / self.state.doc_token_counts[d] as f64
        });

        let priors = self.state.tree.priors();
        let rho = self.state.hyper.rho;
        let lambdas: Vec<f64> = nodes
            .iter()
            .map(|&id| rho / priors.sigmas[self.state.tree[id].level()])
            .collect();
        let means: Vec<f64> = nodes
            .iter()
            .map(|&id| priors.mus[self.state.tree[id].level()])
            .collect();

        let w = weighted_ridge(&x, &y, &lambdas, &means)?;
        for (j, &id) in nodes.iter().enumerate() {
            self.state.tree[id].set_regression(w[j]);
        }
        self.state.update_document_topic_weights();
        Ok(())
    }

    ////////////////
    // driver     //
    ////////////////

    /// Run iterations until `max_iter`, continuing after the state's
    /// current iteration. `on_snapshot` is called after burn-in every
    /// `lag` iterations and once more at the end.
    pub fn run<F>(&mut self, mut on_snapshot: F) -> Result<RunTrace>
    where
        F: FnMut(&SamplerState) -> Result<()>,
    {
        let start = self.state.iteration + 1;
        let max_iter = self.config.max_iter as i64;
        let mut trace = RunTrace::default();

        let pb = iteration_progress_bar("Sampling", (max_iter - start).max(0) as u64);

        for iter in start..max_iter {
            self.state.iteration = iter;
            let after_burn_in = iter as usize >= self.config.burn_in;
            self.phase = if after_burn_in {
                Phase::Sampling
            } else {
                Phase::BurnIn
            };

            self.iterate()?;

            let terms = LogLikelihoodTerms::compute(&self.state, self.responses.as_deref());
            trace.log_likelihoods.push(terms.total());
            debug!("{:?}", terms);

            let changes = self.state.changes;
            info!(
                "iter {} [{:?}] llh {:.4}, changed tokens {}, sentences {}, tables {}; nodes per level {:?}, {} tables",
                iter,
                self.phase,
                terms.total(),
                changes.tokens,
                changes.sentences,
                changes.tables,
                self.state.tree.nodes_per_level(),
                self.state.num_tables()
            );

            if after_burn_in && iter as usize % self.config.lag == 0 {
                if self.config.optimize_hyperparameters {
                    self.state.hyper =
                        slice_sample_hyperparameters(&self.state, self.responses.as_deref(), &mut self.rng);
                    self.state.refresh_sticks();
                    let llh = LogLikelihoodTerms::compute(&self.state, self.responses.as_deref()).total();
                    trace
                        .hyperparameters
                        .push(self.state.hyper.to_array().to_vec(), llh);
                    info!("hyperparameters {:?}", self.state.hyper);
                }
                on_snapshot(&self.state)?;
            }

            if self.config.validate_every > 0 && iter as usize % self.config.validate_every == 0 {
                validate_state(&self.state, self.corpus)?;
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        self.phase = Phase::Stopped;
        validate_state(&self.state, self.corpus)?;
        on_snapshot(&self.state)?;
        Ok(trace)
    }
}

/// Progress bar over `len` iterations labeled by `task`
pub(crate) fn iteration_progress_bar(task: &str, len: u64) -> ProgressBar {
    let template = format!("{} {{bar:40}} {{pos}}/{{len}} iterations ({{eta}})", task);
    ProgressBar::new(len).with_style(
        ProgressStyle::with_template(&template)
            .unwrap()
            .progress_chars("##-"),
    )
}
