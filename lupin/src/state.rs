//! Everything a sampler run mutates: the shared tree, one restaurant per
//! document, the sentence -> table and token -> level assignments, and
//! the per-document caches derived from them.

use crate::config::Hyperparameters;
use crate::corpus::Corpus;
use crate::dirichlet_multinomial::SymbolCounts;
use crate::error::{Result, SamplerError};
use crate::restaurant::{Restaurant, Table};
use crate::stick_breaking::TruncatedStickBreaking;
use crate::topic_tree::{NodeId, TopicTree};
use std::collections::BTreeMap;

/// Iteration stamp of everything created before the first sweep
pub const INIT_ITERATION: i64 = -1;

/// Number of assignments that changed during one sweep
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChangeCounts {
    pub tokens: usize,
    pub sentences: usize,
    pub tables: usize,
}

#[derive(Clone, Debug)]
pub struct SamplerState {
    pub iteration: i64,
    pub hyper: Hyperparameters,
    pub tree: TopicTree,
    pub restaurants: Vec<Restaurant>,
    /// table index of each sentence, `[D][S_d]`
    pub sentence_tables: Vec<Vec<Option<usize>>>,
    /// level of each token, `[D][S_d][N_ds]`
    pub token_levels: Vec<Vec<Vec<usize>>>,
    /// tokens of each sentence per level, `[D][S_d][L]`
    pub sentence_level_counts: Vec<Vec<Vec<u32>>>,
    pub doc_token_counts: Vec<usize>,
    /// Σ over tokens of the regression coefficient of the token's node
    pub doc_topic_weights: Vec<f64>,
    /// Σ over tokens of the token's lexical weight
    pub doc_lexical_weights: Vec<f64>,
    /// sparse lexical regression weights; keys are the selected words
    pub lexical_weights: BTreeMap<usize, f64>,
    pub changes: ChangeCounts,
}

impl SamplerState {
    /// Unassigned state for `corpus` on top of an existing tree
    pub fn new(corpus: &Corpus, tree: TopicTree, hyper: Hyperparameters, iteration: i64) -> Self {
        let height = tree.height();
        let docs = &corpus.documents;
        Self {
            iteration,
            hyper,
            tree,
            restaurants: vec![Restaurant::new(); docs.len()],
            sentence_tables: docs.iter().map(|d| vec![None; d.sentences.len()]).collect(),
            token_levels: docs
                .iter()
                .map(|d| d.sentences.iter().map(|s| vec![0; s.len()]).collect())
                .collect(),
            sentence_level_counts: docs
                .iter()
                .map(|d| vec![vec![0; height]; d.sentences.len()])
                .collect(),
            doc_token_counts: corpus.token_counts(),
            doc_topic_weights: vec![0.0; docs.len()],
            doc_lexical_weights: vec![0.0; docs.len()],
            lexical_weights: BTreeMap::new(),
            changes: ChangeCounts::default(),
        }
    }

    pub fn num_documents(&self) -> usize {
        self.restaurants.len()
    }

    pub fn height(&self) -> usize {
        self.tree.height()
    }

    /// A level distribution with no tokens under the current GEM parameters
    pub fn new_stick(&self) -> TruncatedStickBreaking {
        TruncatedStickBreaking::new(self.height(), self.hyper.gem_mean, self.hyper.gem_scale)
    }

    pub fn table_of(&self, d: usize, s: usize) -> Result<usize> {
        self.sentence_tables[d][s].ok_or_else(|| {
            SamplerError::InvalidState(format!("sentence {} of document {} has no table", s, d))
        })
    }

    pub fn table(&self, d: usize, t: usize) -> Result<&Table> {
        self.restaurants[d]
            .table(t)
            .map_err(|_| SamplerError::InvalidState(format!("document {} has no table {}", d, t)))
    }

    pub fn table_mut(&mut self, d: usize, t: usize) -> Result<&mut Table> {
        self.restaurants[d]
            .table_mut(t)
            .map_err(|_| SamplerError::InvalidState(format!("document {} has no table {}", d, t)))
    }

    /// Leaf of table `t` in document `d`
    pub fn table_leaf(&self, d: usize, t: usize) -> Result<NodeId> {
        self.table(d, t)?.leaf().ok_or_else(|| {
            SamplerError::InvalidState(format!("table {} of document {} is not on a path", t, d))
        })
    }

    /// Root -> leaf path of sentence `s`, if it is seated on a path
    pub fn sentence_path(&self, d: usize, s: usize) -> Option<Vec<NodeId>> {
        let t = self.sentence_tables[d][s]?;
        let leaf = self.restaurants[d].table(t).ok()?.leaf()?;
        Some(self.tree.path_from_node(leaf))
    }

    /// Symbols of sentence `s` grouped by their assigned level
    pub fn sentence_observations(&self, corpus: &Corpus, d: usize, s: usize) -> Vec<SymbolCounts> {
        let mut obs = vec![SymbolCounts::new(); self.height()];
        let words = &corpus.documents[d].sentences[s];
        for (&w, &l) in words.iter().zip(&self.token_levels[d][s]) {
            *obs[l].entry(w).or_insert(0) += 1;
        }
        obs
    }

    /// Symbols of all `customers` grouped by level, and per-level totals
    pub fn customers_observations(
        &self,
        corpus: &Corpus,
        d: usize,
        customers: &[usize],
    ) -> (Vec<SymbolCounts>, Vec<u32>) {
        let height = self.height();
        let mut obs = vec![SymbolCounts::new(); height];
        let mut level_counts = vec![0u32; height];
        for &s in customers {
            let words = &corpus.documents[d].sentences[s];
            for (&w, &l) in words.iter().zip(&self.token_levels[d][s]) {
                *obs[l].entry(w).or_insert(0) += 1;
            }
            for (acc, &n) in level_counts.iter_mut().zip(&self.sentence_level_counts[d][s]) {
                *acc += n;
            }
        }
        (obs, level_counts)
    }

    /// Regression contribution of sentence `s` along its current path
    pub fn sentence_topic_weight(&self, d: usize, s: usize) -> f64 {
        match self.sentence_path(d, s) {
            Some(path) => path
                .iter()
                .zip(&self.sentence_level_counts[d][s])
                .map(|(&node, &n)| self.tree[node].regression() * n as f64)
                .sum(),
            None => 0.0,
        }
    }

    pub fn change_sentence_level_count(&mut self, d: usize, s: usize, level: usize, delta: i64) -> Result<()> {
        let slot = &mut self.sentence_level_counts[d][s][level];
        let updated = *slot as i64 + delta;
        if updated < 0 {
            return Err(SamplerError::InvalidState(format!(
                "level {} count of document {} sentence {} would become {}",
                level, d, s, updated
            )));
        }
        *slot = updated as u32;
        Ok(())
    }

    /// Recompute every document's topic weight from scratch
    pub fn update_document_topic_weights(&mut self) {
        self.doc_topic_weights = (0..self.num_documents())
            .map(|d| {
                (0..self.sentence_tables[d].len())
                    .map(|s| self.sentence_topic_weight(d, s))
                    .sum::<f64>()
            })
            .collect();
    }

    /// Recompute every document's lexical weight from scratch
    pub fn update_document_lexical_weights(&mut self, corpus: &Corpus) {
        self.doc_lexical_weights = corpus
            .documents
            .iter()
            .map(|doc| {
                doc.sentences
                    .iter()
                    .flatten()
                    .filter_map(|w| self.lexical_weights.get(w))
                    .sum::<f64>()
            })
            .collect();
    }

    /// `(topic weight + lexical weight) / tokens` per document
    pub fn predictions(&self) -> Vec<f64> {
        (0..self.num_documents())
            .map(|d| self.prediction(d))
            .collect()
    }

    pub fn prediction(&self, d: usize) -> f64 {
        (self.doc_topic_weights[d] + self.doc_lexical_weights[d]) / self.doc_token_counts[d] as f64
    }

    pub fn num_tables(&self) -> usize {
        self.restaurants.iter().map(Restaurant::num_tables).sum()
    }

    /// Push the current GEM parameters into every table's level distribution
    pub fn refresh_sticks(&mut self) {
        let (mean, scale) = (self.hyper.gem_mean, self.hyper.gem_scale);
        for rest in self.restaurants.iter_mut() {
            for t in rest.table_indices() {
                if let Ok(table) = rest.table_mut(t) {
                    table.stick_mut().set_parameters(mean, scale);
                }
            }
        }
    }
}
