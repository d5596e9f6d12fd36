//! Structural checks of a sampler state. Any mismatch is an
//! [`SamplerError::InvariantViolation`].

use crate::corpus::Corpus;
use crate::error::{Result, SamplerError};
use crate::state::SamplerState;
use crate::topic_tree::NodeId;
use log::debug;
use std::collections::BTreeMap;

const WEIGHT_TOLERANCE: f64 = 1e-6;

fn violation(msg: String) -> SamplerError {
    SamplerError::InvariantViolation(msg)
}

/// Check tree balance, restaurant bookkeeping, node counts against the
/// assignments, and the cached document topic weights.
pub fn validate_state(state: &SamplerState, corpus: &Corpus) -> Result<()> {
    validate_tree(state)?;
    validate_restaurants(state, corpus)?;
    validate_node_counts(state, corpus)?;
    validate_topic_weights(state)?;
    debug!("state at iteration {} is consistent", state.iteration);
    Ok(())
}

fn validate_tree(state: &SamplerState) -> Result<()> {
    let tree = &state.tree;
    for id in tree.preorder() {
        let node = &tree[id];
        if tree.is_leaf(id) {
            if node.customers() == 0 {
                return Err(violation(format!("leaf {} is empty", tree.path_string(id))));
            }
            if node.num_children() > 0 {
                return Err(violation(format!("leaf {} has children", tree.path_string(id))));
            }
        } else {
            let below: u32 = node.children().map(|c| tree[c].customers()).sum();
            if below != node.customers() {
                return Err(violation(format!(
                    "node {} has {} customers, its children {}",
                    tree.path_string(id),
                    node.customers(),
                    below
                )));
            }
            if id != tree.root() && node.num_children() == 0 {
                return Err(violation(format!(
                    "internal node {} has no children",
                    tree.path_string(id)
                )));
            }
        }
    }
    Ok(())
}

fn validate_restaurants(state: &SamplerState, corpus: &Corpus) -> Result<()> {
    let height = state.height();
    for (d, doc) in corpus.documents.iter().enumerate() {
        let rest = &state.restaurants[d];
        if rest.total_customers() != doc.sentences.len() {
            return Err(violation(format!(
                "document {} seats {} customers for {} sentences",
                d,
                rest.total_customers(),
                doc.sentences.len()
            )));
        }

        for (s, sentence) in doc.sentences.iter().enumerate() {
            let t = state
                .sentence_tables[d][s]
                .ok_or_else(|| violation(format!("sentence {} of document {} is unseated", s, d)))?;
            let table = rest
                .table(t)
                .map_err(|_| violation(format!("sentence {} of document {} at missing table {}", s, d, t)))?;
            if !table.customers().contains(&s) {
                return Err(violation(format!(
                    "table {} of document {} does not list sentence {}",
                    t, d, s
                )));
            }

            let mut histogram = vec![0u32; height];
            for &l in &state.token_levels[d][s][..sentence.len()] {
                histogram[l] += 1;
            }
            if histogram != state.sentence_level_counts[d][s] {
                return Err(violation(format!(
                    "sentence {} of document {}: level counts {:?}, token levels give {:?}",
                    s, d, state.sentence_level_counts[d][s], histogram
                )));
            }
        }

        for table in rest.tables() {
            let leaf = table.leaf().ok_or_else(|| {
                violation(format!("table {} of document {} is not on a path", table.index(), d))
            })?;
            if !state.tree.contains(leaf) || !state.tree.is_leaf(leaf) {
                return Err(violation(format!(
                    "table {} of document {} points at a non-leaf",
                    table.index(),
                    d
                )));
            }
            let mut levels = vec![0u32; height];
            for &s in table.customers() {
                if state.sentence_tables[d].get(s).copied().flatten() != Some(table.index()) {
                    return Err(violation(format!(
                        "table {} of document {} lists sentence {} seated elsewhere",
                        table.index(),
                        d,
                        s
                    )));
                }
                for (acc, &n) in levels.iter_mut().zip(&state.sentence_level_counts[d][s]) {
                    *acc += n;
                }
            }
            if levels != table.stick().counts() {
                return Err(violation(format!(
                    "table {} of document {}: stick counts {:?}, customers give {:?}",
                    table.index(),
                    d,
                    table.stick().counts(),
                    levels
                )));
            }
        }
    }
    Ok(())
}

/// Every node's symbol counts and customers recomputed from scratch
fn validate_node_counts(state: &SamplerState, corpus: &Corpus) -> Result<()> {
    let tree = &state.tree;
    let mut counts: BTreeMap<NodeId, Vec<u32>> = BTreeMap::new();
    let mut customers: BTreeMap<NodeId, u32> = BTreeMap::new();

    for (d, rest) in state.restaurants.iter().enumerate() {
        for table in rest.tables() {
            let Some(leaf) = table.leaf() else { continue };
            let path = tree.path_from_node(leaf);
            for &node in &path {
                *customers.entry(node).or_insert(0) += 1;
            }
            for &s in table.customers() {
                let words = &corpus.documents[d].sentences[s];
                for (&w, &l) in words.iter().zip(&state.token_levels[d][s]) {
                    counts
                        .entry(path[l])
                        .or_insert_with(|| vec![0; tree.vocab_size()])[w] += 1;
                }
            }
        }
    }

    for id in tree.preorder() {
        let node = &tree[id];
        let expected_customers = customers.get(&id).copied().unwrap_or(0);
        if node.customers() != expected_customers {
            return Err(violation(format!(
                "node {} has {} customers, tables give {}",
                tree.path_string(id),
                node.customers(),
                expected_customers
            )));
        }
        let zeros = vec![0; tree.vocab_size()];
        let expected = counts.get(&id).unwrap_or(&zeros);
        if node.content().counts() != expected.as_slice() {
            return Err(violation(format!(
                "node {} holds {} tokens, assignments give {}",
                tree.path_string(id),
                node.content().count_sum(),
                expected.iter().sum::<u32>()
            )));
        }
    }
    Ok(())
}

fn validate_topic_weights(state: &SamplerState) -> Result<()> {
    for d in 0..state.num_documents() {
        let recomputed: f64 = (0..state.sentence_tables[d].len())
            .map(|s| state.sentence_topic_weight(d, s))
            .sum();
        let cached = state.doc_topic_weights[d];
        if (recomputed - cached).abs() > WEIGHT_TOLERANCE * recomputed.abs().max(1.0) {
            return Err(violation(format!(
                "document {} topic weight {} cached, {} recomputed",
                d, cached, recomputed
            )));
        }
    }
    Ok(())
}
