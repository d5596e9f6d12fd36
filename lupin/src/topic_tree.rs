//! Shared nCRP topic hierarchy.
//!
//! Nodes live in an arena addressed by [`NodeId`]. A node owns its
//! children through `children` and refers back to its parent through
//! `parent`; a node's identity in snapshots and reports is its path of
//! child indices from the root, e.g. `0:2:1`.
//!
//! A node at level `height - 1` is a leaf. Nodes are created lazily when
//! a sampled path has to be extended and removed as soon as their
//! customer count drops to zero (the root is never removed).

use crate::dirichlet_multinomial::{prior_log_likelihood, DirMult, SymbolCounts};
use crate::error::{Result, SamplerError};
use crate::restaurant::crp_log_probability;
use mcmc_util::{log_normal_density, sample_dirichlet, sample_gaussian};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::{Index, IndexMut};

/// Stable handle of a node in the arena
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

/// How a parent summarizes its children's counts before topics are drawn
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
#[clap(rename_all = "lowercase")]
pub enum PathAssumption {
    /// per-symbol minimum across children
    Minimal,
    /// per-symbol maximum across children
    Maximal,
}

impl PathAssumption {
    fn combine(self, a: u32, b: u32) -> u32 {
        match self {
            PathAssumption::Minimal => a.min(b),
            PathAssumption::Maximal => a.max(b),
        }
    }
}

/// Per-level priors of the tree
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TreePriors {
    /// Dirichlet concentration per symbol, length L
    pub betas: Vec<f64>,
    /// nCRP concentration at internal levels, length L - 1
    pub gammas: Vec<f64>,
    /// Gaussian prior mean of regression coefficients, length L
    pub mus: Vec<f64>,
    /// Gaussian prior variance of regression coefficients, length L
    pub sigmas: Vec<f64>,
}

#[derive(Clone, Debug)]
pub struct TopicNode {
    index: usize,
    level: usize,
    parent: Option<NodeId>,
    children: BTreeMap<usize, NodeId>,
    inactive_children: BTreeSet<usize>,
    content: DirMult,
    regression: f64,
    customers: u32,
    born: i64,
    topic: Option<Vec<f64>>,
    pseudo_counts: Vec<u32>,
}

impl TopicNode {
    fn new(index: usize, level: usize, parent: Option<NodeId>, content: DirMult, regression: f64, born: i64) -> Self {
        Self {
            index,
            level,
            parent,
            children: BTreeMap::new(),
            inactive_children: BTreeSet::new(),
            content,
            regression,
            customers: 0,
            born,
            topic: None,
            pseudo_counts: vec![],
        }
    }

    /// Child index under the parent
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.children.values().copied()
    }

    pub fn num_children(&self) -> usize {
        self.children.len()
    }

    pub fn content(&self) -> &DirMult {
        &self.content
    }

    pub fn content_mut(&mut self) -> &mut DirMult {
        &mut self.content
    }

    pub fn regression(&self) -> f64 {
        self.regression
    }

    pub fn set_regression(&mut self, value: f64) {
        self.regression = value;
    }

    pub fn customers(&self) -> u32 {
        self.customers
    }

    pub fn born(&self) -> i64 {
        self.born
    }

    /// Last drawn topic vector, if any
    pub fn topic(&self) -> Option<&[f64]> {
        self.topic.as_deref()
    }

    pub fn set_topic(&mut self, topic: Option<Vec<f64>>) {
        self.topic = topic;
    }

    /// Predictive log probability of one symbol at this node
    pub fn point_log_probability(&self, symbol: usize) -> f64 {
        match &self.topic {
            Some(topic) => topic[symbol].ln(),
            None => self.content.point_log_likelihood(symbol),
        }
    }

    /// Log probability of a multiset of symbols at this node
    pub fn log_probability(&self, obs: &SymbolCounts) -> f64 {
        match &self.topic {
            Some(topic) => obs.iter().map(|(&k, &n)| n as f64 * topic[k].ln()).sum(),
            None => self.content.joint_log_likelihood(obs),
        }
    }

    /// Topic if drawn, otherwise the smoothed count model
    pub fn topic_or_posterior_mean(&self) -> Vec<f64> {
        match &self.topic {
            Some(topic) => topic.clone(),
            None => self.content.posterior_mean(),
        }
    }

    /// Claim the smallest free child index
    fn next_child_index(&mut self) -> usize {
        match self.inactive_children.pop_first() {
            Some(i) => i,
            None => self.children.len(),
        }
    }

    /// Mark every unused index below the largest child index as free
    fn fill_inactive_child_indices(&mut self) {
        self.inactive_children.clear();
        if let Some(&max) = self.children.keys().next_back() {
            for i in 0..max {
                if !self.children.contains_key(&i) {
                    self.inactive_children.insert(i);
                }
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct TopicTree {
    nodes: Vec<Option<TopicNode>>,
    free: Vec<usize>,
    root: NodeId,
    height: usize,
    vocab_size: usize,
    priors: TreePriors,
}

impl Index<NodeId> for TopicTree {
    type Output = TopicNode;

    fn index(&self, id: NodeId) -> &TopicNode {
        match self.nodes.get(id.0) {
            Some(Some(node)) => node,
            _ => panic!("stale tree node {:?}", id),
        }
    }
}

impl IndexMut<NodeId> for TopicTree {
    fn index_mut(&mut self, id: NodeId) -> &mut TopicNode {
        match self.nodes.get_mut(id.0) {
            Some(Some(node)) => node,
            _ => panic!("stale tree node {:?}", id),
        }
    }
}

impl TopicTree {
    /// A tree holding only the root
    pub fn new(height: usize, vocab_size: usize, priors: TreePriors, iteration: i64) -> Self {
        let content = DirMult::uniform(vocab_size, priors.betas[0] * vocab_size as f64);
        let root = TopicNode::new(0, 0, None, content, 0.0, iteration);
        Self {
            nodes: vec![Some(root)],
            free: vec![],
            root: NodeId(0),
            height,
            vocab_size,
            priors,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn priors(&self) -> &TreePriors {
        &self.priors
    }

    pub fn get(&self, id: NodeId) -> Option<&TopicNode> {
        self.nodes.get(id.0).and_then(|n| n.as_ref())
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Number of live nodes
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_leaf(&self, id: NodeId) -> bool {
        self[id].level == self.height - 1
    }

    /// Nodes root -> `id`
    pub fn path_from_node(&self, id: NodeId) -> Vec<NodeId> {
        let mut path = Vec::with_capacity(self[id].level + 1);
        let mut cur = Some(id);
        while let Some(node) = cur {
            path.push(node);
            cur = self[node].parent;
        }
        path.reverse();
        path
    }

    /// Child indices root -> `id` joined by `:`
    pub fn path_string(&self, id: NodeId) -> String {
        self.path_from_node(id)
            .iter()
            .map(|&n| self[n].index.to_string())
            .collect::<Vec<_>>()
            .join(":")
    }

    /// Look a node up by its path string
    pub fn find_path(&self, path: &str) -> Option<NodeId> {
        let mut indices = path.split(':').map(|s| s.trim().parse::<usize>());
        match indices.next() {
            Some(Ok(0)) => {}
            _ => return None,
        }
        let mut cur = self.root;
        for idx in indices {
            let idx = idx.ok()?;
            cur = *self[cur].children.get(&idx)?;
        }
        Some(cur)
    }

    /// Every live node, parents before children, siblings by index
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self[id].children.values().rev().copied());
        }
        out
    }

    pub fn leaves(&self) -> Vec<NodeId> {
        self.preorder()
            .into_iter()
            .filter(|&id| self.is_leaf(id))
            .collect()
    }

    /// Number of live nodes at each level
    pub fn nodes_per_level(&self) -> Vec<usize> {
        let mut counts = vec![0; self.height];
        for id in self.preorder() {
            counts[self[id].level] += 1;
        }
        counts
    }

    fn alloc(&mut self, node: TopicNode) -> NodeId {
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                NodeId(slot)
            }
            None => {
                self.nodes.push(Some(node));
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    /// Allocate a child with an empty count model and a regression
    /// coefficient drawn from the level's Gaussian prior.
    pub fn create_child<R: Rng + ?Sized>(&mut self, parent: NodeId, iteration: i64, rng: &mut R) -> Result<NodeId> {
        let level = self[parent].level + 1;
        if level >= self.height {
            return Err(SamplerError::InvalidState(format!(
                "cannot add a child below leaf {}",
                self.path_string(parent)
            )));
        }
        let content = DirMult::uniform(self.vocab_size, self.priors.betas[level] * self.vocab_size as f64);
        let regression = sample_gaussian(self.priors.mus[level], self.priors.sigmas[level], rng);
        let index = self[parent].next_child_index();
        let child = TopicNode::new(index, level, Some(parent), content, regression, iteration);
        let id = self.alloc(child);
        self[parent].children.insert(index, id);
        Ok(id)
    }

    /// Extend `node` with fresh children down to the leaf level
    pub fn create_path<R: Rng + ?Sized>(&mut self, node: NodeId, iteration: i64, rng: &mut R) -> Result<NodeId> {
        let mut cur = node;
        while !self.is_leaf(cur) {
            cur = self.create_child(cur, iteration, rng)?;
        }
        Ok(cur)
    }

    /// Attach a restored node under `parent` at a given child index
    pub(crate) fn insert_restored(
        &mut self,
        parent: NodeId,
        index: usize,
        content: DirMult,
        regression: f64,
        customers: u32,
        born: i64,
    ) -> Result<NodeId> {
        let level = self[parent].level + 1;
        if level >= self.height || self[parent].children.contains_key(&index) {
            return Err(SamplerError::StateCodec(format!(
                "cannot restore child {} under {}",
                index,
                self.path_string(parent)
            )));
        }
        let mut node = TopicNode::new(index, level, Some(parent), content, regression, born);
        node.customers = customers;
        let id = self.alloc(node);
        self[parent].children.insert(index, id);
        Ok(id)
    }

    /// Overwrite the root's restored state
    pub(crate) fn restore_root(&mut self, content: DirMult, regression: f64, customers: u32, born: i64) {
        let root = self.root;
        let node = &mut self[root];
        node.content = content;
        node.regression = regression;
        node.customers = customers;
        node.born = born;
    }

    /// Rebuild free child index sets after restoring a tree
    pub(crate) fn fill_inactive_child_indices(&mut self) {
        for id in self.preorder() {
            self[id].fill_inactive_child_indices();
        }
    }

    /// Seat one more table on every node of the path ending at `leaf`
    pub fn add_customer(&mut self, leaf: NodeId) {
        let mut cur = Some(leaf);
        while let Some(id) = cur {
            self[id].customers += 1;
            cur = self[id].parent;
        }
    }

    /// Remove one table from the path ending at `leaf`, pruning every
    /// non-root node left without customers. Returns the deepest
    /// surviving node of the path.
    pub fn remove_customer(&mut self, leaf: NodeId) -> Result<NodeId> {
        let mut surviving = leaf;
        let mut cur = Some(leaf);
        while let Some(id) = cur {
            let parent = self[id].parent;
            if self[id].customers == 0 {
                return Err(SamplerError::InvalidState(format!(
                    "node {} has no customer to remove",
                    self.path_string(id)
                )));
            }
            self[id].customers -= 1;
            if self[id].customers == 0 {
                if let Some(p) = parent {
                    self.prune(id, p)?;
                    surviving = p;
                }
            }
            cur = parent;
        }
        Ok(surviving)
    }

    fn prune(&mut self, id: NodeId, parent: NodeId) -> Result<()> {
        let node = &self[id];
        if node.content.count_sum() > 0 || !node.children.is_empty() {
            return Err(SamplerError::InvalidState(format!(
                "pruning node {} that still holds {} tokens and {} children",
                self.path_string(id),
                node.content.count_sum(),
                node.children.len()
            )));
        }
        let index = node.index;
        let p = &mut self[parent];
        p.children.remove(&index);
        p.inactive_children.insert(index);
        self.nodes[id.0] = None;
        self.free.push(id.0);
        Ok(())
    }

    /// Add per-level symbol counts along the path ending at `leaf`
    pub fn add_observations(&mut self, leaf: NodeId, obs_per_level: &[SymbolCounts]) -> Result<()> {
        for (l, id) in self.path_from_node(leaf).into_iter().enumerate() {
            self[id].content.add_observations(&obs_per_level[l])?;
        }
        Ok(())
    }

    pub fn remove_observations(&mut self, leaf: NodeId, obs_per_level: &[SymbolCounts]) -> Result<()> {
        for (l, id) in self.path_from_node(leaf).into_iter().enumerate() {
            self[id].content.remove_observations(&obs_per_level[l])?;
        }
        Ok(())
    }

    /// nCRP log probability that a new table follows the path ending at
    /// each node; at an internal node this includes opening a new child.
    pub fn path_log_prior(&self) -> BTreeMap<NodeId, f64> {
        let mut out = BTreeMap::new();
        let mut stack = vec![(self.root, 0.0)];
        while let Some((id, parent_lp)) = stack.pop() {
            let node = &self[id];
            let mut lp = parent_lp;
            if !self.is_leaf(id) {
                let gamma = self.priors.gammas[node.level];
                let log_norm = (node.customers as f64 + gamma).ln();
                lp += gamma.ln() - log_norm;
                for child in node.children() {
                    let child_lp = parent_lp + (self[child].customers as f64).ln() - log_norm;
                    stack.push((child, child_lp));
                }
            }
            out.insert(id, lp);
        }
        out
    }

    /// Log likelihood of per-level symbol counts assigned along the path
    /// ending at each node. Levels below an internal node are scored
    /// against that node's topic (uniform if none was drawn).
    pub fn path_word_log_likelihood(&self, obs_per_level: &[SymbolCounts]) -> BTreeMap<NodeId, f64> {
        let mut out = BTreeMap::new();
        let mut stack = vec![(self.root, 0.0)];
        while let Some((id, parent_llh)) = stack.pop() {
            let node = &self[id];
            let llh = parent_llh + node.log_probability(&obs_per_level[node.level]);
            for child in node.children() {
                stack.push((child, llh));
            }

            let mut stored = llh;
            for level in (node.level + 1)..self.height {
                stored += prior_log_likelihood(
                    &obs_per_level[level],
                    self.priors.betas[level] * self.vocab_size as f64,
                    self.vocab_size,
                    node.topic(),
                );
            }
            out.insert(id, stored);
        }
        out
    }

    /// Redraw every node's topic: pseudo-counts bottom-up, then Dirichlet
    /// draws top-down centered at the parent's new topic.
    pub fn sample_topics<R: Rng + ?Sized>(&mut self, assumption: PathAssumption, rng: &mut R) {
        let order = self.preorder();
        let v = self.vocab_size;

        for &id in order.iter().rev() {
            let children: Vec<NodeId> = self[id].children().collect();
            let mut pseudo: Option<Vec<u32>> = None;
            for child in children {
                let c = &self[child];
                let child_total: Vec<u32> = (0..v)
                    .map(|k| c.content.count(k) + c.pseudo_counts.get(k).copied().unwrap_or(0))
                    .collect();
                pseudo = Some(match pseudo {
                    None => child_total,
                    Some(acc) => acc
                        .into_iter()
                        .zip(child_total)
                        .map(|(a, b)| assumption.combine(a, b))
                        .collect(),
                });
            }
            self[id].pseudo_counts = pseudo.unwrap_or_default();
        }

        for &id in order.iter() {
            let node = &self[id];
            let scale = self.priors.betas[node.level] * v as f64;
            let parent_topic = node.parent.and_then(|p| self[p].topic.clone());
            let alpha: Vec<f64> = (0..v)
                .map(|k| {
                    let center = parent_topic.as_ref().map_or(1.0 / v as f64, |t| t[k]);
                    node.content.count(k) as f64
                        + node.pseudo_counts.get(k).copied().unwrap_or(0) as f64
                        + scale * center
                })
                .collect();
            let topic = sample_dirichlet(&alpha, rng);
            self[id].topic = Some(topic);
        }
    }

    /// Σ over nodes of the count models' log marginals
    pub fn word_log_likelihood(&self) -> f64 {
        self.preorder().iter().map(|&id| self[id].content.log_marginal()).sum()
    }

    /// Ewens log probability of every internal node's split of customers
    pub fn tree_log_prior(&self) -> f64 {
        self.preorder()
            .into_iter()
            .filter(|&id| !self.is_leaf(id))
            .map(|id| {
                let node = &self[id];
                let counts = node.children().map(|c| self[c].customers);
                crp_log_probability(counts, self.priors.gammas[node.level])
            })
            .sum()
    }

    /// Gaussian prior log density of all regression coefficients
    pub fn regression_log_prior(&self) -> f64 {
        self.preorder()
            .into_iter()
            .map(|id| {
                let node = &self[id];
                log_normal_density(
                    node.regression,
                    self.priors.mus[node.level],
                    self.priors.sigmas[node.level].sqrt(),
                )
            })
            .sum()
    }

    /// Non-root nodes in pre-order; columns of the topic regression
    pub fn nodes_without_root(&self) -> Vec<NodeId> {
        self.preorder().into_iter().skip(1).collect()
    }
}
