//! Snapshots of a sampler state: the tree in pre-order keyed by path
//! strings, plus every document's tables, sentence -> table and
//! token -> level assignments.
//!
//! Snapshots are gzipped JSON written atomically, one file per recorded
//! iteration (`{out}.state.{iteration}.json.gz`). Restoring replays the
//! recorded assignments through fresh count models and then checks the
//! replayed counts against the recorded ones.

use crate::config::{Hyperparameters, SamplerConfig};
use crate::corpus::{open_buf_reader, Corpus};
use crate::dirichlet_multinomial::DirMult;
use crate::error::{Result, SamplerError};
use crate::restaurant::Table;
use crate::state::SamplerState;
use crate::stick_breaking::TruncatedStickBreaking;
use crate::topic_tree::{NodeId, TopicTree, TreePriors};
use crate::validate::validate_state;

use flate2::write::GzEncoder;
use flate2::Compression;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub path: String,
    pub born: i64,
    pub customers: u32,
    pub regression: f64,
    pub content: DirMult,
    pub topic: Option<Vec<f64>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableRecord {
    pub index: usize,
    pub born: i64,
    pub path: String,
    pub stick: TruncatedStickBreaking,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub tables: Vec<TableRecord>,
    pub sentence_tables: Vec<usize>,
    pub token_levels: Vec<Vec<usize>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub iteration: i64,
    pub height: usize,
    pub vocab_size: usize,
    pub hyper: Hyperparameters,
    pub lexical_weights: BTreeMap<usize, f64>,
    /// parents before children
    pub nodes: Vec<NodeRecord>,
    pub documents: Vec<DocumentRecord>,
}

/// Tree and regression parameters of a snapshot, without assignments
pub struct RestoredModel {
    pub iteration: i64,
    pub tree: TopicTree,
    pub hyper: Hyperparameters,
    pub lexical_weights: BTreeMap<usize, f64>,
}

impl Snapshot {
    pub fn capture(state: &SamplerState) -> Result<Self> {
        let tree = &state.tree;
        let nodes = tree
            .preorder()
            .into_iter()
            .map(|id| {
                let node = &tree[id];
                NodeRecord {
                    path: tree.path_string(id),
                    born: node.born(),
                    customers: node.customers(),
                    regression: node.regression(),
                    content: node.content().clone(),
                    topic: node.topic().map(|t| t.to_vec()),
                }
            })
            .collect();

        let mut documents = Vec::with_capacity(state.num_documents());
        for (d, rest) in state.restaurants.iter().enumerate() {
            let tables = rest
                .tables()
                .map(|t| {
                    let leaf = t.leaf().ok_or_else(|| {
                        SamplerError::StateCodec(format!(
                            "table {} of document {} is not on a path",
                            t.index(),
                            d
                        ))
                    })?;
                    Ok(TableRecord {
                        index: t.index(),
                        born: t.born(),
                        path: tree.path_string(leaf),
                        stick: t.stick().clone(),
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            let sentence_tables = (0..state.sentence_tables[d].len())
                .map(|s| state.table_of(d, s))
                .collect::<Result<Vec<_>>>()?;

            documents.push(DocumentRecord {
                tables,
                sentence_tables,
                token_levels: state.token_levels[d].clone(),
            });
        }

        Ok(Self {
            iteration: state.iteration,
            height: tree.height(),
            vocab_size: tree.vocab_size(),
            hyper: state.hyper.clone(),
            lexical_weights: state.lexical_weights.clone(),
            nodes,
            documents,
        })
    }

    /// Write gzipped JSON next to `path` and move it into place
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let tmp = tempfile::NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(GzEncoder::new(tmp.as_file(), Compression::default()));
            serde_json::to_writer(&mut writer, self)?;
            writer
                .into_inner()
                .map_err(|e| SamplerError::Io(e.into_error()))?
                .finish()?;
        }
        tmp.persist(path)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let name = path.to_string_lossy();
        let reader = open_buf_reader(&name)?;
        serde_json::from_reader(reader)
            .map_err(|e| SamplerError::StateCodec(format!("{}: {}", name, e)))
    }

    /// Rebuild the tree with its recorded counts, customers, coefficients
    /// and topics.
    pub fn model(&self, priors: TreePriors) -> Result<RestoredModel> {
        let tree = self.build_tree(priors, true)?;
        Ok(RestoredModel {
            iteration: self.iteration,
            tree,
            hyper: self.hyper.clone(),
            lexical_weights: self.lexical_weights.clone(),
        })
    }

    fn build_tree(&self, priors: TreePriors, keep_counts: bool) -> Result<TopicTree> {
        let Some(root_record) = self.nodes.first() else {
            return Err(SamplerError::StateCodec("snapshot has no root".into()));
        };
        if root_record.path != "0" {
            return Err(SamplerError::StateCodec(format!(
                "first node is {}, expected the root",
                root_record.path
            )));
        }
        if priors.betas.len() != self.height {
            return Err(SamplerError::StateCodec(format!(
                "snapshot height {} but priors for height {}",
                self.height,
                priors.betas.len()
            )));
        }

        let content = |rec: &NodeRecord| -> Result<DirMult> {
            if rec.content.dim() != self.vocab_size {
                return Err(SamplerError::StateCodec(format!(
                    "node {} has {} symbols, expected {}",
                    rec.path,
                    rec.content.dim(),
                    self.vocab_size
                )));
            }
            Ok(if keep_counts {
                rec.content.clone()
            } else {
                rec.content.cleared()
            })
        };
        let customers = |rec: &NodeRecord| if keep_counts { rec.customers } else { 0 };

        let mut tree = TopicTree::new(self.height, self.vocab_size, priors, root_record.born);
        tree.restore_root(
            content(root_record)?,
            root_record.regression,
            customers(root_record),
            root_record.born,
        );
        let root = tree.root();
        tree[root].set_topic(root_record.topic.clone());

        for rec in &self.nodes[1..] {
            let (parent_path, index) = rec
                .path
                .rsplit_once(':')
                .and_then(|(p, i)| i.parse::<usize>().ok().map(|i| (p, i)))
                .ok_or_else(|| SamplerError::StateCodec(format!("malformed node path {}", rec.path)))?;
            let parent = tree
                .find_path(parent_path)
                .ok_or_else(|| SamplerError::StateCodec(format!("node {} has no parent", rec.path)))?;
            let id = tree.insert_restored(parent, index, content(rec)?, rec.regression, customers(rec), rec.born)?;
            tree[id].set_topic(rec.topic.clone());
        }
        tree.fill_inactive_child_indices();
        Ok(tree)
    }

    /// Rebuild a full sampler state for `corpus` by replaying the recorded
    /// assignments, then check that the replay reproduces the recorded
    /// counts.
    pub fn restore(&self, corpus: &Corpus, config: &SamplerConfig) -> Result<SamplerState> {
        if self.height != config.height || self.vocab_size != corpus.vocab_size {
            return Err(SamplerError::StateCodec(format!(
                "snapshot of height {} over {} words does not match height {} over {} words",
                self.height, self.vocab_size, config.height, corpus.vocab_size
            )));
        }
        if self.documents.len() != corpus.num_documents() {
            return Err(SamplerError::StateCodec(format!(
                "snapshot has {} documents, corpus has {}",
                self.documents.len(),
                corpus.num_documents()
            )));
        }

        let tree = self.build_tree(config.tree_priors(), false)?;
        let mut state = SamplerState::new(corpus, tree, self.hyper.clone(), self.iteration);
        state.lexical_weights = self.lexical_weights.clone();

        for (d, (rec, doc)) in self.documents.iter().zip(&corpus.documents).enumerate() {
            if rec.sentence_tables.len() != doc.sentences.len() || rec.token_levels.len() != doc.sentences.len() {
                return Err(SamplerError::StateCodec(format!(
                    "document {} has {} sentences, snapshot has {}",
                    d,
                    doc.sentences.len(),
                    rec.sentence_tables.len()
                )));
            }

            for t in &rec.tables {
                let leaf = state
                    .tree
                    .find_path(&t.path)
                    .filter(|&id| state.tree.is_leaf(id))
                    .ok_or_else(|| {
                        SamplerError::StateCodec(format!(
                            "table {} of document {} sits on {}, which is not a leaf",
                            t.index, d, t.path
                        ))
                    })?;
                if t.stick.num_levels() != self.height {
                    return Err(SamplerError::StateCodec(format!(
                        "table {} of document {} has {} levels",
                        t.index,
                        d,
                        t.stick.num_levels()
                    )));
                }
                let stick = TruncatedStickBreaking::new(self.height, t.stick.mean(), t.stick.scale());
                let mut table = Table::new(t.index, t.born, stick);
                table.set_leaf(Some(leaf));
                state.restaurants[d].add_table(table)?;
                state.tree.add_customer(leaf);
            }

            for (s, (&t, levels)) in rec.sentence_tables.iter().zip(&rec.token_levels).enumerate() {
                let words = &doc.sentences[s];
                if levels.len() != words.len() {
                    return Err(SamplerError::StateCodec(format!(
                        "sentence {} of document {} has {} tokens, snapshot has {}",
                        s,
                        d,
                        words.len(),
                        levels.len()
                    )));
                }
                if let Some(&l) = levels.iter().find(|&&l| l >= self.height) {
                    return Err(SamplerError::StateCodec(format!(
                        "level {} in sentence {} of document {}",
                        l, s, d
                    )));
                }
                state.token_levels[d][s] = levels.clone();
                for &l in levels {
                    state.change_sentence_level_count(d, s, l, 1)?;
                }
                if state.restaurants[d].table(t).is_err() {
                    return Err(SamplerError::StateCodec(format!(
                        "sentence {} of document {} sits at missing table {}",
                        s, d, t
                    )));
                }
                replay_sentence(&mut state, corpus, d, s, t)?;
            }

            for t in &rec.tables {
                let replayed = state.table(d, t.index)?.stick();
                if replayed.counts() != t.stick.counts() {
                    return Err(SamplerError::StateCodec(format!(
                        "table {} of document {}: replayed level counts {:?}, recorded {:?}",
                        t.index,
                        d,
                        replayed.counts(),
                        t.stick.counts()
                    )));
                }
            }
        }

        self.check_replayed_tree(&state.tree)?;

        state.update_document_topic_weights();
        state.update_document_lexical_weights(corpus);
        validate_state(&state, corpus)
            .map_err(|e| SamplerError::StateCodec(format!("restored state is inconsistent: {}", e)))?;

        info!(
            "Restored iteration {}: {} nodes, {} tables",
            self.iteration,
            state.tree.len(),
            state.num_tables()
        );
        Ok(state)
    }

    fn check_replayed_tree(&self, tree: &TopicTree) -> Result<()> {
        for rec in &self.nodes {
            let id: NodeId = tree
                .find_path(&rec.path)
                .ok_or_else(|| SamplerError::StateCodec(format!("node {} vanished", rec.path)))?;
            let node = &tree[id];
            if node.customers() != rec.customers || node.content().counts() != rec.content.counts() {
                return Err(SamplerError::StateCodec(format!(
                    "node {}: replayed {} customers and {} tokens, recorded {} and {}",
                    rec.path,
                    node.customers(),
                    node.content().count_sum(),
                    rec.customers,
                    rec.content.count_sum()
                )));
            }
        }
        Ok(())
    }
}

const SNAPSHOT_SUFFIX: &str = ".json.gz";

/// `{out}.state.{iteration}.json.gz`
pub fn snapshot_file(out: &str, iteration: i64) -> PathBuf {
    PathBuf::from(format!("{}.state.{}{}", out, iteration, SNAPSHOT_SUFFIX))
}

/// Every `{out}.state.{iteration}.json.gz` on disk, in iteration order
pub fn list_snapshot_files(out: &str) -> Result<Vec<(i64, PathBuf)>> {
    let out_path = Path::new(out);
    let prefix = out_path
        .file_name()
        .and_then(|x| x.to_str())
        .map(|x| format!("{}.state.", x))
        .ok_or_else(|| SamplerError::Config(format!("invalid output header {}", out)))?;
    let dir = match out_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut found = vec![];
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let iteration = path
            .file_name()
            .and_then(|x| x.to_str())
            .and_then(|x| x.strip_prefix(prefix.as_str()))
            .and_then(|x| x.strip_suffix(SNAPSHOT_SUFFIX))
            .and_then(|x| x.parse::<i64>().ok());
        if let Some(iteration) = iteration {
            found.push((iteration, path));
        }
    }
    found.sort();
    Ok(found)
}

fn replay_sentence(state: &mut SamplerState, corpus: &Corpus, d: usize, s: usize, t: usize) -> Result<()> {
    let leaf = state.table_leaf(d, t)?;
    let obs = state.sentence_observations(corpus, d, s);
    let level_counts = state.sentence_level_counts[d][s].clone();
    state.table_mut(d, t)?.stick_mut().increase_counts(&level_counts)?;
    state.tree.add_observations(leaf, &obs)?;
    state.restaurants[d].add_customer_to_table(s, t)?;
    state.sentence_tables[d][s] = Some(t);
    Ok(())
}
