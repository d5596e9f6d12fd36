//! Integration tests across the sampler, the snapshot codec and the
//! validator.

use crate::config::{PathAssumption, SamplerConfig};
use crate::corpus::{Corpus, Document};
use crate::gibbs::{iteration_progress_bar, GibbsSampler, Phase, StepFlags};
use crate::predict::predict_responses;
use crate::state_codec::{list_snapshot_files, snapshot_file, Snapshot};
use crate::topic_tree::NodeId;
use crate::validate::validate_state;

use approx::assert_abs_diff_eq;
use mcmc_util::{normalize_log_probs, sample_categorical_log};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::collections::BTreeSet;

/// Three documents of two four-token sentences over five words
fn toy_corpus() -> Corpus {
    let doc = |sentences: Vec<Vec<usize>>, response: f64| Document {
        sentences,
        response: Some(response),
    };
    Corpus::new(
        5,
        vec![
            doc(vec![vec![0, 1, 0, 1], vec![1, 0, 1, 0]], 1.0),
            doc(vec![vec![2, 3, 2, 3], vec![3, 2, 3, 2]], -1.0),
            doc(vec![vec![4, 4, 0, 2], vec![1, 3, 4, 4]], 0.0),
        ],
    )
}

fn toy_config(height: usize, max_iter: usize, corpus: &Corpus) -> SamplerConfig {
    let mut config = SamplerConfig::with_height(height, corpus.mean_response());
    config.lexical_l1 = 0.0;
    config.burn_in = max_iter / 2;
    config.max_iter = max_iter;
    config.lag = 5;
    config.validate_every = 1;
    config.seed = 7;
    config
}

fn fitted_sampler(corpus: &Corpus, config: SamplerConfig) -> GibbsSampler<'_> {
    let mut sampler = GibbsSampler::new(corpus, config).unwrap();
    sampler.initialize().unwrap();
    sampler.run(|_| Ok(())).unwrap();
    sampler
}

/// Open a table on a fresh path and seat `sentences` of document `d`
/// there, each token at level `n % height`.
fn seat_on_new_path(
    sampler: &mut GibbsSampler,
    corpus: &Corpus,
    d: usize,
    sentences: &[usize],
    rng: &mut SmallRng,
) -> (usize, NodeId) {
    let t = sampler.open_table(d).unwrap();
    let state = sampler.state_mut();
    let height = state.height();
    let root = state.tree.root();
    let leaf = state.tree.create_path(root, state.iteration, rng).unwrap();
    state.tree.add_customer(leaf);
    state.table_mut(d, t).unwrap().set_leaf(Some(leaf));

    for &s in sentences {
        for n in 0..corpus.documents[d].sentences[s].len() {
            let l = n % height;
            sampler.state_mut().token_levels[d][s][n] = l;
            sampler
                .state_mut()
                .change_sentence_level_count(d, s, l, 1)
                .unwrap();
        }
        sampler.attach_sentence(d, s, t).unwrap();
    }
    (t, leaf)
}

#[test]
fn test_end_to_end_fit() {
    let corpus = toy_corpus();
    let sampler = fitted_sampler(&corpus, toy_config(2, 20, &corpus));
    let state = sampler.state();

    assert_eq!(sampler.phase(), Phase::Stopped);
    assert_eq!(state.iteration, 19);

    let num_leaves = state.tree.leaves().len();
    assert!((1..=6).contains(&num_leaves), "{} leaves", num_leaves);

    let seated: usize = state
        .restaurants
        .iter()
        .flat_map(|r| r.tables())
        .map(|t| t.num_customers())
        .sum();
    assert_eq!(seated, corpus.num_sentences());

    validate_state(state, &corpus).unwrap();
    assert!(state.predictions().iter().all(|y| y.is_finite()));
}

#[test]
fn test_tree_stays_balanced() {
    let corpus = toy_corpus();
    let sampler = fitted_sampler(&corpus, toy_config(3, 10, &corpus));
    let tree = &sampler.state().tree;

    for id in tree.preorder() {
        let node = &tree[id];
        if !tree.is_leaf(id) {
            let below: u32 = node.children().map(|c| tree[c].customers()).sum();
            assert_eq!(below, node.customers(), "{}", tree.path_string(id));
        }
        assert!(node.customers() > 0 || id == tree.root());
        assert_eq!(node.level(), tree.path_from_node(id).len() - 1);
    }

    let tables: u32 = sampler
        .state()
        .restaurants
        .iter()
        .map(|r| r.num_tables() as u32)
        .sum();
    assert_eq!(tree[tree.root()].customers(), tables);
    assert_eq!(tree.nodes_per_level()[0], 1);
}

#[test]
fn test_restaurants_match_sentence_tables() {
    let corpus = toy_corpus();
    let sampler = fitted_sampler(&corpus, toy_config(2, 10, &corpus));
    let state = sampler.state();

    for (d, doc) in corpus.documents.iter().enumerate() {
        let rest = &state.restaurants[d];
        assert_eq!(rest.total_customers(), doc.sentences.len());
        for s in 0..doc.sentences.len() {
            let t = state.table_of(d, s).unwrap();
            assert!(rest.table(t).unwrap().customers().contains(&s));
        }
        for table in rest.tables() {
            assert!(table.num_customers() > 0);
            let leaf = table.leaf().unwrap();
            assert!(state.tree.is_leaf(leaf));
        }
    }
}

#[test]
fn test_detach_attach_is_identity() {
    let corpus = Corpus::new(
        5,
        vec![Document {
            sentences: vec![vec![0, 1, 2], vec![3, 4, 0, 1]],
            response: Some(0.5),
        }],
    );
    let mut rng = SmallRng::seed_from_u64(11);
    let mut sampler = GibbsSampler::new(&corpus, toy_config(3, 10, &corpus)).unwrap();
    let (t, _) = seat_on_new_path(&mut sampler, &corpus, 0, &[0, 1], &mut rng);

    let state = sampler.state_mut();
    for (k, id) in state.tree.preorder().into_iter().enumerate().skip(1) {
        state.tree[id].set_regression(0.25 * k as f64);
    }
    state.update_document_topic_weights();
    assert_eq!(state.table(0, t).unwrap().num_customers(), 2);
    validate_state(state, &corpus).unwrap();

    let before = Snapshot::capture(sampler.state()).unwrap();
    let weight_before = sampler.state().doc_topic_weights[0];

    for s in 0..2 {
        let w = sampler.state().sentence_topic_weight(0, s);
        sampler.state_mut().doc_topic_weights[0] -= w;
        sampler.detach_sentence(0, s).unwrap();
        sampler.attach_sentence(0, s, t).unwrap();
        let w = sampler.state().sentence_topic_weight(0, s);
        sampler.state_mut().doc_topic_weights[0] += w;
    }

    assert_eq!(Snapshot::capture(sampler.state()).unwrap(), before);
    assert_eq!(sampler.state().doc_topic_weights[0], weight_before);
    validate_state(sampler.state(), &corpus).unwrap();
}

#[test]
fn test_lone_sentence_prunes_its_path() {
    let corpus = Corpus::new(
        3,
        vec![Document {
            sentences: vec![vec![0, 1, 2]],
            response: Some(0.5),
        }],
    );
    for height in [2, 3] {
        let mut rng = SmallRng::seed_from_u64(3);
        let mut sampler = GibbsSampler::new(&corpus, toy_config(height, 10, &corpus)).unwrap();
        let (t, _) = seat_on_new_path(&mut sampler, &corpus, 0, &[0], &mut rng);
        assert_eq!(sampler.state().tree.len(), height);

        sampler.detach_sentence(0, 0).unwrap();

        let state = sampler.state();
        assert!(state.table(0, t).is_err());
        assert_eq!(state.restaurants[0].num_tables(), 0);
        assert_eq!(state.sentence_tables[0][0], None);
        assert_eq!(state.tree.len(), 1);
        let root = &state.tree[state.tree.root()];
        assert_eq!(root.customers(), 0);
        assert_eq!(root.content().count_sum(), 0);
    }
}

#[test]
fn test_new_table_extends_below_chosen_node() {
    let mut corpus = toy_corpus();
    corpus.documents[0].sentences.truncate(1);
    let height = 3;
    let mut config = toy_config(height, 10, &corpus);
    // new branches dominate the path prior
    config.gammas = vec![1e3; height - 1];
    let mut sampler = GibbsSampler::new(&corpus, config).unwrap();
    sampler.initialize().unwrap();

    let mut extended = 0;
    for _ in 0..50 {
        // the lone sentence leaves document 0 without tables
        let w = sampler.state().sentence_topic_weight(0, 0);
        sampler.state_mut().doc_topic_weights[0] -= w;
        sampler.detach_sentence(0, 0).unwrap();
        assert_eq!(sampler.state().restaurants[0].num_tables(), 0);
        let before: BTreeSet<NodeId> = sampler.state().tree.preorder().into_iter().collect();

        sampler.sample_table_for_sentence(0, 0, StepFlags::PLACE).unwrap();
        let w = sampler.state().sentence_topic_weight(0, 0);
        sampler.state_mut().doc_topic_weights[0] += w;

        let state = sampler.state();
        let leaf = state.table_leaf(0, state.table_of(0, 0).unwrap()).unwrap();
        let path = state.tree.path_from_node(leaf);
        assert_eq!(path.len(), height);
        assert!(state.tree.is_leaf(leaf));

        let kept = path.iter().rev().find(|id| before.contains(id)).copied().unwrap();
        let level = state.tree[kept].level();
        assert_eq!(state.tree.len() - before.len(), height - level - 1);
        assert!(path[level + 1..].iter().all(|id| !before.contains(id)));
        if level + 1 < height {
            extended += 1;
        }
        validate_state(state, &corpus).unwrap();
    }
    assert!(extended > 0);
}

#[test]
fn test_minimal_path_assumption_run() {
    let corpus = toy_corpus();
    let mut config = toy_config(3, 10, &corpus);
    config.path_assumption = PathAssumption::Minimal;
    let sampler = fitted_sampler(&corpus, config);
    let state = sampler.state();

    validate_state(state, &corpus).unwrap();
    for id in state.tree.preorder() {
        let topic = state.tree[id].topic().unwrap();
        assert_eq!(topic.len(), corpus.vocab_size);
        assert_abs_diff_eq!(topic.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
    }
    assert!(state.predictions().iter().all(|y| y.is_finite()));
}

#[test]
fn test_level_probabilities_normalize() {
    let corpus = toy_corpus();
    let mut sampler = GibbsSampler::new(&corpus, toy_config(3, 10, &corpus)).unwrap();
    sampler.initialize().unwrap();

    for (d, doc) in corpus.documents.iter().enumerate() {
        for (s, sentence) in doc.sentences.iter().enumerate() {
            for n in 0..sentence.len() {
                for observed in [false, true] {
                    let lp = sampler.level_log_probabilities(d, s, n, observed).unwrap();
                    assert_eq!(lp.len(), 3);
                    let p = normalize_log_probs(&lp);
                    assert_abs_diff_eq!(p.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
                }
            }
        }
    }
}

#[test]
fn test_progress_bar_spans_iterations() {
    let pb = iteration_progress_bar("Sampling", 12);
    assert_eq!(pb.length(), Some(12));
    pb.inc(5);
    assert_eq!(pb.position(), 5);
    pb.finish_and_clear();
}

#[test]
fn test_degenerate_scores_are_deterministic() {
    let mut rng = SmallRng::seed_from_u64(5);
    let log_probs = [-3.0, -60.0, -53.5];
    let hits = (0..1000)
        .filter(|_| sample_categorical_log(&log_probs, &mut rng) == 0)
        .count();
    assert!(hits as f64 / 1000.0 >= 0.999999);
}

#[test]
fn test_snapshot_round_trip_is_exact() {
    let corpus = toy_corpus();
    let config = toy_config(3, 10, &corpus);
    let sampler = fitted_sampler(&corpus, config.clone());
    let snapshot = Snapshot::capture(sampler.state()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("toy.state.json.gz");
    snapshot.save(&path).unwrap();
    let loaded = Snapshot::load(&path).unwrap();
    assert_eq!(loaded, snapshot);

    let restored = loaded.restore(&corpus, &config).unwrap();
    assert_eq!(Snapshot::capture(&restored).unwrap(), snapshot);
    assert_eq!(restored.doc_topic_weights, sampler.state().doc_topic_weights);
}

#[test]
fn test_restore_rejects_other_corpus() {
    let corpus = toy_corpus();
    let config = toy_config(2, 4, &corpus);
    let sampler = fitted_sampler(&corpus, config.clone());
    let snapshot = Snapshot::capture(sampler.state()).unwrap();

    let mut shorter = corpus.clone();
    shorter.documents.pop();
    assert!(snapshot.restore(&shorter, &config).is_err());

    let mut taller = config.clone();
    taller.height = 3;
    assert!(snapshot.restore(&corpus, &taller).is_err());
}

#[test]
fn test_resume_continues_after_snapshot() {
    let corpus = toy_corpus();
    let first = fitted_sampler(&corpus, toy_config(2, 10, &corpus));
    let snapshot = Snapshot::capture(first.state()).unwrap();

    let config = toy_config(2, 20, &corpus);
    let state = snapshot.restore(&corpus, &config).unwrap();
    assert_eq!(state.iteration, 9);

    let mut resumed =
        GibbsSampler::with_state(&corpus, config, state, Some(corpus.responses().unwrap())).unwrap();
    let mut snapshots = 0;
    let trace = resumed
        .run(|_| {
            snapshots += 1;
            Ok(())
        })
        .unwrap();

    assert_eq!(trace.log_likelihoods.len(), 10);
    assert!(trace.log_likelihoods.iter().all(|x| x.is_finite()));
    // iterations 10 and 15 after burn-in, then the final one
    assert_eq!(snapshots, 3);
    assert_eq!(resumed.state().iteration, 19);
}

#[test]
fn test_hyperparameter_sampling_stays_valid() {
    let corpus = toy_corpus();
    let mut config = toy_config(2, 20, &corpus);
    config.optimize_hyperparameters = true;

    let mut sampler = GibbsSampler::new(&corpus, config).unwrap();
    sampler.initialize().unwrap();
    let trace = sampler.run(|_| Ok(())).unwrap();

    assert_eq!(trace.hyperparameters.n_samples(), 2);
    sampler.state().hyper.validate().unwrap();
    for table in sampler.state().restaurants.iter().flat_map(|r| r.tables()) {
        assert_eq!(table.stick().mean(), sampler.state().hyper.gem_mean);
    }
}

#[test]
fn test_lexical_weights_selected_by_lasso() {
    let corpus = toy_corpus();
    let mut config = toy_config(2, 4, &corpus);
    config.lexical_l1 = 1e-3;

    let sampler = fitted_sampler(&corpus, config);
    let state = sampler.state();
    assert!(!state.lexical_weights.is_empty());
    assert!(state.lexical_weights.keys().all(|&v| v < corpus.vocab_size));
    validate_state(state, &corpus).unwrap();
}

#[test]
fn test_predict_with_snapshots() {
    let corpus = toy_corpus();
    let mut sampler = GibbsSampler::new(&corpus, toy_config(2, 20, &corpus)).unwrap();
    sampler.initialize().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("toy").to_string_lossy().into_owned();
    sampler
        .run(|state| Snapshot::capture(state)?.save(&snapshot_file(&out, state.iteration)))
        .unwrap();

    // iterations 10 and 15 after burn-in, then the final one
    let files = list_snapshot_files(&out).unwrap();
    let iterations: Vec<i64> = files.iter().map(|(i, _)| *i).collect();
    assert_eq!(iterations, vec![10, 15, 19]);

    let snapshots: Vec<Snapshot> = files
        .iter()
        .map(|(_, file)| Snapshot::load(file).unwrap())
        .collect();
    assert_ne!(snapshots[0], snapshots[1]);

    let mut unseen = corpus.clone();
    for doc in unseen.documents.iter_mut() {
        doc.response = None;
    }
    let config = toy_config(2, 10, &corpus);
    let chain = predict_responses(&unseen, &snapshots, &config).unwrap();

    // one draw per snapshot, at iteration 5
    assert_eq!(chain.n_samples(), 3);
    let mean = chain.posterior_mean();
    assert_eq!(mean.len(), corpus.num_documents());
    assert!(mean.iter().all(|y| y.is_finite()));
    for (d, y) in mean.iter().enumerate() {
        let pooled = chain.samples.iter().map(|x| x[d]).sum::<f64>() / 3.0;
        assert_abs_diff_eq!(*y, pooled, epsilon = 1e-12);
    }
}
