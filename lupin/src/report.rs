//! Plain-text outputs: top words per node and TSV traces.

use crate::config::Hyperparameters;
use crate::corpus::{open_buf_writer, Corpus};
use crate::error::Result;
use crate::topic_tree::{NodeId, TopicTree};
use mcmc_util::McmcChain;
use std::io::Write;

///
/// Write every line into the output_file
///
/// * `lines` - one entry per line
/// * `output_file` - file name--either gzipped or not
///
pub fn write_lines<T: std::fmt::Display>(lines: &[T], output_file: &str) -> Result<()> {
    let mut buf = open_buf_writer(output_file)?;
    for line in lines {
        writeln!(buf, "{}", line)?;
    }
    buf.flush()?;
    Ok(())
}

/// One line per node in pre-order with siblings ranked by regression
/// coefficient: path, creation iteration, customers, tokens, coefficient
/// and the `num_words` most probable words. Leaves without tokens are
/// skipped.
pub fn top_words_report(tree: &TopicTree, corpus: &Corpus, num_words: usize) -> Vec<String> {
    let mut lines = vec![];
    let mut stack: Vec<NodeId> = vec![tree.root()];

    while let Some(id) = stack.pop() {
        let node = &tree[id];
        let mut children: Vec<NodeId> = node.children().collect();
        // highest coefficient printed first
        children.sort_by(|&a, &b| tree[a].regression().total_cmp(&tree[b].regression()));
        stack.extend(children);

        if tree.is_leaf(id) && node.content().count_sum() == 0 {
            continue;
        }

        let topic = node.topic_or_posterior_mean();
        let mut order: Vec<usize> = (0..topic.len()).collect();
        order.sort_by(|&a, &b| topic[b].total_cmp(&topic[a]));
        let words: Vec<String> = order
            .into_iter()
            .take(num_words)
            .map(|v| corpus.word(v))
            .collect();

        lines.push(format!(
            "{}[{}] born {}, customers {}, tokens {}, coefficient {:.4}: {}",
            "\t".repeat(node.level()),
            tree.path_string(id),
            node.born(),
            node.customers(),
            node.content().count_sum(),
            node.regression(),
            words.join(" ")
        ));
    }
    lines
}

/// `iteration \t llh` per line, counting from `first_iteration`
pub fn log_likelihood_trace(first_iteration: i64, log_likelihoods: &[f64]) -> Vec<String> {
    let mut lines = vec!["iteration\tllh".to_string()];
    for (i, llh) in log_likelihoods.iter().enumerate() {
        lines.push(format!("{}\t{}", first_iteration + i as i64, llh));
    }
    lines
}

/// Header of hyperparameter names, then one sampled vector per line
pub fn hyperparameter_trace(chain: &McmcChain<Vec<f64>>) -> Vec<String> {
    let mut lines = vec![format!("{}\tllh", Hyperparameters::NAMES.join("\t"))];
    for (sample, llh) in chain.samples.iter().zip(&chain.log_likelihoods) {
        let values: Vec<String> = sample.iter().map(|x| x.to_string()).collect();
        lines.push(format!("{}\t{}", values.join("\t"), llh));
    }
    lines
}

/// `document \t mean \t sd \t q2.5 \t q97.5` of predicted responses
pub fn prediction_table(chain: &McmcChain<Vec<f64>>) -> Vec<String> {
    let mean = chain.posterior_mean();
    // a single sample has no spread
    let var = chain.posterior_variance();
    let lower = chain.quantile(0.025);
    let upper = chain.quantile(0.975);
    let mut lines = vec!["document\tmean\tsd\tq2.5\tq97.5".to_string()];
    for (d, m) in mean.iter().enumerate() {
        let sd = var.get(d).map_or(0.0, |v| v.max(0.0).sqrt());
        lines.push(format!("{}\t{}\t{}\t{}\t{}", d, m, sd, lower[d], upper[d]));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_hyperparameter_trace_layout() {
        let mut chain = McmcChain::new();
        chain.push(Hyperparameters::default().to_array().to_vec(), -3.5);
        let lines = hyperparameter_trace(&chain);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("alpha\trho"));
        assert_eq!(lines[1].split('\t').count(), 7);
        assert!(lines[1].ends_with("-3.5"));
    }

    #[test]
    fn test_prediction_table() {
        let mut chain = McmcChain::new();
        chain.push(vec![1.0, 2.0], 0.0);
        let lines = prediction_table(&chain);
        assert_eq!(lines[1], "0\t1\t0\t1\t1");

        chain.push(vec![2.0, 2.0], 0.0);
        chain.push(vec![3.0, 2.0], 0.0);
        let lines = prediction_table(&chain);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "document\tmean\tsd\tq2.5\tq97.5");
        let expected = [[0.0, 2.0, 1.0, 1.05, 2.95], [1.0, 2.0, 0.0, 2.0, 2.0]];
        for (line, expected) in lines[1..].iter().zip(expected) {
            let row: Vec<f64> = line.split('\t').map(|x| x.parse().unwrap()).collect();
            assert_eq!(row.len(), 5);
            for (x, e) in row.into_iter().zip(expected) {
                assert_abs_diff_eq!(x, e, epsilon = 1e-12);
            }
        }
    }
}
