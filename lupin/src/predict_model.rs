use clap::Args;
use log::info;
use lupin::likelihood::regression_fit;
use lupin::predict::predict_responses;
use lupin::report::*;
use lupin::state_codec::list_snapshot_files;
use lupin::{Corpus, SamplerConfig, Snapshot};
use std::path::{Path, PathBuf};

#[derive(Args, Debug)]
pub struct PredictArgs {
    #[arg(
        required = true,
        help = "Corpus file",
        long_help = "Corpus JSON (optionally gzipped) of unseen documents.\n\
		     Responses are optional; when every document has one,\n\
		     the fit of the predictions is reported."
    )]
    corpus_file: Box<str>,

    #[arg(
        long,
        short,
        value_delimiter(','),
        required_unless_present = "fit_out",
        help = "Snapshot files",
        long_help = "Snapshot files written by `fit` (comma-separated).\n\
		     Example: run1.state.300.json.gz,run1.state.325.json.gz"
    )]
    snapshots: Vec<Box<str>>,

    #[arg(
        long,
        short = 'f',
        conflicts_with = "snapshots",
        help = "Output header of a `fit` run",
        long_help = "Output header given to `fit`. Every snapshot\n\
		     {fit_out}.state.{iteration}.json.gz of that run is used."
    )]
    fit_out: Option<Box<str>>,

    #[arg(
        long,
        short = 'c',
        required = true,
        help = "Configuration JSON",
        long_help = "Configuration the snapshots were trained with,\n\
		     i.e. the {out}.config.json written by `fit`."
    )]
    config: Box<str>,

    #[arg(
        long,
        short,
        required = true,
        help = "Output header",
        long_help = "Output header for results:\n\
		     - {out}.prediction.tsv\n"
    )]
    out: Box<str>,

    #[arg(long, help = "Burn-in iterations per snapshot")]
    burn_in: Option<usize>,

    #[arg(long, short = 'i', help = "Iterations per snapshot")]
    max_iter: Option<usize>,

    #[arg(long, help = "Sampling lag after burn-in")]
    lag: Option<usize>,

    #[arg(long, help = "Random seed")]
    seed: Option<u64>,
}

pub fn predict_model(args: &PredictArgs) -> anyhow::Result<()> {
    let corpus = Corpus::from_json_file(&args.corpus_file)?;
    info!(
        "Read {} documents, {} sentences, {} tokens",
        corpus.num_documents(),
        corpus.num_sentences(),
        corpus.num_tokens()
    );

    let mut config = SamplerConfig::from_json_file(Path::new(args.config.as_ref()))?;
    if let Some(x) = args.burn_in {
        config.burn_in = x;
    }
    if let Some(x) = args.max_iter {
        config.max_iter = x;
    }
    if let Some(x) = args.lag {
        config.lag = x;
    }
    if let Some(x) = args.seed {
        config.seed = x;
    }
    config.validate()?;

    let files: Vec<PathBuf> = match &args.fit_out {
        Some(header) => list_snapshot_files(header)?
            .into_iter()
            .map(|(_, file)| file)
            .collect(),
        None => args.snapshots.iter().map(|x| PathBuf::from(x.as_ref())).collect(),
    };
    if files.is_empty() {
        anyhow::bail!("no snapshot files found");
    }

    let snapshots = files
        .iter()
        .map(|file| Snapshot::load(file))
        .collect::<lupin::Result<Vec<_>>>()?;
    info!("Loaded {} snapshots", snapshots.len());

    let chain = predict_responses(&corpus, &snapshots, &config)?;

    let output = format!("{}.prediction.tsv", args.out);
    write_lines(&prediction_table(&chain), &output)?;
    info!("Wrote predictions: {}", output);

    if let Ok(truth) = corpus.responses() {
        let (mse, corr) = regression_fit(&truth, &chain.posterior_mean());
        info!("prediction MSE {:.6}, correlation {:.4}", mse, corr);
    }
    Ok(())
}
