use clap::Args;
use log::info;
use lupin::gibbs::GibbsSampler;
use lupin::report::*;
use lupin::state::SamplerState;
use lupin::state_codec::{list_snapshot_files, snapshot_file};
use lupin::{Corpus, PathAssumption, SamplerConfig, Snapshot};
use std::path::Path;

#[derive(Args, Debug)]
pub struct FitArgs {
    #[arg(
        required = true,
        help = "Corpus file",
        long_help = "Corpus JSON (optionally gzipped) with `vocab_size`,\n\
		     `documents` (sentences of token ids with a `response`)\n\
		     and an optional `vocab` of word strings."
    )]
    corpus_file: Box<str>,

    #[arg(
        long,
        short,
        required = true,
        help = "Output header",
        long_help = "Output header for results:\n\
		     - {out}.config.json\n\
		     - {out}.state.{iteration}.json.gz\n\
		     - {out}.topwords.txt\n\
		     - {out}.llh.tsv\n\
		     - {out}.hyper.tsv\n"
    )]
    out: Box<str>,

    #[arg(
        long,
        short = 'c',
        help = "Configuration JSON",
        long_help = "Start from a configuration JSON (e.g. a previous {out}.config.json).\n\
		     Options given on the command line override its values."
    )]
    config: Option<Box<str>>,

    #[arg(long, short = 'L', default_value_t = 3, help = "Tree height")]
    height: usize,

    #[arg(long, help = "Burn-in iterations [default: 250]")]
    burn_in: Option<usize>,

    #[arg(long, short = 'i', help = "Total iterations [default: 500]")]
    max_iter: Option<usize>,

    #[arg(long, help = "Snapshot lag after burn-in [default: 25]")]
    lag: Option<usize>,

    #[arg(
        long,
        help = "Lexical L1 penalty",
        long_help = "L1 penalty of the lexical regression [default: 500].\n\
		     Zero disables lexical weights."
    )]
    lexical_l1: Option<f64>,

    #[arg(long, help = "Restaurant concentration")]
    alpha: Option<f64>,

    #[arg(long, help = "Response variance")]
    rho: Option<f64>,

    #[arg(long, help = "GEM mean of levels")]
    gem_mean: Option<f64>,

    #[arg(long, help = "GEM scale of levels")]
    gem_scale: Option<f64>,

    #[arg(
        long,
        value_enum,
        help = "Path assumption of topic draws",
        long_help = "How child counts propagate when drawing node topics:\n\
		     maximal (per-word maximum over children)\n\
		     or minimal (per-word minimum over children)."
    )]
    path_assumption: Option<PathAssumption>,

    #[arg(long, default_value_t = false, help = "Slice sample hyperparameters")]
    optimize_hyper: bool,

    #[arg(long, help = "Validate the state every k iterations")]
    validate_every: Option<usize>,

    #[arg(long, help = "Random seed")]
    seed: Option<u64>,

    #[arg(
        long,
        default_value_t = false,
        help = "Resume from the latest {out}.state.{iteration}.json.gz",
        long_help = "Resume from the snapshot {out}.state.{iteration}.json.gz\n\
		     with the largest iteration.\n\
		     Sampling continues after the recorded iteration."
    )]
    resume: bool,

    #[arg(long, default_value_t = 10, help = "Top words per node")]
    top_words: usize,
}

impl FitArgs {
    fn sampler_config(&self, corpus: &Corpus) -> anyhow::Result<SamplerConfig> {
        let mut config = match &self.config {
            Some(file) => SamplerConfig::from_json_file(Path::new(file.as_ref()))?,
            None => SamplerConfig::with_height(self.height, corpus.mean_response()),
        };

        if let Some(x) = self.burn_in {
            config.burn_in = x;
        }
        if let Some(x) = self.max_iter {
            config.max_iter = x;
        }
        if let Some(x) = self.lag {
            config.lag = x;
        }
        if let Some(x) = self.lexical_l1 {
            config.lexical_l1 = x;
        }
        if let Some(x) = self.alpha {
            config.hyper.alpha = x;
        }
        if let Some(x) = self.rho {
            config.hyper.rho = x;
        }
        if let Some(x) = self.gem_mean {
            config.hyper.gem_mean = x;
        }
        if let Some(x) = self.gem_scale {
            config.hyper.gem_scale = x;
        }
        if let Some(x) = self.path_assumption {
            config.path_assumption = x;
        }
        if let Some(x) = self.validate_every {
            config.validate_every = x;
        }
        if let Some(x) = self.seed {
            config.seed = x;
        }
        if self.optimize_hyper {
            config.optimize_hyperparameters = true;
        }

        config.validate()?;
        Ok(config)
    }
}

pub fn fit_model(args: &FitArgs) -> anyhow::Result<()> {
    let corpus = Corpus::from_json_file(&args.corpus_file)?;
    info!(
        "Read {} documents, {} sentences, {} tokens over {} words",
        corpus.num_documents(),
        corpus.num_sentences(),
        corpus.num_tokens(),
        corpus.vocab_size
    );

    let config = args.sampler_config(&corpus)?;
    let config_file = format!("{}.config.json", args.out);
    config.to_json_file(Path::new(&config_file))?;
    info!("Wrote the configuration: {}", config_file);

    let mut sampler = if args.resume {
        let Some((_, state_path)) = list_snapshot_files(&args.out)?.pop() else {
            anyhow::bail!("no {}.state.*.json.gz to resume from", args.out);
        };
        let snapshot = Snapshot::load(&state_path)?;
        let state = snapshot.restore(&corpus, &config)?;
        info!("Resumed from {} at iteration {}", state_path.display(), state.iteration);
        GibbsSampler::with_state(&corpus, config.clone(), state, Some(corpus.responses()?))?
    } else {
        let mut sampler = GibbsSampler::new(&corpus, config.clone())?;
        sampler.initialize()?;
        sampler
    };

    let first_iteration = sampler.state().iteration + 1;
    let trace = sampler.run(|state: &SamplerState| {
        let state_path = snapshot_file(&args.out, state.iteration);
        Snapshot::capture(state)?.save(&state_path)?;
        info!("Saved a snapshot: {}", state_path.display());
        Ok(())
    })?;

    let state = sampler.state();
    let top_words_file = format!("{}.topwords.txt", args.out);
    write_lines(&top_words_report(&state.tree, &corpus, args.top_words), &top_words_file)?;
    info!("Wrote top words: {}", top_words_file);

    let llh_file = format!("{}.llh.tsv", args.out);
    write_lines(&log_likelihood_trace(first_iteration, &trace.log_likelihoods), &llh_file)?;

    if trace.hyperparameters.n_samples() > 0 {
        let hyper_file = format!("{}.hyper.tsv", args.out);
        write_lines(&hyperparameter_trace(&trace.hyperparameters), &hyper_file)?;
    }
    Ok(())
}
