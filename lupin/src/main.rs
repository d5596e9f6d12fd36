mod fit_model;
mod predict_model;

use anyhow::Result;
use clap::{Parser, Subcommand};
use fit_model::*;
use log::info;
use predict_model::*;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "LUPIN",
    long_about = "Supervised hierarchical topic regression\n\
		  Sentences of each document follow paths of a nested CRP tree;\n\
		  document responses regress on the tree's node coefficients\n\
		  and a sparse set of lexical weights."
)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,

    #[arg(long, short, global = true, help = "Verbose logging (RUST_LOG=info)")]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Fit a supervised topic tree by Gibbs sampling",
        long_about = "Fit a supervised topic tree in the three stages:\n\
		      (1) Select lexical features by lasso and seat sentences at random\n\
		      (2) Sweep levels, tables and paths; refit the regressions\n\
		      (3) Write snapshots, top words and traces.\n"
    )]
    Fit(FitArgs),

    #[command(
        about = "Predict responses of unseen documents",
        long_about = "Predict responses of unseen documents.\n\
		      Every snapshot's tree stays fixed while the documents\n\
		      are seated and swept without their responses.\n"
    )]
    Predict(PredictArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    match &cli.commands {
        Commands::Fit(args) => {
            fit_model(args)?;
        }
        Commands::Predict(args) => {
            predict_model(args)?;
        }
    }

    info!("Done");
    Ok(())
}
