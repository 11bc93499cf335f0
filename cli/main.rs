#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::Parser;
use std::path::PathBuf;
use std::process;

use cogreg::config::AnalysisConfig;
use cogreg::data::load_observation_table;
use cogreg::pipeline::{OutcomeReport, analyze_outcome, selected_outcomes};
use cogreg::report::visualizer;

const BANNER_RULE: &str = "============================================";

#[derive(Parser, Debug)]
#[command(
    name = "cogreg",
    version,
    about = "Exploratory Bayesian linear regression of cognitive-assessment scores on demographics and group."
)]
struct Cli {
    /// Tab-separated (.tsv/.txt) or comma-separated table with a header row
    data_path: PathBuf,

    /// TOML file with column, prior, sampler and report settings
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Only analyse this outcome column (repeatable)
    #[arg(long = "outcome", value_name = "NAME")]
    outcomes: Vec<String>,

    /// Posterior draws per chain
    #[arg(long, value_name = "N")]
    draws: Option<usize>,

    /// Tuning (warm-up) iterations per chain
    #[arg(long, value_name = "N")]
    tune: Option<usize>,

    /// Number of chains, run in parallel
    #[arg(long, value_name = "N")]
    chains: Option<usize>,

    /// Target acceptance probability for step-size adaptation
    #[arg(long, value_name = "F")]
    target_accept: Option<f64>,

    /// Random seed for starting points and chain generators
    #[arg(long, value_name = "N")]
    seed: Option<u64>,

    /// Probability mass of the highest-density interval
    #[arg(long, value_name = "F")]
    hdi_prob: Option<f64>,

    /// Skip the interactive terminal figures
    #[arg(long)]
    no_plots: bool,
}

impl Cli {
    /// Loads the configuration file (if any) and applies command-line overrides.
    fn resolve_config(&self) -> Result<AnalysisConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => {
                log::info!("Reading configuration from {}", path.display());
                AnalysisConfig::load(path)?
            }
            None => AnalysisConfig::default(),
        };

        if let Some(draws) = self.draws {
            config.sampler.n_samples = draws;
        }
        if let Some(tune) = self.tune {
            config.sampler.n_warmup = tune;
        }
        if let Some(chains) = self.chains {
            config.sampler.n_chains = chains;
        }
        if let Some(target_accept) = self.target_accept {
            config.sampler.target_accept = target_accept;
        }
        if let Some(seed) = self.seed {
            config.sampler.seed = seed;
        }
        if let Some(hdi_prob) = self.hdi_prob {
            config.report.hdi_prob = hdi_prob;
        }
        if self.no_plots {
            config.report.plots = false;
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = cli.resolve_config()?;

    let table = load_observation_table(&cli.data_path, &config.columns)?;
    let outcomes = selected_outcomes(&table, &cli.outcomes)?;

    let show_plots = config.report.plots && visualizer::can_display();
    if config.report.plots && !show_plots {
        log::info!("stdout is not a terminal; figures are skipped");
    }

    for outcome in &outcomes {
        println!();
        println!("{BANNER_RULE}{outcome}{BANNER_RULE}");

        let report = analyze_outcome(&table, outcome, &config)?;
        if show_plots {
            visualizer::show_figures(outcome, &report.trace, &report.summary)?;
        }
        print_report(&report);
    }

    Ok(())
}

fn print_report(report: &OutcomeReport) {
    print!("{}", report.summary);
    println!();
    println!("\nPosterior probabilities:");
    for probability in &report.sign_probabilities {
        println!("{probability}");
    }
}
