use clap::Parser;
use std::path::PathBuf;
use std::process;

use kraken_postprocess::io::{open_input, open_output};
use kraken_postprocess::progress::spinner;
use kraken_postprocess::{
    filter_classifications, ConfidencePolicy, FilterConfig, OutputOrder, TaxonomyTree,
};

/// Re-anchor Kraken calls at the lowest ancestor holding enough k-mer support.
#[derive(Debug, Parser)]
#[command(name = "kraken-filter", version, about)]
struct Cli {
    /// Kraken database directory (contains taxonomy/nodes.dmp)
    #[arg(short, long, env = "KRAKEN_DB")]
    db: PathBuf,

    /// Fraction of unambiguous k-mers a clade must hold, in [0, 1]
    #[arg(short = 'r', long)]
    threshold: f64,

    /// Worker threads (defaults to available parallelism)
    #[arg(short, long)]
    threads: Option<usize>,

    /// Report P=0.000 when no ancestor qualifies
    #[arg(long)]
    strict_confidence: bool,

    /// Write output in input order
    #[arg(long)]
    ordered: bool,

    /// Classifier output (stdin if omitted; .gz accepted)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Destination (stdout if omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// No progress spinners
    #[arg(short, long)]
    quiet: bool,
}

fn main() {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = run(&cli) {
        log::error!("{e}");
        process::exit(1);
    }
}

fn run(cli: &Cli) -> kraken_postprocess::Result<()> {
    let mut config = FilterConfig::new(&cli.db, cli.threshold);
    if let Some(threads) = cli.threads {
        config = config.with_workers(threads);
    }
    if cli.strict_confidence {
        config = config.with_confidence_policy(ConfidencePolicy::StrictZero);
    }
    if cli.ordered {
        config = config.with_output_order(OutputOrder::Input);
    }
    config.validate()?;

    let progress = spinner("blue", "Loading taxonomy...", cli.quiet);
    let tree = TaxonomyTree::load_dir(&config.taxonomy_dir)?;
    progress.finish_with_message(format!("Loaded {} taxa.", tree.len()));

    let input = open_input(cli.input.as_deref())?;
    let output = open_output(cli.output.as_deref())?;

    let progress = spinner("green", "Filtering classifications...", cli.quiet);
    let stats = filter_classifications(&tree, &config, input, output)?;
    progress.finish_with_message(format!(
        "Filtered {} reads: {} classified, {} unclassified.",
        stats.read, stats.classified, stats.unclassified
    ));
    Ok(())
}
