use clap::Parser;
use std::path::PathBuf;
use std::process;

use kraken_postprocess::io::{open_input, open_output};
use kraken_postprocess::progress::spinner;
use kraken_postprocess::{report_classifications, ReportConfig, TaxonomyTree};

/// Summarise Kraken output as a depth-indented clade report.
#[derive(Debug, Parser)]
#[command(name = "kraken-report", version, about)]
struct Cli {
    /// Kraken database directory (contains taxonomy/nodes.dmp and names.dmp)
    #[arg(short, long, env = "KRAKEN_DB")]
    db: PathBuf,

    /// Also print taxa with no reads in their clade
    #[arg(long)]
    show_zeros: bool,

    /// Abort if the taxonomy has dangling parents or loops
    #[arg(long)]
    strict_taxonomy: bool,

    /// Classifier or filter output (stdin if omitted; .gz accepted)
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
    let mut config = ReportConfig::new(&cli.db);
    config.show_zeros = cli.show_zeros;
    config.strict_taxonomy = cli.strict_taxonomy;

    let progress = spinner("blue", "Loading taxonomy...", cli.quiet);
    let tree = TaxonomyTree::load_dir(&config.taxonomy_dir)?;
    progress.finish_with_message(format!("Loaded {} taxa.", tree.len()));

    let input = open_input(cli.input.as_deref())?;
    let output = open_output(cli.output.as_deref())?;

    let progress = spinner("yellow", "Building report...", cli.quiet);
    let stats = report_classifications(&tree, &config, input, output)?;
    progress.finish_with_message(format!("Reported on {} reads.", stats.records));
    Ok(())
}
