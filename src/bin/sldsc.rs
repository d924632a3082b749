use std::path::PathBuf;

use clap::{Parser, Subcommand};

use sldsc::annotation::AnnotationSource;
use sldsc::config::{DEFAULT_MAX_BLOCKS, DEFAULT_WINDOW_CM, PathConfig};
use sldsc::logging::init_tracing;
use sldsc::munge::{ColumnMap, EffectColumn, MungeConfig};
use sldsc::pipeline::{PipelineConfig, Stage, run};

#[derive(Parser)]
#[command(name = "sldsc")]
#[command(about = "Stratified LD-score regression", long_about = None)]
struct Cli {
    /// Shared reference data (panels, hapmap, baseline, tissues).
    #[arg(long, required = true)]
    input_root: PathBuf,
    /// Working directory for annotations, LD scores, sumstats and results.
    #[arg(long, required = true)]
    data_root: PathBuf,
    /// Comma-separated ancestries.
    #[arg(long, default_value = "EUR")]
    ancestry: String,
    /// Comma-separated chromosomes; defaults to 1-22.
    #[arg(long)]
    chromosomes: Option<String>,
    #[arg(long)]
    threads: Option<usize>,
    /// Debug-level logging for this crate.
    #[arg(long, short)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    Annotate {
        #[arg(long, conflicts_with = "genes")]
        regions: Option<PathBuf>,
        #[arg(long)]
        genes: Option<PathBuf>,
    },
    LdScore {
        #[arg(long, default_value_t = DEFAULT_WINDOW_CM)]
        window_cm: f64,
    },
    Munge {
        #[arg(long, required = true)]
        dataset: String,
        #[arg(long, required = true)]
        file: PathBuf,
        #[arg(long, default_value = "GRCh37")]
        genome_build: String,
        /// Single-character field separator; detected when absent.
        #[arg(long)]
        sep: Option<char>,
        #[arg(long, default_value = "chromosome")]
        chromosome_col: String,
        #[arg(long, default_value = "position")]
        position_col: String,
        #[arg(long, default_value = "reference")]
        reference_col: String,
        #[arg(long, default_value = "alt")]
        alt_col: String,
        #[arg(long, default_value = "pValue")]
        p_col: String,
        #[arg(long, conflicts_with = "odds_ratio_col")]
        beta_col: Option<String>,
        #[arg(long)]
        odds_ratio_col: Option<String>,
        #[arg(long)]
        n_col: Option<String>,
        #[arg(long)]
        effective_n: Option<f64>,
    },
    PrepareInputs,
    Overlap,
    Regress {
        #[arg(long, required = true)]
        datasets: String,
        #[arg(long, default_value_t = DEFAULT_MAX_BLOCKS)]
        max_blocks: usize,
    },
    AnnotRegress {
        #[arg(long, required = true)]
        datasets: String,
        #[arg(long, default_value_t = DEFAULT_MAX_BLOCKS)]
        max_blocks: usize,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let paths = PathConfig::new(cli.input_root, cli.data_root);
    let ancestries = split_string_list(cli.ancestry);
    if ancestries.is_empty() {
        anyhow::bail!("--ancestry must name at least one ancestry");
    }
    let mut config = PipelineConfig::new(paths, ancestries);
    if let Some(list) = cli.chromosomes {
        config.chromosomes = split_chromosomes(list)?;
    }
    config.cores = cli.threads;

    let stage = match cli.command {
        Command::Annotate { regions, genes } => {
            config.annotation = Some(match (regions, genes) {
                (Some(file), None) => AnnotationSource::Regions(file),
                (None, Some(file)) => AnnotationSource::Genes(file),
                _ => anyhow::bail!("annotate needs exactly one of --regions or --genes"),
            });
            Stage::Annotate
        }
        Command::LdScore { window_cm } => {
            config.window_cm = window_cm;
            Stage::LdScore
        }
        Command::Munge {
            dataset,
            file,
            genome_build,
            sep,
            chromosome_col,
            position_col,
            reference_col,
            alt_col,
            p_col,
            beta_col,
            odds_ratio_col,
            n_col,
            effective_n,
        } => {
            let effect = match (beta_col, odds_ratio_col) {
                (Some(name), None) => EffectColumn::Beta(name),
                (None, Some(name)) => EffectColumn::OddsRatio(name),
                _ => anyhow::bail!("munge needs exactly one of --beta-col or --odds-ratio-col"),
            };
            if config.ancestries.len() != 1 {
                anyhow::bail!("munge aligns to one ancestry at a time; pass a single --ancestry");
            }
            if n_col.is_none() && effective_n.is_none() {
                anyhow::bail!("munge needs --n-col or --effective-n");
            }
            let separator = match sep {
                Some(c) if c.is_ascii() => Some(c as u8),
                Some(c) => anyhow::bail!("separator {c:?} is not a single byte"),
                None => None,
            };
            config.munge = Some(MungeConfig {
                dataset,
                file,
                ancestry: config.ancestries[0].clone(),
                genome_build,
                separator,
                columns: ColumnMap {
                    chromosome: chromosome_col,
                    position: position_col,
                    reference: reference_col,
                    alt: alt_col,
                    p_value: p_col,
                    effect,
                    n: n_col,
                },
                effective_n,
                chromosomes: config.chromosomes.clone(),
            });
            Stage::Munge
        }
        Command::PrepareInputs => Stage::PrepareInputs,
        Command::Overlap => Stage::Overlap,
        Command::Regress {
            datasets,
            max_blocks,
        } => {
            config.datasets = split_string_list(datasets);
            config.max_blocks = max_blocks;
            Stage::Regress
        }
        Command::AnnotRegress {
            datasets,
            max_blocks,
        } => {
            config.datasets = split_string_list(datasets);
            config.max_blocks = max_blocks;
            Stage::AnnotRegress
        }
    };

    run(&config, &[stage])
}

fn split_string_list(input: String) -> Vec<String> {
    input
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn split_chromosomes(input: String) -> anyhow::Result<Vec<u8>> {
    split_string_list(input)
        .into_iter()
        .map(|s| {
            s.parse::<u8>()
                .map_err(|_| anyhow::anyhow!("invalid chromosome {s:?}"))
        })
        .collect()
}
