use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use nucdiv::annotation::genbank::{read_genbank, DEFAULT_FEATURE_KIND};
use nucdiv::annotation::table::read_feature_table_file;
use nucdiv::annotation::{AnnotationIndex, DuplicatePolicy};
use nucdiv::diversity::{
    evaluate_position, DiversityParams, DEFAULT_LOW_COVERAGE_LIMIT,
    DEFAULT_LOW_COVERAGE_PROPORTION, DEFAULT_MIN_BASE_QUALITY, DEFAULT_MIN_COVERAGE,
    DEFAULT_MIN_FREQUENCY,
};
use nucdiv::rounds::{
    discover_alignments, sample_name, scan_single, write_gene_summary, write_mapped_reads,
    write_replicon_summary, write_table, BamOpener, CoverageTarget, PreparedSets, RoundConfig,
    RoundController, RoundTag, SamtoolsDownsampler, TablePaths, TableSink, DEFAULT_ROUNDS,
};
use nucdiv::ReferenceCollection;

#[derive(Parser, Debug)]
#[command(
    name = "nucdiv",
    about = "Nucleotide diversity (pi) per base, gene and replicon from downsampled alignments"
)]
struct Cli {
    /// Log at debug level (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every downsampling round and write per-round and aggregate tables.
    Run {
        #[command(flatten)]
        inputs: InputArgs,
        /// Directory of indexed BAM files (one per sample).
        alignments: PathBuf,
        /// Output directory.
        #[arg(long, short, default_value = "nucdiv_out")]
        output: PathBuf,
        /// Number of downsampling rounds.
        #[arg(long, default_value_t = DEFAULT_ROUNDS)]
        rounds: u32,
        /// Target mean coverage; omit to downsample to the least-covered sample.
        #[arg(long, conflicts_with = "prepared")]
        coverage: Option<f64>,
        /// Use the inputs unchanged in round 1.
        #[arg(long)]
        skip_first_downsample: bool,
        /// Treat the alignment directory as already downsampled
        /// (`round_NN/` subdirectories are used when present). Output files
        /// are labelled `prepared`.
        #[arg(long)]
        prepared: bool,
        /// Worker threads for alignment sets within a round.
        #[arg(long, short = 't', default_value_t = 1)]
        threads: usize,
        #[command(flatten)]
        thresholds: ThresholdArgs,
    },
    /// Scan a single BAM file once, without downsampling.
    Scan {
        #[command(flatten)]
        inputs: InputArgs,
        /// Indexed BAM file.
        alignment: PathBuf,
        /// Output directory.
        #[arg(long, short, default_value = "nucdiv_out")]
        output: PathBuf,
        /// Label used in output file names.
        #[arg(long, default_value = "full")]
        label: String,
        #[command(flatten)]
        thresholds: ThresholdArgs,
    },
    /// Filtered pi for one position given its A, C, G and T depths.
    Pi {
        /// Depths in A C G T order.
        #[arg(num_args = 4, value_names = ["A", "C", "G", "T"])]
        depths: Vec<u32>,
        /// Alleles need more than this many reads to count.
        #[arg(long, default_value_t = DEFAULT_MIN_COVERAGE)]
        min_coverage: u32,
        /// Alleles below this frequency are dropped.
        #[arg(long, default_value_t = DEFAULT_MIN_FREQUENCY)]
        min_frequency: f64,
    },
}

#[derive(Args, Debug)]
struct InputArgs {
    /// Indexed reference FASTA (`.fai` alongside).
    reference: PathBuf,
    /// Gene annotation: GenBank (`.gb`, `.gbk`, `.genbank`) or tab-delimited table.
    annotation: PathBuf,
    /// GenBank feature kind to read genes from.
    #[arg(long, default_value = DEFAULT_FEATURE_KIND)]
    feature_kind: String,
    /// What to do when two genes share an identifier.
    #[arg(long, value_enum, default_value_t = DuplicateArg::LastWins)]
    duplicates: DuplicateArg,
}

#[derive(Args, Debug)]
struct ThresholdArgs {
    /// Alleles need more than this many reads to count.
    #[arg(long, default_value_t = DEFAULT_MIN_COVERAGE)]
    min_coverage: u32,
    /// Alleles below this frequency are dropped.
    #[arg(long, default_value_t = DEFAULT_MIN_FREQUENCY)]
    min_frequency: f64,
    /// Positions with a filtered depth below this are low coverage.
    #[arg(long, default_value_t = DEFAULT_LOW_COVERAGE_LIMIT)]
    low_coverage_limit: u32,
    /// Genes with more than this share of low-coverage positions are flagged.
    #[arg(long, default_value_t = DEFAULT_LOW_COVERAGE_PROPORTION)]
    low_coverage_proportion: f64,
    /// Minimum base quality for a base to be counted.
    #[arg(long, default_value_t = DEFAULT_MIN_BASE_QUALITY)]
    min_base_quality: u8,
}

impl ThresholdArgs {
    fn params(&self) -> DiversityParams {
        DiversityParams::default()
            .with_min_coverage(self.min_coverage)
            .with_min_frequency(self.min_frequency)
            .with_low_coverage_limit(self.low_coverage_limit)
            .with_low_coverage_proportion(self.low_coverage_proportion)
            .with_min_base_quality(self.min_base_quality)
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum DuplicateArg {
    LastWins,
    Reject,
}

impl From<DuplicateArg> for DuplicatePolicy {
    fn from(arg: DuplicateArg) -> Self {
        match arg {
            DuplicateArg::LastWins => DuplicatePolicy::LastWins,
            DuplicateArg::Reject => DuplicatePolicy::Reject,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            inputs,
            alignments,
            output,
            rounds,
            coverage,
            skip_first_downsample,
            prepared,
            threads,
            thresholds,
        } => {
            let target = match (prepared, coverage) {
                (true, _) => CoverageTarget::Prepared,
                (false, Some(depth)) => CoverageTarget::Depth(depth),
                (false, None) => CoverageTarget::LowestCommonDenominator,
            };
            let config = RoundConfig::new(output)
                .with_rounds(rounds)
                .with_target(target)
                .with_skip_first_downsample(skip_first_downsample)
                .with_threads(threads);
            run_rounds(&inputs, &alignments, config, prepared, thresholds.params())?
        }
        Commands::Scan {
            inputs,
            alignment,
            output,
            label,
            thresholds,
        } => run_scan(&inputs, &alignment, &output, &label, thresholds.params())?,
        Commands::Pi {
            depths,
            min_coverage,
            min_frequency,
        } => run_pi(&depths, min_coverage, min_frequency)?,
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_inputs(inputs: &InputArgs) -> Result<(ReferenceCollection, AnnotationIndex)> {
    let reference = ReferenceCollection::from_fasta(&inputs.reference).with_context(|| {
        format!("failed to read reference {}", inputs.reference.display())
    })?;

    let features = if is_genbank(&inputs.annotation) {
        read_genbank(&inputs.annotation, &inputs.feature_kind)
    } else {
        read_feature_table_file(&inputs.annotation)
    }
    .with_context(|| format!("failed to read annotation {}", inputs.annotation.display()))?;

    let annotation = AnnotationIndex::from_features(features, inputs.duplicates.into())
        .context("failed to index annotation")?;
    reference
        .check_annotation(&annotation)
        .context("annotation does not match the reference")?;

    info!(
        replicons = reference.replicons().len(),
        genes = annotation.len(),
        "inputs loaded"
    );
    Ok((reference, annotation))
}

fn is_genbank(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| matches!(ext.to_ascii_lowercase().as_str(), "gb" | "gbk" | "genbank"))
}

fn run_rounds(
    inputs: &InputArgs,
    alignments: &Path,
    config: RoundConfig,
    prepared: bool,
    params: DiversityParams,
) -> Result<()> {
    let (reference, annotation) = load_inputs(inputs)?;
    let output_dir = config.output_dir.clone();

    let bams = discover_alignments(alignments)
        .with_context(|| format!("failed to list {}", alignments.display()))?;

    let summaries = if prepared {
        let mut controller = RoundController::new(
            config,
            params,
            reference,
            annotation,
            PreparedSets::new(alignments),
            BamOpener,
            bams,
        )?;
        controller.run()?
    } else {
        if bams.is_empty() {
            bail!("no .bam files found in {}", alignments.display());
        }
        let downsampler = SamtoolsDownsampler::new().context("samtools is required for downsampling")?;
        let mut controller = RoundController::new(
            config,
            params,
            reference,
            annotation,
            downsampler,
            BamOpener,
            bams,
        )?;
        controller.run()?
    };

    for summary in &summaries {
        let coding = summary
            .replicons
            .last()
            .map(|row| format!("{:.9}", row.mean_pi))
            .unwrap_or_else(|| "NA".to_string());
        println!(
            "{}\t{}\trounds={}\tgenes={}\tcoding_pi={}",
            summary.sample,
            summary.label,
            summary.rounds,
            summary.genes.len(),
            coding
        );
    }
    println!("tables written to {}", output_dir.display());
    Ok(())
}

fn run_scan(
    inputs: &InputArgs,
    alignment: &Path,
    output: &Path,
    label: &str,
    params: DiversityParams,
) -> Result<()> {
    params.validate()?;
    let (reference, annotation) = load_inputs(inputs)?;
    let sample = sample_name(alignment);
    let paths = TablePaths::for_round(output, RoundTag::new(1), &sample, label);

    let mut sink = TableSink::create(&paths)?;
    let scan = scan_single(alignment, &reference, &annotation, &params, &mut sink)
        .with_context(|| format!("failed to scan {}", alignment.display()))?;
    sink.finish()?;

    write_table(&paths.gene_summary(), |w| write_gene_summary(w, &scan.genes))?;
    write_table(&paths.replicon_summary(), |w| {
        write_replicon_summary(w, &scan.replicons)
    })?;
    write_mapped_reads(&paths.mapped_reads(), scan.mapped_reads)?;

    for row in &scan.replicons {
        println!("{}\t{:.9}", row.replicon, row.mean_pi);
    }
    info!(dir = %paths.dir().display(), "tables written");
    Ok(())
}

fn run_pi(depths: &[u32], min_coverage: u32, min_frequency: f64) -> Result<()> {
    let [a, c, g, t] = depths else {
        bail!("expected four depths (A C G T), got {}", depths.len());
    };
    let params = DiversityParams::default()
        .with_min_coverage(min_coverage)
        .with_min_frequency(min_frequency);
    params.validate()?;

    let record = evaluate_position(&"-".into(), 1, [*a, *c, *g, *t], &params);
    let [fa, fc, fg, ft] = record.filtered.depths;
    println!("filtered\t{fa}\t{fc}\t{fg}\t{ft}");
    println!("depth\t{}", record.depth());
    println!("pairwise_differences\t{}", record.pairwise.differences);
    println!("pairwise_comparisons\t{}", record.pairwise.comparisons);
    println!("pi\t{:.9}", record.pi());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepared_runs_reject_a_coverage_target() {
        let args = ["nucdiv", "run", "ref.fa", "genes.gbk", "bams", "--prepared"];
        assert!(Cli::try_parse_from(args).is_ok());

        let with_coverage = args.iter().copied().chain(["--coverage", "10"]);
        let err = Cli::try_parse_from(with_coverage).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }
}
