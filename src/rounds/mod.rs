//! Downsampling-round controller.
//!
//! Each round asks the [`Downsampler`] for a fresh set of alignment files,
//! scans every set in parallel, writes its tables under a round-scoped
//! directory, and folds the results into a per-sample aggregate. Rounds run
//! strictly one after another. Per-round files are never renamed: the round
//! tag is part of every path, so a rerun of round N only ever touches
//! `round_NN/`.

mod downsample;
mod output;
mod progress;
mod scan;
mod summary;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{debug, info, info_span};

use crate::alignment::{
    AlignmentError, AlleleDepthSource, BamAlleleReader, ConfigError, ReferenceCollection,
};
use crate::annotation::AnnotationIndex;
use crate::diversity::{DiversityParams, GeneDiversity, RepliconDiversity};
use crate::PipelineError;

pub use downsample::{
    discover_alignments, downsample_plan, sample_name, subsample_argument, CollaboratorError,
    Downsampler, PreparedSets, SamtoolsDownsampler,
};
pub use output::{
    render_gene_summary, render_replicon_summary, write_gene_position_rows, write_gene_summary,
    write_mapped_reads, write_replicon_position_rows, write_replicon_summary, write_table,
    OutputError, TablePaths, TableSink,
};
pub use progress::JobCounter;
pub use scan::{scan_alignment_set, DiscardSink, SampleScan, ScanSink};
pub use summary::{SampleAggregate, SampleSummary};

/// Number of downsampling rounds run by default.
pub const DEFAULT_ROUNDS: u32 = 10;

/// 1-based round number, rendered as `round_NN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RoundTag(u32);

impl RoundTag {
    /// Tag for round `number` (1-based).
    pub fn new(number: u32) -> Self {
        Self(number)
    }

    /// Round number.
    pub fn number(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for RoundTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "round_{:02}", self.0)
    }
}

/// Coverage the downsampler aims for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CoverageTarget {
    /// A fixed mean depth.
    Depth(f64),
    /// The lowest mean depth among the inputs.
    LowestCommonDenominator,
    /// Inputs were downsampled ahead of time and are used as given.
    Prepared,
}

impl CoverageTarget {
    /// Label used in output file names.
    pub fn label(&self) -> String {
        match self {
            CoverageTarget::Depth(depth) => format!("cov{depth}"),
            CoverageTarget::LowestCommonDenominator => "lcd".to_string(),
            CoverageTarget::Prepared => "prepared".to_string(),
        }
    }
}

/// One alignment file belonging to one round.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentSet {
    /// Sample name.
    pub sample: String,
    /// Coverage label.
    pub label: String,
    /// Round this set was produced for.
    pub round: RoundTag,
    /// Alignment file.
    pub path: PathBuf,
}

impl AlignmentSet {
    /// Describe an alignment set.
    pub fn new(
        sample: impl Into<String>,
        label: impl Into<String>,
        round: RoundTag,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            sample: sample.into(),
            label: label.into(),
            round,
            path: path.into(),
        }
    }

    /// `sample.label`, used in logs and errors.
    pub fn name(&self) -> String {
        format!("{}.{}", self.sample, self.label)
    }
}

/// Opens an allele-depth reader for an alignment set.
pub trait AlignmentOpener: Send + Sync {
    /// Reader type produced.
    type Source: AlleleDepthSource;

    /// Open the reader for `set`.
    fn open(&self, set: &AlignmentSet) -> Result<Self::Source, AlignmentError>;
}

/// Opens indexed BAM files with rust-htslib.
#[derive(Debug, Clone, Copy, Default)]
pub struct BamOpener;

impl AlignmentOpener for BamOpener {
    type Source = BamAlleleReader;

    fn open(&self, set: &AlignmentSet) -> Result<Self::Source, AlignmentError> {
        BamAlleleReader::from_path(&set.path)
    }
}

/// Controller state; see [`RoundController::states`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundState {
    /// Nothing started.
    Idle,
    /// Obtaining alignment sets for the round.
    Downsampling(RoundTag),
    /// Scanning replicons of every alignment set.
    PerRepliconScan(RoundTag),
    /// Folding round results into the aggregates.
    Aggregating(RoundTag),
    /// Summary tables for the round are on disk.
    Written(RoundTag),
    /// All rounds and aggregate tables written.
    Done,
}

/// Round-level settings.
#[derive(Debug, Clone)]
pub struct RoundConfig {
    /// Number of downsampling rounds.
    pub rounds: u32,
    /// Downsampling target.
    pub target: CoverageTarget,
    /// Use the inputs unchanged in round 1.
    pub skip_first_downsample: bool,
    /// Worker threads for parallel alignment sets.
    pub threads: usize,
    /// Root of all output tables.
    pub output_dir: PathBuf,
}

impl RoundConfig {
    /// Defaults for `output_dir`: ten rounds, lowest common denominator, one thread.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            rounds: DEFAULT_ROUNDS,
            target: CoverageTarget::LowestCommonDenominator,
            skip_first_downsample: false,
            threads: 1,
            output_dir: output_dir.into(),
        }
    }

    /// Set the number of rounds.
    pub fn with_rounds(mut self, rounds: u32) -> Self {
        self.rounds = rounds;
        self
    }

    /// Set the downsampling target.
    pub fn with_target(mut self, target: CoverageTarget) -> Self {
        self.target = target;
        self
    }

    /// Use the inputs unchanged in round 1.
    pub fn with_skip_first_downsample(mut self, skip: bool) -> Self {
        self.skip_first_downsample = skip;
        self
    }

    /// Set the worker thread count.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Directory for downsampled alignment sets.
    pub fn downsample_dir(&self) -> PathBuf {
        self.output_dir.join("downsampled")
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.rounds == 0 {
            return Err(ConfigError::InvalidParameter("rounds must be > 0".to_string()));
        }
        if self.threads == 0 {
            return Err(ConfigError::InvalidParameter("threads must be > 0".to_string()));
        }
        if let CoverageTarget::Depth(depth) = self.target {
            if !(depth > 0.0) {
                return Err(ConfigError::InvalidParameter(format!(
                    "coverage target must be > 0, got {depth}"
                )));
            }
        }
        Ok(())
    }
}

/// Drives the downsample → scan → aggregate → write cycle.
pub struct RoundController<D, O> {
    config: RoundConfig,
    params: DiversityParams,
    reference: ReferenceCollection,
    annotation: AnnotationIndex,
    downsampler: D,
    opener: O,
    inputs: Vec<PathBuf>,
    states: Vec<RoundState>,
}

impl<D, O> fmt::Debug for RoundController<D, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoundController")
            .field("config", &self.config)
            .field("params", &self.params)
            .field("inputs", &self.inputs)
            .field("states", &self.states)
            .finish()
    }
}

impl<D: Downsampler, O: AlignmentOpener> RoundController<D, O> {
    /// Validate configuration and build a controller.
    ///
    /// Fails before any computation if parameters are out of range or the
    /// annotation does not fit the reference.
    pub fn new(
        config: RoundConfig,
        params: DiversityParams,
        reference: ReferenceCollection,
        annotation: AnnotationIndex,
        downsampler: D,
        opener: O,
        inputs: Vec<PathBuf>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        params.validate()?;
        reference.check_annotation(&annotation)?;

        Ok(Self {
            config,
            params,
            reference,
            annotation,
            downsampler,
            opener,
            inputs,
            states: vec![RoundState::Idle],
        })
    }

    /// States visited so far, starting with [`RoundState::Idle`].
    pub fn states(&self) -> &[RoundState] {
        &self.states
    }

    /// Current state.
    pub fn state(&self) -> RoundState {
        self.states.last().copied().unwrap_or(RoundState::Idle)
    }

    fn transition(&mut self, next: RoundState) {
        debug!(from = ?self.state(), to = ?next, "round state");
        self.states.push(next);
    }

    /// Run every round and write the aggregate tables.
    ///
    /// A failing round aborts the run; tables from completed rounds stay on
    /// disk, while those of the failed round are incomplete.
    pub fn run(&mut self) -> Result<Vec<SampleSummary>, PipelineError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.threads)
            .build()?;
        let mut aggregates: BTreeMap<String, SampleAggregate> = BTreeMap::new();

        for number in 1..=self.config.rounds {
            let round = RoundTag::new(number);
            let span = info_span!("round", %round);
            let _guard = span.enter();

            self.transition(RoundState::Downsampling(round));
            let sets = self.alignment_sets(round)?;
            if sets.is_empty() {
                return Err(PipelineError::NoAlignmentSets(round.to_string()));
            }
            info!(sets = sets.len(), "alignment sets ready");

            self.transition(RoundState::PerRepliconScan(round));
            let counter = JobCounter::new(sets.len());
            let scans = {
                let this = &*self;
                pool.install(|| {
                    sets.par_iter()
                        .map(|set| {
                            let scan = this.scan_set(set)?;
                            let remaining = counter.complete_one();
                            info!(alignment = %set.name(), remaining, "alignment set scanned");
                            Ok(scan)
                        })
                        .collect::<Result<Vec<_>, PipelineError>>()
                })?
            };

            self.transition(RoundState::Aggregating(round));
            for (set, scan) in sets.iter().zip(&scans) {
                aggregates
                    .entry(set.name())
                    .or_insert_with(|| SampleAggregate::new(&set.sample, &set.label))
                    .add(scan);
            }

            for (set, scan) in sets.iter().zip(&scans) {
                let paths =
                    TablePaths::for_round(&self.config.output_dir, round, &set.sample, &set.label);
                write_summaries(&paths, &scan.genes, &scan.replicons)?;
                write_mapped_reads(&paths.mapped_reads(), scan.mapped_reads)?;
            }
            self.transition(RoundState::Written(round));
        }

        let summaries: Vec<SampleSummary> =
            aggregates.values().map(SampleAggregate::finish).collect();
        for summary in &summaries {
            let paths =
                TablePaths::for_aggregate(&self.config.output_dir, &summary.sample, &summary.label);
            write_summaries(&paths, &summary.genes, &summary.replicons)?;
        }
        self.transition(RoundState::Done);
        info!(samples = summaries.len(), rounds = self.config.rounds, "all rounds complete");
        Ok(summaries)
    }

    fn alignment_sets(&self, round: RoundTag) -> Result<Vec<AlignmentSet>, PipelineError> {
        if round.number() == 1 && self.config.skip_first_downsample {
            let label = self.config.target.label();
            return Ok(self
                .inputs
                .iter()
                .map(|path| AlignmentSet::new(sample_name(path), label.clone(), round, path.clone()))
                .collect());
        }
        Ok(self.downsampler.downsample(
            &self.inputs,
            round,
            self.config.target,
            &self.config.downsample_dir(),
        )?)
    }

    fn scan_set(&self, set: &AlignmentSet) -> Result<SampleScan, PipelineError> {
        let span = info_span!("alignment", sample = %set.sample, label = %set.label);
        let _guard = span.enter();

        let mut source = self.opener.open(set)?;
        let paths =
            TablePaths::for_round(&self.config.output_dir, set.round, &set.sample, &set.label);
        let mut sink = TableSink::create(&paths)?;
        let scan = scan_alignment_set(
            &set.name(),
            &mut source,
            &self.reference,
            &self.annotation,
            &self.params,
            &mut sink,
        )?;
        sink.finish()?;
        Ok(scan)
    }
}

fn write_summaries(
    paths: &TablePaths,
    genes: &[GeneDiversity],
    replicons: &[RepliconDiversity],
) -> Result<(), OutputError> {
    paths.ensure_dir()?;
    write_table(&paths.gene_summary(), |w| write_gene_summary(w, genes))?;
    write_table(&paths.replicon_summary(), |w| write_replicon_summary(w, replicons))
}

/// Scan one alignment file without downsampling or rounds.
pub fn scan_single(
    path: &Path,
    reference: &ReferenceCollection,
    annotation: &AnnotationIndex,
    params: &DiversityParams,
    sink: &mut dyn ScanSink,
) -> Result<SampleScan, PipelineError> {
    let mut source = BamAlleleReader::from_path(path)?;
    scan_alignment_set(
        &sample_name(path),
        &mut source,
        reference,
        annotation,
        params,
        sink,
    )
}
