//! # Nucleotide diversity from downsampled alignments
//!
//! Computes within-population nucleotide diversity (π, the probability that
//! two reads differ at a position) from short-read alignments against a
//! reference genome, per base, per gene and per replicon.
//!
//! ## Pipeline
//!
//! 1. **Coverage filter**: zero out alleles at or below a minimum depth or
//!    below a minimum frequency, evaluated in A, C, G, T order
//! 2. **Pairwise statistic**: π = differing read pairs / all read pairs
//! 3. **Aggregation**: mean π over gene spans (with low-coverage flags), whole
//!    replicons, and all annotated bases ("Coding")
//! 4. **Rounds**: repeat over independent downsampling rounds and average
//!
//! ## Usage Example
//!
//! ```ignore
//! use nucdiv::diversity::{evaluate_position, DiversityParams};
//!
//! let params = DiversityParams::default().with_min_coverage(1).with_min_frequency(0.1);
//! let record = evaluate_position(&"chr1".into(), 1, [5, 5, 0, 0], &params);
//! assert!((record.pi() - 25.0 / 45.0).abs() < 1e-12);
//! ```

#![warn(missing_docs, missing_debug_implementations)]
#![allow(clippy::new_without_default)]

pub mod alignment;  // Alignment reader collaborator and reference checks
pub mod annotation; // Gene coordinate index
pub mod diversity;  // Filtering, π and aggregation
pub mod rounds;     // Downsampling rounds and output tables

// Re-exports for convenience
pub use alignment::{AlleleDepthSource, ConfigError, InMemoryAlignment, ReferenceCollection};
pub use annotation::{AnnotationError, AnnotationIndex, DuplicatePolicy, Gene, GeneFeature};
pub use diversity::{DiversityParams, GeneDiversity, PositionRecord, RepliconDiversity};
pub use rounds::{RoundConfig, RoundController, RoundState, RoundTag, SampleScan, SampleSummary};

use thiserror::Error;

/// Errors that can abort a diversity run.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Annotation could not be read or indexed.
    #[error(transparent)]
    Annotation(#[from] AnnotationError),

    /// Inputs disagree with each other or with the configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Numeric parameter out of range.
    #[error(transparent)]
    Parameter(#[from] diversity::ParameterError),

    /// Alignment reader failure.
    #[error(transparent)]
    Alignment(#[from] alignment::AlignmentError),

    /// External tool missing or failed.
    #[error(transparent)]
    Collaborator(#[from] rounds::CollaboratorError),

    /// Output table could not be written.
    #[error(transparent)]
    Output(#[from] rounds::OutputError),

    /// The worker pool could not be created.
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// The downsampler produced nothing to scan.
    #[error("no alignment sets available for {0}")]
    NoAlignmentSets(String),
}
