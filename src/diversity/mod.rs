//! Diversity-computation core.
//!
//! Raw allele depths are filtered, turned into a per-position pairwise
//! statistic, and averaged over gene spans and whole replicons. Every
//! threshold comes in through [`DiversityParams`]; nothing here reads global
//! state or touches the filesystem.

mod filter;
mod gene;
mod params;
mod replicon;
mod statistic;
mod types;

use std::sync::Arc;

pub use filter::filter_depths;
pub use gene::{gene_window, CodingAccumulator, GeneAggregator, GeneDiversity};
pub use params::{
    DiversityParams, ParameterError, DEFAULT_LOW_COVERAGE_LIMIT, DEFAULT_LOW_COVERAGE_PROPORTION,
    DEFAULT_MIN_BASE_QUALITY, DEFAULT_MIN_COVERAGE, DEFAULT_MIN_FREQUENCY,
};
pub use replicon::{RepliconAggregator, RepliconDiversity, CODING_REPLICON};
pub use statistic::{pairwise_stats, pi_at_position};
pub use types::{
    AlleleDepths, FilteredDepths, PairwiseStats, PositionRecord, NUM_BASES,
};

/// Filter one position's raw depths and compute its statistic.
pub fn evaluate_position(
    replicon: &Arc<str>,
    position: u64,
    raw: AlleleDepths,
    params: &DiversityParams,
) -> PositionRecord {
    let filtered = filter_depths(raw, params.min_coverage, params.min_frequency);
    let pairwise = pairwise_stats(&filtered);
    PositionRecord {
        replicon: Arc::clone(replicon),
        position,
        filtered,
        pairwise,
    }
}
