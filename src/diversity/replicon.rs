use std::sync::Arc;

use super::types::PositionRecord;

/// Name of the synthetic replicon row holding genome-wide coding π.
pub const CODING_REPLICON: &str = "Coding";

/// Mean π over an entire replicon.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RepliconDiversity {
    /// Replicon name, or [`CODING_REPLICON`] for the coding row.
    pub replicon: Arc<str>,
    /// Mean π.
    pub mean_pi: f64,
}

/// Averages per-position π over a whole replicon.
#[derive(Debug, Clone, Copy, Default)]
pub struct RepliconAggregator;

impl RepliconAggregator {
    /// Create a replicon aggregator.
    pub fn new() -> Self {
        Self
    }

    /// Sum π over positions `0..length` and divide by `length`.
    ///
    /// Positions missing from the slice contribute zero; a zero-length
    /// replicon yields 0.0.
    pub fn aggregate(
        &self,
        replicon: impl Into<Arc<str>>,
        positions: &[PositionRecord],
        length: u64,
    ) -> RepliconDiversity {
        let take = usize::try_from(length).unwrap_or(usize::MAX);
        let pi_sum: f64 = positions.iter().take(take).map(PositionRecord::pi).sum();
        let mean_pi = if length == 0 {
            0.0
        } else {
            pi_sum / length as f64
        };

        RepliconDiversity {
            replicon: replicon.into(),
            mean_pi,
        }
    }
}
