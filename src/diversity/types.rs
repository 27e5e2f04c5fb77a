use std::sync::Arc;

/// Number of tracked alleles (A, C, G, T).
pub const NUM_BASES: usize = 4;

/// Per-allele read depths in A, C, G, T order.
pub type AlleleDepths = [u32; NUM_BASES];

/// Allele depths after coverage/frequency filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FilteredDepths {
    /// Remaining depth per allele.
    pub depths: AlleleDepths,
    /// Remaining total depth (sum of `depths`).
    pub total: u32,
}

/// Pairwise-difference statistic for one position.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PairwiseStats {
    /// Number of read pairs carrying different alleles.
    pub differences: u64,
    /// Number of unordered read pairs, `(t² − t) / 2`.
    pub comparisons: u64,
    /// `differences / comparisons`, or 0.0 without comparisons.
    pub pi: f64,
}

/// Fully evaluated reference position.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionRecord {
    /// Replicon the position belongs to.
    pub replicon: Arc<str>,
    /// 1-based coordinate.
    pub position: u64,
    /// Filtered allele depths and total.
    pub filtered: FilteredDepths,
    /// Pairwise statistic computed from `filtered`.
    pub pairwise: PairwiseStats,
}

impl PositionRecord {
    /// Filtered total depth.
    pub fn depth(&self) -> u32 {
        self.filtered.total
    }

    /// π at this position.
    pub fn pi(&self) -> f64 {
        self.pairwise.pi
    }
}
