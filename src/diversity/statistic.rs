use super::types::{AlleleDepths, FilteredDepths, PairwiseStats, NUM_BASES};

/// Pairwise nucleotide-difference statistic for one filtered position.
pub fn pairwise_stats(filtered: &FilteredDepths) -> PairwiseStats {
    let depths = filtered.depths;
    let mut differences = 0u64;
    for i in 0..NUM_BASES {
        for j in (i + 1)..NUM_BASES {
            differences += depths[i] as u64 * depths[j] as u64;
        }
    }

    let total = filtered.total as u64;
    let comparisons = (total * total - total) / 2;
    let pi = if comparisons > 0 {
        differences as f64 / comparisons as f64
    } else {
        0.0
    };

    PairwiseStats {
        differences,
        comparisons,
        pi,
    }
}

/// π for already-filtered depths and their total.
pub fn pi_at_position(depths: AlleleDepths, total: u32) -> f64 {
    pairwise_stats(&FilteredDepths { depths, total }).pi
}
