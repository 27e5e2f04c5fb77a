use super::types::{AlleleDepths, FilteredDepths, NUM_BASES};

/// Remove noise alleles from a position.
///
/// Frequencies are taken against the unfiltered total, and only for alleles
/// with depth strictly above `min_coverage`; the rest get frequency zero.
/// Alleles are then visited in A, C, G, T order and any allele below
/// `min_frequency` is zeroed while the running total is still positive.
pub fn filter_depths(depths: AlleleDepths, min_coverage: u32, min_frequency: f64) -> FilteredDepths {
    let total: u32 = depths.iter().sum();

    let mut frequencies = [0.0f64; NUM_BASES];
    for (freq, &depth) in frequencies.iter_mut().zip(depths.iter()) {
        if depth > min_coverage {
            *freq = depth as f64 / total as f64;
        }
    }

    let mut adjusted = depths;
    let mut running = total;
    for idx in 0..NUM_BASES {
        if frequencies[idx] < min_frequency && running > 0 {
            running -= adjusted[idx];
            adjusted[idx] = 0;
        }
    }

    FilteredDepths {
        depths: adjusted,
        total: running,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_alleles_above_thresholds() {
        let filtered = filter_depths([3, 3, 2, 2], 1, 0.1);
        assert_eq!(filtered.depths, [3, 3, 2, 2]);
        assert_eq!(filtered.total, 10);
    }

    #[test]
    fn drops_alleles_at_min_coverage() {
        // C sits exactly on the coverage floor and is removed.
        let filtered = filter_depths([10, 2, 0, 0], 2, 0.01);
        assert_eq!(filtered.depths, [10, 0, 0, 0]);
        assert_eq!(filtered.total, 10);
    }

    #[test]
    fn drops_rare_alleles_by_frequency() {
        let filtered = filter_depths([95, 5, 0, 0], 1, 0.1);
        assert_eq!(filtered.depths, [95, 0, 0, 0]);
        assert_eq!(filtered.total, 95);
    }

    #[test]
    fn empty_position_stays_empty() {
        let filtered = filter_depths([0, 0, 0, 0], 2, 0.05);
        assert_eq!(filtered, FilteredDepths::default());
    }

    #[test]
    fn frequency_above_one_clears_everything() {
        let filtered = filter_depths([4, 4, 4, 4], 0, 1.1);
        assert_eq!(filtered.depths, [0, 0, 0, 0]);
        assert_eq!(filtered.total, 0);
    }

    #[test]
    fn zero_frequency_keeps_low_coverage_alleles() {
        let filtered = filter_depths([1, 1, 0, 0], 5, 0.0);
        assert_eq!(filtered.depths, [1, 1, 0, 0]);
        assert_eq!(filtered.total, 2);
    }

    #[test]
    fn filtering_is_idempotent() {
        let once = filter_depths([40, 3, 7, 1], 2, 0.1);
        let twice = filter_depths(once.depths, 2, 0.1);
        assert_eq!(once, twice);
    }
}
