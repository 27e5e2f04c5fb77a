use std::sync::Arc;

use super::params::DiversityParams;
use super::types::PositionRecord;
use crate::annotation::Gene;

/// Diversity summary for one gene in one alignment set.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct GeneDiversity {
    /// Gene identifier.
    pub gene: Arc<str>,
    /// Replicon carrying the gene.
    pub replicon: Arc<str>,
    /// Mean π over the gene span.
    pub mean_pi: f64,
    /// Number of bases in the span.
    pub length: u64,
    /// Number of bases below the low-coverage limit.
    pub low_coverage_bases: u64,
    /// Whether the low-coverage fraction exceeds the configured proportion.
    pub low_coverage: bool,
}

/// Genome-wide π restricted to annotated bases.
///
/// Shared across every gene of one alignment set in one round. Bases covered
/// by overlapping genes contribute once per gene.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CodingAccumulator {
    pi_sum: f64,
    bases: u64,
}

impl CodingAccumulator {
    /// Empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&mut self, pi: f64) {
        self.pi_sum += pi;
        self.bases += 1;
    }

    /// Number of annotated bases seen so far.
    pub fn bases(&self) -> u64 {
        self.bases
    }

    /// Mean π over the annotated bases, or 0.0 if none were seen.
    pub fn mean_pi(&self) -> f64 {
        if self.bases == 0 {
            0.0
        } else {
            self.pi_sum / self.bases as f64
        }
    }
}

/// Slice of replicon positions covered by a gene.
///
/// `positions[0]` is replicon coordinate 1, so the 1-based inclusive span
/// `start..=end` maps to indices `start - 1..end`. Returns `None` if the span
/// does not fit inside `positions`.
pub fn gene_window<'a>(gene: &Gene, positions: &'a [PositionRecord]) -> Option<&'a [PositionRecord]> {
    let lo = usize::try_from(gene.start.checked_sub(1)?).ok()?;
    let hi = usize::try_from(gene.end).ok()?;
    positions.get(lo..hi)
}

/// Averages per-position π over gene spans and flags poorly covered genes.
#[derive(Debug, Clone, Copy)]
pub struct GeneAggregator {
    low_coverage_limit: u32,
    low_coverage_proportion: f64,
}

impl GeneAggregator {
    /// Build an aggregator from the run parameters.
    pub fn new(params: &DiversityParams) -> Self {
        Self {
            low_coverage_limit: params.low_coverage_limit,
            low_coverage_proportion: params.low_coverage_proportion,
        }
    }

    /// Aggregate one gene over its replicon's positions.
    ///
    /// Returns `None` if the gene span runs past the end of `positions`.
    pub fn aggregate(
        &self,
        gene: &Gene,
        positions: &[PositionRecord],
        coding: &mut CodingAccumulator,
    ) -> Option<GeneDiversity> {
        let window = gene_window(gene, positions)?;
        let length = window.len() as u64;

        let mut pi_sum = 0.0;
        let mut low_coverage_bases = 0u64;
        for record in window {
            if record.depth() < self.low_coverage_limit {
                low_coverage_bases += 1;
            }
            pi_sum += record.pi();
            coding.add(record.pi());
        }

        let (mean_pi, low_coverage) = if length == 0 {
            (0.0, false)
        } else {
            let fraction = low_coverage_bases as f64 / length as f64;
            (
                pi_sum / length as f64,
                fraction > self.low_coverage_proportion,
            )
        };

        Some(GeneDiversity {
            gene: Arc::clone(&gene.id),
            replicon: Arc::clone(&gene.replicon),
            mean_pi,
            length,
            low_coverage_bases,
            low_coverage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diversity::types::{FilteredDepths, PairwiseStats};
    use test_case::test_case;

    fn record(position: u64, total: u32, pi: f64) -> PositionRecord {
        PositionRecord {
            replicon: Arc::from("chr"),
            position,
            filtered: FilteredDepths {
                depths: [total, 0, 0, 0],
                total,
            },
            pairwise: PairwiseStats {
                differences: 0,
                comparisons: 0,
                pi,
            },
        }
    }

    fn gene(start: u64, end: u64) -> Gene {
        Gene::new("g", "chr", start, end).expect("valid span")
    }

    fn params(limit: u32, proportion: f64) -> DiversityParams {
        DiversityParams::default()
            .with_low_coverage_limit(limit)
            .with_low_coverage_proportion(proportion)
    }

    #[test_case(0.5, true ; "above threshold")]
    #[test_case(0.6, false ; "equal to threshold")]
    fn low_coverage_flag_is_strict(proportion: f64, expected: bool) {
        // Six of ten bases sit below the limit of 5.
        let positions: Vec<_> = (1..=10)
            .map(|pos| record(pos, if pos <= 6 { 1 } else { 20 }, 0.0))
            .collect();
        let aggregator = GeneAggregator::new(&params(5, proportion));
        let mut coding = CodingAccumulator::new();

        let result = aggregator
            .aggregate(&gene(1, 10), &positions, &mut coding)
            .expect("gene fits");
        assert_eq!(result.low_coverage_bases, 6);
        assert_eq!(result.low_coverage, expected);
    }

    #[test]
    fn window_uses_one_based_inclusive_span() {
        // Index i holds coordinate i + 1 with pi equal to the coordinate.
        let positions: Vec<_> = (1..=10).map(|pos| record(pos, 20, pos as f64)).collect();

        let window = gene_window(&gene(3, 5), &positions).expect("fits");
        let coords: Vec<u64> = window.iter().map(|r| r.position).collect();
        assert_eq!(coords, vec![3, 4, 5]);

        let single = gene_window(&gene(1, 1), &positions).expect("fits");
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].position, 1);

        let last = gene_window(&gene(10, 10), &positions).expect("fits");
        assert_eq!(last[0].position, 10);

        assert!(gene_window(&gene(9, 11), &positions).is_none());
    }

    #[test]
    fn mean_pi_divides_by_span_length() {
        let positions: Vec<_> = (1..=10).map(|pos| record(pos, 20, pos as f64)).collect();
        let aggregator = GeneAggregator::new(&params(5, 0.5));
        let mut coding = CodingAccumulator::new();

        let result = aggregator
            .aggregate(&gene(3, 5), &positions, &mut coding)
            .expect("gene fits");
        assert_eq!(result.length, 3);
        assert!((result.mean_pi - 4.0).abs() < 1e-12);
        assert!(!result.low_coverage);
    }

    #[test]
    fn coding_accumulates_across_genes() {
        let positions: Vec<_> = (1..=10).map(|pos| record(pos, 20, pos as f64)).collect();
        let aggregator = GeneAggregator::new(&params(5, 0.5));
        let mut coding = CodingAccumulator::new();

        aggregator.aggregate(&gene(1, 2), &positions, &mut coding);
        aggregator.aggregate(&gene(9, 10), &positions, &mut coding);

        assert_eq!(coding.bases(), 4);
        assert!((coding.mean_pi() - (1.0 + 2.0 + 9.0 + 10.0) / 4.0).abs() < 1e-12);
    }

    #[test]
    fn empty_coding_is_zero() {
        assert_eq!(CodingAccumulator::new().mean_pi(), 0.0);
    }
}
