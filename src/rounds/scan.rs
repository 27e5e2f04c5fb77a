use std::sync::Arc;

use tracing::debug;

use super::output::OutputError;
use crate::alignment::{AlleleDepthSource, ConfigError, ReferenceCollection};
use crate::annotation::{AnnotationIndex, Gene};
use crate::diversity::{
    evaluate_position, gene_window, CodingAccumulator, DiversityParams, GeneAggregator,
    GeneDiversity, PositionRecord, RepliconAggregator, RepliconDiversity, CODING_REPLICON,
};
use crate::PipelineError;

/// Receives raw position rows as each replicon is scanned.
pub trait ScanSink {
    /// Every position of one replicon, in coordinate order.
    fn replicon_positions(&mut self, records: &[PositionRecord]) -> Result<(), OutputError>;

    /// The positions of one gene span, in coordinate order.
    fn gene_positions(&mut self, gene: &Gene, records: &[PositionRecord]) -> Result<(), OutputError>;
}

/// Sink that discards raw rows.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardSink;

impl ScanSink for DiscardSink {
    fn replicon_positions(&mut self, _records: &[PositionRecord]) -> Result<(), OutputError> {
        Ok(())
    }

    fn gene_positions(&mut self, _gene: &Gene, _records: &[PositionRecord]) -> Result<(), OutputError> {
        Ok(())
    }
}

/// Diversity results for one alignment set in one round.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SampleScan {
    /// Gene results, replicon by replicon in reference order.
    pub genes: Vec<GeneDiversity>,
    /// Replicon results in reference order, followed by the coding row.
    pub replicons: Vec<RepliconDiversity>,
    /// Mapped reads reported by the alignment reader.
    pub mapped_reads: u64,
}

impl SampleScan {
    /// Genome-wide coding π (the final replicon row).
    pub fn coding_pi(&self) -> Option<f64> {
        self.replicons
            .last()
            .filter(|row| row.replicon.as_ref() == CODING_REPLICON)
            .map(|row| row.mean_pi)
    }
}

/// Compute per-position, per-gene and per-replicon diversity for one alignment set.
///
/// Replicons are visited in reference order and positions in increasing
/// coordinate order. Each position is evaluated once and shared by the gene
/// and replicon aggregations.
pub fn scan_alignment_set<S, K>(
    name: &str,
    source: &mut S,
    reference: &ReferenceCollection,
    annotation: &AnnotationIndex,
    params: &DiversityParams,
    sink: &mut K,
) -> Result<SampleScan, PipelineError>
where
    S: AlleleDepthSource + ?Sized,
    K: ScanSink + ?Sized,
{
    reference.check_alignment(name, &source.references())?;
    let mapped_reads = source.mapped_reads()?;

    let gene_aggregator = GeneAggregator::new(params);
    let replicon_aggregator = RepliconAggregator::new();
    let mut coding = CodingAccumulator::new();
    let mut genes = Vec::with_capacity(annotation.len());
    let mut replicons = Vec::with_capacity(reference.replicons().len() + 1);

    for (replicon, length) in reference.replicons() {
        let arrays = source.coverage_arrays(replicon, 0, *length, params.min_base_quality)?;
        let positions: Vec<PositionRecord> = (0..arrays.len())
            .map(|idx| evaluate_position(replicon, idx as u64 + 1, arrays.at(idx), params))
            .collect();

        sink.replicon_positions(&positions)?;
        replicons.push(replicon_aggregator.aggregate(Arc::clone(replicon), &positions, *length));

        for gene in annotation.genes_on(replicon) {
            let out_of_bounds = || ConfigError::GeneOutOfBounds {
                gene: gene.id.to_string(),
                replicon: replicon.to_string(),
                end: gene.end,
                length: positions.len() as u64,
            };
            let window = gene_window(gene, &positions).ok_or_else(out_of_bounds)?;
            sink.gene_positions(gene, window)?;
            let result = gene_aggregator
                .aggregate(gene, &positions, &mut coding)
                .ok_or_else(out_of_bounds)?;
            genes.push(result);
        }

        debug!(
            alignment = name,
            replicon = %replicon,
            positions = positions.len(),
            "replicon scanned"
        );
    }

    replicons.push(RepliconDiversity {
        replicon: Arc::from(CODING_REPLICON),
        mean_pi: coding.mean_pi(),
    });

    Ok(SampleScan {
        genes,
        replicons,
        mapped_reads,
    })
}
