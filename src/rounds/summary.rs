use std::collections::HashMap;
use std::sync::Arc;

use super::scan::SampleScan;
use crate::diversity::{GeneDiversity, RepliconDiversity};

/// Results for one sample averaged over every completed round.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SampleSummary {
    /// Sample name.
    pub sample: String,
    /// Coverage label of the alignment sets.
    pub label: String,
    /// Number of rounds folded in.
    pub rounds: u32,
    /// Mean gene π across rounds; flagged if flagged in any round.
    pub genes: Vec<GeneDiversity>,
    /// Mean replicon π across rounds, coding row last.
    pub replicons: Vec<RepliconDiversity>,
}

#[derive(Debug, Clone)]
struct Running<T> {
    row: T,
    pi_sum: f64,
}

/// Accumulates one sample's per-round scans.
///
/// Rows are matched by (replicon, gene) or replicon name; the order of the
/// first round is kept.
#[derive(Debug, Clone)]
pub struct SampleAggregate {
    sample: String,
    label: String,
    rounds: u32,
    genes: Vec<Running<GeneDiversity>>,
    gene_index: HashMap<(Arc<str>, Arc<str>), usize>,
    replicons: Vec<Running<RepliconDiversity>>,
    replicon_index: HashMap<Arc<str>, usize>,
}

impl SampleAggregate {
    /// Empty aggregate for a sample.
    pub fn new(sample: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            sample: sample.into(),
            label: label.into(),
            rounds: 0,
            genes: Vec::new(),
            gene_index: HashMap::new(),
            replicons: Vec::new(),
            replicon_index: HashMap::new(),
        }
    }

    /// Fold in one round's results.
    pub fn add(&mut self, scan: &SampleScan) {
        self.rounds += 1;

        for gene in &scan.genes {
            let key = (Arc::clone(&gene.replicon), Arc::clone(&gene.gene));
            match self.gene_index.get(&key) {
                Some(&idx) => {
                    let running = &mut self.genes[idx];
                    running.pi_sum += gene.mean_pi;
                    running.row.low_coverage |= gene.low_coverage;
                    running.row.low_coverage_bases =
                        running.row.low_coverage_bases.max(gene.low_coverage_bases);
                }
                None => {
                    self.gene_index.insert(key, self.genes.len());
                    self.genes.push(Running {
                        row: gene.clone(),
                        pi_sum: gene.mean_pi,
                    });
                }
            }
        }

        for replicon in &scan.replicons {
            match self.replicon_index.get(&replicon.replicon) {
                Some(&idx) => self.replicons[idx].pi_sum += replicon.mean_pi,
                None => {
                    self.replicon_index
                        .insert(Arc::clone(&replicon.replicon), self.replicons.len());
                    self.replicons.push(Running {
                        row: replicon.clone(),
                        pi_sum: replicon.mean_pi,
                    });
                }
            }
        }
    }

    /// Rounds folded in so far.
    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    /// Averages over the rounds seen.
    pub fn finish(&self) -> SampleSummary {
        let rounds = self.rounds.max(1) as f64;
        SampleSummary {
            sample: self.sample.clone(),
            label: self.label.clone(),
            rounds: self.rounds,
            genes: self
                .genes
                .iter()
                .map(|r| GeneDiversity {
                    mean_pi: r.pi_sum / rounds,
                    ..r.row.clone()
                })
                .collect(),
            replicons: self
                .replicons
                .iter()
                .map(|r| RepliconDiversity {
                    replicon: Arc::clone(&r.row.replicon),
                    mean_pi: r.pi_sum / rounds,
                })
                .collect(),
        }
    }
}
