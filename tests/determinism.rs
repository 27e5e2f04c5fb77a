mod common;

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use blake3::hash;
use common::{inputs, reference, two_gene_annotation, FixtureOpener, PassThroughDownsampler};
use nucdiv::rounds::{CoverageTarget, RoundConfig, RoundController, TablePaths};
use nucdiv::DiversityParams;

const SAMPLES: [&str; 4] = ["S1", "S2", "S3", "S4"];

fn opener() -> FixtureOpener {
    let depths = [[3, 3, 2, 2], [9, 1, 0, 0], [4, 4, 4, 0], [20, 0, 0, 1]];
    let mut opener = FixtureOpener::new();
    for (idx, sample) in SAMPLES.iter().enumerate() {
        for round in 1..=3u32 {
            let shifted = depths[(idx + round as usize) % depths.len()];
            opener = opener.uniform(sample, round, shifted);
        }
    }
    opener
}

/// blake3 over every aggregate table, in sample order.
fn run_and_fingerprint(out: &Path, threads: usize) -> blake3::Hash {
    let config = RoundConfig::new(out)
        .with_rounds(3)
        .with_threads(threads)
        .with_target(CoverageTarget::Depth(15.0));
    let mut controller = RoundController::new(
        config,
        DiversityParams::default().with_min_coverage(1),
        reference(),
        two_gene_annotation(),
        PassThroughDownsampler::default(),
        opener(),
        inputs(&SAMPLES),
    )
    .expect("controller builds");
    controller.run().expect("rounds complete");

    let mut tables = String::new();
    for sample in SAMPLES {
        let paths = TablePaths::for_aggregate(out, sample, "cov15");
        tables.push_str(&fs::read_to_string(paths.gene_summary()).expect("gene summary"));
        tables.push_str(&fs::read_to_string(paths.replicon_summary()).expect("replicon summary"));
    }
    hash(tables.as_bytes())
}

#[test]
fn aggregate_tables_are_identical_across_runs_and_thread_counts() {
    let mut fingerprints = HashSet::new();
    for threads in [1, 1, 2, 4] {
        let out = tempfile::tempdir().expect("tempdir");
        fingerprints.insert(run_and_fingerprint(out.path(), threads));
    }

    assert_eq!(fingerprints.len(), 1, "outputs diverged across runs");
}
