#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use nucdiv::alignment::{AlignmentError, InMemoryAlignment};
use nucdiv::annotation::{AnnotationIndex, DuplicatePolicy, GeneFeature};
use nucdiv::diversity::AlleleDepths;
use nucdiv::rounds::{
    AlignmentOpener, AlignmentSet, CollaboratorError, CoverageTarget, Downsampler, RoundTag,
};
use nucdiv::ReferenceCollection;

fn snapshot_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("snapshots")
}

pub fn assert_snapshot(name: &str, actual: &str) {
    let path = snapshot_root().join(name);
    if std::env::var("NUCDIV_UPDATE_SNAPSHOTS").is_ok() {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create snapshot directory");
        }
        fs::write(&path, actual).expect("write snapshot");
        return;
    }

    let expected =
        fs::read_to_string(&path).unwrap_or_else(|_| panic!("snapshot {:?} not found", path));
    if normalize(&expected) != normalize(actual) {
        panic!(
            "Snapshot mismatch for {:?}. Set NUCDIV_UPDATE_SNAPSHOTS=1 to regenerate.\nExpected:\n{}\nActual:\n{}",
            path, expected, actual
        );
    }
}

fn normalize(input: &str) -> String {
    input.replace("\r\n", "\n")
}

/// One 10 bp replicon, `chr`.
pub fn reference() -> ReferenceCollection {
    ReferenceCollection::from_pairs(vec![("chr", 10u64)]).unwrap()
}

/// `geneA` on 1..=5 and `geneB` on 6..=10.
pub fn two_gene_annotation() -> AnnotationIndex {
    let feature = |name: &str, start, end| GeneFeature {
        replicon: "chr".to_string(),
        gene_name: Some(name.to_string()),
        locus_tag: None,
        start,
        end,
    };
    AnnotationIndex::from_features(
        vec![feature("geneA", 1, 5), feature("geneB", 6, 10)],
        DuplicatePolicy::default(),
    )
    .unwrap()
}

/// Hands each input back unchanged as that round's alignment set.
#[derive(Debug, Default)]
pub struct PassThroughDownsampler {
    calls: Arc<AtomicUsize>,
}

impl PassThroughDownsampler {
    /// Shared count of `downsample` calls, readable after the controller takes ownership.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl Downsampler for PassThroughDownsampler {
    fn downsample(
        &self,
        inputs: &[PathBuf],
        round: RoundTag,
        target: CoverageTarget,
        _out_dir: &Path,
    ) -> Result<Vec<AlignmentSet>, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(inputs
            .iter()
            .map(|path| {
                AlignmentSet::new(
                    nucdiv::rounds::sample_name(path),
                    target.label(),
                    round,
                    path.clone(),
                )
            })
            .collect())
    }
}

/// In-memory depths keyed by (sample, round number).
#[derive(Debug, Default)]
pub struct FixtureOpener {
    sources: HashMap<(String, u32), InMemoryAlignment>,
}

impl FixtureOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uniform depths over `chr` for `sample` in `round`.
    pub fn uniform(mut self, sample: &str, round: u32, depths: AlleleDepths) -> Self {
        let source = InMemoryAlignment::new()
            .with_replicon("chr", &[depths; 10])
            .with_mapped_reads(1_000 + round as u64);
        self.sources.insert((sample.to_string(), round), source);
        self
    }

    /// Arbitrary source for `sample` in `round`.
    pub fn source(mut self, sample: &str, round: u32, source: InMemoryAlignment) -> Self {
        self.sources.insert((sample.to_string(), round), source);
        self
    }
}

impl AlignmentOpener for FixtureOpener {
    type Source = InMemoryAlignment;

    fn open(&self, set: &AlignmentSet) -> Result<Self::Source, AlignmentError> {
        self.sources
            .get(&(set.sample.clone(), set.round.number()))
            .cloned()
            .ok_or_else(|| AlignmentError::UnknownReference(set.name()))
    }
}

/// Fake input paths; only their stems are used.
pub fn inputs(samples: &[&str]) -> Vec<PathBuf> {
    samples
        .iter()
        .map(|sample| PathBuf::from(format!("/inputs/{sample}.bam")))
        .collect()
}
