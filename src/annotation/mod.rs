//! Gene coordinate index built from genome annotation features.
//!
//! Each feature is identified by its gene name, or by its locus tag when it
//! has no gene name. The two are never combined. Coordinates are 1-based and
//! inclusive, exactly as the annotation states them.

pub mod genbank;
pub mod table;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised while reading or indexing annotation.
#[derive(Debug, Error)]
pub enum AnnotationError {
    /// The annotation source could not be read.
    #[error("failed to read annotation {path}: {source}")]
    Read {
        /// Path of the unreadable source.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The annotation source was readable but malformed.
    #[error("malformed annotation: {0}")]
    Parse(String),

    /// A feature had neither a gene name nor a locus tag.
    #[error("feature on {replicon} at {start}..{end} has neither a gene name nor a locus tag")]
    MissingIdentifier {
        /// Replicon carrying the feature.
        replicon: String,
        /// 1-based start.
        start: u64,
        /// 1-based inclusive end.
        end: u64,
    },

    /// A feature span ended before it started.
    #[error("gene {id} has an invalid span {start}..{end}")]
    InvalidSpan {
        /// Gene identifier.
        id: String,
        /// 1-based start.
        start: u64,
        /// 1-based inclusive end.
        end: u64,
    },

    /// Two features resolved to the same identifier under [`DuplicatePolicy::Reject`].
    #[error("duplicate gene identifier {0}")]
    DuplicateIdentifier(String),
}

/// A gene span on one replicon, 1-based and inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gene {
    /// Gene name or locus tag.
    pub id: Arc<str>,
    /// Replicon carrying the gene.
    pub replicon: Arc<str>,
    /// First base (1-based).
    pub start: u64,
    /// Last base (1-based, inclusive).
    pub end: u64,
}

impl Gene {
    /// Construct a gene, rejecting spans with `end < start` or `start == 0`.
    pub fn new(
        id: impl Into<Arc<str>>,
        replicon: impl Into<Arc<str>>,
        start: u64,
        end: u64,
    ) -> Result<Self, AnnotationError> {
        let id = id.into();
        if start == 0 || end < start {
            return Err(AnnotationError::InvalidSpan {
                id: id.to_string(),
                start,
                end,
            });
        }
        Ok(Self {
            id,
            replicon: replicon.into(),
            start,
            end,
        })
    }

    /// Number of bases in the span.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Always false; spans hold at least one base.
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Raw gene feature as delivered by an annotation reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneFeature {
    /// Replicon carrying the feature.
    pub replicon: String,
    /// `gene` attribute, if present.
    pub gene_name: Option<String>,
    /// `locus_tag` attribute, if present.
    pub locus_tag: Option<String>,
    /// 1-based start.
    pub start: u64,
    /// 1-based inclusive end.
    pub end: u64,
}

impl GeneFeature {
    /// Gene name if present, otherwise the locus tag.
    pub fn identifier(&self) -> Option<&str> {
        match &self.gene_name {
            Some(name) => Some(name.as_str()),
            None => self.locus_tag.as_deref(),
        }
    }
}

/// What to do when two features resolve to the same identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// The later feature replaces the earlier one; a warning is logged.
    #[default]
    LastWins,
    /// Fail with [`AnnotationError::DuplicateIdentifier`].
    Reject,
}

/// Gene identifier to span mapping.
#[derive(Debug, Clone, Default)]
pub struct AnnotationIndex {
    genes: BTreeMap<Arc<str>, Gene>,
}

impl AnnotationIndex {
    /// Index a list of features.
    pub fn from_features<I>(features: I, policy: DuplicatePolicy) -> Result<Self, AnnotationError>
    where
        I: IntoIterator<Item = GeneFeature>,
    {
        let mut genes: BTreeMap<Arc<str>, Gene> = BTreeMap::new();
        for feature in features {
            let id = feature
                .identifier()
                .ok_or_else(|| AnnotationError::MissingIdentifier {
                    replicon: feature.replicon.clone(),
                    start: feature.start,
                    end: feature.end,
                })?;
            let gene = Gene::new(id, feature.replicon.as_str(), feature.start, feature.end)?;

            if let Some(previous) = genes.get(&gene.id) {
                match policy {
                    DuplicatePolicy::Reject => {
                        return Err(AnnotationError::DuplicateIdentifier(gene.id.to_string()))
                    }
                    DuplicatePolicy::LastWins => {
                        warn!(
                            gene = %gene.id,
                            replaced_start = previous.start,
                            replaced_end = previous.end,
                            "duplicate gene identifier, keeping the later feature"
                        );
                    }
                }
            }
            genes.insert(Arc::clone(&gene.id), gene);
        }

        debug!(genes = genes.len(), "annotation indexed");
        Ok(Self { genes })
    }

    /// Number of indexed genes.
    pub fn len(&self) -> usize {
        self.genes.len()
    }

    /// True when no genes were indexed.
    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    /// Look up a gene.
    pub fn get(&self, id: &str) -> Option<&Gene> {
        self.genes.get(id)
    }

    /// `(start, end)` for a gene identifier.
    pub fn span(&self, id: &str) -> Option<(u64, u64)> {
        self.get(id).map(|gene| (gene.start, gene.end))
    }

    /// All genes ordered by identifier.
    pub fn genes(&self) -> impl Iterator<Item = &Gene> {
        self.genes.values()
    }

    /// Genes on one replicon, ordered by start then identifier.
    pub fn genes_on(&self, replicon: &str) -> Vec<&Gene> {
        let mut genes: Vec<&Gene> = self
            .genes
            .values()
            .filter(|gene| gene.replicon.as_ref() == replicon)
            .collect();
        genes.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));
        genes
    }

    /// Distinct replicon names referenced by the annotation, sorted.
    pub fn replicons(&self) -> Vec<Arc<str>> {
        let mut names: Vec<Arc<str>> = self.genes.values().map(|g| Arc::clone(&g.replicon)).collect();
        names.sort();
        names.dedup();
        names
    }
}
