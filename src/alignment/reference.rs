use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rust_htslib::faidx;
use thiserror::Error;

use crate::annotation::AnnotationIndex;

/// Fatal configuration and input mismatches.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Alignment set and reference collection declare different replicons.
    #[error(
        "reference mismatch for {alignment}: missing from alignment [{}], missing from reference [{}]",
        .missing_in_alignment.join(", "),
        .missing_in_reference.join(", ")
    )]
    ReferenceMismatch {
        /// Alignment set whose header disagreed.
        alignment: String,
        /// Reference replicons the alignment does not declare.
        missing_in_alignment: Vec<String>,
        /// Alignment replicons absent from the reference.
        missing_in_reference: Vec<String>,
    },

    /// The same replicon name appears twice in the reference collection.
    #[error("duplicate reference sequence {0}")]
    DuplicateReference(String),

    /// An annotated gene sits on a replicon missing from the reference.
    #[error("gene {gene} is annotated on unknown replicon {replicon}")]
    UnknownReplicon {
        /// Gene identifier.
        gene: String,
        /// Replicon named by the annotation.
        replicon: String,
    },

    /// An annotated gene runs past the end of its replicon.
    #[error("gene {gene} ends at {end} beyond {replicon} length {length}")]
    GeneOutOfBounds {
        /// Gene identifier.
        gene: String,
        /// Replicon carrying the gene.
        replicon: String,
        /// 1-based inclusive gene end.
        end: u64,
        /// Replicon length.
        length: u64,
    },

    /// The reference FASTA could not be opened or indexed.
    #[error("failed to load reference {path}: {message}")]
    ReferenceUnreadable {
        /// FASTA path.
        path: PathBuf,
        /// htslib diagnostic.
        message: String,
    },

    /// A numeric or structural parameter was rejected.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Replicon names and lengths of the reference genome, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceCollection {
    replicons: Vec<(Arc<str>, u64)>,
}

impl ReferenceCollection {
    /// Build from `(name, length)` pairs, rejecting duplicate names.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<Arc<str>>,
    {
        let mut seen = HashSet::new();
        let mut replicons = Vec::new();
        for (name, length) in pairs {
            let name: Arc<str> = name.into();
            if !seen.insert(Arc::clone(&name)) {
                return Err(ConfigError::DuplicateReference(name.to_string()));
            }
            replicons.push((name, length));
        }
        Ok(Self { replicons })
    }

    /// Load replicon names and lengths from a FASTA file via its `.fai` index.
    ///
    /// htslib builds the index next to the FASTA if it is missing.
    pub fn from_fasta(path: &Path) -> Result<Self, ConfigError> {
        let unreadable = |message: String| ConfigError::ReferenceUnreadable {
            path: path.to_path_buf(),
            message,
        };
        let reader = faidx::Reader::from_path(path).map_err(|err| unreadable(err.to_string()))?;

        let mut pairs = Vec::new();
        for idx in 0..reader.n_seqs() {
            let name = reader
                .seq_name(idx as i32)
                .map_err(|err| unreadable(err.to_string()))?;
            let length = reader.fetch_seq_len(&name);
            pairs.push((name, length));
        }
        Self::from_pairs(pairs)
    }

    /// Replicons in reference order.
    pub fn replicons(&self) -> &[(Arc<str>, u64)] {
        &self.replicons
    }

    /// Replicon names in reference order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.replicons.iter().map(|(name, _)| name.as_ref())
    }

    /// Length of one replicon.
    pub fn length(&self, name: &str) -> Option<u64> {
        self.replicons
            .iter()
            .find(|(candidate, _)| candidate.as_ref() == name)
            .map(|(_, len)| *len)
    }

    /// Require the alignment's declared replicon names to equal ours exactly.
    ///
    /// Order is ignored; every name missing on either side is reported.
    pub fn check_alignment(
        &self,
        alignment: &str,
        declared: &[(String, u64)],
    ) -> Result<(), ConfigError> {
        let ours: HashSet<&str> = self.names().collect();
        let theirs: HashSet<&str> = declared.iter().map(|(name, _)| name.as_str()).collect();

        let mut missing_in_alignment: Vec<String> =
            ours.difference(&theirs).map(|s| s.to_string()).collect();
        let mut missing_in_reference: Vec<String> =
            theirs.difference(&ours).map(|s| s.to_string()).collect();

        if missing_in_alignment.is_empty() && missing_in_reference.is_empty() {
            return Ok(());
        }
        missing_in_alignment.sort();
        missing_in_reference.sort();
        Err(ConfigError::ReferenceMismatch {
            alignment: alignment.to_string(),
            missing_in_alignment,
            missing_in_reference,
        })
    }

    /// Require every annotated gene to lie on a known replicon and within it.
    pub fn check_annotation(&self, annotation: &AnnotationIndex) -> Result<(), ConfigError> {
        for gene in annotation.genes() {
            let length = self
                .length(&gene.replicon)
                .ok_or_else(|| ConfigError::UnknownReplicon {
                    gene: gene.id.to_string(),
                    replicon: gene.replicon.to_string(),
                })?;
            if gene.end > length {
                return Err(ConfigError::GeneOutOfBounds {
                    gene: gene.id.to_string(),
                    replicon: gene.replicon.to_string(),
                    end: gene.end,
                    length,
                });
            }
        }
        Ok(())
    }
}
