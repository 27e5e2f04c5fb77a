//! Alignment reader collaborator.
//!
//! The diversity core never decodes alignment files. It asks an
//! [`AlleleDepthSource`] for per-position A/C/G/T depth arrays, one replicon
//! window at a time. [`BamAlleleReader`] serves them from an indexed BAM;
//! [`InMemoryAlignment`] serves precomputed arrays.

mod bam;
mod reference;

use std::collections::HashMap;
use std::path::PathBuf;

use thiserror::Error;

use crate::diversity::{AlleleDepths, NUM_BASES};

pub use bam::{estimate_mean_coverage, BamAlleleReader};
pub use reference::{ConfigError, ReferenceCollection};

/// Errors raised by alignment readers.
#[derive(Debug, Error)]
pub enum AlignmentError {
    /// htslib reported an error.
    #[error("htslib error on {path}: {source}")]
    Htslib {
        /// Alignment file being read.
        path: PathBuf,
        /// Underlying htslib error.
        #[source]
        source: rust_htslib::errors::Error,
    },

    /// The requested replicon is not declared by the alignment.
    #[error("reference {0} is not declared by the alignment")]
    UnknownReference(String),

    /// The requested window is empty or runs past the replicon end.
    #[error("invalid window {start}..{stop} on {name} (length {length})")]
    InvalidWindow {
        /// Replicon name.
        name: String,
        /// 0-based start.
        start: u64,
        /// 0-based exclusive stop.
        stop: u64,
        /// Declared replicon length.
        length: u64,
    },
}

/// Per-position allele depth arrays for a window, indexed from the window start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlleleDepthArrays {
    /// Depth arrays in A, C, G, T order.
    pub counts: [Vec<u32>; NUM_BASES],
}

impl AlleleDepthArrays {
    /// Zero-filled arrays for `len` positions.
    pub fn zeros(len: usize) -> Self {
        Self {
            counts: std::array::from_fn(|_| vec![0; len]),
        }
    }

    /// Build arrays from one depth tuple per position.
    pub fn from_positions(positions: &[AlleleDepths]) -> Self {
        let mut arrays = Self::zeros(positions.len());
        for (idx, depths) in positions.iter().enumerate() {
            arrays.set(idx, *depths);
        }
        arrays
    }

    /// Number of positions covered.
    pub fn len(&self) -> usize {
        self.counts[0].len()
    }

    /// True when the window is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Depths at one window offset.
    pub fn at(&self, idx: usize) -> AlleleDepths {
        std::array::from_fn(|base| self.counts[base][idx])
    }

    fn set(&mut self, idx: usize, depths: AlleleDepths) {
        for (base, depth) in depths.into_iter().enumerate() {
            self.counts[base][idx] = depth;
        }
    }

    pub(crate) fn increment(&mut self, idx: usize, base: usize) {
        self.counts[base][idx] += 1;
    }
}

/// Source of decoded allele depths for one alignment set.
pub trait AlleleDepthSource: Send {
    /// Declared reference sequences as `(name, length)`.
    fn references(&self) -> Vec<(String, u64)>;

    /// Allele depths over the 0-based half-open window `start..stop`.
    ///
    /// Only bases with quality at least `min_base_quality` are counted.
    fn coverage_arrays(
        &mut self,
        name: &str,
        start: u64,
        stop: u64,
        min_base_quality: u8,
    ) -> Result<AlleleDepthArrays, AlignmentError>;

    /// Number of mapped reads in the alignment set.
    fn mapped_reads(&mut self) -> Result<u64, AlignmentError>;
}

/// Precomputed depth arrays keyed by replicon.
///
/// Base quality is already accounted for, so `min_base_quality` is ignored.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAlignment {
    references: Vec<(String, u64)>,
    arrays: HashMap<String, AlleleDepthArrays>,
    mapped_reads: u64,
}

impl InMemoryAlignment {
    /// Empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a replicon with one depth tuple per position.
    pub fn with_replicon(mut self, name: impl Into<String>, positions: &[AlleleDepths]) -> Self {
        let name = name.into();
        self.references.push((name.clone(), positions.len() as u64));
        self.arrays
            .insert(name, AlleleDepthArrays::from_positions(positions));
        self
    }

    /// Set the mapped-read count.
    pub fn with_mapped_reads(mut self, mapped_reads: u64) -> Self {
        self.mapped_reads = mapped_reads;
        self
    }
}

impl AlleleDepthSource for InMemoryAlignment {
    fn references(&self) -> Vec<(String, u64)> {
        self.references.clone()
    }

    fn coverage_arrays(
        &mut self,
        name: &str,
        start: u64,
        stop: u64,
        _min_base_quality: u8,
    ) -> Result<AlleleDepthArrays, AlignmentError> {
        let arrays = self
            .arrays
            .get(name)
            .ok_or_else(|| AlignmentError::UnknownReference(name.to_string()))?;
        let length = arrays.len() as u64;
        if start > stop || stop > length {
            return Err(AlignmentError::InvalidWindow {
                name: name.to_string(),
                start,
                stop,
                length,
            });
        }

        let (lo, hi) = (start as usize, stop as usize);
        Ok(AlleleDepthArrays {
            counts: std::array::from_fn(|base| arrays.counts[base][lo..hi].to_vec()),
        })
    }

    fn mapped_reads(&mut self) -> Result<u64, AlignmentError> {
        Ok(self.mapped_reads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_windows_are_zero_based() {
        let mut source = InMemoryAlignment::new()
            .with_replicon("chr", &[[1, 0, 0, 0], [0, 2, 0, 0], [0, 0, 3, 0], [0, 0, 0, 4]])
            .with_mapped_reads(10);

        assert_eq!(source.references(), vec![("chr".to_string(), 4)]);
        let window = source.coverage_arrays("chr", 1, 3, 0).unwrap();
        assert_eq!(window.len(), 2);
        assert_eq!(window.at(0), [0, 2, 0, 0]);
        assert_eq!(window.at(1), [0, 0, 3, 0]);
        assert_eq!(source.mapped_reads().unwrap(), 10);
    }

    #[test]
    fn in_memory_rejects_unknown_and_oversized_windows() {
        let mut source = InMemoryAlignment::new().with_replicon("chr", &[[1, 0, 0, 0]]);
        assert!(matches!(
            source.coverage_arrays("plasmid", 0, 1, 0),
            Err(AlignmentError::UnknownReference(_))
        ));
        assert!(matches!(
            source.coverage_arrays("chr", 0, 2, 0),
            Err(AlignmentError::InvalidWindow { .. })
        ));
    }
}
