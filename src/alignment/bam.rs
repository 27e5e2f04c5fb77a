use std::path::{Path, PathBuf};

use rust_htslib::bam::{self, ext::BamRecordExtensions, Read, Record};
use tracing::debug;

use super::{AlignmentError, AlleleDepthArrays, AlleleDepthSource};

/// 4-bit BAM base codes for A, C, G, T.
fn base_index(encoded: u8) -> Option<usize> {
    match encoded {
        1 => Some(0),
        2 => Some(1),
        4 => Some(2),
        8 => Some(3),
        _ => None,
    }
}

/// Primary, mapped, non-duplicate, QC-passing reads only.
fn passes_filters(record: &Record) -> bool {
    !(record.is_unmapped()
        || record.is_secondary()
        || record.is_supplementary()
        || record.is_quality_check_failed()
        || record.is_duplicate())
}

/// Add one read's bases inside `lo..hi` to `arrays`.
///
/// Reads stored without a sequence (SEQ `*`) carry no bases and are skipped.
fn count_record(
    record: &Record,
    lo: i64,
    hi: i64,
    min_base_quality: u8,
    arrays: &mut AlleleDepthArrays,
) {
    if record.seq_len() == 0 {
        return;
    }
    let seq = record.seq();
    let quals = record.qual();
    for [qpos, rpos] in record.aligned_pairs() {
        if rpos < lo || rpos >= hi {
            continue;
        }
        let qpos = qpos as usize;
        if quals.get(qpos).map_or(true, |&q| q < min_base_quality) {
            continue;
        }
        if let Some(base) = base_index(seq.encoded_base(qpos)) {
            arrays.increment((rpos - lo) as usize, base);
        }
    }
}

fn htslib_error(path: &Path) -> impl FnOnce(rust_htslib::errors::Error) -> AlignmentError + '_ {
    move |source| AlignmentError::Htslib {
        path: path.to_path_buf(),
        source,
    }
}

fn declared_references(header: &bam::HeaderView) -> Vec<(String, u64)> {
    header
        .target_names()
        .iter()
        .enumerate()
        .map(|(tid, name)| {
            (
                String::from_utf8_lossy(name).into_owned(),
                header.target_len(tid as u32).unwrap_or(0),
            )
        })
        .collect()
}

/// Allele depth reader over an indexed BAM file.
pub struct BamAlleleReader {
    path: PathBuf,
    reader: bam::IndexedReader,
    references: Vec<(String, u64)>,
}

impl std::fmt::Debug for BamAlleleReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BamAlleleReader")
            .field("path", &self.path)
            .field("references", &self.references)
            .finish()
    }
}

impl BamAlleleReader {
    /// Open an indexed BAM; the `.bai`/`.csi` index must exist.
    pub fn from_path(path: &Path) -> Result<Self, AlignmentError> {
        let reader = bam::IndexedReader::from_path(path).map_err(htslib_error(path))?;
        let references = declared_references(reader.header());
        debug!(path = %path.display(), references = references.len(), "opened alignment set");
        Ok(Self {
            path: path.to_path_buf(),
            reader,
            references,
        })
    }

    fn reference_length(&self, name: &str) -> Option<u64> {
        self.references
            .iter()
            .find(|(candidate, _)| candidate == name)
            .map(|(_, len)| *len)
    }
}

impl AlleleDepthSource for BamAlleleReader {
    fn references(&self) -> Vec<(String, u64)> {
        self.references.clone()
    }

    fn coverage_arrays(
        &mut self,
        name: &str,
        start: u64,
        stop: u64,
        min_base_quality: u8,
    ) -> Result<AlleleDepthArrays, AlignmentError> {
        let length = self
            .reference_length(name)
            .ok_or_else(|| AlignmentError::UnknownReference(name.to_string()))?;
        if start > stop || stop > length {
            return Err(AlignmentError::InvalidWindow {
                name: name.to_string(),
                start,
                stop,
                length,
            });
        }

        let mut arrays = AlleleDepthArrays::zeros((stop - start) as usize);
        let (lo, hi) = (start as i64, stop as i64);
        self.reader
            .fetch((name, lo, hi))
            .map_err(htslib_error(&self.path))?;

        let mut record = Record::new();
        while let Some(result) = self.reader.read(&mut record) {
            result.map_err(htslib_error(&self.path))?;
            if passes_filters(&record) {
                count_record(&record, lo, hi, min_base_quality, &mut arrays);
            }
        }

        Ok(arrays)
    }

    fn mapped_reads(&mut self) -> Result<u64, AlignmentError> {
        let stats = self.reader.index_stats().map_err(htslib_error(&self.path))?;
        Ok(stats.iter().map(|&(_, _, mapped, _)| mapped).sum())
    }
}

/// Mean per-base coverage of an alignment file over all declared references.
///
/// Counts the aligned reference span of every read that passes the same
/// filters as [`BamAlleleReader`].
pub fn estimate_mean_coverage(path: &Path) -> Result<f64, AlignmentError> {
    let mut reader = bam::Reader::from_path(path).map_err(htslib_error(path))?;
    let genome_length: u64 = declared_references(reader.header())
        .iter()
        .map(|(_, len)| len)
        .sum();

    let mut aligned_bases = 0u64;
    let mut record = Record::new();
    while let Some(result) = reader.read(&mut record) {
        result.map_err(htslib_error(path))?;
        if passes_filters(&record) {
            aligned_bases += (record.reference_end() - record.pos()).max(0) as u64;
        }
    }

    if genome_length == 0 {
        return Ok(0.0);
    }
    Ok(aligned_bases as f64 / genome_length as f64)
}
