//! Tab-delimited output tables and their round-scoped file layout.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::scan::ScanSink;
use super::RoundTag;
use crate::annotation::Gene;
use crate::diversity::{GeneDiversity, PositionRecord, RepliconDiversity};

const GENE_POSITIONS_HEADER: &str =
    "replicon\tgene\tposition\tdepth\tA\tC\tG\tT\tpairwise_differences\tpairwise_comparisons\tpi\n";
const REPLICON_POSITIONS_HEADER: &str =
    "replicon\tposition\tdepth\tA\tC\tG\tT\tpairwise_differences\tpairwise_comparisons\tpi\n";
const GENE_SUMMARY_HEADER: &str = "replicon\tgene\tpi\tlow_coverage\n";
const REPLICON_SUMMARY_HEADER: &str = "replicon\tpi\n";

/// Failure writing an output table.
#[derive(Debug, Error)]
#[error("failed to write {path}: {source}")]
pub struct OutputError {
    /// File being written.
    pub path: PathBuf,
    /// Underlying IO error.
    #[source]
    pub source: std::io::Error,
}

fn wrap(path: &Path) -> impl FnOnce(std::io::Error) -> OutputError + '_ {
    move |source| OutputError {
        path: path.to_path_buf(),
        source,
    }
}

/// File names for one alignment set, scoped by round (or `aggregate`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePaths {
    dir: PathBuf,
    stem: String,
}

impl TablePaths {
    /// Paths under `output_dir/round_NN/`.
    pub fn for_round(output_dir: &Path, round: RoundTag, sample: &str, label: &str) -> Self {
        Self {
            dir: output_dir.join(round.to_string()),
            stem: format!("{sample}.{label}"),
        }
    }

    /// Paths under `output_dir/aggregate/`.
    pub fn for_aggregate(output_dir: &Path, sample: &str, label: &str) -> Self {
        Self {
            dir: output_dir.join("aggregate"),
            stem: format!("{sample}.{label}"),
        }
    }

    fn file(&self, suffix: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", self.stem, suffix))
    }

    /// Directory holding the tables.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Raw per-gene-position table.
    pub fn gene_positions(&self) -> PathBuf {
        self.file("gene_positions.tsv")
    }

    /// Raw per-replicon-position table.
    pub fn replicon_positions(&self) -> PathBuf {
        self.file("replicon_positions.tsv")
    }

    /// Per-gene summary table.
    pub fn gene_summary(&self) -> PathBuf {
        self.file("gene_summary.tsv")
    }

    /// Replicon and coding summary table.
    pub fn replicon_summary(&self) -> PathBuf {
        self.file("replicon_summary.tsv")
    }

    /// Mapped-read count file.
    pub fn mapped_reads(&self) -> PathBuf {
        self.file("mapped_reads.txt")
    }

    /// Create the directory if needed.
    pub fn ensure_dir(&self) -> Result<(), OutputError> {
        fs::create_dir_all(&self.dir).map_err(wrap(&self.dir))
    }
}

fn write_position_fields<W: Write>(writer: &mut W, record: &PositionRecord) -> std::io::Result<()> {
    let [a, c, g, t] = record.filtered.depths;
    writeln!(
        writer,
        "{}\t{}\t{a}\t{c}\t{g}\t{t}\t{}\t{}\t{:.9}",
        record.position,
        record.depth(),
        record.pairwise.differences,
        record.pairwise.comparisons,
        record.pi()
    )
}

/// Append per-position rows for one gene.
pub fn write_gene_position_rows<W: Write>(
    writer: &mut W,
    gene: &Gene,
    records: &[PositionRecord],
) -> std::io::Result<()> {
    for record in records {
        write!(writer, "{}\t{}\t", record.replicon, gene.id)?;
        write_position_fields(writer, record)?;
    }
    Ok(())
}

/// Append per-position rows for a replicon.
pub fn write_replicon_position_rows<W: Write>(
    writer: &mut W,
    records: &[PositionRecord],
) -> std::io::Result<()> {
    for record in records {
        write!(writer, "{}\t", record.replicon)?;
        write_position_fields(writer, record)?;
    }
    Ok(())
}

/// Write the per-gene summary table.
pub fn write_gene_summary<W: Write>(writer: &mut W, genes: &[GeneDiversity]) -> std::io::Result<()> {
    writer.write_all(GENE_SUMMARY_HEADER.as_bytes())?;
    for gene in genes {
        writeln!(
            writer,
            "{}\t{}\t{:.9}\t{}",
            gene.replicon,
            gene.gene,
            gene.mean_pi,
            if gene.low_coverage { 'Y' } else { 'N' }
        )?;
    }
    writer.flush()
}

/// Write the replicon summary table; the coding row is expected last.
pub fn write_replicon_summary<W: Write>(
    writer: &mut W,
    replicons: &[RepliconDiversity],
) -> std::io::Result<()> {
    writer.write_all(REPLICON_SUMMARY_HEADER.as_bytes())?;
    for replicon in replicons {
        writeln!(writer, "{}\t{:.9}", replicon.replicon, replicon.mean_pi)?;
    }
    writer.flush()
}

/// Render the gene summary to a string (tests and snapshots).
pub fn render_gene_summary(genes: &[GeneDiversity]) -> String {
    let mut buffer = Vec::new();
    // Writing into a Vec cannot fail.
    let _ = write_gene_summary(&mut buffer, genes);
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Render the replicon summary to a string (tests and snapshots).
pub fn render_replicon_summary(replicons: &[RepliconDiversity]) -> String {
    let mut buffer = Vec::new();
    let _ = write_replicon_summary(&mut buffer, replicons);
    String::from_utf8_lossy(&buffer).into_owned()
}

fn create(path: &Path) -> Result<BufWriter<File>, OutputError> {
    File::create(path).map(BufWriter::new).map_err(wrap(path))
}

/// Write a table to `path` with the given writer function.
pub fn write_table<F>(path: &Path, write: F) -> Result<(), OutputError>
where
    F: FnOnce(&mut BufWriter<File>) -> std::io::Result<()>,
{
    let mut writer = create(path)?;
    write(&mut writer).map_err(wrap(path))?;
    writer.flush().map_err(wrap(path))
}

/// Write the mapped-read count file.
pub fn write_mapped_reads(path: &Path, mapped_reads: u64) -> Result<(), OutputError> {
    write_table(path, |w| writeln!(w, "{mapped_reads}"))
}

/// Streams raw position rows into the two per-position tables.
#[derive(Debug)]
pub struct TableSink {
    gene_path: PathBuf,
    replicon_path: PathBuf,
    genes: BufWriter<File>,
    replicons: BufWriter<File>,
}

impl TableSink {
    /// Create both per-position tables and write their headers.
    pub fn create(paths: &TablePaths) -> Result<Self, OutputError> {
        paths.ensure_dir()?;
        let gene_path = paths.gene_positions();
        let replicon_path = paths.replicon_positions();

        let mut genes = create(&gene_path)?;
        genes
            .write_all(GENE_POSITIONS_HEADER.as_bytes())
            .map_err(wrap(&gene_path))?;
        let mut replicons = create(&replicon_path)?;
        replicons
            .write_all(REPLICON_POSITIONS_HEADER.as_bytes())
            .map_err(wrap(&replicon_path))?;

        Ok(Self {
            gene_path,
            replicon_path,
            genes,
            replicons,
        })
    }

    /// Flush both tables.
    pub fn finish(mut self) -> Result<(), OutputError> {
        self.genes.flush().map_err(wrap(&self.gene_path))?;
        self.replicons.flush().map_err(wrap(&self.replicon_path))
    }
}

impl ScanSink for TableSink {
    fn replicon_positions(&mut self, records: &[PositionRecord]) -> Result<(), OutputError> {
        write_replicon_position_rows(&mut self.replicons, records).map_err(wrap(&self.replicon_path))
    }

    fn gene_positions(&mut self, gene: &Gene, records: &[PositionRecord]) -> Result<(), OutputError> {
        write_gene_position_rows(&mut self.genes, gene, records).map_err(wrap(&self.gene_path))
    }
}
