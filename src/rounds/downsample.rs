//! Downsampling collaborator.
//!
//! Downsampling itself is done by samtools, or the alignment sets are
//! prepared ahead of time. Either way the controller only receives a list of
//! [`AlignmentSet`]s tagged with the round they belong to.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, info};

use super::{AlignmentSet, CoverageTarget, RoundTag};
use crate::alignment::{estimate_mean_coverage, AlignmentError};

/// Errors from external collaborators.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// A required external tool is not on `PATH`.
    #[error("required tool {tool} is not available on PATH")]
    Unavailable {
        /// Tool name.
        tool: String,
    },

    /// An external command exited unsuccessfully.
    #[error("{tool} failed ({status}): {stderr}")]
    CommandFailed {
        /// Tool name.
        tool: String,
        /// Exit status description.
        status: String,
        /// Captured standard error.
        stderr: String,
    },

    /// Filesystem error while preparing or discovering alignment sets.
    #[error("IO error on {path}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Coverage estimation failed.
    #[error(transparent)]
    Alignment(#[from] AlignmentError),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> CollaboratorError + '_ {
    move |source| CollaboratorError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Produces the alignment sets for one round.
pub trait Downsampler: Send + Sync {
    /// Alignment sets for `round`, downsampled towards `target`.
    ///
    /// Must be idempotent: outputs that already exist are reused.
    fn downsample(
        &self,
        inputs: &[PathBuf],
        round: RoundTag,
        target: CoverageTarget,
        out_dir: &Path,
    ) -> Result<Vec<AlignmentSet>, CollaboratorError>;
}

/// Sample name derived from an alignment file name.
pub fn sample_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Sorted `*.bam` files directly inside `dir`.
pub fn discover_alignments(dir: &Path) -> Result<Vec<PathBuf>, CollaboratorError> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_error(dir))? {
        let path = entry.map_err(io_error(dir))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "bam") {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

/// Alignment sets already on disk.
///
/// Looks in `<dir>/round_NN/` when it exists and in `<dir>` otherwise.
#[derive(Debug, Clone)]
pub struct PreparedSets {
    dir: PathBuf,
}

impl PreparedSets {
    /// Discover prepared sets under `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Downsampler for PreparedSets {
    fn downsample(
        &self,
        _inputs: &[PathBuf],
        round: RoundTag,
        target: CoverageTarget,
        _out_dir: &Path,
    ) -> Result<Vec<AlignmentSet>, CollaboratorError> {
        let round_dir = self.dir.join(round.to_string());
        let dir = if round_dir.is_dir() { round_dir } else { self.dir.clone() };
        let label = target.label();

        let sets: Vec<AlignmentSet> = discover_alignments(&dir)?
            .into_iter()
            .map(|path| AlignmentSet::new(sample_name(&path), label.clone(), round, path))
            .collect();
        debug!(dir = %dir.display(), sets = sets.len(), "using prepared alignment sets");
        Ok(sets)
    }
}

/// Fractions at or above this reuse the input unchanged.
const FULL_FRACTION: f64 = 0.999_999;

/// Subsampling fraction per input, or `None` where the input is used as-is.
///
/// With [`CoverageTarget::LowestCommonDenominator`] the target is the lowest
/// positive coverage. Inputs with no coverage are never downsampled.
pub fn downsample_plan(coverages: &[f64], target: CoverageTarget) -> Vec<Option<f64>> {
    let target_depth = match target {
        CoverageTarget::Depth(depth) => depth,
        CoverageTarget::LowestCommonDenominator => coverages
            .iter()
            .copied()
            .filter(|&coverage| coverage > 0.0)
            .fold(f64::INFINITY, f64::min),
        CoverageTarget::Prepared => return vec![None; coverages.len()],
    };

    coverages
        .iter()
        .map(|&coverage| {
            let fraction = if coverage > 0.0 { target_depth / coverage } else { 1.0 };
            (fraction < FULL_FRACTION).then_some(fraction)
        })
        .collect()
}

/// Downsampling through `samtools view -s`.
#[derive(Debug)]
pub struct SamtoolsDownsampler {
    samtools: PathBuf,
    coverage_cache: Mutex<HashMap<PathBuf, f64>>,
}

impl SamtoolsDownsampler {
    /// Locate samtools, failing before any work starts if it is missing.
    pub fn new() -> Result<Self, CollaboratorError> {
        let samtools = which::which("samtools").map_err(|_| CollaboratorError::Unavailable {
            tool: "samtools".to_string(),
        })?;
        Ok(Self::with_program(samtools))
    }

    /// Use the samtools binary at `samtools`.
    pub fn with_program(samtools: impl Into<PathBuf>) -> Self {
        Self {
            samtools: samtools.into(),
            coverage_cache: Mutex::new(HashMap::new()),
        }
    }

    fn mean_coverage(&self, input: &Path) -> Result<f64, CollaboratorError> {
        let cached = self
            .coverage_cache
            .lock()
            .ok()
            .and_then(|cache| cache.get(input).copied());
        if let Some(coverage) = cached {
            return Ok(coverage);
        }
        let coverage = estimate_mean_coverage(input)?;
        debug!(input = %input.display(), coverage, "estimated mean coverage");
        if let Ok(mut cache) = self.coverage_cache.lock() {
            cache.insert(input.to_path_buf(), coverage);
        }
        Ok(coverage)
    }

    fn run(&self, args: &[&str]) -> Result<(), CollaboratorError> {
        let output = Command::new(&self.samtools)
            .args(args)
            .output()
            .map_err(io_error(&self.samtools))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(CollaboratorError::CommandFailed {
                tool: "samtools".to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    /// Subsample `input` into `output` and index it.
    ///
    /// Both files are written under a `.tmp` name and renamed once samtools
    /// succeeds, so an interrupted run never leaves a file that a rerun
    /// would take as finished.
    fn subsample_into(
        &self,
        input: &Path,
        output: &Path,
        seed: &str,
    ) -> Result<(), CollaboratorError> {
        if !output.exists() {
            let input_str = input.to_string_lossy().into_owned();
            publish(output, |tmp| {
                self.run(&["view", "-b", "-s", seed, "-o", tmp, &input_str])
            })?;
        }

        let index = index_path(output);
        if !index.exists() {
            let output_str = output.to_string_lossy().into_owned();
            publish(&index, |tmp| self.run(&["index", &output_str, tmp]))?;
        }
        Ok(())
    }
}

/// Run `write` against `<target>.tmp`, then move it onto `target`.
fn publish(
    target: &Path,
    write: impl FnOnce(&str) -> Result<(), CollaboratorError>,
) -> Result<(), CollaboratorError> {
    let tmp = tmp_path(target);
    let result = write(&tmp.to_string_lossy())
        .and_then(|()| fs::rename(&tmp, target).map_err(io_error(target)));
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// `SEED.FRACTION` argument for `samtools view -s`.
pub fn subsample_argument(seed: u32, fraction: f64) -> String {
    let digits = format!("{:.6}", fraction.clamp(0.0, FULL_FRACTION));
    let decimals = digits.split_once('.').map(|(_, d)| d).unwrap_or("0");
    format!("{seed}.{decimals}")
}

impl Downsampler for SamtoolsDownsampler {
    fn downsample(
        &self,
        inputs: &[PathBuf],
        round: RoundTag,
        target: CoverageTarget,
        out_dir: &Path,
    ) -> Result<Vec<AlignmentSet>, CollaboratorError> {
        let round_dir = out_dir.join(round.to_string());
        fs::create_dir_all(&round_dir).map_err(io_error(&round_dir))?;

        let coverages = inputs
            .iter()
            .map(|input| self.mean_coverage(input))
            .collect::<Result<Vec<_>, _>>()?;
        let plan = downsample_plan(&coverages, target);
        let label = target.label();

        let mut sets = Vec::with_capacity(inputs.len());
        for ((input, coverage), fraction) in inputs.iter().zip(coverages).zip(plan) {
            let sample = sample_name(input);
            let Some(fraction) = fraction else {
                info!(%sample, coverage, "coverage at or below target, using input as-is");
                sets.push(AlignmentSet::new(sample, label.clone(), round, input.clone()));
                continue;
            };

            let output = round_dir.join(format!("{sample}.{label}.bam"));
            let seed = subsample_argument(round.number(), fraction);
            info!(%sample, fraction, %seed, "downsampling");
            self.subsample_into(input, &output, &seed)?;
            sets.push(AlignmentSet::new(sample, label.clone(), round, output));
        }

        Ok(sets)
    }
}

fn index_path(bam: &Path) -> PathBuf {
    with_suffix(bam, ".bai")
}

fn tmp_path(path: &Path) -> PathBuf {
    with_suffix(path, ".tmp")
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn subsample_argument_joins_seed_and_fraction() {
        assert_eq!(subsample_argument(3, 0.25), "3.250000");
        assert_eq!(subsample_argument(10, 0.0001234), "10.000123");
        assert_eq!(subsample_argument(1, 2.0), "1.999999");
    }

    #[test]
    fn prepared_sets_prefer_round_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("base.bam"), b"").unwrap();
        let round_dir = dir.path().join("round_02");
        fs::create_dir_all(&round_dir).unwrap();
        fs::write(round_dir.join("s2.bam"), b"").unwrap();
        fs::write(round_dir.join("s1.bam"), b"").unwrap();
        fs::write(round_dir.join("notes.txt"), b"").unwrap();

        let prepared = PreparedSets::new(dir.path());
        let target = CoverageTarget::Depth(20.0);

        let round_two = prepared
            .downsample(&[], RoundTag::new(2), target, dir.path())
            .unwrap();
        let samples: Vec<&str> = round_two.iter().map(|s| s.sample.as_str()).collect();
        assert_eq!(samples, vec!["s1", "s2"]);
        assert!(round_two.iter().all(|s| s.round == RoundTag::new(2) && s.label == "cov20"));

        let round_one = prepared
            .downsample(&[], RoundTag::new(1), target, dir.path())
            .unwrap();
        assert_eq!(round_one.len(), 1);
        assert_eq!(round_one[0].sample, "base");
    }

    #[test]
    fn sample_name_strips_extension() {
        assert_eq!(sample_name(Path::new("/data/S17.dedup.bam")), "S17.dedup");
    }

    #[test_case(&[10.0, 20.0, 40.0], CoverageTarget::LowestCommonDenominator, &[None, Some(0.5), Some(0.25)] ; "lowest coverage sets the target")]
    #[test_case(&[20.0, 5.0], CoverageTarget::Depth(10.0), &[Some(0.5), None] ; "inputs below the depth are reused")]
    #[test_case(&[0.0, 20.0], CoverageTarget::Depth(10.0), &[None, Some(0.5)] ; "zero coverage is never downsampled")]
    #[test_case(&[0.0, 10.0, 20.0], CoverageTarget::LowestCommonDenominator, &[None, None, Some(0.5)] ; "zero coverage does not set the lowest")]
    #[test_case(&[10.0], CoverageTarget::Depth(10.0), &[None] ; "depth equal to coverage is reused")]
    #[test_case(&[10.0, 30.0], CoverageTarget::Prepared, &[None, None] ; "prepared inputs are used as given")]
    fn plan_fractions(coverages: &[f64], target: CoverageTarget, expected: &[Option<f64>]) {
        let plan = downsample_plan(coverages, target);
        assert_eq!(plan.len(), expected.len());
        for (got, want) in plan.iter().zip(expected) {
            match (got, want) {
                (Some(got), Some(want)) => assert!((got - want).abs() < 1e-12, "{got} != {want}"),
                _ => assert_eq!(got, want),
            }
        }
    }

    #[cfg(unix)]
    fn fake_samtools(dir: &Path, body: &str) -> SamtoolsDownsampler {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("samtools");
        fs::write(&script, format!("#!/bin/sh\n{body}")).unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        SamtoolsDownsampler::with_program(script)
    }

    #[cfg(unix)]
    fn leftover_tmp_files(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "tmp"))
            .collect()
    }

    #[cfg(unix)]
    #[test]
    fn failed_subsample_leaves_no_output_behind() {
        let dir = tempfile::tempdir().unwrap();
        // Writes a partial file to the -o argument, then fails.
        let samtools = fake_samtools(
            dir.path(),
            "while [ \"$1\" != \"-o\" ]; do shift; done\necho partial > \"$2\"\nexit 1\n",
        );
        let output = dir.path().join("S1.cov10.bam");

        let err = samtools
            .subsample_into(Path::new("S1.bam"), &output, "1.500000")
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::CommandFailed { .. }));
        assert!(!output.exists());
        assert!(!index_path(&output).exists());
        assert!(leftover_tmp_files(dir.path()).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn finished_subsample_is_renamed_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let samtools = fake_samtools(
            dir.path(),
            "if [ \"$1\" = index ]; then echo bai > \"$3\"; exit 0; fi\n\
             while [ \"$1\" != \"-o\" ]; do shift; done\necho bam > \"$2\"\n",
        );
        let output = dir.path().join("S1.cov10.bam");

        samtools
            .subsample_into(Path::new("S1.bam"), &output, "1.500000")
            .unwrap();
        assert_eq!(fs::read_to_string(&output).unwrap(), "bam\n");
        assert_eq!(fs::read_to_string(index_path(&output)).unwrap(), "bai\n");
        assert!(leftover_tmp_files(dir.path()).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn failed_index_keeps_the_finished_bam() {
        let dir = tempfile::tempdir().unwrap();
        let samtools = fake_samtools(
            dir.path(),
            "if [ \"$1\" = index ]; then echo partial > \"$3\"; exit 1; fi\n\
             while [ \"$1\" != \"-o\" ]; do shift; done\necho bam > \"$2\"\n",
        );
        let output = dir.path().join("S1.cov10.bam");

        assert!(samtools
            .subsample_into(Path::new("S1.bam"), &output, "1.500000")
            .is_err());
        assert!(output.is_file());
        assert!(!index_path(&output).exists());
        assert!(leftover_tmp_files(dir.path()).is_empty());
    }
}
