use thiserror::Error;

/// Default minimum allele depth; alleles at or below it are treated as noise.
pub const DEFAULT_MIN_COVERAGE: u32 = 2;
/// Default minimum allele frequency retained by the filter.
pub const DEFAULT_MIN_FREQUENCY: f64 = 0.01;
/// Default depth below which a position counts as low-coverage.
pub const DEFAULT_LOW_COVERAGE_LIMIT: u32 = 10;
/// Default fraction of low-coverage bases above which a gene is flagged.
pub const DEFAULT_LOW_COVERAGE_PROPORTION: f64 = 0.5;
/// Default minimum base quality counted by the alignment reader.
pub const DEFAULT_MIN_BASE_QUALITY: u8 = 15;

/// Invalid numeric parameter supplied to the diversity engine.
#[derive(Debug, Error, PartialEq)]
#[error("invalid parameter {name}: {reason}")]
pub struct ParameterError {
    /// Parameter name as exposed on the command line.
    pub name: &'static str,
    /// Why the value was rejected.
    pub reason: String,
}

/// Thresholds threaded explicitly through filtering and aggregation.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DiversityParams {
    /// Alleles with depth `<= min_coverage` get frequency zero.
    pub min_coverage: u32,
    /// Alleles with frequency below this are removed.
    pub min_frequency: f64,
    /// Positions with filtered depth below this are low-coverage.
    pub low_coverage_limit: u32,
    /// Genes whose low-coverage fraction exceeds this are flagged.
    pub low_coverage_proportion: f64,
    /// Minimum base quality for a base to be counted.
    pub min_base_quality: u8,
}

impl Default for DiversityParams {
    fn default() -> Self {
        Self {
            min_coverage: DEFAULT_MIN_COVERAGE,
            min_frequency: DEFAULT_MIN_FREQUENCY,
            low_coverage_limit: DEFAULT_LOW_COVERAGE_LIMIT,
            low_coverage_proportion: DEFAULT_LOW_COVERAGE_PROPORTION,
            min_base_quality: DEFAULT_MIN_BASE_QUALITY,
        }
    }
}

impl DiversityParams {
    /// Set the minimum allele coverage.
    pub fn with_min_coverage(mut self, min_coverage: u32) -> Self {
        self.min_coverage = min_coverage;
        self
    }

    /// Set the minimum allele frequency.
    pub fn with_min_frequency(mut self, min_frequency: f64) -> Self {
        self.min_frequency = min_frequency;
        self
    }

    /// Set the low-coverage depth limit.
    pub fn with_low_coverage_limit(mut self, limit: u32) -> Self {
        self.low_coverage_limit = limit;
        self
    }

    /// Set the low-coverage proportion threshold.
    pub fn with_low_coverage_proportion(mut self, proportion: f64) -> Self {
        self.low_coverage_proportion = proportion;
        self
    }

    /// Set the minimum base quality.
    pub fn with_min_base_quality(mut self, quality: u8) -> Self {
        self.min_base_quality = quality;
        self
    }

    /// Reject fractions outside `[0, 1]` (and NaN).
    pub fn validate(&self) -> Result<(), ParameterError> {
        check_fraction("min-frequency", self.min_frequency)?;
        check_fraction("low-coverage-proportion", self.low_coverage_proportion)?;
        Ok(())
    }
}

fn check_fraction(name: &'static str, value: f64) -> Result<(), ParameterError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ParameterError {
            name,
            reason: format!("{value} is not within [0, 1]"),
        })
    }
}
