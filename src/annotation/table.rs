//! Tab-delimited gene feature table.
//!
//! ```text
//! replicon	gene	locus_tag	start	end
//! chr1	dnaA	b0001	1	1404
//! chr1	.	b0002	1500	2300
//! ```
//!
//! An empty cell or `.` marks an absent attribute.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use super::{AnnotationError, GeneFeature};

const HEADER: [&str; 5] = ["replicon", "gene", "locus_tag", "start", "end"];

/// Read a feature table from a file.
pub fn read_feature_table_file(path: &Path) -> Result<Vec<GeneFeature>, AnnotationError> {
    let file = File::open(path).map_err(|source| AnnotationError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    read_feature_table(BufReader::new(file)).map_err(|err| match err {
        AnnotationError::Parse(msg) => AnnotationError::Parse(format!("{}: {}", path.display(), msg)),
        other => other,
    })
}

/// Read a feature table from any buffered reader.
pub fn read_feature_table<R: BufRead>(reader: R) -> Result<Vec<GeneFeature>, AnnotationError> {
    let mut features = Vec::new();
    let mut seen_header = false;

    for (line_no, line) in reader.lines().enumerate() {
        let line = line.map_err(|err| AnnotationError::Parse(format!("line {}: {}", line_no + 1, err)))?;
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
        if !seen_header {
            seen_header = true;
            if fields.as_slice() == HEADER {
                continue;
            }
            return Err(AnnotationError::Parse(format!(
                "line {}: expected header '{}'",
                line_no + 1,
                HEADER.join("\t")
            )));
        }

        if fields.len() != HEADER.len() {
            return Err(AnnotationError::Parse(format!(
                "line {}: expected {} fields, found {}",
                line_no + 1,
                HEADER.len(),
                fields.len()
            )));
        }

        let coordinate = |value: &str, name: &str| {
            value.parse::<u64>().map_err(|_| {
                AnnotationError::Parse(format!("line {}: invalid {} '{}'", line_no + 1, name, value))
            })
        };

        features.push(GeneFeature {
            replicon: fields[0].to_string(),
            gene_name: attribute(fields[1]),
            locus_tag: attribute(fields[2]),
            start: coordinate(fields[3], "start")?,
            end: coordinate(fields[4], "end")?,
        });
    }

    Ok(features)
}

fn attribute(value: &str) -> Option<String> {
    match value {
        "" | "." => None,
        other => Some(other.to_string()),
    }
}
