//! GenBank annotation reader.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use gb_io::reader::SeqReader;
use gb_io::seq::{Feature, Seq};
use tracing::debug;

use super::{AnnotationError, GeneFeature};

/// Feature kind indexed when none is requested.
pub const DEFAULT_FEATURE_KIND: &str = "gene";

/// Read gene features of `feature_kind` from every record in a GenBank file.
///
/// The LOCUS name of each record is used as the replicon name.
pub fn read_genbank(path: &Path, feature_kind: &str) -> Result<Vec<GeneFeature>, AnnotationError> {
    let file = File::open(path).map_err(|source| AnnotationError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let mut features = Vec::new();
    for record in SeqReader::new(BufReader::new(file)) {
        let seq = record.map_err(|err| {
            AnnotationError::Parse(format!("{}: {}", path.display(), err))
        })?;
        collect_features(&seq, feature_kind, &mut features)?;
    }

    debug!(path = %path.display(), features = features.len(), "read GenBank annotation");
    Ok(features)
}

fn collect_features(
    seq: &Seq,
    feature_kind: &str,
    out: &mut Vec<GeneFeature>,
) -> Result<(), AnnotationError> {
    let replicon = seq
        .name
        .clone()
        .ok_or_else(|| AnnotationError::Parse("GenBank record without a LOCUS name".to_string()))?;

    for feature in seq
        .features
        .iter()
        .filter(|f| f.kind.to_string().eq_ignore_ascii_case(feature_kind))
    {
        out.push(to_gene_feature(&replicon, feature)?);
    }
    Ok(())
}

fn to_gene_feature(replicon: &str, feature: &Feature) -> Result<GeneFeature, AnnotationError> {
    let (from, to) = feature.location.find_bounds().map_err(|err| {
        AnnotationError::Parse(format!("unresolvable location on {replicon}: {err:?}"))
    })?;
    if from < 0 || to <= from {
        return Err(AnnotationError::Parse(format!(
            "feature on {replicon} has bounds {from}..{to}"
        )));
    }

    let qualifier = |key: &str| {
        feature
            .qualifier_values(key.into())
            .next()
            .map(str::to_string)
    };

    // gb-io bounds are 0-based half-open.
    Ok(GeneFeature {
        replicon: replicon.to_string(),
        gene_name: qualifier("gene"),
        locus_tag: qualifier("locus_tag"),
        start: from as u64 + 1,
        end: to as u64,
    })
}
