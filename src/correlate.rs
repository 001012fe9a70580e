//! Streams the three COSMIC reference files against a classified [`RecordIndex`].
//!
//! Passes run fusion export, then mutation tracking, then mutant export, so
//! the mutant export has the final word on replacement identifiers.

use std::collections::HashMap;
use std::io::BufRead;

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::info;

use crate::domain::CosmicPrefix;
use crate::error::CosmicError;
use crate::record::RecordIndex;
use crate::tsv::TsvReader;

pub mod columns {
    pub const FUSION_ID: &str = "FUSION_ID";
    pub const LEGACY_MUTATION_ID: &str = "LEGACY_MUTATION_ID";
    pub const MUTATION_ID: &str = "MUTATION_ID";
    pub const GENOMIC_MUTATION_ID: &str = "GENOMIC_MUTATION_ID";
}

/// Decompressed reference file locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceFiles {
    pub fusion_export: Utf8PathBuf,
    pub mutation_tracking: Utf8PathBuf,
    pub mutant_export: Utf8PathBuf,
}

impl ReferenceFiles {
    pub fn all(&self) -> [&Utf8PathBuf; 3] {
        [
            &self.fusion_export,
            &self.mutation_tracking,
            &self.mutant_export,
        ]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassStats {
    pub rows: usize,
    pub matched_rows: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CorrelationStats {
    pub fusion_export: PassStats,
    pub mutation_tracking: PassStats,
    pub mutant_export: PassStats,
}

/// Runs all three passes in order. Every file must exist.
pub fn correlate(
    index: &mut RecordIndex,
    files: &ReferenceFiles,
) -> Result<CorrelationStats, CosmicError> {
    for path in files.all() {
        if !path.as_std_path().exists() {
            return Err(CosmicError::MissingInput(path.as_std_path().to_path_buf()));
        }
    }

    info!(path = %files.fusion_export, "checking fusion export");
    let fusion_export = fusion_pass(index, TsvReader::open(files.fusion_export.as_std_path())?)?;
    info!(
        rows = fusion_export.rows,
        matched = fusion_export.matched_rows,
        "fusion export done"
    );

    info!(path = %files.mutation_tracking, "checking mutation tracking");
    let mutation_tracking =
        tracking_pass(index, TsvReader::open(files.mutation_tracking.as_std_path())?)?;
    info!(
        rows = mutation_tracking.rows,
        matched = mutation_tracking.matched_rows,
        "mutation tracking done"
    );

    info!(path = %files.mutant_export, "checking mutant export");
    let mutant_export = mutant_pass(index, TsvReader::open(files.mutant_export.as_std_path())?)?;
    info!(
        rows = mutant_export.rows,
        matched = mutant_export.matched_rows,
        "mutant export done"
    );

    Ok(CorrelationStats {
        fusion_export,
        mutation_tracking,
        mutant_export,
    })
}

/// Marks fusion-keyed records valid when their numeric part appears in `FUSION_ID`.
pub fn fusion_pass<R: BufRead>(
    index: &mut RecordIndex,
    rows: TsvReader<R>,
) -> Result<PassStats, CosmicError> {
    let fusion_keys = fusion_keys(index);
    let mut stats = PassStats::default();
    for row in rows {
        let row = row?;
        stats.rows += 1;
        let fusion_id = row.get(columns::FUSION_ID)?;
        let Some(keys) = fusion_keys.get(fusion_id) else {
            continue;
        };
        stats.matched_rows += 1;
        for key in keys {
            if let Some(records) = index.get_mut(key) {
                records.iter_mut().for_each(|record| record.mark_valid());
            }
        }
    }
    Ok(stats)
}

/// Collects related mutation ids and replacement identifiers; does not validate.
pub fn tracking_pass<R: BufRead>(
    index: &mut RecordIndex,
    rows: TsvReader<R>,
) -> Result<PassStats, CosmicError> {
    legacy_pass(index, rows, false)
}

/// Same as [`tracking_pass`], and marks every matched record valid.
pub fn mutant_pass<R: BufRead>(
    index: &mut RecordIndex,
    rows: TsvReader<R>,
) -> Result<PassStats, CosmicError> {
    legacy_pass(index, rows, true)
}

fn legacy_pass<R: BufRead>(
    index: &mut RecordIndex,
    rows: TsvReader<R>,
    validates: bool,
) -> Result<PassStats, CosmicError> {
    let mut stats = PassStats::default();
    for row in rows {
        let row = row?;
        stats.rows += 1;
        let legacy_id = row.get(columns::LEGACY_MUTATION_ID)?;
        let mutation_id = row.get(columns::MUTATION_ID)?;
        let genomic_id = row.get(columns::GENOMIC_MUTATION_ID)?;
        let Some(records) = index.get_mut(legacy_id) else {
            continue;
        };
        stats.matched_rows += 1;
        for record in records.iter_mut() {
            if validates {
                record.mark_valid();
            }
            record.add_mutation_id(mutation_id);
            record.set_replacement(genomic_id);
        }
    }
    Ok(stats)
}

/// Upper-cased fusion keys with the prefix stripped, mapped back to the index keys.
fn fusion_keys(index: &RecordIndex) -> HashMap<String, Vec<String>> {
    let prefix = CosmicPrefix::Fusion.as_str();
    let mut keys: HashMap<String, Vec<String>> = HashMap::new();
    for key in index.keys() {
        let upper = key.to_uppercase();
        if let Some(stripped) = upper.strip_prefix(prefix) {
            keys.entry(stripped.to_string())
                .or_default()
                .push(key.to_string());
        }
    }
    keys
}
