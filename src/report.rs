use std::borrow::Cow;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, TimeZone};
use serde::Serialize;
use tracing::info;

use crate::engine::AuditTrail;
use crate::error::CosmicError;
use crate::record::{IdentifierRecord, RecordIndex};
use crate::store::write_bytes_atomic;

pub const SEARCH_URL: &str = "https://cancer.sanger.ac.uk/cosmic/search?q=";

const IDENTIFIER_HEADER: [&str; 7] = [
    "DB_ID",
    "Identifier",
    "Suggested Prefix",
    "Valid",
    "COSV identifier",
    "Mutation IDs",
    "Search URL",
];

pub fn report_timestamp<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    now.format("%Y-%m-%d_%H%M%S").to_string()
}

pub fn search_url(record: &IdentifierRecord) -> String {
    format!("{SEARCH_URL}{}", record.key())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportPaths {
    pub identifiers: Utf8PathBuf,
    pub no_referrers: Utf8PathBuf,
    pub non_sequence_referrers: Utf8PathBuf,
}

/// Writes the run's CSV reports into one directory, sharing a timestamp suffix.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    dir: Utf8PathBuf,
    stamp: String,
}

impl ReportWriter {
    pub fn new(dir: impl Into<Utf8PathBuf>, stamp: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            stamp: stamp.into(),
        }
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    pub fn write_all(
        &self,
        index: &RecordIndex,
        audit: &AuditTrail,
    ) -> Result<ReportPaths, CosmicError> {
        let paths = ReportPaths {
            identifiers: self.write_identifier_report(&index.sorted_records())?,
            no_referrers: self.write_no_referrers(&audit.no_referrers)?,
            non_sequence_referrers: self.write_non_sequence_referrers(audit)?,
        };
        info!(
            identifiers = %paths.identifiers,
            no_referrers = %paths.no_referrers,
            non_sequence_referrers = %paths.non_sequence_referrers,
            "reports written"
        );
        Ok(paths)
    }

    /// One row per record, in the order given.
    pub fn write_identifier_report(
        &self,
        records: &[&IdentifierRecord],
    ) -> Result<Utf8PathBuf, CosmicError> {
        let mut content = csv_line(&IDENTIFIER_HEADER);
        for record in records {
            let db_id = record.db_id().to_string();
            let prefix = record.suggested_prefix().map(|p| p.as_str()).unwrap_or("");
            let valid = record.is_valid().to_string();
            let mutation_ids = format!(
                "[{}]",
                record
                    .mutation_ids()
                    .iter()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            let url = search_url(record);
            content.push_str(&csv_line(&[
                db_id.as_str(),
                record.identifier(),
                prefix,
                valid.as_str(),
                record.replacement().unwrap_or(""),
                mutation_ids.as_str(),
                url.as_str(),
            ]));
        }
        self.write("COSMIC-identifiers-report", &content)
    }

    pub fn write_no_referrers(&self, identifiers: &[String]) -> Result<Utf8PathBuf, CosmicError> {
        let mut content = csv_line(&["COSMIC identifier"]);
        for identifier in identifiers {
            content.push_str(&csv_line(&[identifier.as_str()]));
        }
        self.write("COSMICIdentifiersNoReferrers", &content)
    }

    pub fn write_non_sequence_referrers(
        &self,
        audit: &AuditTrail,
    ) -> Result<Utf8PathBuf, CosmicError> {
        let mut content = csv_line(&["COSMIC identifier", "non-EWAS entity"]);
        for entry in &audit.non_sequence_referrers {
            content.push_str(&csv_line(&[entry.identifier.as_str(), entry.entity.as_str()]));
        }
        self.write("nonEWASObjectsWithCOSMICIdentifiers", &content)
    }

    fn write(&self, name: &str, content: &str) -> Result<Utf8PathBuf, CosmicError> {
        fs::create_dir_all(self.dir.as_std_path())
            .map_err(|err| CosmicError::Filesystem(format!("create {}: {err}", self.dir)))?;
        let path = self.dir.join(format!("{name}_{}.csv", self.stamp));
        write_bytes_atomic(&path, content.as_bytes())?;
        Ok(path)
    }
}

fn csv_line(fields: &[&str]) -> String {
    let mut line = fields
        .iter()
        .map(|field| csv_field(field))
        .collect::<Vec<_>>()
        .join(",");
    line.push_str("\r\n");
    line
}

fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\r', '\n']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}
