use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CosmicError;

/// Marker letter shared by every prefixed COSMIC identifier (COSM, COSF, COSV).
pub const PREFIX_MARKER: char = 'C';

/// Prefix of the modern genomic identifiers that are excluded from reconciliation.
pub const GENOMIC_PREFIX: &str = "COSV";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DbId(u64);

impl DbId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DbId {
    type Err = CosmicError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value
            .trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|_| CosmicError::InvalidDbId(value.to_string()))
    }
}

/// The two canonical prefixes a legacy identifier can be classified under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CosmicPrefix {
    /// Plain legacy mutation (`COSM`).
    Legacy,
    /// Fusion (`COSF`), chosen when a fragment modification points at another sequence.
    Fusion,
}

impl CosmicPrefix {
    pub fn as_str(self) -> &'static str {
        match self {
            CosmicPrefix::Legacy => "COSM",
            CosmicPrefix::Fusion => "COSF",
        }
    }
}

impl fmt::Display for CosmicPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns true when the identifier already carries a prefix, ignoring case.
pub fn has_prefix_marker(identifier: &str) -> bool {
    identifier
        .chars()
        .next()
        .map(|ch| ch.eq_ignore_ascii_case(&PREFIX_MARKER))
        .unwrap_or(false)
}

pub fn is_genomic_identifier(identifier: &str) -> bool {
    identifier.to_uppercase().starts_with(GENOMIC_PREFIX)
}

/// How mismatch verdicts from several referring sequences combine into one prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MismatchAggregation {
    /// The last inspected sequence decides.
    #[default]
    LastWins,
    /// Any mismatching sequence makes the identifier a fusion.
    AnyMismatch,
}

/// What happens when two records compute the same index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyingPolicy {
    #[default]
    ListPerKey,
    LastPerKey,
}

static ISO_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^P(?:(?P<days>\d+)D)?(?:T(?:(?P<hours>\d+)H)?(?:(?P<minutes>\d+)M)?(?:(?P<seconds>\d+)(?:[.,](?P<fraction>\d{1,9}))?S)?)?$",
    )
    .expect("duration pattern is valid")
});

/// Maximum age of a downloaded reference file, written as an ISO-8601 duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxFileAge(Duration);

impl MaxFileAge {
    pub fn new(duration: Duration) -> Self {
        Self(duration)
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl Default for MaxFileAge {
    fn default() -> Self {
        Self(Duration::from_secs(24 * 60 * 60))
    }
}

impl FromStr for MaxFileAge {
    type Err = CosmicError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let invalid = || CosmicError::InvalidDuration(value.to_string());
        // "P" and "PT" match the pattern but carry no component.
        if trimmed.len() < 3 || trimmed.ends_with(['T', 't']) {
            return Err(invalid());
        }
        let caps = ISO_DURATION.captures(trimmed).ok_or_else(invalid)?;
        let number = |name: &str| -> Result<u64, CosmicError> {
            caps.name(name)
                .map(|m| m.as_str().parse::<u64>().map_err(|_| invalid()))
                .transpose()
                .map(|v| v.unwrap_or(0))
        };

        let parts = [
            (number("days")?, 86_400u64),
            (number("hours")?, 3_600),
            (number("minutes")?, 60),
            (number("seconds")?, 1),
        ];
        let seconds = parts
            .iter()
            .try_fold(0u64, |total, (value, unit)| {
                value.checked_mul(*unit).and_then(|s| total.checked_add(s))
            })
            .ok_or_else(invalid)?;
        let nanos = match caps.name("fraction") {
            Some(m) => {
                let digits = m.as_str();
                let padded = format!("{digits:0<9}");
                padded.parse::<u32>().map_err(|_| invalid())?
            }
            None => 0,
        };
        Ok(Self(Duration::new(seconds, nanos)))
    }
}
