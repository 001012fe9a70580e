use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;

use crate::correlate::ReferenceFiles;
use crate::domain::DbId;
use crate::download::{Credentials, ReferenceSource};
use crate::error::CosmicError;

pub const DEFAULT_CONFIG_PATH: &str = "config.properties";

pub mod keys {
    pub const PERSON_ID: &str = "person.id";
    pub const KB_SNAPSHOT: &str = "kb.snapshot";
    pub const FUSION_EXPORT_PATH: &str = "cosmic.fusion_export.path";
    pub const FUSION_EXPORT_URL: &str = "cosmic.fusion_export.url";
    pub const MUTATION_TRACKING_PATH: &str = "cosmic.mutation_tracking.path";
    pub const MUTATION_TRACKING_URL: &str = "cosmic.mutation_tracking.url";
    pub const MUTANT_EXPORT_PATH: &str = "cosmic.mutant_export.path";
    pub const MUTANT_EXPORT_URL: &str = "cosmic.mutant_export.url";
    pub const USER: &str = "cosmic.user";
    pub const PASSWORD: &str = "cosmic.password";
    pub const REPORTS_DIR: &str = "reports.dir";
}

/// `key=value` (or `key: value`) pairs; `#` and `!` start comment lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    values: BTreeMap<String, String>,
}

impl Properties {
    pub fn parse(text: &str) -> Self {
        let mut values = BTreeMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let (key, value) = match line.find(['=', ':']) {
                Some(split) => (&line[..split], &line[split + 1..]),
                None => (line, ""),
            };
            values.insert(key.trim().to_string(), value.trim().to_string());
        }
        Self { values }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }

    /// Value for `key`; blank values count as unset.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    fn required(&self, key: &str) -> Result<&str, CosmicError> {
        self.get(key).ok_or_else(|| CosmicError::ConfigValue {
            key: key.to_string(),
            message: "missing required value".to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub person_id: DbId,
    pub kb_snapshot: Utf8PathBuf,
    pub fusion_export: ReferenceSource,
    pub mutation_tracking: ReferenceSource,
    pub mutant_export: ReferenceSource,
    pub credentials: Option<Credentials>,
    pub reports_dir: Utf8PathBuf,
}

impl ResolvedConfig {
    pub fn sources(&self) -> Vec<ReferenceSource> {
        vec![
            self.fusion_export.clone(),
            self.mutation_tracking.clone(),
            self.mutant_export.clone(),
        ]
    }

    pub fn reference_files(&self) -> ReferenceFiles {
        ReferenceFiles {
            fusion_export: self.fusion_export.path.clone(),
            mutation_tracking: self.mutation_tracking.path.clone(),
            mutant_export: self.mutant_export.path.clone(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, CosmicError> {
        let config_path = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        if !config_path.exists() {
            return Err(CosmicError::MissingConfig(config_path));
        }
        let content = fs::read_to_string(&config_path)
            .map_err(|_| CosmicError::ConfigRead(config_path.clone()))?;
        Self::resolve_properties(Properties::parse(&content))
    }

    pub fn resolve_properties(properties: Properties) -> Result<ResolvedConfig, CosmicError> {
        let person_id = properties
            .required(keys::PERSON_ID)?
            .parse::<DbId>()
            .map_err(|err| CosmicError::ConfigValue {
                key: keys::PERSON_ID.to_string(),
                message: err.to_string(),
            })?;
        let kb_snapshot = Utf8PathBuf::from(properties.required(keys::KB_SNAPSHOT)?);

        let source = |path_key: &str, url_key: &str, default: &str| ReferenceSource {
            path: Utf8PathBuf::from(properties.get(path_key).unwrap_or(default)),
            url: properties.get(url_key).map(str::to_string),
        };
        let fusion_export = source(
            keys::FUSION_EXPORT_PATH,
            keys::FUSION_EXPORT_URL,
            "CosmicFusionExport.tsv",
        );
        let mutation_tracking = source(
            keys::MUTATION_TRACKING_PATH,
            keys::MUTATION_TRACKING_URL,
            "CosmicMutationTracking.tsv",
        );
        let mutant_export = source(
            keys::MUTANT_EXPORT_PATH,
            keys::MUTANT_EXPORT_URL,
            "CosmicMutantExport.tsv",
        );

        let credentials = match (properties.get(keys::USER), properties.get(keys::PASSWORD)) {
            (Some(user), Some(password)) => Some(Credentials {
                user: user.to_string(),
                password: password.to_string(),
            }),
            _ => None,
        };

        let reports_dir = Utf8PathBuf::from(properties.get(keys::REPORTS_DIR).unwrap_or("reports"));

        Ok(ResolvedConfig {
            person_id,
            kb_snapshot,
            fusion_export,
            mutation_tracking,
            mutant_export,
            credentials,
            reports_dir,
        })
    }
}
