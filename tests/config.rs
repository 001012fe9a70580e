use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use cosmic_update::config::{ConfigLoader, Properties, keys};
use cosmic_update::domain::DbId;
use cosmic_update::download::Credentials;
use cosmic_update::error::CosmicError;

const SAMPLE: &str = "\
# COSMIC update settings
person.id=8939149
kb.snapshot=/data/kb/snapshot.json

cosmic.fusion_export.path=/data/cosmic/CosmicFusionExport.tsv
cosmic.fusion_export.url=https://cancer.sanger.ac.uk/cosmic/file_download/CosmicFusionExport.tsv.gz
cosmic.mutant_export.path = /data/cosmic/CosmicMutantExport.tsv
cosmic.user = curator@example.org
cosmic.password = s3cret
reports.dir=/data/reports
";

#[test]
fn resolve_config_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("config.properties");
    fs::write(&path, SAMPLE).unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.person_id, DbId::new(8939149));
    assert_eq!(resolved.kb_snapshot, Utf8PathBuf::from("/data/kb/snapshot.json"));
    assert_eq!(
        resolved.fusion_export.archive(),
        Utf8PathBuf::from("/data/cosmic/CosmicFusionExport.tsv.gz")
    );
    assert!(resolved.fusion_export.url.is_some());
    assert_eq!(resolved.mutation_tracking.url, None);
    assert_eq!(
        resolved.reference_files().mutant_export,
        Utf8PathBuf::from("/data/cosmic/CosmicMutantExport.tsv")
    );
    assert_eq!(
        resolved.credentials,
        Some(Credentials {
            user: "curator@example.org".to_string(),
            password: "s3cret".to_string(),
        })
    );
    assert_eq!(resolved.reports_dir, Utf8PathBuf::from("/data/reports"));
    assert_eq!(resolved.sources().len(), 3);
}

#[test]
fn credentials_are_redacted_in_debug_output() {
    let credentials = Credentials {
        user: "curator".to_string(),
        password: "s3cret".to_string(),
    };
    let debug = format!("{credentials:?}");
    assert!(debug.contains("curator"));
    assert!(!debug.contains("s3cret"));
}

#[test]
fn missing_config_file() {
    assert_matches!(
        ConfigLoader::resolve(Some("/nonexistent/config.properties")),
        Err(CosmicError::MissingConfig(_))
    );
}

#[test]
fn person_id_is_required_and_numeric() {
    let mut properties = Properties::default();
    properties.set(keys::KB_SNAPSHOT, "kb.json");
    assert_matches!(
        ConfigLoader::resolve_properties(properties.clone()),
        Err(CosmicError::ConfigValue { ref key, .. }) if key == keys::PERSON_ID
    );

    properties.set(keys::PERSON_ID, "curator");
    assert_matches!(
        ConfigLoader::resolve_properties(properties),
        Err(CosmicError::ConfigValue { ref key, .. }) if key == keys::PERSON_ID
    );
}

#[test]
fn partial_credentials_are_ignored() {
    let mut properties = Properties::default();
    properties.set(keys::PERSON_ID, "1");
    properties.set(keys::KB_SNAPSHOT, "kb.json");
    properties.set(keys::USER, "curator");
    let resolved = ConfigLoader::resolve_properties(properties).unwrap();
    assert_eq!(resolved.credentials, None);
}
