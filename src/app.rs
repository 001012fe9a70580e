use camino::Utf8PathBuf;
use chrono::Local;
use serde::Serialize;
use tracing::info;

use crate::apply::{ApplySummary, AuditMarkers, UpdateDecisionApplier};
use crate::config::ResolvedConfig;
use crate::correlate::CorrelationStats;
use crate::domain::{KeyingPolicy, MaxFileAge, MismatchAggregation};
use crate::download::{CosmicFileClient, PrepareSummary, ReferenceDownloader};
use crate::engine::{CandidateSelection, EngineOptions, ReconciliationEngine, select_candidates};
use crate::error::CosmicError;
use crate::knowledge::KnowledgeBase;
use crate::report::{ReportPaths, ReportWriter, report_timestamp};

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub apply_updates: bool,
    pub max_file_age: MaxFileAge,
    pub skip_download: bool,
    /// Overrides `reports.dir` from the config file.
    pub reports_dir: Option<Utf8PathBuf>,
    pub engine: EngineOptions,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            apply_updates: false,
            max_file_age: MaxFileAge::default(),
            skip_download: false,
            reports_dir: None,
            engine: EngineOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub aggregation: MismatchAggregation,
    pub keying: KeyingPolicy,
    pub download: PrepareSummary,
    pub candidates: CandidateSelection,
    pub records: usize,
    pub keys: usize,
    pub valid: usize,
    pub with_replacement: usize,
    pub no_referrers: usize,
    pub non_sequence_referrers: usize,
    pub correlation: CorrelationStats,
    pub reports: ReportPaths,
    /// Absent on a report-only run.
    pub updates: Option<ApplySummary>,
}

pub struct App<K: KnowledgeBase, C: CosmicFileClient> {
    kb: K,
    client: C,
}

impl<K: KnowledgeBase, C: CosmicFileClient> App<K, C> {
    pub fn new(kb: K, client: C) -> Self {
        Self { kb, client }
    }

    pub fn knowledge_base(&self) -> &K {
        &self.kb
    }

    /// Full run: fetch reference files, reconcile, report, and optionally apply.
    pub fn run(
        &self,
        config: &ResolvedConfig,
        options: &RunOptions,
    ) -> Result<RunSummary, CosmicError> {
        let download = ReferenceDownloader::new(&self.client, options.max_file_age)
            .skip_download(options.skip_download)
            .prepare(&config.sources())?;

        let (candidates, selection) = select_candidates(&self.kb)?;
        let engine = ReconciliationEngine::new(&self.kb, options.engine);
        let reconciliation = engine.reconcile(&candidates, &config.reference_files())?;

        let reports_dir = options
            .reports_dir
            .clone()
            .unwrap_or_else(|| config.reports_dir.clone());
        let writer = ReportWriter::new(reports_dir, report_timestamp(&Local::now()));
        let reports = writer.write_all(&reconciliation.index, &reconciliation.audit)?;

        let updates = if options.apply_updates {
            let markers = AuditMarkers::new(config.person_id);
            let applier = UpdateDecisionApplier::new(&self.kb, &markers);
            let summary = applier.apply_all(reconciliation.index.sorted_records());
            self.kb.flush()?;
            Some(summary)
        } else {
            info!("report-only run; the knowledge base was not modified");
            None
        };

        let index = &reconciliation.index;
        Ok(RunSummary {
            aggregation: options.engine.aggregation,
            keying: options.engine.keying,
            download,
            candidates: selection,
            records: index.record_count(),
            keys: index.key_count(),
            valid: index.records().filter(|r| r.is_valid()).count(),
            with_replacement: index
                .records()
                .filter(|r| r.replacement().is_some_and(|v| !v.is_empty()))
                .count(),
            no_referrers: reconciliation.audit.no_referrers.len(),
            non_sequence_referrers: reconciliation.audit.non_sequence_referrers.len(),
            correlation: reconciliation.correlation,
            reports,
            updates,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use assert_matches::assert_matches;
    use camino::Utf8Path;

    use super::*;
    use crate::config::{ConfigLoader, Properties, keys};
    use crate::domain::DbId;
    use crate::knowledge::{Attribute, AttributeValue, schema};
    use crate::store::{Snapshot, SnapshotKnowledgeBase, StoredInstance};

    struct OfflineClient;

    impl CosmicFileClient for OfflineClient {
        fn download(&self, url: &str, _destination: &Utf8Path) -> Result<(), CosmicError> {
            Err(CosmicError::DownloadHttp(format!("offline: {url}")))
        }
    }

    fn config(root: &Utf8Path) -> ResolvedConfig {
        let mut properties = Properties::default();
        properties.set(keys::PERSON_ID, "99");
        properties.set(keys::KB_SNAPSHOT, root.join("kb.json").as_str());
        properties.set(keys::FUSION_EXPORT_PATH, root.join("fusion.tsv").as_str());
        properties.set(keys::MUTATION_TRACKING_PATH, root.join("tracking.tsv").as_str());
        properties.set(keys::MUTANT_EXPORT_PATH, root.join("mutant.tsv").as_str());
        properties.set(keys::REPORTS_DIR, root.join("reports").as_str());
        ConfigLoader::resolve_properties(properties).unwrap()
    }

    fn kb() -> SnapshotKnowledgeBase {
        SnapshotKnowledgeBase::from_snapshot(Snapshot {
            next_db_id: None,
            instances: vec![
                StoredInstance::new(1, schema::REFERENCE_DATABASE)
                    .with_text(Attribute::Name, "COSMIC"),
                StoredInstance::new(10, schema::DATABASE_IDENTIFIER)
                    .with_text(Attribute::Identifier, "1234")
                    .with_instance(Attribute::ReferenceDatabase, 1),
                StoredInstance::new(99, "Person"),
            ],
        })
    }

    fn write_inputs(root: &Utf8Path) {
        let legacy = "LEGACY_MUTATION_ID\tMUTATION_ID\tGENOMIC_MUTATION_ID\n";
        fs::write(root.join("fusion.tsv"), "FUSION_ID\n").unwrap();
        fs::write(root.join("tracking.tsv"), legacy).unwrap();
        fs::write(
            root.join("mutant.tsv"),
            format!("{legacy}1234\t1234\tCOSV2323232\n"),
        )
        .unwrap();
    }

    #[test]
    fn report_only_run_leaves_kb_alone() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(temp.path()).unwrap();
        write_inputs(root);
        let app = App::new(kb(), OfflineClient);

        let summary = app.run(&config(root), &RunOptions::default()).unwrap();
        assert_eq!(summary.records, 1);
        assert_eq!(summary.valid, 1);
        assert_eq!(summary.with_replacement, 1);
        assert_eq!(summary.no_referrers, 1);
        assert!(summary.updates.is_none());
        assert!(summary.reports.identifiers.exists());

        let stored = app.knowledge_base().stored(DbId::new(10)).unwrap();
        assert_eq!(
            stored.attributes.get("identifier"),
            Some(&AttributeValue::Text("1234".to_string()))
        );
    }

    #[test]
    fn apply_run_rewrites_identifier() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(temp.path()).unwrap();
        write_inputs(root);
        let app = App::new(kb(), OfflineClient);
        let options = RunOptions {
            apply_updates: true,
            ..RunOptions::default()
        };

        let summary = app.run(&config(root), &options).unwrap();
        let updates = summary.updates.unwrap();
        assert_eq!(updates.replaced, 1);
        assert_eq!(updates.failed, 0);
    }

    #[test]
    fn missing_reference_file_aborts() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(temp.path()).unwrap();
        let app = App::new(kb(), OfflineClient);
        assert_matches!(
            app.run(&config(root), &RunOptions::default()),
            Err(CosmicError::MissingInput(_))
        );
    }
}
