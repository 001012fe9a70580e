use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::classifier::{Classification, PrefixClassifier};
use crate::correlate::{self, CorrelationStats, ReferenceFiles};
use crate::domain::{KeyingPolicy, MismatchAggregation, is_genomic_identifier};
use crate::error::CosmicError;
use crate::knowledge::{
    Attribute, AttributeValue, Instance, KnowledgeBase, KnowledgeBaseExt, schema,
};
use crate::record::{IdentifierRecord, RecordIndex};

/// A `DatabaseIdentifier` of the COSMIC reference database, with its identifier value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub instance: Instance,
    pub identifier: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CandidateSelection {
    pub fetched: usize,
    pub kept: usize,
}

/// Loads every legacy COSMIC identifier, leaving out the genomic (COSV) ones.
pub fn select_candidates<K: KnowledgeBase + ?Sized>(
    kb: &K,
) -> Result<(Vec<Candidate>, CandidateSelection), CosmicError> {
    let databases = kb.fetch_by_attribute(
        schema::REFERENCE_DATABASE,
        Attribute::Name,
        &AttributeValue::Text(schema::COSMIC_DATABASE_NAME.to_string()),
    )?;
    let [database] = databases.as_slice() else {
        return Err(CosmicError::ReferenceDatabaseCardinality {
            name: schema::COSMIC_DATABASE_NAME.to_string(),
            count: databases.len(),
        });
    };

    let identifiers = kb.fetch_by_attribute(
        schema::DATABASE_IDENTIFIER,
        Attribute::ReferenceDatabase,
        &AttributeValue::Instance(database.db_id),
    )?;
    let fetched = identifiers.len();
    info!(count = fetched, "COSMIC identifiers in the knowledge base");

    let mut candidates = Vec::with_capacity(fetched);
    for instance in identifiers {
        let identifier = match kb.text(&instance, Attribute::Identifier)? {
            Some(identifier) if !identifier.trim().is_empty() => identifier,
            _ => {
                warn!(db_id = %instance.db_id, "skipping empty COSMIC identifier");
                continue;
            }
        };
        if is_genomic_identifier(&identifier) {
            continue;
        }
        candidates.push(Candidate {
            instance,
            identifier,
        });
    }
    let selection = CandidateSelection {
        fetched,
        kept: candidates.len(),
    };
    info!(count = selection.kept, "COSMIC identifiers after COSV filter");
    Ok((candidates, selection))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    pub aggregation: MismatchAggregation,
    pub keying: KeyingPolicy,
    /// Classification workers; 0 or 1 classifies on the calling thread.
    pub threads: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            aggregation: MismatchAggregation::default(),
            keying: KeyingPolicy::default(),
            threads: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NonSequenceReferrer {
    pub identifier: String,
    pub entity: String,
}

/// Side-channel findings collected while classifying.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditTrail {
    pub no_referrers: Vec<String>,
    pub non_sequence_referrers: Vec<NonSequenceReferrer>,
}

#[derive(Debug)]
pub struct Reconciliation {
    pub index: RecordIndex,
    pub audit: AuditTrail,
    pub correlation: CorrelationStats,
}

pub struct ReconciliationEngine<'a, K: KnowledgeBase + ?Sized> {
    kb: &'a K,
    options: EngineOptions,
}

impl<'a, K: KnowledgeBase + ?Sized> ReconciliationEngine<'a, K> {
    pub fn new(kb: &'a K, options: EngineOptions) -> Self {
        Self { kb, options }
    }

    /// Classifies every candidate, keeping candidate order.
    pub fn classify_all(
        &self,
        candidates: &[Candidate],
    ) -> Result<Vec<Classification>, CosmicError> {
        let classifier = PrefixClassifier::new(self.kb, self.options.aggregation);
        let classify = |candidate: &Candidate| {
            classifier.classify(&candidate.identifier, &candidate.instance)
        };

        if self.options.threads <= 1 || candidates.len() <= 1 {
            return candidates.iter().map(classify).collect();
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.threads)
            .build()
            .map_err(|err| CosmicError::WorkerPool(err.to_string()))?;
        pool.install(|| candidates.par_iter().map(classify).collect())
    }

    /// Classifies and indexes the candidates. Insertion is sequential, in candidate order.
    pub fn build_index(
        &self,
        candidates: &[Candidate],
    ) -> Result<(RecordIndex, AuditTrail), CosmicError> {
        let classifications = self.classify_all(candidates)?;
        let mut index = RecordIndex::new(self.options.keying);
        let mut audit = AuditTrail::default();

        for (candidate, classification) in candidates.iter().zip(classifications) {
            let mut record =
                IdentifierRecord::new(candidate.identifier.as_str(), candidate.instance.db_id);
            if let Some(prefix) = classification.prefix {
                record.set_suggested_prefix(prefix);
            }
            if classification.no_referrers {
                audit.no_referrers.push(candidate.identifier.clone());
            }
            for referrer in classification.non_sequence_referrers {
                audit.non_sequence_referrers.push(NonSequenceReferrer {
                    identifier: candidate.identifier.clone(),
                    entity: referrer.to_string(),
                });
            }
            let key = index.insert(record);
            debug!(identifier = %candidate.identifier, %key, "indexed");
        }

        info!(
            records = index.record_count(),
            keys = index.key_count(),
            no_referrers = audit.no_referrers.len(),
            non_sequence_referrers = audit.non_sequence_referrers.len(),
            "classification finished"
        );
        Ok((index, audit))
    }

    /// Classification, indexing, then the three correlation passes.
    pub fn reconcile(
        &self,
        candidates: &[Candidate],
        files: &ReferenceFiles,
    ) -> Result<Reconciliation, CosmicError> {
        let (mut index, audit) = self.build_index(candidates)?;
        let correlation = correlate::correlate(&mut index, files)?;
        Ok(Reconciliation {
            index,
            audit,
            correlation,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::store::{Snapshot, SnapshotKnowledgeBase, StoredInstance};

    fn kb(databases: usize) -> SnapshotKnowledgeBase {
        let mut instances = Vec::new();
        for offset in 0..databases as u64 {
            instances.push(
                StoredInstance::new(1 + offset, schema::REFERENCE_DATABASE)
                    .with_text(Attribute::Name, schema::COSMIC_DATABASE_NAME),
            );
        }
        instances.push(
            StoredInstance::new(5, schema::REFERENCE_DATABASE)
                .with_text(Attribute::Name, "UniProt"),
        );
        for (db_id, identifier, database) in [
            (10, "5678", 1),
            (11, "COSV55386424", 1),
            (12, "cosv1", 1),
            (13, "COSM99", 1),
            (14, "P04637", 5),
        ] {
            instances.push(
                StoredInstance::new(db_id, schema::DATABASE_IDENTIFIER)
                    .with_text(Attribute::Identifier, identifier)
                    .with_instance(Attribute::ReferenceDatabase, database),
            );
        }
        // No identifier value at all.
        instances.push(
            StoredInstance::new(15, schema::DATABASE_IDENTIFIER)
                .with_instance(Attribute::ReferenceDatabase, 1),
        );
        SnapshotKnowledgeBase::from_snapshot(Snapshot {
            next_db_id: None,
            instances,
        })
    }

    #[test]
    fn candidates_skip_genomic_and_missing_identifiers() {
        let (candidates, selection) = select_candidates(&kb(1)).unwrap();
        let identifiers = candidates
            .iter()
            .map(|c| c.identifier.as_str())
            .collect::<Vec<_>>();
        assert_eq!(identifiers, vec!["5678", "COSM99"]);
        assert_eq!(selection, CandidateSelection { fetched: 5, kept: 2 });
    }

    #[test]
    fn reference_database_must_be_unique() {
        assert_matches!(
            select_candidates(&kb(2)),
            Err(CosmicError::ReferenceDatabaseCardinality { count: 2, .. })
        );
        assert_matches!(
            select_candidates(&kb(0)),
            Err(CosmicError::ReferenceDatabaseCardinality { count: 0, .. })
        );
    }

    #[test]
    fn unreferenced_candidates_are_audited_once() {
        let kb = kb(1);
        let (candidates, _) = select_candidates(&kb).unwrap();
        let engine = ReconciliationEngine::new(&kb, EngineOptions::default());
        let (index, audit) = engine.build_index(&candidates).unwrap();
        assert_eq!(audit.no_referrers, vec!["5678".to_string(), "COSM99".to_string()]);
        assert!(index.contains_key("5678"));
        assert!(index.contains_key("COSM99"));
    }

    #[test]
    fn parallel_classification_keeps_order() {
        let kb = kb(1);
        let (candidates, _) = select_candidates(&kb).unwrap();
        let options = EngineOptions {
            threads: 4,
            ..EngineOptions::default()
        };
        let engine = ReconciliationEngine::new(&kb, options);
        let classifications = engine.classify_all(&candidates).unwrap();
        assert_eq!(classifications.len(), candidates.len());
        assert!(classifications.iter().all(|c| c.no_referrers));
    }

    #[test]
    fn worker_pool_failure_is_not_a_knowledge_base_error() {
        let err = CosmicError::WorkerPool("thread spawn refused".to_string());
        assert_eq!(err.to_string(), "failed to start worker pool: thread spawn refused");
        assert!(!matches!(err, CosmicError::KnowledgeBase(_)));
    }
}
