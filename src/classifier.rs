//! Suggests a canonical prefix for a legacy identifier by looking at the
//! sequences that cross-reference it.
//!
//! A referring `EntityWithAccessionedSequence` whose fragment modifications
//! point at a different reference sequence than its own is a fusion, and
//! suggests `COSF`; otherwise the suggestion is `COSM`.

use tracing::debug;

use crate::domain::{CosmicPrefix, MismatchAggregation};
use crate::error::CosmicError;
use crate::knowledge::{Attribute, Instance, KnowledgeBase, KnowledgeBaseExt, schema};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Classification {
    pub prefix: Option<CosmicPrefix>,
    /// True when nothing cross-references the identifier.
    pub no_referrers: bool,
    /// Referrers that are not accessioned sequences, in the order they were seen.
    pub non_sequence_referrers: Vec<Instance>,
}

pub struct PrefixClassifier<'a, K: KnowledgeBase + ?Sized> {
    kb: &'a K,
    aggregation: MismatchAggregation,
}

impl<'a, K: KnowledgeBase + ?Sized> PrefixClassifier<'a, K> {
    pub fn new(kb: &'a K, aggregation: MismatchAggregation) -> Self {
        Self { kb, aggregation }
    }

    /// Classifies the identifier instance `target`, whose value is `identifier`.
    pub fn classify(
        &self,
        identifier: &str,
        target: &Instance,
    ) -> Result<Classification, CosmicError> {
        let referrers = self.kb.referrers(target, Attribute::CrossReference)?;
        self.classify_referrers(identifier, &referrers)
    }

    pub fn classify_referrers(
        &self,
        identifier: &str,
        referrers: &[Instance],
    ) -> Result<Classification, CosmicError> {
        let mut classification = Classification::default();
        if referrers.is_empty() {
            debug!(identifier, "no referrers");
            classification.no_referrers = true;
            return Ok(classification);
        }

        let mut any_mismatch = false;
        for referrer in referrers {
            if !referrer.is_class(schema::ENTITY_WITH_ACCESSIONED_SEQUENCE) {
                classification.non_sequence_referrers.push(referrer.clone());
                continue;
            }
            let mismatch = self.has_mismatched_fragment(referrer)?;
            any_mismatch |= mismatch;
            let fusion = match self.aggregation {
                MismatchAggregation::LastWins => mismatch,
                MismatchAggregation::AnyMismatch => any_mismatch,
            };
            classification.prefix = Some(if fusion {
                CosmicPrefix::Fusion
            } else {
                CosmicPrefix::Legacy
            });
        }
        Ok(classification)
    }

    /// True when a fragment modification on `sequence` refers to a reference
    /// sequence other than the sequence's own reference entity.
    pub fn has_mismatched_fragment(&self, sequence: &Instance) -> Result<bool, CosmicError> {
        // Only needed once a fragment residue turns up.
        let mut reference = None;
        for residue in self.kb.instances(sequence, Attribute::HasModifiedResidue)? {
            if !is_fragment_modification(&residue) {
                continue;
            }
            let reference_id = match reference {
                Some(id) => id,
                None => {
                    let id = self
                        .kb
                        .required_instance(sequence, Attribute::ReferenceEntity)?
                        .db_id;
                    reference = Some(id);
                    id
                }
            };
            let residue_reference = self
                .kb
                .required_instance(&residue, Attribute::ReferenceSequence)?;
            if residue_reference.db_id != reference_id {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn is_fragment_modification(residue: &Instance) -> bool {
    residue.class.contains(schema::FRAGMENT_REPLACED_MODIFICATION)
        || residue.class.contains(schema::FRAGMENT_INSERTION_MODIFICATION)
}
