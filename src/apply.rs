//! Writes reconciliation results back into the knowledge base.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use serde::Serialize;
use tracing::{debug, error, info};

use crate::domain::{CosmicPrefix, DbId, has_prefix_marker};
use crate::error::CosmicError;
use crate::knowledge::{Attribute, AttributeValue, Instance, KnowledgeBase, KnowledgeBaseExt};
use crate::record::IdentifierRecord;

/// Why an identifier was rewritten. Each reason gets one shared audit marker per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateReason {
    GenomicReplacement,
    LegacyPrefix,
}

impl UpdateReason {
    pub fn note(self) -> &'static str {
        match self {
            UpdateReason::GenomicReplacement => {
                "Identifier was automatically updated to new \"COSV\" identifier by COSMIC Update process."
            }
            UpdateReason::LegacyPrefix => {
                "Identifier was automatically prepended with \"COSM\" by COSMIC Update process."
            }
        }
    }
}

/// Audit markers for one run, created on first use.
#[derive(Debug)]
pub struct AuditMarkers {
    actor: DbId,
    created: Mutex<HashMap<UpdateReason, Instance>>,
}

impl AuditMarkers {
    pub fn new(actor: DbId) -> Self {
        Self {
            actor,
            created: Mutex::new(HashMap::new()),
        }
    }

    pub fn actor(&self) -> DbId {
        self.actor
    }

    pub fn marker<K: KnowledgeBase + ?Sized>(
        &self,
        kb: &K,
        reason: UpdateReason,
    ) -> Result<Instance, CosmicError> {
        let mut created = self
            .created
            .lock()
            .map_err(|_| CosmicError::KnowledgeBase("audit marker lock poisoned".to_string()))?;
        if let Some(marker) = created.get(&reason) {
            return Ok(marker.clone());
        }
        let marker = kb.create_audit_marker(self.actor, reason.note())?;
        info!(db_id = %marker.db_id, ?reason, "created audit marker");
        created.insert(reason, marker.clone());
        Ok(marker)
    }

    /// Markers created so far.
    pub fn created(&self) -> Vec<Instance> {
        self.created
            .lock()
            .map(|created| created.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Replaced { from: String, to: String },
    Prepended { from: String, to: String },
    AlreadyPrefixed,
    NotApplicable,
}

impl fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateOutcome::Replaced { from, to } => write!(f, "replaced {from} with {to}"),
            UpdateOutcome::Prepended { from, to } => write!(f, "prefixed {from} as {to}"),
            UpdateOutcome::AlreadyPrefixed => f.write_str("already prefixed"),
            UpdateOutcome::NotApplicable => f.write_str("no update applies"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApplySummary {
    pub replaced: usize,
    pub prepended: usize,
    pub already_prefixed: usize,
    pub unchanged: usize,
    pub failed: usize,
}

impl ApplySummary {
    fn record(&mut self, outcome: &UpdateOutcome) {
        match outcome {
            UpdateOutcome::Replaced { .. } => self.replaced += 1,
            UpdateOutcome::Prepended { .. } => self.prepended += 1,
            UpdateOutcome::AlreadyPrefixed => self.already_prefixed += 1,
            UpdateOutcome::NotApplicable => self.unchanged += 1,
        }
    }
}

pub struct UpdateDecisionApplier<'a, K: KnowledgeBase + ?Sized> {
    kb: &'a K,
    markers: &'a AuditMarkers,
}

impl<'a, K: KnowledgeBase + ?Sized> UpdateDecisionApplier<'a, K> {
    pub fn new(kb: &'a K, markers: &'a AuditMarkers) -> Self {
        Self { kb, markers }
    }

    /// Applies at most one change for `record`.
    ///
    /// A replacement identifier wins over everything else. Otherwise a
    /// record suggested as `COSM` gets the prefix prepended, unless the
    /// stored identifier already starts with `C`.
    pub fn apply(&self, record: &IdentifierRecord) -> Result<UpdateOutcome, CosmicError> {
        if let Some(replacement) = record.replacement().filter(|value| !value.is_empty()) {
            let marker = self
                .markers
                .marker(self.kb, UpdateReason::GenomicReplacement)?;
            let target = self.kb.fetch_by_id(record.db_id())?;
            let current = self
                .kb
                .text(&target, Attribute::Identifier)?
                .unwrap_or_default();
            self.rewrite(&target, &marker, replacement)?;
            return Ok(UpdateOutcome::Replaced {
                from: current,
                to: replacement.to_string(),
            });
        }

        if record.suggested_prefix() == Some(CosmicPrefix::Legacy) {
            let target = self.kb.fetch_by_id(record.db_id())?;
            let current = self.kb.required_text(&target, Attribute::Identifier)?;
            if has_prefix_marker(&current) {
                debug!(db_id = %record.db_id(), identifier = %current, "already prefixed");
                return Ok(UpdateOutcome::AlreadyPrefixed);
            }
            let marker = self.markers.marker(self.kb, UpdateReason::LegacyPrefix)?;
            let prefixed = format!("{}{current}", CosmicPrefix::Legacy);
            self.rewrite(&target, &marker, &prefixed)?;
            return Ok(UpdateOutcome::Prepended {
                from: current,
                to: prefixed,
            });
        }

        info!(
            identifier = record.identifier(),
            db_id = %record.db_id(),
            "no suggested prefix or COSV identifier; identifier will not be updated"
        );
        Ok(UpdateOutcome::NotApplicable)
    }

    /// Applies every record; a failing record is logged and counted, the rest still run.
    pub fn apply_all<'r>(
        &self,
        records: impl IntoIterator<Item = &'r IdentifierRecord>,
    ) -> ApplySummary {
        let mut summary = ApplySummary::default();
        for record in records {
            match self.apply(record) {
                Ok(outcome) => {
                    debug!(record = %record, %outcome, "identifier processed");
                    summary.record(&outcome);
                }
                Err(err) => {
                    error!(record = %record, error = %err, "failed to update identifier");
                    summary.failed += 1;
                }
            }
        }
        info!(
            replaced = summary.replaced,
            prepended = summary.prepended,
            already_prefixed = summary.already_prefixed,
            unchanged = summary.unchanged,
            failed = summary.failed,
            "identifier updates finished"
        );
        summary
    }

    fn rewrite(
        &self,
        target: &Instance,
        marker: &Instance,
        identifier: &str,
    ) -> Result<(), CosmicError> {
        let mut modified = self.kb.instance_ids(target, Attribute::Modified)?;
        modified.push(marker.db_id);
        self.kb.set_attribute(
            target,
            Attribute::Modified,
            AttributeValue::Instances(modified),
        )?;
        self.kb.set_attribute(
            target,
            Attribute::Identifier,
            AttributeValue::Text(identifier.to_string()),
        )?;
        let display_name = self.kb.regenerate_display_name(target)?;
        self.kb.set_attribute(
            target,
            Attribute::DisplayName,
            AttributeValue::Text(display_name),
        )?;

        for attribute in [Attribute::Identifier, Attribute::Modified, Attribute::DisplayName] {
            self.kb.persist_attribute(target, attribute)?;
        }
        Ok(())
    }
}
