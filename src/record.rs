use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::domain::{CosmicPrefix, DbId, KeyingPolicy, PREFIX_MARKER};

/// Classification and validation state of one legacy identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierRecord {
    identifier: String,
    db_id: DbId,
    suggested_prefix: Option<CosmicPrefix>,
    valid: bool,
    replacement: Option<String>,
    mutation_ids: BTreeSet<String>,
}

impl IdentifierRecord {
    pub fn new(identifier: impl Into<String>, db_id: DbId) -> Self {
        Self {
            identifier: identifier.into(),
            db_id,
            suggested_prefix: None,
            valid: false,
            replacement: None,
            mutation_ids: BTreeSet::new(),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn db_id(&self) -> DbId {
        self.db_id
    }

    pub fn suggested_prefix(&self) -> Option<CosmicPrefix> {
        self.suggested_prefix
    }

    pub fn set_suggested_prefix(&mut self, prefix: CosmicPrefix) {
        self.suggested_prefix = Some(prefix);
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn mark_valid(&mut self) {
        self.valid = true;
    }

    /// Modern (COSV) identifier that supersedes this one, if any was found.
    pub fn replacement(&self) -> Option<&str> {
        self.replacement.as_deref()
    }

    pub fn set_replacement(&mut self, value: impl Into<String>) {
        self.replacement = Some(value.into());
    }

    pub fn mutation_ids(&self) -> &BTreeSet<String> {
        &self.mutation_ids
    }

    pub fn add_mutation_id(&mut self, value: impl Into<String>) {
        self.mutation_ids.insert(value.into());
    }

    pub fn key(&self) -> String {
        record_key(&self.identifier, self.suggested_prefix)
    }

    /// Invalid records sort first, then by identifier.
    pub fn report_order(&self, other: &Self) -> Ordering {
        self.valid
            .cmp(&other.valid)
            .then_with(|| self.identifier.cmp(&other.identifier))
    }
}

impl fmt::Display for IdentifierRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = self
            .suggested_prefix
            .map(|p| p.as_str())
            .unwrap_or("-");
        let replacement = self.replacement.as_deref().unwrap_or("-");
        let ids = self
            .mutation_ids
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(",");
        write!(
            f,
            "[{}; {}; {}; {}; {}; ({})]",
            self.db_id, self.identifier, prefix, self.valid, replacement, ids
        )
    }
}

/// Index key for an identifier: already-prefixed values key as themselves,
/// bare values take the suggested prefix when one was computed.
pub fn record_key(identifier: &str, prefix: Option<CosmicPrefix>) -> String {
    if identifier.starts_with(PREFIX_MARKER) {
        return identifier.to_string();
    }
    match prefix {
        Some(prefix) => format!("{prefix}{identifier}"),
        None => identifier.to_string(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordIndex {
    policy: KeyingPolicy,
    entries: HashMap<String, Vec<IdentifierRecord>>,
}

impl RecordIndex {
    pub fn new(policy: KeyingPolicy) -> Self {
        Self {
            policy,
            entries: HashMap::new(),
        }
    }

    pub fn policy(&self) -> KeyingPolicy {
        self.policy
    }

    /// Inserts under the record's computed key and returns that key.
    pub fn insert(&mut self, record: IdentifierRecord) -> String {
        let key = record.key();
        match self.policy {
            KeyingPolicy::ListPerKey => {
                self.entries.entry(key.clone()).or_default().push(record);
            }
            KeyingPolicy::LastPerKey => {
                self.entries.insert(key.clone(), vec![record]);
            }
        }
        key
    }

    pub fn get(&self, key: &str) -> Option<&[IdentifierRecord]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Vec<IdentifierRecord>> {
        self.entries.get_mut(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn records(&self) -> impl Iterator<Item = &IdentifierRecord> {
        self.entries.values().flatten()
    }

    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    pub fn record_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All records, invalid first and then by identifier.
    pub fn sorted_records(&self) -> Vec<&IdentifierRecord> {
        let mut records = self.records().collect::<Vec<_>>();
        records.sort_by(|a, b| a.report_order(b));
        records
    }

    pub fn into_records(self) -> Vec<IdentifierRecord> {
        self.entries.into_values().flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(identifier: &str, id: u64, prefix: Option<CosmicPrefix>) -> IdentifierRecord {
        let mut record = IdentifierRecord::new(identifier, DbId::new(id));
        if let Some(prefix) = prefix {
            record.set_suggested_prefix(prefix);
        }
        record
    }

    #[test]
    fn key_uses_prefix_for_bare_identifiers() {
        assert_eq!(record_key("5678", Some(CosmicPrefix::Legacy)), "COSM5678");
        assert_eq!(record_key("44444", Some(CosmicPrefix::Fusion)), "COSF44444");
        assert_eq!(record_key("COSM1111", Some(CosmicPrefix::Fusion)), "COSM1111");
        assert_eq!(record_key("1234", None), "1234");
    }

    #[test]
    fn list_policy_keeps_collisions() {
        let mut index = RecordIndex::new(KeyingPolicy::ListPerKey);
        index.insert(record("5678", 1, Some(CosmicPrefix::Legacy)));
        index.insert(record("COSM5678", 2, None));
        assert_eq!(index.key_count(), 1);
        assert_eq!(index.record_count(), 2);
    }

    #[test]
    fn last_policy_overwrites_collisions() {
        let mut index = RecordIndex::new(KeyingPolicy::LastPerKey);
        index.insert(record("5678", 1, Some(CosmicPrefix::Legacy)));
        index.insert(record("COSM5678", 2, None));
        let kept = index.get("COSM5678").unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].db_id(), DbId::new(2));
    }

    #[test]
    fn report_order_puts_invalid_first() {
        let mut valid = record("A1", 1, None);
        valid.mark_valid();
        let invalid_b = record("B2", 2, None);
        let invalid_a = record("A9", 3, None);

        let mut index = RecordIndex::new(KeyingPolicy::ListPerKey);
        index.insert(valid);
        index.insert(invalid_b);
        index.insert(invalid_a);

        let order = index
            .sorted_records()
            .into_iter()
            .map(|r| r.identifier().to_string())
            .collect::<Vec<_>>();
        assert_eq!(order, vec!["A9", "B2", "A1"]);
    }
}
