use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::sync::{Mutex, MutexGuard};

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::DbId;
use crate::error::CosmicError;
use crate::knowledge::{Attribute, AttributeValue, Instance, KnowledgeBase, schema};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub next_db_id: Option<u64>,
    #[serde(default)]
    pub instances: Vec<StoredInstance>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredInstance {
    pub db_id: DbId,
    pub class: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl StoredInstance {
    pub fn new(db_id: u64, class: &str) -> Self {
        Self {
            db_id: DbId::new(db_id),
            class: class.to_string(),
            display_name: String::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn named(mut self, display_name: &str) -> Self {
        self.display_name = display_name.to_string();
        self
    }

    pub fn with(mut self, attribute: Attribute, value: AttributeValue) -> Self {
        self.attributes.insert(attribute.as_str().to_string(), value);
        self
    }

    pub fn with_text(self, attribute: Attribute, value: &str) -> Self {
        self.with(attribute, AttributeValue::Text(value.to_string()))
    }

    pub fn with_instance(self, attribute: Attribute, id: u64) -> Self {
        self.with(attribute, AttributeValue::Instance(DbId::new(id)))
    }

    pub fn with_instances(self, attribute: Attribute, ids: &[u64]) -> Self {
        let ids = ids.iter().copied().map(DbId::new).collect();
        self.with(attribute, AttributeValue::Instances(ids))
    }

    fn handle(&self) -> Instance {
        Instance {
            db_id: self.db_id,
            class: self.class.clone(),
            display_name: self.display_name.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    instances: BTreeMap<DbId, StoredInstance>,
    staged: HashMap<(DbId, Attribute), AttributeValue>,
    next_db_id: u64,
    dirty: bool,
}

impl State {
    fn stored(&self, id: DbId) -> Result<&StoredInstance, CosmicError> {
        self.instances
            .get(&id)
            .ok_or(CosmicError::InstanceNotFound(id.get()))
    }

    fn value(
        &self,
        id: DbId,
        attribute: Attribute,
    ) -> Result<Option<AttributeValue>, CosmicError> {
        if let Some(value) = self.staged.get(&(id, attribute)) {
            return Ok(Some(value.clone()));
        }
        let stored = self.stored(id)?;
        if attribute == Attribute::DisplayName {
            return Ok(Some(AttributeValue::Text(stored.display_name.clone())));
        }
        Ok(stored.attributes.get(attribute.as_str()).cloned())
    }
}

/// Knowledge base held in memory and optionally backed by a JSON snapshot on disk.
#[derive(Debug)]
pub struct SnapshotKnowledgeBase {
    path: Option<Utf8PathBuf>,
    state: Mutex<State>,
}

impl SnapshotKnowledgeBase {
    pub fn open(path: &Utf8Path) -> Result<Self, CosmicError> {
        if !path.as_std_path().exists() {
            return Err(CosmicError::MissingInput(path.as_std_path().to_path_buf()));
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| CosmicError::Filesystem(format!("read {path}: {err}")))?;
        let snapshot: Snapshot = serde_json::from_str(&content)
            .map_err(|err| CosmicError::KnowledgeBase(format!("parse {path}: {err}")))?;
        let mut kb = Self::from_snapshot(snapshot);
        kb.path = Some(path.to_path_buf());
        Ok(kb)
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let max_id = snapshot
            .instances
            .iter()
            .map(|inst| inst.db_id.get())
            .max()
            .unwrap_or(0);
        let next_db_id = snapshot.next_db_id.unwrap_or(0).max(max_id + 1);
        let instances = snapshot
            .instances
            .into_iter()
            .map(|inst| (inst.db_id, inst))
            .collect();
        Self {
            path: None,
            state: Mutex::new(State {
                instances,
                staged: HashMap::new(),
                next_db_id,
                dirty: false,
            }),
        }
    }

    pub fn insert(&self, instance: StoredInstance) -> Result<(), CosmicError> {
        let mut state = self.lock()?;
        state.next_db_id = state.next_db_id.max(instance.db_id.get() + 1);
        state.instances.insert(instance.db_id, instance);
        state.dirty = true;
        Ok(())
    }

    /// Committed state only; staged values are left out.
    pub fn snapshot(&self) -> Result<Snapshot, CosmicError> {
        let state = self.lock()?;
        Ok(Snapshot {
            next_db_id: Some(state.next_db_id),
            instances: state.instances.values().cloned().collect(),
        })
    }

    pub fn stored(&self, id: DbId) -> Result<StoredInstance, CosmicError> {
        self.lock()?.stored(id).cloned()
    }

    /// Writes committed changes back to the snapshot file, if there is one.
    pub fn save(&self) -> Result<(), CosmicError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !self.lock()?.dirty {
            return Ok(());
        }
        let snapshot = self.snapshot()?;
        let content = serde_json::to_vec_pretty(&snapshot)
            .map_err(|err| CosmicError::Filesystem(err.to_string()))?;
        write_bytes_atomic(path, &content)?;
        self.lock()?.dirty = false;
        debug!(%path, "knowledge base snapshot written");
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, CosmicError> {
        self.state
            .lock()
            .map_err(|_| CosmicError::KnowledgeBase("snapshot state lock poisoned".to_string()))
    }
}

impl KnowledgeBase for SnapshotKnowledgeBase {
    fn fetch_by_attribute(
        &self,
        class: &str,
        attribute: Attribute,
        value: &AttributeValue,
    ) -> Result<Vec<Instance>, CosmicError> {
        let state = self.lock()?;
        let mut found = Vec::new();
        for stored in state.instances.values() {
            if stored.class != class {
                continue;
            }
            let matches = match (state.value(stored.db_id, attribute)?, value) {
                (Some(current), AttributeValue::Instance(id)) => current.references(*id),
                (Some(current), wanted) => &current == wanted,
                (None, _) => false,
            };
            if matches {
                found.push(stored.handle());
            }
        }
        Ok(found)
    }

    fn fetch_by_id(&self, id: DbId) -> Result<Instance, CosmicError> {
        Ok(self.lock()?.stored(id)?.handle())
    }

    fn attribute(
        &self,
        instance: &Instance,
        attribute: Attribute,
    ) -> Result<Option<AttributeValue>, CosmicError> {
        self.lock()?.value(instance.db_id, attribute)
    }

    fn referrers(
        &self,
        instance: &Instance,
        relation: Attribute,
    ) -> Result<Vec<Instance>, CosmicError> {
        let state = self.lock()?;
        let mut found = Vec::new();
        for stored in state.instances.values() {
            let refers = state
                .value(stored.db_id, relation)?
                .map(|value| value.references(instance.db_id))
                .unwrap_or(false);
            if refers {
                found.push(stored.handle());
            }
        }
        Ok(found)
    }

    fn set_attribute(
        &self,
        instance: &Instance,
        attribute: Attribute,
        value: AttributeValue,
    ) -> Result<(), CosmicError> {
        let mut state = self.lock()?;
        state.stored(instance.db_id)?;
        state.staged.insert((instance.db_id, attribute), value);
        Ok(())
    }

    fn persist_attribute(
        &self,
        instance: &Instance,
        attribute: Attribute,
    ) -> Result<(), CosmicError> {
        let mut state = self.lock()?;
        let Some(value) = state.staged.remove(&(instance.db_id, attribute)) else {
            return Ok(());
        };
        let stored = state
            .instances
            .get_mut(&instance.db_id)
            .ok_or(CosmicError::InstanceNotFound(instance.db_id.get()))?;
        match (attribute, value) {
            (Attribute::DisplayName, AttributeValue::Text(name)) => stored.display_name = name,
            (Attribute::DisplayName, _) => {
                return Err(CosmicError::UnexpectedAttribute {
                    db_id: instance.db_id.get(),
                    attribute: attribute.to_string(),
                    expected: "text".to_string(),
                });
            }
            (attribute, value) => {
                stored
                    .attributes
                    .insert(attribute.as_str().to_string(), value);
            }
        }
        state.dirty = true;
        Ok(())
    }

    fn create_audit_marker(&self, actor: DbId, note: &str) -> Result<Instance, CosmicError> {
        let mut state = self.lock()?;
        state.stored(actor)?;
        let db_id = state.next_db_id;
        state.next_db_id += 1;
        let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let marker = StoredInstance::new(db_id, schema::INSTANCE_EDIT)
            .named(&format!("{note} ({timestamp})"))
            .with_instance(Attribute::Author, actor.get())
            .with_text(Attribute::Note, note)
            .with_text(Attribute::DateTime, &timestamp);
        let handle = marker.handle();
        state.instances.insert(marker.db_id, marker);
        state.dirty = true;
        Ok(handle)
    }

    fn regenerate_display_name(&self, instance: &Instance) -> Result<String, CosmicError> {
        let state = self.lock()?;
        let stored = state.stored(instance.db_id)?;
        if stored.class != schema::DATABASE_IDENTIFIER {
            return Ok(stored.display_name.clone());
        }
        let identifier = match state.value(instance.db_id, Attribute::Identifier)? {
            Some(AttributeValue::Text(value)) => value,
            _ => return Ok(stored.display_name.clone()),
        };
        let database_name = match state.value(instance.db_id, Attribute::ReferenceDatabase)? {
            Some(AttributeValue::Instance(id)) => match state.value(id, Attribute::Name)? {
                Some(AttributeValue::Text(name)) => Some(name),
                _ => None,
            },
            _ => None,
        };
        Ok(match database_name {
            Some(name) => format!("{name}:{identifier}"),
            None => identifier,
        })
    }

    fn flush(&self) -> Result<(), CosmicError> {
        self.save()
    }
}

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), CosmicError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| CosmicError::Filesystem(err.to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix("cosmic-update")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| CosmicError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| CosmicError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| CosmicError::Filesystem(err.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SnapshotKnowledgeBase {
        SnapshotKnowledgeBase::from_snapshot(Snapshot {
            next_db_id: None,
            instances: vec![
                StoredInstance::new(1, schema::REFERENCE_DATABASE)
                    .named("COSMIC")
                    .with_text(Attribute::Name, "COSMIC"),
                StoredInstance::new(10, schema::DATABASE_IDENTIFIER)
                    .named("COSMIC:5678")
                    .with_text(Attribute::Identifier, "5678")
                    .with_instance(Attribute::ReferenceDatabase, 1),
                StoredInstance::new(20, schema::ENTITY_WITH_ACCESSIONED_SEQUENCE)
                    .with_instances(Attribute::CrossReference, &[10]),
                StoredInstance::new(99, "Person").named("Curator"),
            ],
        })
    }

    #[test]
    fn staged_values_visible_before_persist() {
        let kb = sample();
        let target = kb.fetch_by_id(DbId::new(10)).unwrap();
        kb.set_attribute(
            &target,
            Attribute::Identifier,
            AttributeValue::Text("COSM5678".to_string()),
        )
        .unwrap();

        let read = kb.attribute(&target, Attribute::Identifier).unwrap();
        assert_eq!(read, Some(AttributeValue::Text("COSM5678".to_string())));
        let committed = kb.stored(DbId::new(10)).unwrap();
        assert_eq!(
            committed.attributes.get("identifier"),
            Some(&AttributeValue::Text("5678".to_string()))
        );

        kb.persist_attribute(&target, Attribute::Identifier).unwrap();
        let committed = kb.stored(DbId::new(10)).unwrap();
        assert_eq!(
            committed.attributes.get("identifier"),
            Some(&AttributeValue::Text("COSM5678".to_string()))
        );
    }

    #[test]
    fn referrers_and_fetch_by_reference() {
        let kb = sample();
        let target = kb.fetch_by_id(DbId::new(10)).unwrap();
        let referrers = kb.referrers(&target, Attribute::CrossReference).unwrap();
        assert_eq!(referrers.len(), 1);
        assert_eq!(referrers[0].db_id, DbId::new(20));

        let by_db = kb
            .fetch_by_attribute(
                schema::DATABASE_IDENTIFIER,
                Attribute::ReferenceDatabase,
                &AttributeValue::Instance(DbId::new(1)),
            )
            .unwrap();
        assert_eq!(by_db, vec![target]);
    }

    #[test]
    fn audit_markers_get_fresh_ids() {
        let kb = sample();
        let first = kb.create_audit_marker(DbId::new(99), "first").unwrap();
        let second = kb.create_audit_marker(DbId::new(99), "second").unwrap();
        assert_eq!(first.db_id, DbId::new(100));
        assert_eq!(second.db_id, DbId::new(101));
        assert!(first.is_class(schema::INSTANCE_EDIT));
    }

    #[test]
    fn display_name_uses_database_and_identifier() {
        let kb = sample();
        let target = kb.fetch_by_id(DbId::new(10)).unwrap();
        kb.set_attribute(
            &target,
            Attribute::Identifier,
            AttributeValue::Text("COSV1".to_string()),
        )
        .unwrap();
        assert_eq!(kb.regenerate_display_name(&target).unwrap(), "COSMIC:COSV1");
    }

    #[test]
    fn flush_round_trips_through_disk() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("kb.json")).unwrap();
        let content = serde_json::to_vec_pretty(&sample().snapshot().unwrap()).unwrap();
        std::fs::write(path.as_std_path(), content).unwrap();

        let kb = SnapshotKnowledgeBase::open(&path).unwrap();
        let target = kb.fetch_by_id(DbId::new(10)).unwrap();
        kb.set_attribute(
            &target,
            Attribute::Identifier,
            AttributeValue::Text("COSM5678".to_string()),
        )
        .unwrap();
        kb.persist_attribute(&target, Attribute::Identifier).unwrap();
        kb.flush().unwrap();

        let reopened = SnapshotKnowledgeBase::open(&path).unwrap();
        let target = reopened.fetch_by_id(DbId::new(10)).unwrap();
        assert_eq!(
            reopened.attribute(&target, Attribute::Identifier).unwrap(),
            Some(AttributeValue::Text("COSM5678".to_string()))
        );
    }
}
