use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::DbId;
use crate::error::CosmicError;

pub mod schema {
    pub const REFERENCE_DATABASE: &str = "ReferenceDatabase";
    pub const DATABASE_IDENTIFIER: &str = "DatabaseIdentifier";
    pub const ENTITY_WITH_ACCESSIONED_SEQUENCE: &str = "EntityWithAccessionedSequence";
    pub const FRAGMENT_REPLACED_MODIFICATION: &str = "FragmentReplacedModification";
    pub const FRAGMENT_INSERTION_MODIFICATION: &str = "FragmentInsertionModification";
    pub const INSTANCE_EDIT: &str = "InstanceEdit";

    pub const COSMIC_DATABASE_NAME: &str = "COSMIC";
}

/// Attributes the reconciliation reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Attribute {
    Name,
    Identifier,
    ReferenceDatabase,
    CrossReference,
    ReferenceEntity,
    HasModifiedResidue,
    ReferenceSequence,
    Modified,
    #[serde(rename = "_displayName")]
    DisplayName,
    Author,
    Note,
    DateTime,
}

impl Attribute {
    pub fn as_str(self) -> &'static str {
        match self {
            Attribute::Name => "name",
            Attribute::Identifier => "identifier",
            Attribute::ReferenceDatabase => "referenceDatabase",
            Attribute::CrossReference => "crossReference",
            Attribute::ReferenceEntity => "referenceEntity",
            Attribute::HasModifiedResidue => "hasModifiedResidue",
            Attribute::ReferenceSequence => "referenceSequence",
            Attribute::Modified => "modified",
            Attribute::DisplayName => "_displayName",
            Attribute::Author => "author",
            Attribute::Note => "note",
            Attribute::DateTime => "dateTime",
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeValue {
    Text(String),
    Instance(DbId),
    Instances(Vec<DbId>),
}

impl AttributeValue {
    /// True when a multi-valued attribute holds `id`, or a single-valued one is `id`.
    pub fn references(&self, id: DbId) -> bool {
        match self {
            AttributeValue::Instance(value) => *value == id,
            AttributeValue::Instances(values) => values.contains(&id),
            AttributeValue::Text(_) => false,
        }
    }
}

/// Handle on one knowledge-base instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instance {
    pub db_id: DbId,
    pub class: String,
    pub display_name: String,
}

impl Instance {
    pub fn is_class(&self, class: &str) -> bool {
        self.class == class
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{}] {}", self.class, self.db_id, self.display_name)
    }
}

pub trait KnowledgeBase: Send + Sync {
    fn fetch_by_attribute(
        &self,
        class: &str,
        attribute: Attribute,
        value: &AttributeValue,
    ) -> Result<Vec<Instance>, CosmicError>;

    fn fetch_by_id(&self, id: DbId) -> Result<Instance, CosmicError>;

    fn attribute(
        &self,
        instance: &Instance,
        attribute: Attribute,
    ) -> Result<Option<AttributeValue>, CosmicError>;

    /// Instances whose `relation` attribute points at `instance`, in storage order.
    fn referrers(
        &self,
        instance: &Instance,
        relation: Attribute,
    ) -> Result<Vec<Instance>, CosmicError>;

    /// Stages a value; it is visible to reads but not persisted yet.
    fn set_attribute(
        &self,
        instance: &Instance,
        attribute: Attribute,
        value: AttributeValue,
    ) -> Result<(), CosmicError>;

    fn persist_attribute(
        &self,
        instance: &Instance,
        attribute: Attribute,
    ) -> Result<(), CosmicError>;

    fn create_audit_marker(&self, actor: DbId, note: &str) -> Result<Instance, CosmicError>;

    fn regenerate_display_name(&self, instance: &Instance) -> Result<String, CosmicError>;

    /// Makes persisted changes durable.
    fn flush(&self) -> Result<(), CosmicError> {
        Ok(())
    }
}

/// Typed reads on top of [`KnowledgeBase::attribute`].
pub trait KnowledgeBaseExt: KnowledgeBase {
    fn text(
        &self,
        instance: &Instance,
        attribute: Attribute,
    ) -> Result<Option<String>, CosmicError> {
        match self.attribute(instance, attribute)? {
            None => Ok(None),
            Some(AttributeValue::Text(value)) => Ok(Some(value)),
            Some(_) => Err(unexpected(instance, attribute, "text")),
        }
    }

    fn required_text(
        &self,
        instance: &Instance,
        attribute: Attribute,
    ) -> Result<String, CosmicError> {
        self.text(instance, attribute)?
            .ok_or_else(|| unexpected(instance, attribute, "set"))
    }

    fn instance(
        &self,
        instance: &Instance,
        attribute: Attribute,
    ) -> Result<Option<Instance>, CosmicError> {
        match self.attribute(instance, attribute)? {
            None => Ok(None),
            Some(AttributeValue::Instance(id)) => self.fetch_by_id(id).map(Some),
            Some(AttributeValue::Instances(ids)) if ids.len() == 1 => {
                self.fetch_by_id(ids[0]).map(Some)
            }
            Some(_) => Err(unexpected(instance, attribute, "a single instance")),
        }
    }

    fn required_instance(
        &self,
        instance: &Instance,
        attribute: Attribute,
    ) -> Result<Instance, CosmicError> {
        self.instance(instance, attribute)?
            .ok_or_else(|| unexpected(instance, attribute, "set"))
    }

    fn instance_ids(
        &self,
        instance: &Instance,
        attribute: Attribute,
    ) -> Result<Vec<DbId>, CosmicError> {
        match self.attribute(instance, attribute)? {
            None => Ok(Vec::new()),
            Some(AttributeValue::Instances(ids)) => Ok(ids),
            Some(AttributeValue::Instance(id)) => Ok(vec![id]),
            Some(AttributeValue::Text(_)) => {
                Err(unexpected(instance, attribute, "a list of instances"))
            }
        }
    }

    fn instances(
        &self,
        instance: &Instance,
        attribute: Attribute,
    ) -> Result<Vec<Instance>, CosmicError> {
        self.instance_ids(instance, attribute)?
            .into_iter()
            .map(|id| self.fetch_by_id(id))
            .collect()
    }
}

impl<K: KnowledgeBase + ?Sized> KnowledgeBaseExt for K {}

fn unexpected(instance: &Instance, attribute: Attribute, expected: &str) -> CosmicError {
    CosmicError::UnexpectedAttribute {
        db_id: instance.db_id.get(),
        attribute: attribute.to_string(),
        expected: expected.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_value_references() {
        let one = DbId::new(1);
        assert!(AttributeValue::Instance(one).references(one));
        assert!(AttributeValue::Instances(vec![DbId::new(3), one]).references(one));
        assert!(!AttributeValue::Text("1".to_string()).references(one));
    }

    #[test]
    fn instance_display_names_class_and_id() {
        let instance = Instance {
            db_id: DbId::new(77),
            class: "CandidateSet".to_string(),
            display_name: "KRAS mutants".to_string(),
        };
        assert_eq!(instance.to_string(), "[CandidateSet:77] KRAS mutants");
    }
}
