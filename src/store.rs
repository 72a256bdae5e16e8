//! The typed value store and the datastore wiring.
//!
//! [`MemoryStore`] holds every annotation in memory, keyed by tag path and
//! object id, with the `(object_id, namespace, tag)` uniqueness invariant
//! falling out of the map structure. [`Datastore`] wires a [`Catalog`], a
//! [`MemoryStore`] and a [`Persistor`] together: mutations are permission
//! checked against the catalog, applied in memory and made durable, while
//! queries run entirely against the restored in-memory state.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

use crate::catalog::{Catalog, OtherHasher, TagPath};
use crate::datatype::{Comparison, StringMatch, TypedValue, ValueType};
use crate::error::{BfdError, Result};
use crate::persist::{PersistenceMode, Persistor};

/// Opaque identifier of an annotated object.
pub type ObjectId = String;

/// The evaluator's sole intermediate representation: a set of object ids.
pub type IdSet = HashSet<ObjectId, OtherHasher>;

/// One value annotated onto one object through one tag.
#[derive(Debug, Clone)]
pub struct Annotation {
    pub object_id: ObjectId,
    pub path: TagPath,
    pub value: TypedValue,
    pub annotated_by: String,
    pub annotated_at: DateTime<Utc>,
}

/// A scalar literal as it reaches the value store.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Integer(i64),
    Float(f64),
    DateTime(DateTime<Utc>),
    Duration(Duration),
}

/// What a leaf query asks of the value store.
#[derive(Debug, Clone, PartialEq)]
pub enum ValuePredicate {
    /// Matches every annotated object, whatever the value.
    Any,
    Text { mode: StringMatch, value: String },
    Bool(bool),
    Compare { comparison: Comparison, value: Scalar },
    Mime(String),
}

/// The storage collaborator the query evaluator talks to.
pub trait ValueStore: Send + Sync {
    /// Objects bearing any value under the tag.
    fn exists(&self, tag: &TagPath) -> Result<IdSet>;

    /// Objects whose value under the tag matches `predicate`, minus those
    /// matching `exclude`.
    fn filter(
        &self,
        tag: &TagPath,
        predicate: &ValuePredicate,
        exclude: Option<&ValuePredicate>,
    ) -> Result<IdSet>;
}

type AnnotationsByTag = HashMap<TagPath, HashMap<ObjectId, Annotation, OtherHasher>, OtherHasher>;

/// In-memory annotation keeper.
#[derive(Debug, Default)]
pub struct MemoryStore {
    annotations: Mutex<AnnotationsByTag>,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex.lock().map_err(|e| BfdError::Lock(e.to_string()))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite, returning the previous value if any. Uniqueness
    /// per `(object_id, namespace, tag)` holds by construction.
    pub fn upsert(&self, annotation: Annotation) -> Result<Option<TypedValue>> {
        let mut annotations = lock(&self.annotations)?;
        let by_object = annotations.entry(annotation.path.clone()).or_default();
        Ok(by_object
            .insert(annotation.object_id.clone(), annotation)
            .map(|old| old.value))
    }

    pub fn remove(&self, tag: &TagPath, object_id: &str) -> Result<bool> {
        let mut annotations = lock(&self.annotations)?;
        Ok(annotations
            .get_mut(tag)
            .map(|by_object| by_object.remove(object_id).is_some())
            .unwrap_or(false))
    }

    /// All tags annotated onto the object, in no particular order.
    pub fn tags_on(&self, object_id: &str) -> Result<Vec<TagPath>> {
        let annotations = lock(&self.annotations)?;
        Ok(annotations
            .iter()
            .filter(|(_, by_object)| by_object.contains_key(object_id))
            .map(|(path, _)| path.clone())
            .collect())
    }

    pub fn value(&self, tag: &TagPath, object_id: &str) -> Result<Option<TypedValue>> {
        let annotations = lock(&self.annotations)?;
        Ok(annotations
            .get(tag)
            .and_then(|by_object| by_object.get(object_id))
            .map(|a| a.value.clone()))
    }
}

impl ValueStore for MemoryStore {
    fn exists(&self, tag: &TagPath) -> Result<IdSet> {
        self.filter(tag, &ValuePredicate::Any, None)
    }

    fn filter(
        &self,
        tag: &TagPath,
        predicate: &ValuePredicate,
        exclude: Option<&ValuePredicate>,
    ) -> Result<IdSet> {
        let annotations = lock(&self.annotations)?;
        let mut matched = IdSet::default();
        if let Some(by_object) = annotations.get(tag) {
            for (object_id, annotation) in by_object {
                if matches(&annotation.value, predicate)
                    && !exclude.map_or(false, |p| matches(&annotation.value, p))
                {
                    matched.insert(object_id.clone());
                }
            }
        }
        Ok(matched)
    }
}

fn ordering_holds(ordering: Option<std::cmp::Ordering>, comparison: Comparison) -> bool {
    use std::cmp::Ordering::*;
    match ordering {
        None => false,
        Some(ordering) => match comparison {
            Comparison::Lt => ordering == Less,
            Comparison::Le => ordering != Greater,
            Comparison::Eq => ordering == Equal,
            Comparison::Ge => ordering != Less,
            Comparison::Gt => ordering == Greater,
        },
    }
}

/// Does the stored value satisfy the predicate? Type-mismatched pairs are
/// unreachable (the evaluator rejects them first) and match nothing.
fn matches(value: &TypedValue, predicate: &ValuePredicate) -> bool {
    match predicate {
        ValuePredicate::Any => true,
        ValuePredicate::Text { mode, value: wanted } => {
            let stored = match value {
                TypedValue::String(s) => s,
                TypedValue::Pointer(s) => s,
                _ => return false,
            };
            match mode {
                StringMatch::Exact => stored == wanted,
                StringMatch::ExactFold => stored.to_lowercase() == wanted.to_lowercase(),
                StringMatch::Substring => stored.contains(wanted),
                StringMatch::SubstringFold => {
                    stored.to_lowercase().contains(&wanted.to_lowercase())
                }
            }
        }
        ValuePredicate::Bool(wanted) => matches!(value, TypedValue::Boolean(b) if b == wanted),
        ValuePredicate::Mime(wanted) => {
            matches!(value, TypedValue::Binary { mime, .. } if mime.eq_ignore_ascii_case(wanted))
        }
        ValuePredicate::Compare { comparison, value: scalar } => {
            let ordering = match (value, scalar) {
                (TypedValue::Integer(stored), Scalar::Integer(wanted)) => {
                    stored.partial_cmp(wanted)
                }
                (TypedValue::Float(stored), Scalar::Float(wanted)) => stored.partial_cmp(wanted),
                (TypedValue::Float(stored), Scalar::Integer(wanted)) => {
                    stored.partial_cmp(&(*wanted as f64))
                }
                (TypedValue::DateTime(stored), Scalar::DateTime(wanted)) => {
                    stored.partial_cmp(wanted)
                }
                (TypedValue::Duration(stored), Scalar::Duration(wanted)) => {
                    stored.partial_cmp(wanted)
                }
                _ => None,
            };
            ordering_holds(ordering, *comparison)
        }
    }
}

/// The datastore: catalog + in-memory annotations + SQLite durability.
pub struct Datastore {
    catalog: Catalog,
    store: MemoryStore,
    persistor: Mutex<Persistor>,
}

impl Datastore {
    /// Open the datastore, restoring any prior state from the persistence
    /// layer into the in-memory keepers.
    pub fn new(mode: PersistenceMode) -> Result<Datastore> {
        let mut persistor = Persistor::new(mode)?;
        let catalog = Catalog::new();
        let store = MemoryStore::new();
        persistor.restore(&catalog, &store)?;
        Ok(Datastore {
            catalog,
            store,
            persistor: Mutex::new(persistor),
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn add_site_admin(&self, user: &str) -> Result<()> {
        self.catalog.add_site_admin(user)
    }

    pub fn create_namespace(
        &self,
        user: &str,
        name: &str,
        description: &str,
        admins: &[String],
    ) -> Result<()> {
        let record = self
            .catalog
            .create_namespace(user, name, description, admins)?;
        lock(&self.persistor)?.persist_namespace(&record)
    }

    pub fn update_namespace_description(
        &self,
        user: &str,
        name: &str,
        description: &str,
    ) -> Result<()> {
        self.catalog
            .update_namespace_description(user, name, description)?;
        let record = self.catalog.namespace_record(name)?;
        lock(&self.persistor)?.persist_namespace(&record)
    }

    pub fn add_namespace_admins(&self, user: &str, name: &str, admins: &[String]) -> Result<()> {
        self.catalog.add_namespace_admins(user, name, admins)?;
        let record = self.catalog.namespace_record(name)?;
        lock(&self.persistor)?.persist_namespace(&record)
    }

    pub fn remove_namespace_admins(&self, user: &str, name: &str, admins: &[String]) -> Result<()> {
        self.catalog.remove_namespace_admins(user, name, admins)?;
        let record = self.catalog.namespace_record(name)?;
        lock(&self.persistor)?.persist_namespace(&record)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_tag(
        &self,
        user: &str,
        path: &TagPath,
        description: &str,
        value_type: ValueType,
        private: bool,
        users: &[String],
        readers: &[String],
    ) -> Result<()> {
        let record = self
            .catalog
            .create_tag(user, path, description, value_type, private, users, readers)?;
        lock(&self.persistor)?.persist_tag(&record)
    }

    pub fn update_tag_description(
        &self,
        user: &str,
        path: &TagPath,
        description: &str,
    ) -> Result<()> {
        self.catalog.update_tag_description(user, path, description)?;
        self.persist_tag(path)
    }

    pub fn set_tag_private(&self, user: &str, path: &TagPath, private: bool) -> Result<()> {
        self.catalog.set_tag_private(user, path, private)?;
        self.persist_tag(path)
    }

    pub fn add_tag_users(&self, user: &str, path: &TagPath, users: &[String]) -> Result<()> {
        self.catalog.add_tag_users(user, path, users)?;
        self.persist_tag(path)
    }

    pub fn remove_tag_users(&self, user: &str, path: &TagPath, users: &[String]) -> Result<()> {
        self.catalog.remove_tag_users(user, path, users)?;
        self.persist_tag(path)
    }

    pub fn add_tag_readers(&self, user: &str, path: &TagPath, readers: &[String]) -> Result<()> {
        self.catalog.add_tag_readers(user, path, readers)?;
        self.persist_tag(path)
    }

    pub fn remove_tag_readers(&self, user: &str, path: &TagPath, readers: &[String]) -> Result<()> {
        self.catalog.remove_tag_readers(user, path, readers)?;
        self.persist_tag(path)
    }

    /// Annotate a value onto an object through a tag. The caller must be a
    /// site admin or in the tag's users role, and the value must carry the
    /// tag's declared type. Overwrites any previous value under the same
    /// `(object_id, namespace, tag)` key.
    pub fn annotate(
        &self,
        user: &str,
        object_id: &str,
        path: &TagPath,
        value: TypedValue,
    ) -> Result<()> {
        let metadata = self.catalog.writable_tag(user, path)?;
        if value.value_type() != metadata.value_type {
            return Err(BfdError::Validation(format!(
                "value of type {} does not fit tag {} of type {}",
                value.value_type(),
                path,
                metadata.value_type
            )));
        }
        let annotation = Annotation {
            object_id: object_id.to_string(),
            path: path.clone(),
            value,
            annotated_by: user.to_string(),
            annotated_at: Utc::now(),
        };
        lock(&self.persistor)?.persist_annotation(&annotation)?;
        self.store.upsert(annotation)?;
        info!(user, object_id, tag = %path, "annotate object");
        Ok(())
    }

    /// Remove the value annotated through the tag, if any. Same write
    /// permission as annotating.
    pub fn delete_annotation(&self, user: &str, object_id: &str, path: &TagPath) -> Result<bool> {
        self.catalog.writable_tag(user, path)?;
        lock(&self.persistor)?.delete_annotation(path, object_id)?;
        let removed = self.store.remove(path, object_id)?;
        if removed {
            info!(user, object_id, tag = %path, "delete annotation");
        }
        Ok(removed)
    }

    /// Tags annotated onto the object that the user may read.
    pub fn object_tags(&self, user: &str, object_id: &str) -> Result<Vec<TagPath>> {
        let mut visible = Vec::new();
        for path in self.store.tags_on(object_id)? {
            if self.catalog.is_readable(user, &path)? {
                visible.push(path);
            }
        }
        visible.sort();
        Ok(visible)
    }

    /// The value under a single tag on an object, readability-checked.
    pub fn object_value(
        &self,
        user: &str,
        object_id: &str,
        path: &TagPath,
    ) -> Result<Option<TypedValue>> {
        if !self.catalog.is_readable(user, path)? {
            return Err(BfdError::Permission {
                paths: vec![path.to_string()],
            });
        }
        self.store.value(path, object_id)
    }

    fn persist_tag(&self, path: &TagPath) -> Result<()> {
        let record = self.catalog.tag_record(path)?;
        lock(&self.persistor)?.persist_tag(&record)
    }
}
