//! Namespaces, tags and the roles that govern who may read or write
//! through them.
//!
//! The [`Catalog`] is the in-memory keeper for this metadata, guarded by
//! mutexes so concurrent queries and administrative changes do not clash.
//! Durability is layered on top by the wiring in `store` together with
//! `persist` — the catalog itself never touches SQLite.

use lazy_static::lazy_static;
use regex::Regex;
use seahash::SeaHasher;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::BuildHasherDefault;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

use crate::datatype::ValueType;
use crate::error::{BfdError, Result};

/// Fast hashing for string-keyed maps and sets.
pub type OtherHasher = BuildHasherDefault<SeaHasher>;

pub type NameSet = HashSet<String, OtherHasher>;

lazy_static! {
    static ref SLUG: Regex = Regex::new(r"^[-\w]+$").expect("slug pattern");
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex.lock().map_err(|e| BfdError::Lock(e.to_string()))
}

/// The identity of a tag: `namespace/name`. Both halves are slugs (unicode
/// word characters and hyphens) and never change once the tag exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagPath {
    namespace: String,
    name: String,
}

impl TagPath {
    pub fn new(namespace: &str, name: &str) -> Result<TagPath> {
        if SLUG.is_match(namespace) && SLUG.is_match(name) {
            Ok(TagPath {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
        } else {
            Err(BfdError::Validation(format!(
                "not a valid tag path: {}/{}",
                namespace, name
            )))
        }
    }

    /// Parse the canonical `namespace/name` rendering.
    pub fn parse(path: &str) -> Result<TagPath> {
        match path.split_once('/') {
            Some((namespace, name)) => TagPath::new(namespace, name),
            None => Err(BfdError::Validation(format!(
                "not a valid tag path: {}",
                path
            ))),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for TagPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// What the permission resolver hands to the query evaluator: just enough
/// to type-check operators, never the role membership itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagMetadata {
    pub path: TagPath,
    pub value_type: ValueType,
    pub private: bool,
}

#[derive(Debug)]
struct Namespace {
    description: String,
    admins: NameSet,
}

#[derive(Debug)]
struct Tag {
    description: String,
    value_type: ValueType,
    private: bool,
    users: NameSet,
    readers: NameSet,
}

impl Tag {
    fn metadata(&self, path: &TagPath) -> TagMetadata {
        TagMetadata {
            path: path.clone(),
            value_type: self.value_type,
            private: self.private,
        }
    }
}

/// A durable snapshot of a tag, as exchanged with the persistence layer.
#[derive(Debug, Clone)]
pub struct TagRecord {
    pub path: TagPath,
    pub description: String,
    pub value_type: ValueType,
    pub private: bool,
    pub users: Vec<String>,
    pub readers: Vec<String>,
}

/// A durable snapshot of a namespace.
#[derive(Debug, Clone)]
pub struct NamespaceRecord {
    pub name: String,
    pub description: String,
    pub admins: Vec<String>,
}

/// In-memory keeper for namespaces, tags and site administrators.
///
/// Lock order is namespaces before tags whenever both are needed.
#[derive(Debug, Default)]
pub struct Catalog {
    namespaces: Mutex<HashMap<String, Namespace, OtherHasher>>,
    tags: Mutex<HashMap<TagPath, Tag, OtherHasher>>,
    site_admins: Mutex<NameSet>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_site_admin(&self, user: &str) -> Result<()> {
        lock(&self.site_admins)?.insert(user.to_string());
        Ok(())
    }

    pub fn is_site_admin(&self, user: &str) -> Result<bool> {
        Ok(lock(&self.site_admins)?.contains(user))
    }

    /// Create a namespace. Site admins may create any namespace; a regular
    /// user may only create the namespace carrying their own name. The
    /// creator always ends up in the admins role.
    pub fn create_namespace(
        &self,
        user: &str,
        name: &str,
        description: &str,
        admins: &[String],
    ) -> Result<NamespaceRecord> {
        if !SLUG.is_match(name) {
            return Err(BfdError::Validation(format!(
                "not a valid namespace name: {}",
                name
            )));
        }
        if !(self.is_site_admin(user)? || user == name) {
            return Err(BfdError::Forbidden(
                "user cannot create this namespace".to_string(),
            ));
        }
        let mut namespaces = lock(&self.namespaces)?;
        if namespaces.contains_key(name) {
            return Err(BfdError::Validation(format!(
                "namespace already exists: {}",
                name
            )));
        }
        let mut admin_set: NameSet = NameSet::default();
        admin_set.insert(user.to_string());
        admin_set.extend(admins.iter().cloned());
        let record = NamespaceRecord {
            name: name.to_string(),
            description: description.to_string(),
            admins: admin_set.iter().cloned().collect(),
        };
        namespaces.insert(
            name.to_string(),
            Namespace {
                description: description.to_string(),
                admins: admin_set,
            },
        );
        info!(user, namespace = name, "create namespace");
        Ok(record)
    }

    pub fn update_namespace_description(
        &self,
        user: &str,
        name: &str,
        description: &str,
    ) -> Result<()> {
        self.check_namespace_admin(user, name)?;
        let mut namespaces = lock(&self.namespaces)?;
        let namespace = namespaces
            .get_mut(name)
            .ok_or_else(|| BfdError::Validation(format!("unknown namespace: {}", name)))?;
        namespace.description = description.to_string();
        info!(user, namespace = name, "update namespace description");
        Ok(())
    }

    pub fn add_namespace_admins(&self, user: &str, name: &str, admins: &[String]) -> Result<()> {
        self.check_namespace_admin(user, name)?;
        let mut namespaces = lock(&self.namespaces)?;
        let namespace = namespaces
            .get_mut(name)
            .ok_or_else(|| BfdError::Validation(format!("unknown namespace: {}", name)))?;
        namespace.admins.extend(admins.iter().cloned());
        info!(user, namespace = name, ?admins, "add namespace admins");
        Ok(())
    }

    pub fn remove_namespace_admins(&self, user: &str, name: &str, admins: &[String]) -> Result<()> {
        self.check_namespace_admin(user, name)?;
        let mut namespaces = lock(&self.namespaces)?;
        let namespace = namespaces
            .get_mut(name)
            .ok_or_else(|| BfdError::Validation(format!("unknown namespace: {}", name)))?;
        for admin in admins {
            namespace.admins.remove(admin);
        }
        info!(user, namespace = name, ?admins, "remove namespace admins");
        Ok(())
    }

    /// Create a tag inside an existing namespace. Only site admins and the
    /// namespace's admins may do so. The creator is seeded into the users
    /// role; for a private tag, into the readers role as well.
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
    ) -> Result<TagRecord> {
        self.check_namespace_admin(user, path.namespace())?;
        let mut tags = lock(&self.tags)?;
        if tags.contains_key(path) {
            return Err(BfdError::Validation(format!(
                "tag already exists: {}",
                path
            )));
        }
        let mut user_set: NameSet = NameSet::default();
        user_set.insert(user.to_string());
        user_set.extend(users.iter().cloned());
        let mut reader_set: NameSet = NameSet::default();
        reader_set.extend(readers.iter().cloned());
        if private {
            reader_set.insert(user.to_string());
        }
        let record = TagRecord {
            path: path.clone(),
            description: description.to_string(),
            value_type,
            private,
            users: user_set.iter().cloned().collect(),
            readers: reader_set.iter().cloned().collect(),
        };
        tags.insert(
            path.clone(),
            Tag {
                description: description.to_string(),
                value_type,
                private,
                users: user_set,
                readers: reader_set,
            },
        );
        info!(user, tag = %path, %value_type, private, "create tag");
        Ok(record)
    }

    pub fn update_tag_description(
        &self,
        user: &str,
        path: &TagPath,
        description: &str,
    ) -> Result<()> {
        self.check_namespace_admin(user, path.namespace())?;
        self.with_tag_mut(path, |tag| {
            tag.description = description.to_string();
        })?;
        info!(user, tag = %path, "update tag description");
        Ok(())
    }

    pub fn set_tag_private(&self, user: &str, path: &TagPath, private: bool) -> Result<()> {
        self.check_namespace_admin(user, path.namespace())?;
        self.with_tag_mut(path, |tag| {
            tag.private = private;
        })?;
        info!(user, tag = %path, private, "update tag privacy");
        Ok(())
    }

    pub fn add_tag_users(&self, user: &str, path: &TagPath, users: &[String]) -> Result<()> {
        self.check_namespace_admin(user, path.namespace())?;
        self.with_tag_mut(path, |tag| {
            tag.users.extend(users.iter().cloned());
        })?;
        info!(user, tag = %path, ?users, "add tag users");
        Ok(())
    }

    pub fn remove_tag_users(&self, user: &str, path: &TagPath, users: &[String]) -> Result<()> {
        self.check_namespace_admin(user, path.namespace())?;
        self.with_tag_mut(path, |tag| {
            for name in users {
                tag.users.remove(name);
            }
        })?;
        info!(user, tag = %path, ?users, "remove tag users");
        Ok(())
    }

    pub fn add_tag_readers(&self, user: &str, path: &TagPath, readers: &[String]) -> Result<()> {
        self.check_namespace_admin(user, path.namespace())?;
        self.with_tag_mut(path, |tag| {
            tag.readers.extend(readers.iter().cloned());
        })?;
        info!(user, tag = %path, ?readers, "add tag readers");
        Ok(())
    }

    pub fn remove_tag_readers(&self, user: &str, path: &TagPath, readers: &[String]) -> Result<()> {
        self.check_namespace_admin(user, path.namespace())?;
        self.with_tag_mut(path, |tag| {
            for name in readers {
                tag.readers.remove(name);
            }
        })?;
        info!(user, tag = %path, ?readers, "remove tag readers");
        Ok(())
    }

    /// Resolve every referenced tag path the user may read, in one bulk
    /// pass under a single lock acquisition.
    ///
    /// A tag is readable iff any of: the user is a site admin, the user
    /// administers the parent namespace, the tag is not private, the user
    /// is in the users role, or the user is in the readers role.
    ///
    /// If any referenced path does not resolve to a readable tag, the whole
    /// resolution fails, naming every such path. Nonexistent and unreadable
    /// tags are deliberately indistinguishable here.
    pub fn readable_tags(
        &self,
        user: &str,
        paths: &HashSet<TagPath, OtherHasher>,
    ) -> Result<HashMap<TagPath, TagMetadata, OtherHasher>> {
        let site_admin = self.is_site_admin(user)?;
        let namespaces = lock(&self.namespaces)?;
        let tags = lock(&self.tags)?;
        let mut resolved: HashMap<TagPath, TagMetadata, OtherHasher> = HashMap::default();
        for path in paths {
            if let Some(tag) = tags.get(path) {
                let namespace_admin = namespaces
                    .get(path.namespace())
                    .map(|n| n.admins.contains(user))
                    .unwrap_or(false);
                let readable = site_admin
                    || namespace_admin
                    || !tag.private
                    || tag.users.contains(user)
                    || tag.readers.contains(user);
                if readable {
                    resolved.insert(path.clone(), tag.metadata(path));
                }
            }
        }
        if resolved.len() < paths.len() {
            let mut unresolved: Vec<String> = paths
                .iter()
                .filter(|p| !resolved.contains_key(*p))
                .map(|p| p.to_string())
                .collect();
            unresolved.sort();
            return Err(BfdError::Permission { paths: unresolved });
        }
        Ok(resolved)
    }

    /// Single-tag readability, same rule as [`Catalog::readable_tags`].
    /// A nonexistent tag is simply not readable.
    pub fn is_readable(&self, user: &str, path: &TagPath) -> Result<bool> {
        let site_admin = self.is_site_admin(user)?;
        let namespaces = lock(&self.namespaces)?;
        let tags = lock(&self.tags)?;
        Ok(match tags.get(path) {
            None => false,
            Some(tag) => {
                let namespace_admin = namespaces
                    .get(path.namespace())
                    .map(|n| n.admins.contains(user))
                    .unwrap_or(false);
                site_admin
                    || namespace_admin
                    || !tag.private
                    || tag.users.contains(user)
                    || tag.readers.contains(user)
            }
        })
    }

    /// Check the user may annotate through the tag: site admins and members
    /// of the tag's users role only. Namespace admins do not implicitly
    /// gain write access.
    pub fn writable_tag(&self, user: &str, path: &TagPath) -> Result<TagMetadata> {
        let site_admin = self.is_site_admin(user)?;
        let tags = lock(&self.tags)?;
        let tag = tags
            .get(path)
            .ok_or_else(|| BfdError::UnknownTag {
                path: path.to_string(),
            })?;
        if site_admin || tag.users.contains(user) {
            Ok(tag.metadata(path))
        } else {
            Err(BfdError::Forbidden(format!(
                "user cannot annotate through tag {}",
                path
            )))
        }
    }

    /// Re-seed a namespace from its durable record, bypassing permission
    /// checks. Used only while restoring from the persistence layer.
    pub(crate) fn restore_namespace(&self, record: NamespaceRecord) -> Result<()> {
        let mut namespaces = lock(&self.namespaces)?;
        let mut admins = NameSet::default();
        admins.extend(record.admins);
        namespaces.insert(
            record.name,
            Namespace {
                description: record.description,
                admins,
            },
        );
        Ok(())
    }

    /// Re-seed a tag from its durable record, bypassing permission checks.
    pub(crate) fn restore_tag(&self, record: TagRecord) -> Result<()> {
        let mut tags = lock(&self.tags)?;
        let mut users = NameSet::default();
        users.extend(record.users);
        let mut readers = NameSet::default();
        readers.extend(record.readers);
        tags.insert(
            record.path,
            Tag {
                description: record.description,
                value_type: record.value_type,
                private: record.private,
                users,
                readers,
            },
        );
        Ok(())
    }

    /// Snapshot a tag for the persistence layer.
    pub(crate) fn tag_record(&self, path: &TagPath) -> Result<TagRecord> {
        let tags = lock(&self.tags)?;
        let tag = tags.get(path).ok_or_else(|| BfdError::UnknownTag {
            path: path.to_string(),
        })?;
        Ok(TagRecord {
            path: path.clone(),
            description: tag.description.clone(),
            value_type: tag.value_type,
            private: tag.private,
            users: tag.users.iter().cloned().collect(),
            readers: tag.readers.iter().cloned().collect(),
        })
    }

    /// Snapshot a namespace for the persistence layer.
    pub(crate) fn namespace_record(&self, name: &str) -> Result<NamespaceRecord> {
        let namespaces = lock(&self.namespaces)?;
        let namespace = namespaces
            .get(name)
            .ok_or_else(|| BfdError::Validation(format!("unknown namespace: {}", name)))?;
        Ok(NamespaceRecord {
            name: name.to_string(),
            description: namespace.description.clone(),
            admins: namespace.admins.iter().cloned().collect(),
        })
    }

    fn check_namespace_admin(&self, user: &str, namespace: &str) -> Result<()> {
        if self.is_site_admin(user)? {
            return Ok(());
        }
        let namespaces = lock(&self.namespaces)?;
        let known = namespaces
            .get(namespace)
            .ok_or_else(|| BfdError::Validation(format!("unknown namespace: {}", namespace)))?;
        if known.admins.contains(user) {
            Ok(())
        } else {
            Err(BfdError::Forbidden(format!(
                "user does not administer namespace {}",
                namespace
            )))
        }
    }

    fn with_tag_mut<F>(&self, path: &TagPath, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Tag),
    {
        let mut tags = lock(&self.tags)?;
        let tag = tags.get_mut(path).ok_or_else(|| BfdError::UnknownTag {
            path: path.to_string(),
        })?;
        mutate(tag);
        Ok(())
    }
}
