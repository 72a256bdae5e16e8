//! SQLite persistence and restoration.
//!
//! The relational layout is one table per value type, each with the unique
//! `(ObjectId, Namespace, Tag)` key, plus namespace/tag tables with their
//! role memberships. The datastore writes
//! through here for durability; queries never do — on startup everything is
//! restored into the in-memory keepers.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection};
use std::path::PathBuf;

use crate::catalog::{Catalog, NamespaceRecord, TagPath, TagRecord};
use crate::datatype::{TypedValue, ValueType};
use crate::error::{BfdError, Result};
use crate::store::{Annotation, MemoryStore};

#[derive(Debug, Clone)]
pub enum PersistenceMode {
    InMemory,
    File(PathBuf),
}

/// Table holding values of the given type.
fn value_table(value_type: ValueType) -> &'static str {
    match value_type {
        ValueType::String => "StringValue",
        ValueType::Boolean => "BooleanValue",
        ValueType::Integer => "IntegerValue",
        ValueType::Float => "FloatValue",
        ValueType::DateTime => "DateTimeValue",
        ValueType::Duration => "DurationValue",
        ValueType::Binary => "BinaryValue",
        ValueType::Pointer => "PointerValue",
    }
}

pub struct Persistor {
    connection: Connection,
}

impl Persistor {
    pub fn new(mode: PersistenceMode) -> Result<Persistor> {
        let connection = match mode {
            PersistenceMode::InMemory => Connection::open_in_memory()?,
            PersistenceMode::File(path) => Connection::open(path)?,
        };
        connection.execute_batch(
            "
            create table if not exists Namespace (
                Name text not null,
                Description text not null,
                constraint unique_Namespace primary key (Name)
            );
            create table if not exists NamespaceAdmin (
                Namespace text not null,
                User text not null,
                constraint Admin_of_Namespace foreign key (Namespace)
                    references Namespace(Name),
                constraint unique_NamespaceAdmin primary key (Namespace, User)
            );
            create table if not exists Tag (
                Namespace text not null,
                Name text not null,
                Description text not null,
                ValueType text not null,
                Private integer not null,
                constraint Tag_in_Namespace foreign key (Namespace)
                    references Namespace(Name),
                constraint unique_Tag primary key (Namespace, Name)
            );
            create table if not exists TagUser (
                Namespace text not null,
                Tag text not null,
                User text not null,
                constraint unique_TagUser primary key (Namespace, Tag, User)
            );
            create table if not exists TagReader (
                Namespace text not null,
                Tag text not null,
                User text not null,
                constraint unique_TagReader primary key (Namespace, Tag, User)
            );
            create table if not exists StringValue (
                ObjectId text not null,
                Namespace text not null,
                Tag text not null,
                Value text not null,
                AnnotatedBy text not null,
                AnnotatedAt text not null,
                constraint unique_str_val primary key (ObjectId, Namespace, Tag)
            );
            create table if not exists BooleanValue (
                ObjectId text not null,
                Namespace text not null,
                Tag text not null,
                Value integer not null,
                AnnotatedBy text not null,
                AnnotatedAt text not null,
                constraint unique_bool_val primary key (ObjectId, Namespace, Tag)
            );
            create table if not exists IntegerValue (
                ObjectId text not null,
                Namespace text not null,
                Tag text not null,
                Value integer not null,
                AnnotatedBy text not null,
                AnnotatedAt text not null,
                constraint unique_int_val primary key (ObjectId, Namespace, Tag)
            );
            create table if not exists FloatValue (
                ObjectId text not null,
                Namespace text not null,
                Tag text not null,
                Value real not null,
                AnnotatedBy text not null,
                AnnotatedAt text not null,
                constraint unique_float_val primary key (ObjectId, Namespace, Tag)
            );
            create table if not exists DateTimeValue (
                ObjectId text not null,
                Namespace text not null,
                Tag text not null,
                Value text not null,
                AnnotatedBy text not null,
                AnnotatedAt text not null,
                constraint unique_datetime_val primary key (ObjectId, Namespace, Tag)
            );
            create table if not exists DurationValue (
                ObjectId text not null,
                Namespace text not null,
                Tag text not null,
                Value integer not null,
                AnnotatedBy text not null,
                AnnotatedAt text not null,
                constraint unique_duration_val primary key (ObjectId, Namespace, Tag)
            );
            create table if not exists BinaryValue (
                ObjectId text not null,
                Namespace text not null,
                Tag text not null,
                Value text not null,
                Mime text not null,
                AnnotatedBy text not null,
                AnnotatedAt text not null,
                constraint unique_binary_val primary key (ObjectId, Namespace, Tag)
            );
            create table if not exists PointerValue (
                ObjectId text not null,
                Namespace text not null,
                Tag text not null,
                Value text not null,
                AnnotatedBy text not null,
                AnnotatedAt text not null,
                constraint unique_pointer_val primary key (ObjectId, Namespace, Tag)
            );
            ",
        )?;
        Ok(Persistor { connection })
    }

    pub fn persist_namespace(&mut self, record: &NamespaceRecord) -> Result<()> {
        let transaction = self.connection.transaction()?;
        transaction.execute(
            "insert or replace into Namespace (Name, Description) values (?, ?)",
            params![record.name, record.description],
        )?;
        transaction.execute(
            "delete from NamespaceAdmin where Namespace = ?",
            params![record.name],
        )?;
        for admin in &record.admins {
            transaction.execute(
                "insert into NamespaceAdmin (Namespace, User) values (?, ?)",
                params![record.name, admin],
            )?;
        }
        transaction.commit()?;
        Ok(())
    }

    pub fn persist_tag(&mut self, record: &TagRecord) -> Result<()> {
        let namespace = record.path.namespace();
        let name = record.path.name();
        let transaction = self.connection.transaction()?;
        transaction.execute(
            "insert or replace into Tag (Namespace, Name, Description, ValueType, Private)
             values (?, ?, ?, ?, ?)",
            params![
                namespace,
                name,
                record.description,
                record.value_type.code().to_string(),
                record.private,
            ],
        )?;
        transaction.execute(
            "delete from TagUser where Namespace = ? and Tag = ?",
            params![namespace, name],
        )?;
        for user in &record.users {
            transaction.execute(
                "insert into TagUser (Namespace, Tag, User) values (?, ?, ?)",
                params![namespace, name, user],
            )?;
        }
        transaction.execute(
            "delete from TagReader where Namespace = ? and Tag = ?",
            params![namespace, name],
        )?;
        for reader in &record.readers {
            transaction.execute(
                "insert into TagReader (Namespace, Tag, User) values (?, ?, ?)",
                params![namespace, name, reader],
            )?;
        }
        transaction.commit()?;
        Ok(())
    }

    pub fn persist_annotation(&mut self, annotation: &Annotation) -> Result<()> {
        let namespace = annotation.path.namespace();
        let tag = annotation.path.name();
        match &annotation.value {
            TypedValue::String(value) => self.connection.execute(
                "insert or replace into StringValue
                 (ObjectId, Namespace, Tag, Value, AnnotatedBy, AnnotatedAt)
                 values (?, ?, ?, ?, ?, ?)",
                params![
                    annotation.object_id,
                    namespace,
                    tag,
                    value,
                    annotation.annotated_by,
                    annotation.annotated_at,
                ],
            )?,
            TypedValue::Boolean(value) => self.connection.execute(
                "insert or replace into BooleanValue
                 (ObjectId, Namespace, Tag, Value, AnnotatedBy, AnnotatedAt)
                 values (?, ?, ?, ?, ?, ?)",
                params![
                    annotation.object_id,
                    namespace,
                    tag,
                    value,
                    annotation.annotated_by,
                    annotation.annotated_at,
                ],
            )?,
            TypedValue::Integer(value) => self.connection.execute(
                "insert or replace into IntegerValue
                 (ObjectId, Namespace, Tag, Value, AnnotatedBy, AnnotatedAt)
                 values (?, ?, ?, ?, ?, ?)",
                params![
                    annotation.object_id,
                    namespace,
                    tag,
                    value,
                    annotation.annotated_by,
                    annotation.annotated_at,
                ],
            )?,
            TypedValue::Float(value) => self.connection.execute(
                "insert or replace into FloatValue
                 (ObjectId, Namespace, Tag, Value, AnnotatedBy, AnnotatedAt)
                 values (?, ?, ?, ?, ?, ?)",
                params![
                    annotation.object_id,
                    namespace,
                    tag,
                    value,
                    annotation.annotated_by,
                    annotation.annotated_at,
                ],
            )?,
            TypedValue::DateTime(value) => self.connection.execute(
                "insert or replace into DateTimeValue
                 (ObjectId, Namespace, Tag, Value, AnnotatedBy, AnnotatedAt)
                 values (?, ?, ?, ?, ?, ?)",
                params![
                    annotation.object_id,
                    namespace,
                    tag,
                    value,
                    annotation.annotated_by,
                    annotation.annotated_at,
                ],
            )?,
            TypedValue::Duration(value) => self.connection.execute(
                "insert or replace into DurationValue
                 (ObjectId, Namespace, Tag, Value, AnnotatedBy, AnnotatedAt)
                 values (?, ?, ?, ?, ?, ?)",
                params![
                    annotation.object_id,
                    namespace,
                    tag,
                    value.num_seconds(),
                    annotation.annotated_by,
                    annotation.annotated_at,
                ],
            )?,
            TypedValue::Binary { location, mime } => self.connection.execute(
                "insert or replace into BinaryValue
                 (ObjectId, Namespace, Tag, Value, Mime, AnnotatedBy, AnnotatedAt)
                 values (?, ?, ?, ?, ?, ?, ?)",
                params![
                    annotation.object_id,
                    namespace,
                    tag,
                    location,
                    mime,
                    annotation.annotated_by,
                    annotation.annotated_at,
                ],
            )?,
            TypedValue::Pointer(value) => self.connection.execute(
                "insert or replace into PointerValue
                 (ObjectId, Namespace, Tag, Value, AnnotatedBy, AnnotatedAt)
                 values (?, ?, ?, ?, ?, ?)",
                params![
                    annotation.object_id,
                    namespace,
                    tag,
                    value,
                    annotation.annotated_by,
                    annotation.annotated_at,
                ],
            )?,
        };
        Ok(())
    }

    pub fn delete_annotation(&mut self, path: &TagPath, object_id: &str) -> Result<()> {
        for value_type in ValueType::ALL {
            let statement = format!(
                "delete from {} where ObjectId = ? and Namespace = ? and Tag = ?",
                value_table(value_type)
            );
            self.connection.execute(
                &statement,
                params![object_id, path.namespace(), path.name()],
            )?;
        }
        Ok(())
    }

    /// Reload everything durable into the in-memory keepers.
    pub fn restore(&mut self, catalog: &Catalog, store: &MemoryStore) -> Result<()> {
        self.restore_namespaces(catalog)?;
        self.restore_tags(catalog)?;
        self.restore_annotations(store)?;
        Ok(())
    }

    fn restore_namespaces(&mut self, catalog: &Catalog) -> Result<()> {
        let mut names = self.connection.prepare("select Name, Description from Namespace")?;
        let mut admins = self
            .connection
            .prepare("select User from NamespaceAdmin where Namespace = ?")?;
        let rows = names.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (name, description) = row?;
            let admin_rows = admins.query_map(params![name], |row| row.get::<_, String>(0))?;
            let mut admin_names = Vec::new();
            for admin in admin_rows {
                admin_names.push(admin?);
            }
            catalog.restore_namespace(NamespaceRecord {
                name,
                description,
                admins: admin_names,
            })?;
        }
        Ok(())
    }

    fn restore_tags(&mut self, catalog: &Catalog) -> Result<()> {
        let mut tags = self
            .connection
            .prepare("select Namespace, Name, Description, ValueType, Private from Tag")?;
        let mut users = self
            .connection
            .prepare("select User from TagUser where Namespace = ? and Tag = ?")?;
        let mut readers = self
            .connection
            .prepare("select User from TagReader where Namespace = ? and Tag = ?")?;
        let rows = tags.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, bool>(4)?,
            ))
        })?;
        for row in rows {
            let (namespace, name, description, code, private) = row?;
            let value_type = code
                .chars()
                .next()
                .and_then(ValueType::from_code)
                .ok_or_else(|| {
                    BfdError::Storage(format!("unknown value type code: {:?}", code))
                })?;
            let path = TagPath::new(&namespace, &name)?;
            let mut user_names = Vec::new();
            for user in users.query_map(params![namespace, name], |row| row.get::<_, String>(0))? {
                user_names.push(user?);
            }
            let mut reader_names = Vec::new();
            for reader in
                readers.query_map(params![namespace, name], |row| row.get::<_, String>(0))?
            {
                reader_names.push(reader?);
            }
            catalog.restore_tag(TagRecord {
                path,
                description,
                value_type,
                private,
                users: user_names,
                readers: reader_names,
            })?;
        }
        Ok(())
    }

    fn restore_annotations(&mut self, store: &MemoryStore) -> Result<()> {
        for value_type in ValueType::ALL {
            let columns = if value_type == ValueType::Binary {
                "ObjectId, Namespace, Tag, Value, AnnotatedBy, AnnotatedAt, Mime"
            } else {
                "ObjectId, Namespace, Tag, Value, AnnotatedBy, AnnotatedAt"
            };
            let statement = format!("select {} from {}", columns, value_table(value_type));
            let mut select = self.connection.prepare(&statement)?;
            let mut rows = select.query([])?;
            while let Some(row) = rows.next()? {
                let object_id: String = row.get(0)?;
                let namespace: String = row.get(1)?;
                let tag: String = row.get(2)?;
                let annotated_by: String = row.get(4)?;
                let annotated_at: DateTime<Utc> = row.get(5)?;
                let value = match value_type {
                    ValueType::String => TypedValue::String(row.get(3)?),
                    ValueType::Boolean => TypedValue::Boolean(row.get(3)?),
                    ValueType::Integer => TypedValue::Integer(row.get(3)?),
                    ValueType::Float => TypedValue::Float(row.get(3)?),
                    ValueType::DateTime => TypedValue::DateTime(row.get(3)?),
                    ValueType::Duration => {
                        TypedValue::Duration(Duration::seconds(row.get::<_, i64>(3)?))
                    }
                    ValueType::Binary => TypedValue::Binary {
                        location: row.get(3)?,
                        mime: row.get(6)?,
                    },
                    ValueType::Pointer => TypedValue::Pointer(row.get(3)?),
                };
                store.upsert(Annotation {
                    object_id,
                    path: TagPath::new(&namespace, &tag)?,
                    value,
                    annotated_by,
                    annotated_at,
                })?;
            }
        }
        Ok(())
    }
}
