//! bfd – a multi-tenant tag-annotation store with the BFQL query language.
//!
//! Arbitrary objects, identified by opaque string ids, are annotated with
//! typed values through namespaced tags. BFQL turns a query string into the
//! set of object ids satisfying it, using only tags the requesting user may
//! read.
//!
//! ## Modules
//! * [`catalog`] – Namespaces, tags, roles and the permission resolver.
//! * [`datatype`] – The closed set of value types and the values themselves.
//! * [`store`] – The typed value store and the datastore wiring.
//! * [`persist`] – SQLite persistence & restoration layer.
//! * [`bfql`] – The query engine: lexer, parser and set-algebra evaluator.
//! * [`settings`] – Runtime configuration.
//! * [`server`] – Thin HTTP surface (axum).
//!
//! ## Visibility
//! A tag is readable by a user when any of the following holds: the user is
//! a site admin, the user administers the tag's namespace, the tag is not
//! private, or the user is in the tag's `users` or `readers` role. A query
//! referencing a tag the user cannot read fails before any value is
//! examined.
//!
//! ## Quick Start
//! ```
//! use chrono::FixedOffset;
//! use bfd::bfql::Engine;
//! use bfd::catalog::TagPath;
//! use bfd::datatype::{TypedValue, ValueType};
//! use bfd::persist::PersistenceMode;
//! use bfd::store::Datastore;
//!
//! let db = Datastore::new(PersistenceMode::InMemory).unwrap();
//! db.add_site_admin("admin").unwrap();
//! db.create_namespace("admin", "library", "The library", &[]).unwrap();
//! let title = TagPath::new("library", "title").unwrap();
//! db.create_tag("admin", &title, "Book title", ValueType::String, false, &[], &[])
//!     .unwrap();
//! db.annotate("admin", "book-1", &title, TypedValue::String("Moby Dick".into()))
//!     .unwrap();
//! let engine = Engine::new(&db, FixedOffset::east_opt(0).unwrap());
//! let found = engine.evaluate("anyone", "library/title matches \"Moby\"").unwrap();
//! assert!(found.contains("book-1"));
//! ```

pub mod bfql;
pub mod catalog;
pub mod datatype;
pub mod error;
pub mod persist;
pub mod server;
pub mod settings;
pub mod store;
