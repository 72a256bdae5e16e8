use bfd::bfql::Engine;
use bfd::catalog::TagPath;
use bfd::datatype::{TypedValue, ValueType};
use bfd::error::BfdError;
use bfd::persist::PersistenceMode;
use bfd::store::Datastore;
use chrono::FixedOffset;

fn tag(path: &str) -> TagPath {
    TagPath::parse(path).unwrap()
}

fn owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

/// One public and one private tag in a namespace administered by carol.
/// dave is in the private tag's users role, alice in its readers role.
fn setup() -> &'static Datastore {
    let db = Datastore::new(PersistenceMode::InMemory).unwrap();
    db.add_site_admin("admin").unwrap();
    db.create_namespace("admin", "research", "Research", &owned(&["carol"]))
        .unwrap();
    db.create_tag(
        "admin",
        &tag("research/topic"),
        "Topic",
        ValueType::String,
        false,
        &[],
        &[],
    )
    .unwrap();
    db.create_tag(
        "admin",
        &tag("research/score"),
        "Private score",
        ValueType::Integer,
        true,
        &owned(&["dave"]),
        &owned(&["alice"]),
    )
    .unwrap();
    db.annotate(
        "admin",
        "paper-1",
        &tag("research/topic"),
        TypedValue::String("whales".into()),
    )
    .unwrap();
    db.annotate("admin", "paper-1", &tag("research/score"), TypedValue::Integer(8))
        .unwrap();
    Box::leak(Box::new(db))
}

fn engine(db: &Datastore) -> Engine<'_> {
    Engine::new(db, FixedOffset::east_opt(0).unwrap())
}

#[test]
fn public_tags_are_readable_by_anyone() {
    let db = setup();
    let found = engine(db).evaluate("bob", "has research/topic").unwrap();
    assert!(found.contains("paper-1"));
}

#[test]
fn private_tags_are_hidden_from_outsiders() {
    let db = setup();
    match engine(db)
        .evaluate("bob", "research/score > 5")
        .unwrap_err()
    {
        BfdError::Permission { paths } => assert_eq!(paths, vec!["research/score"]),
        other => panic!("expected a permission error, got {other}"),
    }
}

#[test]
fn readers_users_admins_and_site_admins_read_private_tags() {
    let db = setup();
    for user in ["alice", "dave", "carol", "admin"] {
        let found = engine(db)
            .evaluate(user, "research/score > 5")
            .unwrap_or_else(|e| panic!("{user} should read the tag: {e}"));
        assert!(found.contains("paper-1"), "{user} should find paper-1");
    }
}

#[test]
fn one_unreadable_tag_fails_the_whole_query() {
    let db = setup();
    // alice reads research/score, but the other path does not resolve;
    // nonexistent and unreadable are reported alike
    match engine(db)
        .evaluate("alice", "research/score > 5 and has research/nope")
        .unwrap_err()
    {
        BfdError::Permission { paths } => assert_eq!(paths, vec!["research/nope"]),
        other => panic!("expected a permission error, got {other}"),
    }
    // bob resolves neither; every failing path is named, sorted
    match engine(db)
        .evaluate("bob", "research/score > 5 and has research/nope")
        .unwrap_err()
    {
        BfdError::Permission { paths } => {
            assert_eq!(paths, vec!["research/nope", "research/score"])
        }
        other => panic!("expected a permission error, got {other}"),
    }
}

#[test]
fn only_users_and_site_admins_annotate() {
    let db = setup();
    let score = tag("research/score");
    db.annotate("dave", "paper-2", &score, TypedValue::Integer(3))
        .unwrap();
    db.annotate("admin", "paper-3", &score, TypedValue::Integer(5))
        .unwrap();
    // readers may read but not write
    assert!(matches!(
        db.annotate("alice", "paper-4", &score, TypedValue::Integer(1))
            .unwrap_err(),
        BfdError::Forbidden(_)
    ));
    // namespace admins do not implicitly write either
    assert!(matches!(
        db.annotate("carol", "paper-4", &score, TypedValue::Integer(1))
            .unwrap_err(),
        BfdError::Forbidden(_)
    ));
}

#[test]
fn annotation_values_must_carry_the_declared_type() {
    let db = setup();
    assert!(matches!(
        db.annotate(
            "admin",
            "paper-1",
            &tag("research/score"),
            TypedValue::String("8".into()),
        )
        .unwrap_err(),
        BfdError::Validation(_)
    ));
}

#[test]
fn namespace_creation_rules() {
    let db = setup();
    // a regular user may only create the namespace carrying their own name
    assert!(matches!(
        db.create_namespace("bob", "climate", "Climate", &[]).unwrap_err(),
        BfdError::Forbidden(_)
    ));
    db.create_namespace("bob", "bob", "Bob's corner", &[]).unwrap();
    // creating it made bob its admin
    db.create_tag(
        "bob",
        &tag("bob/notes"),
        "Notes",
        ValueType::String,
        false,
        &[],
        &[],
    )
    .unwrap();
    assert!(matches!(
        db.create_namespace("admin", "bob", "again", &[]).unwrap_err(),
        BfdError::Validation(_)
    ));
}

#[test]
fn tag_creation_requires_namespace_admin() {
    let db = setup();
    assert!(matches!(
        db.create_tag(
            "bob",
            &tag("research/extra"),
            "Extra",
            ValueType::String,
            false,
            &[],
            &[],
        )
        .unwrap_err(),
        BfdError::Forbidden(_)
    ));
    // carol administers the namespace
    db.create_tag(
        "carol",
        &tag("research/extra"),
        "Extra",
        ValueType::String,
        false,
        &[],
        &[],
    )
    .unwrap();
}

#[test]
fn role_changes_take_effect_immediately() {
    let db = setup();
    let score = tag("research/score");
    assert!(engine(db).evaluate("bob", "research/score > 5").is_err());
    db.add_tag_readers("carol", &score, &owned(&["bob"])).unwrap();
    assert!(engine(db).evaluate("bob", "research/score > 5").is_ok());
    db.remove_tag_readers("carol", &score, &owned(&["bob"])).unwrap();
    assert!(engine(db).evaluate("bob", "research/score > 5").is_err());
}

#[test]
fn making_a_tag_public_opens_it_up() {
    let db = setup();
    let score = tag("research/score");
    assert!(engine(db).evaluate("bob", "has research/score").is_err());
    db.set_tag_private("carol", &score, false).unwrap();
    assert!(engine(db).evaluate("bob", "has research/score").is_ok());
}

#[test]
fn object_tags_are_filtered_by_readability() {
    let db = setup();
    assert_eq!(
        db.object_tags("bob", "paper-1").unwrap(),
        vec![tag("research/topic")]
    );
    assert_eq!(
        db.object_tags("alice", "paper-1").unwrap(),
        vec![tag("research/score"), tag("research/topic")]
    );
}

#[test]
fn object_values_are_permission_checked() {
    let db = setup();
    assert_eq!(
        db.object_value("alice", "paper-1", &tag("research/score"))
            .unwrap(),
        Some(TypedValue::Integer(8))
    );
    assert!(matches!(
        db.object_value("bob", "paper-1", &tag("research/score"))
            .unwrap_err(),
        BfdError::Permission { .. }
    ));
}

#[test]
fn deleting_an_annotation_requires_write_access() {
    let db = setup();
    let score = tag("research/score");
    assert!(matches!(
        db.delete_annotation("alice", "paper-1", &score).unwrap_err(),
        BfdError::Forbidden(_)
    ));
    assert!(db.delete_annotation("dave", "paper-1", &score).unwrap());
    // gone now, removing again reports false
    assert!(!db.delete_annotation("dave", "paper-1", &score).unwrap());
}
