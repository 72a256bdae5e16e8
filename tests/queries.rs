use bfd::bfql::Engine;
use bfd::catalog::TagPath;
use bfd::datatype::{TypedValue, ValueType};
use bfd::error::BfdError;
use bfd::persist::PersistenceMode;
use bfd::store::Datastore;
use chrono::{Duration, FixedOffset, TimeZone, Utc};

fn tag(path: &str) -> TagPath {
    TagPath::parse(path).unwrap()
}

/// A small library catalogue, annotated as the admin. Lifetime workaround:
/// the datastore is leaked so the engine can be 'static in tests.
fn setup() -> Engine<'static> {
    let db = Datastore::new(PersistenceMode::InMemory).unwrap();
    db.add_site_admin("admin").unwrap();
    db.create_namespace("admin", "lib", "Library", &[]).unwrap();
    let create = |name: &str, value_type: ValueType| {
        db.create_tag("admin", &tag(name), name, value_type, false, &[], &[])
            .unwrap();
    };
    create("lib/title", ValueType::String);
    create("lib/due", ValueType::DateTime);
    create("lib/pages", ValueType::Integer);
    create("lib/rating", ValueType::Float);
    create("lib/available", ValueType::Boolean);
    create("lib/cover", ValueType::Binary);
    create("lib/homepage", ValueType::Pointer);
    create("lib/loan", ValueType::Duration);

    let annotate = |object: &str, name: &str, value: TypedValue| {
        db.annotate("admin", object, &tag(name), value).unwrap();
    };
    annotate("book-1", "lib/title", TypedValue::String("Moby Dick".into()));
    annotate(
        "book-1",
        "lib/due",
        TypedValue::DateTime(Utc.with_ymd_and_hms(2020, 12, 1, 0, 0, 0).unwrap()),
    );
    annotate("book-1", "lib/pages", TypedValue::Integer(600));
    annotate("book-1", "lib/rating", TypedValue::Float(4.5));
    annotate("book-1", "lib/available", TypedValue::Boolean(true));

    annotate(
        "book-2",
        "lib/title",
        TypedValue::String("moby dick II".into()),
    );
    annotate(
        "book-2",
        "lib/due",
        TypedValue::DateTime(Utc.with_ymd_and_hms(2021, 3, 15, 0, 0, 0).unwrap()),
    );
    annotate("book-2", "lib/pages", TypedValue::Integer(300));
    annotate("book-2", "lib/rating", TypedValue::Float(3.0));
    annotate("book-2", "lib/available", TypedValue::Boolean(false));

    annotate("book-3", "lib/title", TypedValue::String("Walden".into()));
    annotate("book-3", "lib/pages", TypedValue::Integer(350));
    annotate("book-3", "lib/rating", TypedValue::Float(4.5));
    annotate("book-3", "lib/available", TypedValue::Boolean(true));
    annotate(
        "book-3",
        "lib/cover",
        TypedValue::Binary {
            location: "covers/walden.png".into(),
            mime: "image/png".into(),
        },
    );
    annotate(
        "book-3",
        "lib/homepage",
        TypedValue::Pointer("https://example.org/walden".into()),
    );
    annotate("book-3", "lib/loan", TypedValue::Duration(Duration::days(14)));

    Engine::new(
        Box::leak(Box::new(db)),
        FixedOffset::east_opt(0).unwrap(),
    )
}

fn evaluate(engine: &Engine, query: &str) -> Vec<String> {
    let mut ids: Vec<String> = engine
        .evaluate("reader", query)
        .expect("query ok")
        .into_iter()
        .collect();
    ids.sort();
    ids
}

#[test]
fn has_finds_annotated_objects() {
    let engine = setup();
    assert_eq!(evaluate(&engine, "has lib/cover"), vec!["book-3"]);
    assert_eq!(
        evaluate(&engine, "has lib/title"),
        vec!["book-1", "book-2", "book-3"]
    );
}

#[test]
fn string_matching_modes() {
    let engine = setup();
    assert_eq!(
        evaluate(&engine, "lib/title is \"Moby Dick\""),
        vec!["book-1"]
    );
    // fold case, still exact
    assert_eq!(
        evaluate(&engine, "lib/title iis \"moby dick\""),
        vec!["book-1"]
    );
    // substring, case sensitive
    assert_eq!(evaluate(&engine, "lib/title matches \"Moby\""), vec!["book-1"]);
    // substring, case folded
    assert_eq!(
        evaluate(&engine, "lib/title imatches \"moby\""),
        vec!["book-1", "book-2"]
    );
}

#[test]
fn pointer_tags_match_like_strings() {
    let engine = setup();
    assert_eq!(
        evaluate(&engine, "lib/homepage matches \"example.org\""),
        vec!["book-3"]
    );
}

#[test]
fn boolean_leaf() {
    let engine = setup();
    assert_eq!(
        evaluate(&engine, "lib/available is true"),
        vec!["book-1", "book-3"]
    );
    assert_eq!(evaluate(&engine, "lib/available is false"), vec!["book-2"]);
}

#[test]
fn mime_leaf() {
    let engine = setup();
    assert_eq!(
        evaluate(&engine, "lib/cover is mime:image/png"),
        vec!["book-3"]
    );
    assert!(evaluate(&engine, "lib/cover is mime:image/jpeg").is_empty());
}

#[test]
fn integer_comparisons() {
    let engine = setup();
    assert_eq!(evaluate(&engine, "lib/pages = 300"), vec!["book-2"]);
    assert_eq!(
        evaluate(&engine, "lib/pages > 300"),
        vec!["book-1", "book-3"]
    );
    assert_eq!(
        evaluate(&engine, "lib/pages >= 300"),
        vec!["book-1", "book-2", "book-3"]
    );
    assert_eq!(evaluate(&engine, "lib/pages < 350"), vec!["book-2"]);
}

#[test]
fn not_equal_excludes_from_the_annotated_set() {
    let engine = setup();
    // annotated minus equal, not a boolean negation
    assert_eq!(
        evaluate(&engine, "lib/pages != 300"),
        vec!["book-1", "book-3"]
    );
}

#[test]
fn integer_literals_fit_float_tags() {
    let engine = setup();
    assert_eq!(
        evaluate(&engine, "lib/rating >= 4"),
        vec!["book-1", "book-3"]
    );
    assert_eq!(evaluate(&engine, "lib/rating < 4.5"), vec!["book-2"]);
}

#[test]
fn datetime_comparisons() {
    let engine = setup();
    assert_eq!(evaluate(&engine, "lib/due <= 2020-12-31"), vec!["book-1"]);
    // 02:00 at +03:00 is the previous day 23:00 UTC
    assert_eq!(
        evaluate(&engine, "lib/due < 2021-03-15T02:00:00+03:00"),
        vec!["book-1"]
    );
    assert_eq!(
        evaluate(&engine, "lib/due >= 2020-01-01"),
        vec!["book-1", "book-2"]
    );
}

#[test]
fn duration_comparisons() {
    let engine = setup();
    assert_eq!(evaluate(&engine, "lib/loan >= 7d"), vec!["book-3"]);
    assert!(evaluate(&engine, "lib/loan > 14d").is_empty());
}

#[test]
fn and_or_combine_left_to_right() {
    let engine = setup();
    // ((available ∪ pages=300) ∩ pages<400)
    assert_eq!(
        evaluate(
            &engine,
            "lib/available is true or lib/pages = 300 and lib/pages < 400"
        ),
        vec!["book-2", "book-3"]
    );
    // parentheses regroup: available ∪ (pages=300 ∩ pages<400)
    assert_eq!(
        evaluate(
            &engine,
            "lib/available is true or (lib/pages = 300 and lib/pages < 400)"
        ),
        vec!["book-1", "book-2", "book-3"]
    );
}

#[test]
fn missing_excludes_annotated_objects() {
    let engine = setup();
    assert_eq!(
        evaluate(&engine, "lib/available is true and missing lib/cover"),
        vec!["book-1"]
    );
    assert!(evaluate(&engine, "has lib/title and missing lib/title").is_empty());
}

#[test]
fn missing_is_only_valid_after_and() {
    let engine = setup();
    assert!(matches!(
        engine.evaluate("reader", "missing lib/cover").unwrap_err(),
        BfdError::Syntax { .. }
    ));
    assert!(matches!(
        engine
            .evaluate("reader", "has lib/title or missing lib/cover")
            .unwrap_err(),
        BfdError::Syntax { .. }
    ));
}

#[test]
fn empty_queries_do_not_make_sense() {
    let engine = setup();
    assert!(matches!(
        engine.evaluate("reader", "").unwrap_err(),
        BfdError::EmptyQuery
    ));
    assert!(matches!(
        engine.evaluate("reader", "   \n  ").unwrap_err(),
        BfdError::EmptyQuery
    ));
}

#[test]
fn syntax_errors_report_the_offending_token() {
    let engine = setup();
    match engine
        .evaluate("reader", "has lib/title )")
        .unwrap_err()
    {
        BfdError::Syntax { token, line, column, .. } => {
            assert_eq!(token, ")");
            assert_eq!((line, column), (1, 15));
        }
        other => panic!("expected a syntax error, got {other}"),
    }
    // unterminated group runs off the end of the query
    assert!(matches!(
        engine
            .evaluate("reader", "(has lib/title")
            .unwrap_err(),
        BfdError::Syntax { token, .. } if token == "EOF"
    ));
}

#[test]
fn operators_must_fit_the_value_type() {
    let engine = setup();
    assert!(matches!(
        engine.evaluate("reader", "lib/title > 5").unwrap_err(),
        BfdError::TypeMismatch { .. }
    ));
    assert!(matches!(
        engine
            .evaluate("reader", "lib/pages matches \"x\"")
            .unwrap_err(),
        BfdError::TypeMismatch { .. }
    ));
    assert!(matches!(
        engine
            .evaluate("reader", "lib/available is \"true\"")
            .unwrap_err(),
        BfdError::TypeMismatch { .. }
    ));
    // integer tags never accept float literals
    assert!(matches!(
        engine.evaluate("reader", "lib/pages > 4.5").unwrap_err(),
        BfdError::TypeMismatch { .. }
    ));
}
