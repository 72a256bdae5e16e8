use bfd::bfql::{Lexer, Token};
use bfd::error::BfdError;
use chrono::{FixedOffset, TimeZone, Utc};

fn utc_lexer() -> Lexer {
    Lexer::new(FixedOffset::east_opt(0).unwrap())
}

fn tokens_of(query: &str) -> Vec<Token> {
    let (tokens, _) = utc_lexer().tokenize(query).expect("lexes");
    tokens.into_iter().map(|s| s.token).collect()
}

#[test]
fn keywords_are_case_insensitive() {
    assert_eq!(
        tokens_of("HAS has Has and OR missing IS iis MATCHES imatches"),
        vec![
            Token::Has,
            Token::Has,
            Token::Has,
            Token::And,
            Token::Or,
            Token::Missing,
            Token::Is,
            Token::Iis,
            Token::Matches,
            Token::Imatches,
        ]
    );
}

#[test]
fn booleans_and_operators() {
    assert_eq!(
        tokens_of("true FALSE >= <= != = > < ( )"),
        vec![
            Token::Bool(true),
            Token::Bool(false),
            Token::Ge,
            Token::Le,
            Token::Ne,
            Token::Eq,
            Token::Gt,
            Token::Lt,
            Token::Open,
            Token::Close,
        ]
    );
}

#[test]
fn path_set_collects_and_deduplicates() {
    let (_, paths) = utc_lexer()
        .tokenize("lib/a and lib/a or lib/b and missing lib/a")
        .expect("lexes");
    assert_eq!(paths.len(), 2);
}

#[test]
fn string_escapes() {
    assert_eq!(
        tokens_of(r#""a \"quoted\" \\ back""#),
        vec![Token::Str(r#"a "quoted" \ back"#.to_string())]
    );
}

#[test]
fn unicode_strings_and_paths() {
    let (tokens, paths) = utc_lexer()
        .tokenize("böcker/titel is \"Möte med Övermakten\"")
        .expect("lexes");
    assert_eq!(paths.len(), 1);
    assert_eq!(tokens.len(), 3);
    assert_eq!(
        tokens[2].token,
        Token::Str("Möte med Övermakten".to_string())
    );
}

#[test]
fn bare_date_uses_the_default_offset() {
    // +02:00: local midnight is 22:00 the previous day in UTC
    let lexer = Lexer::new(FixedOffset::east_opt(2 * 3600).unwrap());
    let (tokens, _) = lexer.tokenize("2020-06-01").expect("lexes");
    assert_eq!(
        tokens[0].token,
        Token::DateTime(Utc.with_ymd_and_hms(2020, 5, 31, 22, 0, 0).unwrap())
    );
}

#[test]
fn explicit_offsets_override_the_default() {
    let lexer = Lexer::new(FixedOffset::east_opt(2 * 3600).unwrap());
    let (tokens, _) = lexer
        .tokenize("2021-03-15T12:00:00Z 2021-03-15T12:00:00+03:00")
        .expect("lexes");
    assert_eq!(
        tokens[0].token,
        Token::DateTime(Utc.with_ymd_and_hms(2021, 3, 15, 12, 0, 0).unwrap())
    );
    assert_eq!(
        tokens[1].token,
        Token::DateTime(Utc.with_ymd_and_hms(2021, 3, 15, 9, 0, 0).unwrap())
    );
}

#[test]
fn durations_in_days_and_seconds() {
    assert_eq!(
        tokens_of("14d 30s -5s"),
        vec![
            Token::Duration(chrono::Duration::days(14)),
            Token::Duration(chrono::Duration::seconds(30)),
            Token::Duration(chrono::Duration::seconds(-5)),
        ]
    );
}

#[test]
fn floats_take_precedence_over_ints() {
    assert_eq!(
        tokens_of("4.5 45 -3 2.5e3"),
        vec![
            Token::Float(4.5),
            Token::Int(45),
            Token::Int(-3),
            Token::Float(2500.0),
        ]
    );
}

#[test]
fn numeric_looking_namespace_is_still_a_path() {
    // "100d" alone is a duration; with a slash it must lex as a tag path
    let (tokens, paths) = utc_lexer().tokenize("100d/x").expect("lexes");
    assert_eq!(paths.len(), 1);
    assert!(matches!(tokens[0].token, Token::Path(_)));
}

#[test]
fn mime_literals() {
    assert_eq!(
        tokens_of("mime:image/svg+xml mime:application/pdf"),
        vec![
            Token::Mime("image/svg+xml".to_string()),
            Token::Mime("application/pdf".to_string()),
        ]
    );
}

#[test]
fn positions_track_lines_and_columns() {
    let (tokens, _) = utc_lexer().tokenize("has\n  lib/x").expect("lexes");
    assert_eq!((tokens[0].line, tokens[0].column), (1, 1));
    assert_eq!((tokens[1].line, tokens[1].column), (2, 3));
}

#[test]
fn unrecognised_character_is_a_lexical_error() {
    let err = utc_lexer().tokenize("lib/x\n@").unwrap_err();
    match err {
        BfdError::Lexical { line, character } => {
            assert_eq!(line, 2);
            assert_eq!(character, '@');
        }
        other => panic!("expected a lexical error, got {other}"),
    }
}

#[test]
fn unknown_word_is_a_lexical_error() {
    assert!(matches!(
        utc_lexer().tokenize("lib/x nearby 5").unwrap_err(),
        BfdError::Lexical { .. }
    ));
}
