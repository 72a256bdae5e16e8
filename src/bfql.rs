//! The BFQL query engine: lexer, parser and set-algebra evaluator.
//!
//! A query string is turned into the set of object ids satisfying it in
//! three strictly ordered stages: tokenize (collecting every referenced tag
//! path into an explicit set), resolve permissions for all referenced tags
//! in one bulk catalog lookup, then parse and evaluate. No value comparison
//! runs before the permission stage has succeeded, so a query referencing
//! one unreadable tag fails outright without touching the value store.
//!
//! The grammar gives `and` and `or` a single precedence level, combined
//! left to right; parentheses group. `missing` is only valid as the right
//! operand of `and`.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use tracing::info;

use crate::catalog::{OtherHasher, TagMetadata, TagPath};
use crate::datatype::{Comparison, StringMatch, ValueType};
use crate::error::{BfdError, Result};
use crate::store::{Datastore, IdSet, Scalar, ValuePredicate, ValueStore};

/// A lexical token. Literals are converted to native values as they are
/// scanned.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Has,
    Missing,
    And,
    Or,
    Matches,
    Imatches,
    Is,
    Iis,
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Open,
    Close,
    Path(TagPath),
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    DateTime(DateTime<Utc>),
    Duration(Duration),
    Mime(String),
}

impl Token {
    /// The token class name used in syntax error reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Token::Has => "HAS",
            Token::Missing => "MISSING",
            Token::And => "AND",
            Token::Or => "OR",
            Token::Matches => "MATCHES",
            Token::Imatches => "IMATCHES",
            Token::Is => "IS",
            Token::Iis => "IIS",
            Token::Eq => "EQ",
            Token::Ne => "NE",
            Token::Gt => "GT",
            Token::Lt => "LT",
            Token::Ge => "GE",
            Token::Le => "LE",
            Token::Open => "(",
            Token::Close => ")",
            Token::Path(_) => "PATH",
            Token::Str(_) => "STRING",
            Token::Int(_) => "INT",
            Token::Float(_) => "FLOAT",
            Token::Bool(true) => "TRUE",
            Token::Bool(false) => "FALSE",
            Token::DateTime(_) => "DATETIME",
            Token::Duration(_) => "DURATION",
            Token::Mime(_) => "MIME",
        }
    }

    /// The token's textual value for error reports.
    pub fn text(&self) -> String {
        match self {
            Token::Path(path) => path.to_string(),
            Token::Str(s) => s.clone(),
            Token::Int(i) => i.to_string(),
            Token::Float(f) => f.to_string(),
            Token::Bool(b) => b.to_string(),
            Token::DateTime(d) => d.to_rfc3339(),
            Token::Duration(d) => format!("{}s", d.num_seconds()),
            Token::Mime(m) => m.clone(),
            Token::Eq => "=".to_string(),
            Token::Ne => "!=".to_string(),
            Token::Gt => ">".to_string(),
            Token::Lt => "<".to_string(),
            Token::Ge => ">=".to_string(),
            Token::Le => "<=".to_string(),
            other => other.kind().to_string(),
        }
    }
}

/// A token plus where it started, for error reporting.
#[derive(Debug, Clone)]
pub struct SpannedToken {
    pub token: Token,
    pub line: usize,
    pub column: usize,
}

/// The set of tag paths a query references, deduplicated.
pub type PathSet = HashSet<TagPath, OtherHasher>;

lazy_static! {
    static ref STRING: Regex = Regex::new(r#"^"((?:[^"\\]|\\.)*)""#).expect("string pattern");
    static ref DATETIME: Regex = Regex::new(
        r"^(\d{4})-(\d{2})-(\d{2})(?:T(\d{2}):(\d{2}):(\d{2})(Z|[+-]\d{2}:\d{2})?)?"
    )
    .expect("datetime pattern");
    static ref MIME: Regex = Regex::new(
        r"^mime:((?:application|audio|font|example|image|message|model|multipart|text|video)/[-\w]+(?:\+[-\w]+)?)"
    )
    .expect("mime pattern");
    static ref DURATION: Regex = Regex::new(r"^(-?\d+)([ds])\b").expect("duration pattern");
    static ref FLOAT: Regex = Regex::new(r"^-?\d+\.\d+(?:[eE]-?\d+)?").expect("float pattern");
    static ref INT: Regex = Regex::new(r"^-?\d+").expect("int pattern");
    static ref PATH: Regex = Regex::new(r"^([-\w]+)/([-\w]+)").expect("path pattern");
    static ref WORD: Regex = Regex::new(r"^[-\w]+").expect("word pattern");
}

/// Converts a query string into a token stream and the set of all tag
/// paths it references. The path set is what the permission resolver
/// consumes, independent of parse order; duplicates collapse.
pub struct Lexer {
    default_offset: FixedOffset,
}

impl Lexer {
    /// `default_offset` applies to datetime literals written without an
    /// explicit offset.
    pub fn new(default_offset: FixedOffset) -> Self {
        Lexer { default_offset }
    }

    pub fn tokenize(&self, text: &str) -> Result<(Vec<SpannedToken>, PathSet)> {
        let mut tokens = Vec::new();
        let mut paths = PathSet::default();
        let mut rest = text;
        let mut line = 1usize;
        let mut column = 1usize;

        while let Some(character) = rest.chars().next() {
            if character == '\n' {
                line += 1;
                column = 1;
                rest = &rest[1..];
                continue;
            }
            if character.is_whitespace() {
                column += 1;
                rest = &rest[character.len_utf8()..];
                continue;
            }

            let start_line = line;
            let start_column = column;
            let lexical = |ch: char| BfdError::Lexical {
                line: start_line,
                character: ch,
            };

            let consumed: usize;
            if let Some(captures) = STRING.captures(rest) {
                let inner = captures.get(1).map(|m| m.as_str()).unwrap_or("");
                tokens.push(SpannedToken {
                    token: Token::Str(unescape(inner)),
                    line: start_line,
                    column: start_column,
                });
                consumed = captures.get(0).map(|m| m.len()).unwrap_or(0);
            } else if let Some(captures) = DATETIME.captures(rest) {
                let value = self
                    .datetime_from(&captures)
                    .ok_or_else(|| lexical(character))?;
                tokens.push(SpannedToken {
                    token: Token::DateTime(value),
                    line: start_line,
                    column: start_column,
                });
                consumed = captures.get(0).map(|m| m.len()).unwrap_or(0);
            } else if let Some(captures) = MIME.captures(rest) {
                let value = captures.get(1).map(|m| m.as_str()).unwrap_or("");
                tokens.push(SpannedToken {
                    token: Token::Mime(value.to_string()),
                    line: start_line,
                    column: start_column,
                });
                consumed = captures.get(0).map(|m| m.len()).unwrap_or(0);
            } else if let Some(captures) = PATH.captures(rest) {
                // before the numeric classes so a path like 100d/x is not
                // split into a duration and garbage
                let namespace = captures.get(1).map(|m| m.as_str()).unwrap_or("");
                let name = captures.get(2).map(|m| m.as_str()).unwrap_or("");
                let path = TagPath::new(namespace, name)?;
                paths.insert(path.clone());
                tokens.push(SpannedToken {
                    token: Token::Path(path),
                    line: start_line,
                    column: start_column,
                });
                consumed = captures.get(0).map(|m| m.len()).unwrap_or(0);
            } else if let Some(captures) = DURATION.captures(rest) {
                let amount: i64 = captures
                    .get(1)
                    .map(|m| m.as_str())
                    .unwrap_or("")
                    .parse()
                    .map_err(|_| lexical(character))?;
                let value = match captures.get(2).map(|m| m.as_str()) {
                    Some("d") => Duration::days(amount),
                    _ => Duration::seconds(amount),
                };
                tokens.push(SpannedToken {
                    token: Token::Duration(value),
                    line: start_line,
                    column: start_column,
                });
                consumed = captures.get(0).map(|m| m.len()).unwrap_or(0);
            } else if let Some(matched) = FLOAT.find(rest) {
                let value: f64 = matched.as_str().parse().map_err(|_| lexical(character))?;
                tokens.push(SpannedToken {
                    token: Token::Float(value),
                    line: start_line,
                    column: start_column,
                });
                consumed = matched.len();
            } else if let Some(matched) = INT.find(rest) {
                let value: i64 = matched.as_str().parse().map_err(|_| lexical(character))?;
                tokens.push(SpannedToken {
                    token: Token::Int(value),
                    line: start_line,
                    column: start_column,
                });
                consumed = matched.len();
            } else if let Some(matched) = WORD.find(rest) {
                let token = match matched.as_str().to_uppercase().as_str() {
                    "HAS" => Token::Has,
                    "MISSING" => Token::Missing,
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    "MATCHES" => Token::Matches,
                    "IMATCHES" => Token::Imatches,
                    "IIS" => Token::Iis,
                    "IS" => Token::Is,
                    "TRUE" => Token::Bool(true),
                    "FALSE" => Token::Bool(false),
                    _ => return Err(lexical(character)),
                };
                tokens.push(SpannedToken {
                    token,
                    line: start_line,
                    column: start_column,
                });
                consumed = matched.len();
            } else {
                let token = if rest.starts_with(">=") {
                    Some((Token::Ge, 2))
                } else if rest.starts_with("<=") {
                    Some((Token::Le, 2))
                } else if rest.starts_with("!=") {
                    Some((Token::Ne, 2))
                } else if rest.starts_with('=') {
                    Some((Token::Eq, 1))
                } else if rest.starts_with('>') {
                    Some((Token::Gt, 1))
                } else if rest.starts_with('<') {
                    Some((Token::Lt, 1))
                } else if rest.starts_with('(') {
                    Some((Token::Open, 1))
                } else if rest.starts_with(')') {
                    Some((Token::Close, 1))
                } else {
                    None
                };
                match token {
                    Some((token, length)) => {
                        tokens.push(SpannedToken {
                            token,
                            line: start_line,
                            column: start_column,
                        });
                        consumed = length;
                    }
                    None => return Err(lexical(character)),
                }
            }

            for ch in rest[..consumed].chars() {
                if ch == '\n' {
                    line += 1;
                    column = 1;
                } else {
                    column += 1;
                }
            }
            rest = &rest[consumed..];
        }

        Ok((tokens, paths))
    }

    fn datetime_from(&self, captures: &regex::Captures) -> Option<DateTime<Utc>> {
        let year: i32 = captures.get(1)?.as_str().parse().ok()?;
        let month: u32 = captures.get(2)?.as_str().parse().ok()?;
        let day: u32 = captures.get(3)?.as_str().parse().ok()?;
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        let time = match captures.get(4) {
            Some(hour) => {
                let hour: u32 = hour.as_str().parse().ok()?;
                let minute: u32 = captures.get(5)?.as_str().parse().ok()?;
                let second: u32 = captures.get(6)?.as_str().parse().ok()?;
                NaiveTime::from_hms_opt(hour, minute, second)?
            }
            None => NaiveTime::from_hms_opt(0, 0, 0)?,
        };
        let offset = match captures.get(7).map(|m| m.as_str()) {
            None => self.default_offset,
            Some("Z") => FixedOffset::east_opt(0)?,
            Some(text) => {
                let sign = if text.starts_with('-') { -1 } else { 1 };
                let hours: i32 = text[1..3].parse().ok()?;
                let minutes: i32 = text[4..6].parse().ok()?;
                FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))?
            }
        };
        let naive = NaiveDateTime::new(date, time);
        Some(offset.from_local_datetime(&naive).single()?.with_timezone(&Utc))
    }
}

fn unescape(text: &str) -> String {
    let mut unescaped = String::with_capacity(text.len());
    let mut characters = text.chars();
    while let Some(character) = characters.next() {
        if character == '\\' {
            match characters.next() {
                Some(escaped @ ('"' | '\\')) => unescaped.push(escaped),
                Some(other) => {
                    unescaped.push('\\');
                    unescaped.push(other);
                }
                None => unescaped.push('\\'),
            }
        } else {
            unescaped.push(character);
        }
    }
    unescaped
}

/// Grammar-driven evaluator. Each reduction yields a set of object ids;
/// there is no retained syntax tree.
struct Parser<'a> {
    tokens: &'a [SpannedToken],
    position: usize,
    tags: &'a HashMap<TagPath, TagMetadata, OtherHasher>,
    store: &'a dyn ValueStore,
}

impl<'a> Parser<'a> {
    fn new(
        tokens: &'a [SpannedToken],
        tags: &'a HashMap<TagPath, TagMetadata, OtherHasher>,
        store: &'a dyn ValueStore,
    ) -> Self {
        Parser {
            tokens,
            position: 0,
            tags,
            store,
        }
    }

    fn parse(&mut self) -> Result<IdSet> {
        let result = self.parse_expr()?;
        match self.tokens.get(self.position) {
            Some(extra) => Err(unexpected(extra)),
            None => Ok(result),
        }
    }

    fn parse_expr(&mut self) -> Result<IdSet> {
        let mut result = self.parse_operand()?;
        loop {
            match self.peek() {
                Some(Token::And) => {
                    self.position += 1;
                    if matches!(self.peek(), Some(Token::Missing)) {
                        self.position += 1;
                        let path = self.expect_path()?;
                        let metadata = self.resolve(&path)?;
                        // objects from the left side not annotated with this tag
                        let annotated = self.store.exists(&metadata.path)?;
                        result.retain(|id| !annotated.contains(id));
                    } else {
                        let rhs = self.parse_operand()?;
                        result.retain(|id| rhs.contains(id));
                    }
                }
                Some(Token::Or) => {
                    self.position += 1;
                    let rhs = self.parse_operand()?;
                    result.extend(rhs);
                }
                _ => break,
            }
        }
        Ok(result)
    }

    fn parse_operand(&mut self) -> Result<IdSet> {
        let spanned = self.next()?;
        match spanned.token.clone() {
            Token::Open => {
                let inner = self.parse_expr()?;
                let closing = self.next()?;
                if closing.token == Token::Close {
                    Ok(inner)
                } else {
                    Err(unexpected(closing))
                }
            }
            Token::Has => {
                let path = self.expect_path()?;
                let metadata = self.resolve(&path)?;
                self.store.exists(&metadata.path)
            }
            Token::Path(path) => self.parse_leaf(&path),
            _ => Err(unexpected(spanned)),
        }
    }

    /// A leaf of the form `PATH <operator> <literal>`. The operator must be
    /// applicable to the tag's declared value type; that check runs before
    /// the value store is asked anything.
    fn parse_leaf(&mut self, path: &TagPath) -> Result<IdSet> {
        let operator = self.next()?;
        match operator.token.clone() {
            Token::Is => {
                let literal = self.next()?;
                match literal.token.clone() {
                    Token::Str(wanted) => {
                        self.eval_text(path, "is", StringMatch::Exact, wanted)
                    }
                    Token::Bool(wanted) => self.eval_bool(path, wanted),
                    Token::Mime(wanted) => self.eval_mime(path, wanted),
                    _ => Err(unexpected(literal)),
                }
            }
            Token::Iis => {
                let wanted = self.expect_string()?;
                self.eval_text(path, "iis", StringMatch::ExactFold, wanted)
            }
            Token::Matches => {
                let wanted = self.expect_string()?;
                self.eval_text(path, "matches", StringMatch::Substring, wanted)
            }
            Token::Imatches => {
                let wanted = self.expect_string()?;
                self.eval_text(path, "imatches", StringMatch::SubstringFold, wanted)
            }
            Token::Eq | Token::Ne | Token::Gt | Token::Lt | Token::Ge | Token::Le => {
                let scalar = self.expect_scalar()?;
                self.eval_compare(path, &operator.token, scalar)
            }
            _ => Err(unexpected(operator)),
        }
    }

    fn eval_text(
        &self,
        path: &TagPath,
        operator: &str,
        mode: StringMatch,
        wanted: String,
    ) -> Result<IdSet> {
        let metadata = self.resolve(path)?;
        match metadata.value_type {
            ValueType::String | ValueType::Pointer => self.store.filter(
                &metadata.path,
                &ValuePredicate::Text {
                    mode,
                    value: wanted,
                },
                None,
            ),
            other => Err(mismatch(path, operator, other)),
        }
    }

    fn eval_bool(&self, path: &TagPath, wanted: bool) -> Result<IdSet> {
        let metadata = self.resolve(path)?;
        match metadata.value_type {
            ValueType::Boolean => {
                self.store
                    .filter(&metadata.path, &ValuePredicate::Bool(wanted), None)
            }
            other => Err(mismatch(path, "is", other)),
        }
    }

    fn eval_mime(&self, path: &TagPath, wanted: String) -> Result<IdSet> {
        let metadata = self.resolve(path)?;
        match metadata.value_type {
            ValueType::Binary => {
                self.store
                    .filter(&metadata.path, &ValuePredicate::Mime(wanted), None)
            }
            other => Err(mismatch(path, "is", other)),
        }
    }

    fn eval_compare(&self, path: &TagPath, operator: &Token, scalar: Scalar) -> Result<IdSet> {
        let metadata = self.resolve(path)?;
        let fits = match metadata.value_type {
            ValueType::Integer => matches!(scalar, Scalar::Integer(_)),
            ValueType::Float => matches!(scalar, Scalar::Integer(_) | Scalar::Float(_)),
            ValueType::DateTime => matches!(scalar, Scalar::DateTime(_)),
            ValueType::Duration => matches!(scalar, Scalar::Duration(_)),
            _ => false,
        };
        if !fits {
            return Err(mismatch(path, &operator.text(), metadata.value_type));
        }
        match operator {
            // "exclude equal": everything annotated, minus the equal values
            Token::Ne => self.store.filter(
                &metadata.path,
                &ValuePredicate::Any,
                Some(&ValuePredicate::Compare {
                    comparison: Comparison::Eq,
                    value: scalar,
                }),
            ),
            _ => {
                let comparison = match operator {
                    Token::Eq => Comparison::Eq,
                    Token::Gt => Comparison::Gt,
                    Token::Lt => Comparison::Lt,
                    Token::Ge => Comparison::Ge,
                    _ => Comparison::Le,
                };
                self.store.filter(
                    &metadata.path,
                    &ValuePredicate::Compare {
                        comparison,
                        value: scalar,
                    },
                    None,
                )
            }
        }
    }

    fn resolve(&self, path: &TagPath) -> Result<&'a TagMetadata> {
        self.tags.get(path).ok_or_else(|| BfdError::UnknownTag {
            path: path.to_string(),
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position).map(|s| &s.token)
    }

    fn next(&mut self) -> Result<&'a SpannedToken> {
        match self.tokens.get(self.position) {
            Some(spanned) => {
                self.position += 1;
                Ok(spanned)
            }
            None => Err(end_of_query(self.tokens)),
        }
    }

    fn expect_path(&mut self) -> Result<TagPath> {
        let spanned = self.next()?;
        match &spanned.token {
            Token::Path(path) => Ok(path.clone()),
            _ => Err(unexpected(spanned)),
        }
    }

    fn expect_string(&mut self) -> Result<String> {
        let spanned = self.next()?;
        match &spanned.token {
            Token::Str(s) => Ok(s.clone()),
            _ => Err(unexpected(spanned)),
        }
    }

    fn expect_scalar(&mut self) -> Result<Scalar> {
        let spanned = self.next()?;
        match &spanned.token {
            Token::Int(i) => Ok(Scalar::Integer(*i)),
            Token::Float(f) => Ok(Scalar::Float(*f)),
            Token::DateTime(d) => Ok(Scalar::DateTime(*d)),
            Token::Duration(d) => Ok(Scalar::Duration(*d)),
            _ => Err(unexpected(spanned)),
        }
    }
}

fn unexpected(spanned: &SpannedToken) -> BfdError {
    BfdError::Syntax {
        token: spanned.token.kind().to_string(),
        value: spanned.token.text(),
        line: spanned.line,
        column: spanned.column,
    }
}

fn end_of_query(tokens: &[SpannedToken]) -> BfdError {
    let (line, column) = tokens
        .last()
        .map(|s| (s.line, s.column))
        .unwrap_or((1, 1));
    BfdError::Syntax {
        token: "EOF".to_string(),
        value: String::new(),
        line,
        column,
    }
}

fn mismatch(path: &TagPath, operator: &str, value_type: ValueType) -> BfdError {
    BfdError::TypeMismatch {
        path: path.to_string(),
        operator: operator.to_string(),
        value_type: value_type.to_string(),
    }
}

/// The query engine: ties the lexer, the catalog's permission resolver and
/// the parser/evaluator into one synchronous pipeline. Holds no mutable
/// state; concurrent evaluations are fully independent.
pub struct Engine<'db> {
    datastore: &'db Datastore,
    lexer: Lexer,
}

impl<'db> Engine<'db> {
    pub fn new(datastore: &'db Datastore, default_offset: FixedOffset) -> Self {
        Engine {
            datastore,
            lexer: Lexer::new(default_offset),
        }
    }

    /// Evaluate a BFQL query with the user's read privileges, returning the
    /// ids of every object satisfying it.
    pub fn evaluate(&self, user: &str, query: &str) -> Result<IdSet> {
        let (tokens, paths) = self.lexer.tokenize(query)?;
        if tokens.is_empty() {
            return Err(BfdError::EmptyQuery);
        }
        let tags = self.datastore.catalog().readable_tags(user, &paths)?;
        let mut parser = Parser::new(&tokens, &tags, self.datastore.store());
        let result = parser.parse()?;
        info!(user, objects = result.len(), "query evaluated");
        Ok(result)
    }
}
