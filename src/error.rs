use thiserror::Error;

#[derive(Error, Debug)]
pub enum BfdError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("Permission denied: {0}")]
    Forbidden(String),
    #[error("Syntax error on line {line}: unrecognised character {character:?}")]
    Lexical { line: usize, character: char },
    #[error("The query does not make sense")]
    EmptyQuery,
    #[error("The following tags cannot be read: {}", paths.join(", "))]
    Permission { paths: Vec<String> },
    #[error("Unknown tag: {path}")]
    UnknownTag { path: String },
    #[error("Cannot use operator {operator} on tag {path} of type {value_type}")]
    TypeMismatch {
        path: String,
        operator: String,
        value_type: String,
    },
    #[error("Syntax error on line {line} column {column}: unexpected {token} {value:?}")]
    Syntax {
        token: String,
        value: String,
        line: usize,
        column: usize,
    },
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, BfdError>;

// Helper conversions
impl From<rusqlite::Error> for BfdError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}
