use std::{error, fmt, io, result};

/// Crate-wide result type for fatal extraction outcomes.
pub type Result<T> = result::Result<T, ExtractError>;

/// A recoverable, budget-counted error raised while processing a single
/// vertical line. The driver reports it on the status channel and keeps
/// going until the configured error budget is exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcError {
    ParseSyntax { line: usize, message: String },
    NestedMismatch { expected: String, got: String },
    SelfRecursion { name: String, ident: String },
    MissingOpen { name: String },
    GeneratorFailure(String),
}

impl fmt::Display for ProcError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProcError::ParseSyntax { line, message } => {
                write!(f, "syntax error on line {line}: {message}")
            }
            ProcError::NestedMismatch { expected, got } => {
                write!(f, "nesting error: expected closing of {expected}, got {got}")
            }
            ProcError::SelfRecursion { name, ident } => {
                write!(f, "structure {name} ({ident}) recursively opened")
            }
            ProcError::MissingOpen { name } => {
                write!(f, "closing tag {name} has no matching open element")
            }
            ProcError::GeneratorFailure(msg) => {
                write!(f, "aligned column generator failed: {msg}")
            }
        }
    }
}

impl error::Error for ProcError {}

/// A database backend failure.
#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    Mysql(mysql::Error),
    NoTransaction(String),
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DbError::Sqlite(e) => write!(f, "sqlite error: {e}"),
            DbError::Mysql(e) => write!(f, "mysql error: {e}"),
            DbError::NoTransaction(op) => {
                write!(f, "cannot perform {op} - no transaction active")
            }
        }
    }
}

impl error::Error for DbError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            DbError::Sqlite(e) => Some(e),
            DbError::Mysql(e) => Some(e),
            DbError::NoTransaction(_) => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(e: rusqlite::Error) -> DbError {
        DbError::Sqlite(e)
    }
}

impl From<mysql::Error> for DbError {
    fn from(e: mysql::Error) -> DbError {
        DbError::Mysql(e)
    }
}

/// A fatal error terminating the whole extraction. The transaction is
/// rolled back and the status channel closed when one of these surfaces.
#[derive(Debug)]
pub enum ExtractError {
    TooManyParsingErrors,
    Writer(DbError),
    ConfigInvalid(String),
    Cancelled,
    Io(io::Error),
    Internal(String),
}

impl fmt::Display for ExtractError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExtractError::TooManyParsingErrors => write!(f, "too many parsing errors"),
            ExtractError::Writer(e) => write!(f, "database writer failed: {e}"),
            ExtractError::ConfigInvalid(msg) => write!(f, "invalid configuration: {msg}"),
            ExtractError::Cancelled => write!(f, "received stop signal"),
            ExtractError::Io(e) => write!(f, "io error: {e}"),
            ExtractError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl error::Error for ExtractError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            ExtractError::Writer(e) => Some(e),
            ExtractError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DbError> for ExtractError {
    fn from(e: DbError) -> ExtractError {
        ExtractError::Writer(e)
    }
}

impl From<io::Error> for ExtractError {
    fn from(e: io::Error) -> ExtractError {
        ExtractError::Io(e)
    }
}
