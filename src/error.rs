// Copyright 2023 Remi Bernotavicius

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{field}: {message}")]
    Validation { field: String, message: String },

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("authentication credentials were not provided")]
    Unauthenticated,

    #[error("{0}")]
    PermissionDenied(String),

    #[error("database error: {0}")]
    Database(#[from] DieselError),

    #[error("connection error: {0}")]
    Connection(#[from] diesel::ConnectionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(#[from] Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation { .. } | Self::Conflict(_) | Self::Json(_) => 400,
            Self::Unauthenticated => 401,
            Self::PermissionDenied(_) => 403,
            Self::NotFound(_) => 404,
            Self::Database(_) | Self::Connection(_) | Self::Io(_) | Self::Internal(_) => 500,
        }
    }

    /// The body a client sees. Internal failures are logged, not exposed.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Validation { field, message } => json!({ field.as_str(): [message] }),
            Self::Conflict(message) => json!({ "errors": message }),
            Self::Json(e) => json!({ "detail": format!("malformed JSON: {e}") }),
            Self::NotFound(message) | Self::PermissionDenied(message) => {
                json!({ "detail": message })
            }
            Self::Unauthenticated => json!({ "detail": self.to_string() }),
            Self::Database(_) | Self::Connection(_) | Self::Io(_) | Self::Internal(_) => {
                json!({ "detail": "internal server error" })
            }
        }
    }
}

pub(crate) trait ConflictExt<T> {
    /// Maps a store-level uniqueness violation onto [`Error::Conflict`].
    fn or_conflict(self, message: &str) -> Result<T>;
}

impl<T> ConflictExt<T> for diesel::QueryResult<T> {
    fn or_conflict(self, message: &str) -> Result<T> {
        self.map_err(|e| match e {
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                Error::Conflict(message.into())
            }
            e => e.into(),
        })
    }
}

#[test]
fn status_codes() {
    assert_eq!(Error::validation("amount", "too big").status_code(), 400);
    assert_eq!(Error::Conflict("dup".into()).status_code(), 400);
    assert_eq!(Error::NotFound("gone".into()).status_code(), 404);
    assert_eq!(Error::Unauthenticated.status_code(), 401);
    assert_eq!(Error::PermissionDenied("no".into()).status_code(), 403);
    assert_eq!(Error::Database(DieselError::NotFound).status_code(), 500);
}

#[test]
fn json_bodies() {
    assert_eq!(
        Error::validation("amount", "too big").to_json(),
        json!({ "amount": ["too big"] })
    );
    assert_eq!(
        Error::Conflict("already there".into()).to_json(),
        json!({ "errors": "already there" })
    );
    assert_eq!(
        Error::Database(DieselError::NotFound).to_json(),
        json!({ "detail": "internal server error" })
    );
}

#[test]
fn unique_violation_becomes_conflict() {
    let result: diesel::QueryResult<()> = Err(DieselError::DatabaseError(
        DatabaseErrorKind::UniqueViolation,
        Box::new(String::from("UNIQUE constraint failed")),
    ));
    assert!(matches!(
        result.or_conflict("duplicate"),
        Err(Error::Conflict(m)) if m == "duplicate"
    ));

    let result: diesel::QueryResult<()> = Err(DieselError::NotFound);
    assert!(matches!(result.or_conflict("duplicate"), Err(Error::Database(_))));
}
