use thiserror::Error;
use uuid::Uuid;

/// Custom Result type for this crate.
pub type Result<T> = std::result::Result<T, LiftError>;

/// Enum representing all possible errors in the lift_rs library.
///
/// Only a handful of these abort an import. Problems with individual records
/// are collected in the `ImportReport` instead.
#[derive(Error, Debug)]
pub enum LiftError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML parsing error: {0}")]
    XmlParse(#[from] quick_xml::DeError),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Async task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("Failed to parse data: {0}")]
    ParseError(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(Uuid),

    #[error("Object {guid} is a {found}, expected {expected}")]
    WrongKind {
        guid: Uuid,
        expected: String,
        found: String,
    },

    /// An enumerated value in the input is unknown to this schema version.
    /// Fatal for the whole import.
    #[error("Malformed {kind} value '{value}': the file was written by an incompatible version")]
    MalformedEnum { kind: String, value: String },

    #[error("Could not determine data directory")]
    DataDirNotFound,

    #[error("Internal error: {0}")]
    Internal(String),
}
