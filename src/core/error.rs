

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use thiserror::Error;

use crate::db::{RecordKey, StoreError};


#[derive(Error, Debug)]
pub enum UndoError {
    #[error("Capture failed at {path}: {reason}")]
    Capture { path: String, reason: String },

    #[error("Deletion of {resource} is blocked by {relation} (row {blocking})")]
    DeleteRestricted {
        resource: RecordKey,
        relation: String,
        blocking: RecordKey,
    },

    #[error("Record not found: {0}")]
    RecordNotFound(RecordKey),

    #[error("Undo token not found")]
    NotFound,

    #[error("Undo token already used at {consumed_at:?}")]
    AlreadyConsumed { consumed_at: Option<DateTime<Utc>> },

    #[error("Undo window closed at {deadline}")]
    Expired { deadline: DateTime<Utc> },

    #[error("Referenced record {reference} no longer exists (at {path})")]
    ReferenceRecordNotFound { reference: RecordKey, path: String },

    #[error("Restore failed at {path}: {reason}")]
    Restore { path: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl UndoError {
    pub fn capture(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Capture {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn restore(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Restore {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Capture { .. } => ErrorKind::CaptureError,
            Self::DeleteRestricted { .. } => ErrorKind::DeleteRestricted,
            Self::RecordNotFound(_) => ErrorKind::RecordNotFound,
            Self::NotFound => ErrorKind::NotFound,
            Self::AlreadyConsumed { .. } => ErrorKind::AlreadyConsumed,
            Self::Expired { .. } => ErrorKind::Expired,
            Self::ReferenceRecordNotFound { .. } => ErrorKind::ReferenceRecordNotFound,
            Self::Restore { .. } => ErrorKind::RestoreError,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Config(_) => ErrorKind::Config,
            Self::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Flattens the error into the `{error_kind, detail}` shape handed to callers.
    pub fn to_failure(&self) -> UndoFailure {
        UndoFailure {
            error_kind: self.kind(),
            detail: self.to_string(),
        }
    }
}


#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
pub enum ErrorKind {
    CaptureError,
    DeleteRestricted,
    RecordNotFound,
    NotFound,
    AlreadyConsumed,
    Expired,
    ReferenceRecordNotFound,
    RestoreError,
    Storage,
    Config,
    Serialization,
}


#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoFailure {
    pub error_kind: ErrorKind,
    pub detail: String,
}


pub type Result<T> = std::result::Result<T, UndoError>;
