//! Error types for the catalog service.
//!
//! Each concern has its own enum; [`ServiceError`] is what the item use cases
//! return and what the HTTP layer maps onto status codes.

use thiserror::Error;

/// Record store failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to encode document: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Failures while hashing, deriving or publishing media
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("failed to read image data: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to decode {format} image: {message}")]
    Decode { format: String, message: String },

    #[error("resize produced an empty {width}x{height} image")]
    Resize { width: u32, height: u32 },

    #[error("failed to encode thumbnail: {0}")]
    Encode(String),

    #[error("failed to upload {key}: {message}")]
    Upload { key: String, message: String },

    #[error("media task failed: {0}")]
    Task(String),
}

/// Failures reading a bulk upload file as a whole
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("could not determine file type")]
    UnknownFileType,

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid CSV: {0}")]
    Csv(#[from] csv::Error),
}

/// Failures publishing audit records
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("failed to publish audit record: {0}")]
    Publish(String),
}

/// Errors surfaced by item use cases
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("an item with the same image already exists")]
    DuplicateImage,

    #[error("item {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ingest(#[from] IngestError),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ServiceError::Validation(errors.to_string())
    }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;
