//! Grocery Catalog Service
//!
//! Catalog backend for a grocery marketplace. Clients create, update, delete,
//! list and bulk-import product records over HTTP. Each record may carry an
//! image, which is fingerprinted for duplicate detection, stored in blob
//! storage and paired with a derived thumbnail. Every single-item mutation is
//! announced on the audit topic.
//!
//! ## Features
//!
//! - **Content deduplication**: SHA-256 fingerprints reject a second item
//!   carrying the same image bytes
//! - **Bounded media publishing**: image uploads run detached and the request
//!   waits at most a fixed time for them
//! - **Bulk import**: CSV or JSON files with per-row fault isolation
//! - **Pluggable backends**: PostgreSQL or in-memory documents, S3 or
//!   in-memory blobs, Kafka or log audit output
//!
//! ## Architecture
//!
//! ```text
//!  HTTP (axum)                                   Blob storage
//! ┌──────────────┐     ┌──────────────┐         ┌──────────────┐
//! │ /create...   │────▶│ Item         │────────▶│ images/      │
//! │ /update...   │     │ Service      │  Media  │ thumbnails/  │
//! │ /bulkupload  │     └──────────────┘ Publisher└──────────────┘
//! └──────────────┘        │    │    │
//!                         │    │    └──────────────────┐
//!                         ▼    ▼                       ▼
//!              ┌──────────────┐ ┌──────────────┐ ┌──────────────┐
//!              │ Duplicate    │ │ Item         │ │ Audit        │
//!              │ Detector     │ │ Collection   │ │ Emitter      │
//!              └──────────────┘ └──────────────┘ └──────────────┘
//!                                      │                │
//!                                      ▼                ▼
//!                               ┌──────────────┐ ┌──────────────┐
//!                               │ Record Store │ │ Kafka        │
//!                               │ (documents)  │ │ audit topic  │
//!                               └──────────────┘ └──────────────┘
//! ```

pub mod api;
pub mod audit;
pub mod blob_store;
pub mod bulk;
pub mod config;
pub mod duplicate;
pub mod error;
pub mod hasher;
pub mod identity;
pub mod item;
pub mod media;
pub mod memory_store;
pub mod pg_store;
pub mod record_store;
pub mod service;
pub mod thumbnail;

pub use api::{AppState, ErrorResponse};
pub use audit::{AuditEmitter, KafkaAuditEmitter, LogAuditEmitter};
pub use blob_store::{BlobStore, MemoryBlobStore, S3BlobStore};
pub use bulk::{BatchSummary, FileType};
pub use config::Config;
pub use duplicate::DuplicateDetector;
pub use error::{ServiceError, ServiceResult};
pub use item::{Item, ItemSummary, MonthYear};
pub use media::{MediaKey, MediaPublisher, PublishOutcome};
pub use memory_store::MemoryRecordStore;
pub use pg_store::PgRecordStore;
pub use record_store::{ItemCollection, RecordStore};
pub use service::{ItemService, ServiceSettings};
pub use thumbnail::ThumbnailDeriver;
