//! Resumable, checksum-verified content ingestion.
//!
//! [`UploadManager`] owns the session lifecycle (open, append, abort, reap);
//! [`ContentImporter`] turns a complete session into a content-addressed
//! object and hands it to a [`Catalog`].

pub mod catalog;
pub mod error;
pub mod importer;
pub mod locks;
pub mod manager;
pub mod retry;

pub use catalog::{Catalog, MetadataCatalog};
pub use error::{IngestError, IngestResult};
pub use importer::ContentImporter;
pub use manager::{OpenOutcome, UploadManager};
pub use retry::RetryPolicy;
