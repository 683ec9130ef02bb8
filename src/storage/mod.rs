//! Upload storage: filename sanitization and the streaming ingest pipeline.

pub mod filename;
pub mod ingest;

pub use filename::{get_extension, sanitize_filename};
pub use ingest::{Ingestor, UploadOutcome};
