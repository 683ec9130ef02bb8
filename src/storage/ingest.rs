//! # Streaming Upload Ingestor
//!
//! The ingest pipeline is the heart of the service: it validates a
//! submission's metadata, then streams the payload to disk in bounded
//! chunks so memory use stays flat regardless of upload size.
//!
//! ## Invariants:
//! - Nothing touches the filesystem until every validation step passes.
//! - The stored file is named from the trusted request UUID plus a
//!   sanitized extension. The raw client filename never becomes part of
//!   the on-disk path.
//! - On any failure after the output file is opened (size ceiling hit,
//!   stream fault, write fault) the partial file is removed best-effort
//!   before the error is returned. A stored file therefore either does
//!   not exist or is complete and within the configured ceiling.
//! - The payload reader and output handle are released on every exit
//!   path by ordinary drop semantics.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::config::StorageConfig;
use crate::error::AppError;
use crate::storage::filename::{get_extension, sanitize_filename};

/// Fixed read size for the streaming loop (1 MiB).
const CHUNK_SIZE: usize = 1024 * 1024;

/// Extension substituted when the sanitized filename has none.
const FALLBACK_EXTENSION: &str = "bin";

/// Result of a successful ingest: where the payload landed and how big it was.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    /// Full path of the stored file: `{upload_dir}/{uuid}/{uuid}.{ext}`.
    pub stored_path: PathBuf,

    /// Stored file name: `{uuid}.{ext}`.
    pub stored_filename: String,

    /// The client-supplied filename after sanitization.
    pub original_filename: String,

    /// Exact number of payload bytes written to disk.
    pub bytes_written: u64,
}

/// Validates and persists one upload submission.
///
/// Constructed from an explicit [`StorageConfig`] snapshot; the ingestor
/// holds no ambient or global state. One ingestor handles one request,
/// and concurrent ingests to different UUIDs are independent. Two
/// concurrent ingests with the same UUID and extension race on the same
/// target file and the last writer wins; callers are expected to supply
/// unique identifiers.
pub struct Ingestor {
    config: StorageConfig,
}

impl Ingestor {
    pub fn new(config: StorageConfig) -> Self {
        Self { config }
    }

    /// Validate a submission and stream its payload to disk.
    ///
    /// ## Validation order (each failure short-circuits):
    /// 1. `request_uuid` must be non-empty after trimming → `InvalidRequest`
    /// 2. Filename is sanitized and its extension extracted
    /// 3. A non-empty extension must be in the allowlist → `UnsupportedMedia`
    /// 4. A declared content-type must start with `audio/` → `InvalidRequest`
    ///
    /// ## Persist step:
    /// The target directory `{upload_dir}/{uuid}` is created if missing
    /// (idempotent), then the payload is copied in 1 MiB chunks. The
    /// running total is checked against `max_upload_bytes` before each
    /// chunk is written, so an oversized upload aborts without the
    /// offending chunk ever reaching disk.
    pub async fn ingest<R>(
        &self,
        request_uuid: &str,
        original_filename: &str,
        content_type: Option<&str>,
        payload: R,
    ) -> Result<UploadOutcome, AppError>
    where
        R: AsyncRead + Unpin,
    {
        let request_uuid = request_uuid.trim();
        if request_uuid.is_empty() {
            return Err(AppError::InvalidRequest("uuid is required".to_string()));
        }

        let safe_name = sanitize_filename(original_filename);
        let ext = get_extension(&safe_name);

        if !ext.is_empty() && !self.config.allowed_extensions.iter().any(|a| a == &ext) {
            return Err(AppError::UnsupportedMedia(format!(
                "Unsupported extension: {}. Allowed: {:?}",
                ext, self.config.allowed_extensions
            )));
        }

        if let Some(content_type) = content_type {
            if !content_type.starts_with("audio/") {
                return Err(AppError::InvalidRequest(format!(
                    "Invalid content_type: {}",
                    content_type
                )));
            }
        }

        let resolved_ext = if ext.is_empty() {
            FALLBACK_EXTENSION.to_string()
        } else {
            ext
        };

        let target_dir = Path::new(&self.config.upload_dir).join(request_uuid);
        fs::create_dir_all(&target_dir).await.map_err(|e| {
            AppError::StorageFault(format!(
                "Failed to create upload directory {}: {}",
                target_dir.display(),
                e
            ))
        })?;

        let stored_filename = format!("{}.{}", request_uuid, resolved_ext);
        let target_path = target_dir.join(&stored_filename);

        let bytes_written = self.stream_to_file(&target_path, payload).await?;

        debug!(
            uuid = %request_uuid,
            path = %target_path.display(),
            bytes = bytes_written,
            "Upload stored"
        );

        Ok(UploadOutcome {
            stored_path: target_path,
            stored_filename,
            original_filename: safe_name,
            bytes_written,
        })
    }

    /// Copy the payload to `target_path` in fixed-size chunks, enforcing
    /// the byte ceiling. Every error path removes the partial file.
    async fn stream_to_file<R>(&self, target_path: &Path, mut payload: R) -> Result<u64, AppError>
    where
        R: AsyncRead + Unpin,
    {
        let mut out = fs::File::create(target_path).await.map_err(|e| {
            AppError::StorageFault(format!("Failed to open {}: {}", target_path.display(), e))
        })?;

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut bytes_written: u64 = 0;

        loop {
            let n = match payload.read(&mut buf).await {
                // Zero-length read signals end of stream
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    discard_partial(out, target_path).await;
                    return Err(AppError::StorageFault(format!(
                        "Failed to read upload stream: {}",
                        e
                    )));
                }
            };

            bytes_written += n as u64;
            if bytes_written > self.config.max_upload_bytes {
                discard_partial(out, target_path).await;
                return Err(AppError::PayloadTooLarge(format!(
                    "Uploaded file is too large (limit: {} bytes)",
                    self.config.max_upload_bytes
                )));
            }

            if let Err(e) = out.write_all(&buf[..n]).await {
                discard_partial(out, target_path).await;
                return Err(AppError::StorageFault(format!(
                    "Failed to write {}: {}",
                    target_path.display(),
                    e
                )));
            }
        }

        if let Err(e) = out.flush().await {
            discard_partial(out, target_path).await;
            return Err(AppError::StorageFault(format!(
                "Failed to flush {}: {}",
                target_path.display(),
                e
            )));
        }

        Ok(bytes_written)
    }
}

/// Close the output handle and remove the partial file. Removal is
/// best-effort: a failure is logged and must not mask the original error.
async fn discard_partial(out: fs::File, target_path: &Path) {
    drop(out);
    if let Err(e) = fs::remove_file(target_path).await {
        warn!(
            path = %target_path.display(),
            error = %e,
            "Failed to remove partial upload"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tempfile::TempDir;
    use tokio::io::ReadBuf;

    fn test_config(dir: &TempDir, max_bytes: u64) -> StorageConfig {
        StorageConfig {
            upload_dir: dir.path().to_string_lossy().into_owned(),
            max_upload_bytes: max_bytes,
            allowed_extensions: vec![
                "wav".to_string(),
                "mp3".to_string(),
                "m4a".to_string(),
                "ogg".to_string(),
                "webm".to_string(),
            ],
        }
    }

    /// AsyncRead source that yields some bytes, then fails.
    struct FaultyReader {
        data: Vec<u8>,
        offset: usize,
    }

    impl AsyncRead for FaultyReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.offset < self.data.len() {
                let n = (self.data.len() - self.offset).min(buf.remaining());
                let start = self.offset;
                buf.put_slice(&self.data[start..start + n]);
                self.offset += n;
                Poll::Ready(Ok(()))
            } else {
                Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "client went away",
                )))
            }
        }
    }

    #[tokio::test]
    async fn test_round_trip_exact_bytes() {
        let dir = TempDir::new().unwrap();
        let ingestor = Ingestor::new(test_config(&dir, 1024));
        let payload = vec![0xABu8; 300];

        let outcome = ingestor
            .ingest("req-1", "take one.wav", Some("audio/wav"), &payload[..])
            .await
            .unwrap();

        assert_eq!(outcome.bytes_written, 300);
        assert_eq!(outcome.stored_filename, "req-1.wav");
        assert_eq!(outcome.original_filename, "take_one.wav");
        assert_eq!(
            outcome.stored_path,
            dir.path().join("req-1").join("req-1.wav")
        );

        let on_disk = std::fs::read(&outcome.stored_path).unwrap();
        assert_eq!(on_disk, payload);
    }

    #[tokio::test]
    async fn test_payload_over_ceiling_leaves_no_file() {
        let dir = TempDir::new().unwrap();
        let ingestor = Ingestor::new(test_config(&dir, 100));
        let payload = vec![0u8; 101];

        let err = ingestor
            .ingest("req-2", "big.wav", None, &payload[..])
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::PayloadTooLarge(_)));
        assert!(!dir.path().join("req-2").join("req-2.wav").exists());
    }

    #[tokio::test]
    async fn test_payload_at_ceiling_is_accepted() {
        let dir = TempDir::new().unwrap();
        let ingestor = Ingestor::new(test_config(&dir, 100));
        let payload = vec![0u8; 100];

        let outcome = ingestor
            .ingest("req-3", "exact.wav", None, &payload[..])
            .await
            .unwrap();
        assert_eq!(outcome.bytes_written, 100);
    }

    #[tokio::test]
    async fn test_disallowed_extension_rejected_before_write() {
        let dir = TempDir::new().unwrap();
        let ingestor = Ingestor::new(test_config(&dir, 1024));

        let err = ingestor
            .ingest("req-4", "malware.exe", None, &b"MZ"[..])
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::UnsupportedMedia(_)));
        // Validation failed before the persist step, so not even the
        // per-request directory exists
        assert!(!dir.path().join("req-4").exists());
    }

    #[tokio::test]
    async fn test_blank_uuid_rejected_without_side_effects() {
        let dir = TempDir::new().unwrap();
        let ingestor = Ingestor::new(test_config(&dir, 1024));

        for uuid in ["", "   ", "\t\n"] {
            let err = ingestor
                .ingest(uuid, "a.wav", None, &b"data"[..])
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::InvalidRequest(_)));
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_content_type_gate() {
        let dir = TempDir::new().unwrap();
        let ingestor = Ingestor::new(test_config(&dir, 1024));

        let err = ingestor
            .ingest("req-5", "a.wav", Some("text/html"), &b"x"[..])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));

        // Absent content-type is fine, and so is any audio/* subtype
        ingestor
            .ingest("req-5", "a.wav", None, &b"x"[..])
            .await
            .unwrap();
        ingestor
            .ingest("req-5", "a.wav", Some("audio/webm"), &b"x"[..])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_extension_stored_as_bin() {
        let dir = TempDir::new().unwrap();
        let ingestor = Ingestor::new(test_config(&dir, 1024));

        let outcome = ingestor
            .ingest("req-6", "rawdump", None, &b"abc"[..])
            .await
            .unwrap();

        assert_eq!(outcome.stored_filename, "req-6.bin");
        assert!(outcome.stored_path.exists());
    }

    #[tokio::test]
    async fn test_second_ingest_overwrites_same_uuid() {
        let dir = TempDir::new().unwrap();
        let ingestor = Ingestor::new(test_config(&dir, 1024));

        ingestor
            .ingest("req-7", "a.wav", None, &b"first"[..])
            .await
            .unwrap();
        // Directory creation must be idempotent on the second pass
        let outcome = ingestor
            .ingest("req-7", "a.wav", None, &b"second!"[..])
            .await
            .unwrap();

        assert_eq!(outcome.bytes_written, 7);
        let on_disk = std::fs::read(&outcome.stored_path).unwrap();
        assert_eq!(on_disk, b"second!");
    }

    #[tokio::test]
    async fn test_stream_fault_cleans_up_partial_file() {
        let dir = TempDir::new().unwrap();
        let ingestor = Ingestor::new(test_config(&dir, 1024 * 1024 * 8));
        let reader = FaultyReader {
            // More than one chunk so the first read succeeds
            data: vec![0u8; 2 * 1024 * 1024],
            offset: 0,
        };

        let err = ingestor
            .ingest("req-8", "drop.wav", None, reader)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::StorageFault(_)));
        assert!(!dir.path().join("req-8").join("req-8.wav").exists());
    }
}
