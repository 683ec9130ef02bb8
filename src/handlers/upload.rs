//! Multipart upload endpoint.
//!
//! Thin adapter between the HTTP layer and the ingest core: it walks the
//! multipart fields in arrival order, collects the small text parts, and
//! when the binary part arrives bridges its chunk stream into the
//! ingestor as an `AsyncRead`. The payload is never buffered whole.

use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpResponse};
use futures_util::StreamExt;
use serde::Serialize;
use tokio_util::io::StreamReader;
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::storage::Ingestor;

/// Cap on the text parts (uuid, filename, script). These are metadata,
/// not payload; anything bigger is a malformed request.
const TEXT_FIELD_LIMIT: usize = 64 * 1024;

/// Response body for a stored upload.
///
/// ```json
/// {
///   "request_uuid": "3f6a...",
///   "stored_path": "/data/uploads/3f6a.../3f6a....wav",
///   "original_filename": "take_one.wav",
///   "stored_filename": "3f6a....wav",
///   "bytes_written": 882044
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub request_uuid: String,
    pub stored_path: String,
    pub original_filename: String,
    pub stored_filename: String,
    pub bytes_written: u64,
}

/// Handle `POST /upload`.
///
/// Expected `multipart/form-data` parts:
/// - `uuid`: request identifier (text)
/// - `filename`: original file name (text)
/// - `script`: free-text transcript, passed through and not persisted
/// - `audio`: the binary payload
///
/// Text parts must precede the `audio` part (form field order is
/// preserved by browsers and curl). When the `filename` text part is
/// absent, the audio part's Content-Disposition filename is used instead.
pub async fn upload_audio(
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> AppResult<HttpResponse> {
    let ingestor = Ingestor::new(state.get_config().storage);

    let mut request_uuid = String::new();
    let mut filename: Option<String> = None;
    let mut script: Option<String> = None;
    let mut stored: Option<UploadResponse> = None;

    while let Some(item) = payload.next().await {
        let mut field =
            item.map_err(|e| AppError::InvalidRequest(format!("Multipart error: {}", e)))?;

        let (name, part_filename) = {
            let content_disposition = field.content_disposition().ok_or_else(|| {
                AppError::InvalidRequest("Missing content disposition".to_string())
            })?;
            let name = content_disposition
                .get_name()
                .ok_or_else(|| AppError::InvalidRequest("Missing field name".to_string()))?
                .to_string();
            let part_filename = content_disposition.get_filename().map(str::to_string);
            (name, part_filename)
        };

        match name.as_str() {
            "uuid" => request_uuid = read_text_field(&mut field).await?,
            "filename" => filename = Some(read_text_field(&mut field).await?),
            "script" => script = Some(read_text_field(&mut field).await?),
            "audio" => {
                if stored.is_some() {
                    return Err(AppError::InvalidRequest(
                        "Duplicate audio field".to_string(),
                    ));
                }

                let original_filename = filename
                    .clone()
                    .or(part_filename)
                    .ok_or_else(|| AppError::InvalidRequest("filename is required".to_string()))?;
                let content_type = field.content_type().map(|mime| mime.to_string());

                let uuid = request_uuid.trim().to_string();
                let reader = StreamReader::new(field.map(|chunk| {
                    chunk.map_err(|e| {
                        std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
                    })
                }));

                let outcome = ingestor
                    .ingest(&uuid, &original_filename, content_type.as_deref(), reader)
                    .await?;

                stored = Some(UploadResponse {
                    request_uuid: uuid,
                    stored_path: outcome.stored_path.to_string_lossy().into_owned(),
                    original_filename: outcome.original_filename,
                    stored_filename: outcome.stored_filename,
                    bytes_written: outcome.bytes_written,
                });
            }
            // Unknown parts are drained and ignored
            _ => {
                while let Some(chunk) = field.next().await {
                    chunk
                        .map_err(|e| AppError::InvalidRequest(format!("Multipart error: {}", e)))?;
                }
            }
        }
    }

    let response =
        stored.ok_or_else(|| AppError::InvalidRequest("audio file is required".to_string()))?;

    state.record_upload(response.bytes_written);
    info!(
        uuid = %response.request_uuid,
        stored_filename = %response.stored_filename,
        bytes = response.bytes_written,
        script_present = script.is_some(),
        "Upload accepted"
    );

    Ok(HttpResponse::Ok().json(response))
}

/// Read a small text part into a UTF-8 string, bounded by
/// [`TEXT_FIELD_LIMIT`].
async fn read_text_field(field: &mut Field) -> AppResult<String> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk =
            chunk.map_err(|e| AppError::InvalidRequest(format!("Multipart error: {}", e)))?;
        if bytes.len() + chunk.len() > TEXT_FIELD_LIMIT {
            return Err(AppError::InvalidRequest(
                "Text field exceeds size limit".to_string(),
            ));
        }
        bytes.extend_from_slice(&chunk);
    }
    String::from_utf8(bytes)
        .map_err(|_| AppError::InvalidRequest("Text field is not valid UTF-8".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::{test, App};
    use tempfile::TempDir;

    fn multipart_body(boundary: &str, uuid: &str, filename: &str, audio: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, value) in [("uuid", uuid), ("filename", filename), ("script", "hello")] {
            body.extend_from_slice(
                format!(
                    "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"audio\"; filename=\"{filename}\"\r\nContent-Type: audio/wav\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(audio);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
        body
    }

    fn test_state(dir: &TempDir) -> AppState {
        let mut config = AppConfig::default();
        config.storage.upload_dir = dir.path().to_string_lossy().into_owned();
        config.storage.max_upload_bytes = 1024;
        AppState::new(config)
    }

    #[actix_web::test]
    async fn test_upload_round_trip() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/upload", web::post().to(upload_audio)),
        )
        .await;

        let boundary = "----upload-test-boundary";
        let audio = b"RIFFxxxxWAVE";
        let body = multipart_body(boundary, "req-http-1", "take one.wav", audio);

        let req = test::TestRequest::post()
            .uri("/upload")
            .insert_header((
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            ))
            .set_payload(body)
            .to_request();

        let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp["request_uuid"], "req-http-1");
        assert_eq!(resp["stored_filename"], "req-http-1.wav");
        assert_eq!(resp["original_filename"], "take_one.wav");
        assert_eq!(resp["bytes_written"], audio.len() as u64);

        let on_disk = std::fs::read(dir.path().join("req-http-1").join("req-http-1.wav")).unwrap();
        assert_eq!(on_disk, audio);
    }

    #[actix_web::test]
    async fn test_upload_rejects_disallowed_extension() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/upload", web::post().to(upload_audio)),
        )
        .await;

        let boundary = "----upload-test-boundary";
        let body = multipart_body(boundary, "req-http-2", "payload.exe", b"MZ");

        let req = test::TestRequest::post()
            .uri("/upload")
            .insert_header((
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            ))
            .set_payload(body)
            .to_request();

        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status().as_u16(), 400);
        assert!(!dir.path().join("req-http-2").exists());
    }
}
