use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": {
                "host": config.server.host,
                "port": config.server.port
            },
            "storage": {
                "upload_dir": config.storage.upload_dir,
                "max_upload_bytes": config.storage.max_upload_bytes,
                "allowed_extensions": config.storage.allowed_extensions
            }
        }
    })))
}

pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config
        .update_from_json(&json_str)
        .map_err(|e| AppError::InvalidRequest(e.to_string()))?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::InvalidRequest)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": {
            "server": {
                "host": current_config.server.host,
                "port": current_config.server.port
            },
            "storage": {
                "upload_dir": current_config.storage.upload_dir,
                "max_upload_bytes": current_config.storage.max_upload_bytes,
                "allowed_extensions": current_config.storage.allowed_extensions
            }
        }
    })))
}
