use crate::{config::AppConfig, error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::{json, Value};
use tracing::info;

fn tunables(config: &AppConfig) -> Value {
    json!({
        "engine": {
            "backend": config.engine.backend,
            "sample_rate": config.engine.sample_rate,
            "fps": config.engine.fps,
            "num_styles": config.engine.num_styles,
            "timeout_secs": config.engine.timeout_secs,
            "device": config.engine.device
        },
        "streaming": config.streaming,
        "postprocess": config.postprocess,
        "vocal_isolation": {
            "enabled": config.vocal_isolation.command.is_some()
        },
        "limits": config.limits
    })
}

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": tunables(&config)
    })))
}

/// Partial update of the `streaming` and `postprocess` sections.
pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config
        .update_from_json(&json_str)
        .map_err(|e| AppError::InvalidRequest(e.to_string()))?;
    state.update_config(current_config.clone())?;
    info!("Configuration updated at runtime");

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": tunables(&current_config)
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::StatusCode, test, App};

    #[actix_web::test]
    async fn test_get_and_update_config() {
        let state = web::Data::new(AppState::new(AppConfig::default(), None, None));
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/config", web::get().to(get_config))
                .route("/config", web::put().to(update_config)),
        )
        .await;

        let req = test::TestRequest::get().uri("/config").to_request();
        let value: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(value["config"]["streaming"]["max_chunk_seconds"], 2.0);
        assert_eq!(value["config"]["engine"]["fps"], 30.0);

        let req = test::TestRequest::put()
            .uri("/config")
            .set_json(json!({"streaming": {"min_chunk_seconds": 0.25}}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(state.get_config().streaming.min_chunk_seconds, 0.25);
        assert_eq!(state.get_config().streaming.max_chunk_seconds, 2.0);
    }

    #[actix_web::test]
    async fn test_rejected_updates_leave_config() {
        let state = web::Data::new(AppState::new(AppConfig::default(), None, None));
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/config", web::put().to(update_config)),
        )
        .await;

        for body in [
            json!({"server": {"port": 1}}),
            json!({"streaming": {"min_chunk_seconds": 5.0}}),
            json!([1, 2]),
        ] {
            let req = test::TestRequest::put().uri("/config").set_json(body).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        }
        assert_eq!(state.get_config().streaming.min_chunk_seconds, 0.1);
        assert_eq!(state.get_config().server.port, AppConfig::default().server.port);
    }
}
