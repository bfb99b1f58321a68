//! Streaming session endpoints: init, chunk, close, info.

use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::FormData;
use crate::error::{AppError, AppResult};
use crate::pipeline::{process_chunk, ChunkRequest};
use crate::session::SessionNotFound;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct StreamInitRequest {
    #[serde(default)]
    pub id_idx: usize,
}

/// `POST /stream/init`
///
/// The body is optional; an empty body selects style 0.
pub async fn stream_init(state: web::Data<AppState>, body: web::Bytes) -> AppResult<HttpResponse> {
    let engine = state.engine()?;

    let request: StreamInitRequest = if body.iter().all(u8::is_ascii_whitespace) {
        StreamInitRequest::default()
    } else {
        serde_json::from_slice(&body)?
    };

    if request.id_idx >= engine.num_styles() {
        return Err(AppError::InvalidRequest(format!(
            "id_idx {} out of range, engine has {} styles",
            request.id_idx,
            engine.num_styles()
        )));
    }

    let session_id = state.sessions.create(request.id_idx);
    info!(%session_id, style_index = request.id_idx, "Streaming session initialized");

    Ok(HttpResponse::Ok().json(json!({
        "session_id": session_id,
        "message": "Streaming session initialized",
        "id_idx": request.id_idx
    })))
}

/// `POST /stream/chunk`
///
/// ## Multipart fields:
/// - `session_id`: from `/stream/init`
/// - `audio_chunk` (or `audio`): one chunk, decoded like `/infer` uploads
/// - `sample_rate`: rate of raw PCM chunks
/// - `movement_smooth`, `brow_movement`: post-processing toggles
pub async fn stream_chunk(state: web::Data<AppState>, payload: Multipart) -> AppResult<HttpResponse> {
    let engine = state.engine()?;
    let config = state.get_config();

    let mut form = FormData::read(payload, config.limits.max_upload_mb * 1024 * 1024).await?;
    let session_id = form
        .text("session_id")
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::InvalidRequest("session_id is required".to_string()))?
        .to_string();
    let file = form
        .take_file(&["audio_chunk", "audio"])
        .ok_or_else(|| AppError::InvalidRequest("No audio chunk provided".to_string()))?;

    let request = ChunkRequest {
        session_id,
        upload: file.into_upload(form.number("sample_rate")?),
        options: form.postprocess_options()?,
    };
    debug!(
        session_id = %request.session_id,
        bytes = request.upload.bytes.len(),
        "Chunk received"
    );

    let payload = process_chunk(&state.sessions, engine, &config, request).await?;
    Ok(HttpResponse::Ok().json(payload))
}

/// `DELETE /stream/close/{session_id}`
pub async fn stream_close(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let session_id = path.into_inner();

    if !state.sessions.delete(&session_id).await {
        return Err(SessionNotFound(session_id).into());
    }

    info!(%session_id, "Streaming session closed");
    Ok(HttpResponse::Ok().json(json!({
        "message": "Session closed",
        "session_id": session_id
    })))
}

/// `GET /stream/session/{session_id}`
pub async fn session_info(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let snapshot = state.sessions.get(&path.into_inner())?;
    Ok(HttpResponse::Ok().json(snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::engine::ExpressionEngine;
    use crate::handlers::test_support::{content_type, multipart_body, Part};
    use crate::pipeline::test_support::{pcm_tone, StubBehavior, StubEngine};
    use actix_web::{http::StatusCode, test, App};
    use std::sync::Arc;

    fn app_state(engine: Option<Arc<dyn ExpressionEngine>>) -> web::Data<AppState> {
        web::Data::new(AppState::new(AppConfig::default(), engine, None))
    }

    fn stub_state(behavior: StubBehavior) -> web::Data<AppState> {
        app_state(Some(Arc::new(StubEngine::new(behavior))))
    }

    macro_rules! stream_app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data($state)
                    .route("/stream/init", web::post().to(stream_init))
                    .route("/stream/chunk", web::post().to(stream_chunk))
                    .route("/stream/close/{session_id}", web::delete().to(stream_close))
                    .route("/stream/session/{session_id}", web::get().to(session_info)),
            )
            .await
        };
    }

    fn chunk_request(session_id: &str, seconds: f64) -> test::TestRequest {
        let audio = pcm_tone(seconds);
        let body = multipart_body(&[
            Part::Text("session_id", session_id),
            Part::File("audio_chunk", "chunk.pcm", &audio),
        ]);
        test::TestRequest::post()
            .uri("/stream/chunk")
            .insert_header(("content-type", content_type()))
            .set_payload(body)
    }

    fn init_request(body: &str) -> test::TestRequest {
        test::TestRequest::post()
            .uri("/stream/init")
            .insert_header(("content-type", "application/json"))
            .set_payload(body.to_string())
    }

    #[actix_web::test]
    async fn test_streaming_session_lifecycle() {
        let state = stub_state(StubBehavior::Frames);
        let app = stream_app!(state.clone());

        let resp = test::call_service(&app, init_request(r#"{"id_idx": 0}"#).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let value: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(value["message"], "Streaming session initialized");
        assert_eq!(value["id_idx"], 0);
        let session_id = value["session_id"].as_str().unwrap().to_string();
        assert_eq!(state.sessions.len(), 1);

        let resp = test::call_service(&app, chunk_request(&session_id, 1.5).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let value: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(value["metadata"]["chunk_index"], 1);
        assert_eq!(value["metadata"]["frame_count"], 45);
        assert_eq!(value["metadata"]["session_id"], session_id.as_str());

        let resp = test::call_service(&app, chunk_request(&session_id, 0.05).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let value: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(value["error"]["type"], "audio_too_short");

        let resp = test::call_service(&app, chunk_request(&session_id, 1.0).to_request()).await;
        let value: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(value["metadata"]["chunk_index"], 2);

        let req = test::TestRequest::get()
            .uri(&format!("/stream/session/{}", session_id))
            .to_request();
        let value: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(value["chunk_count"], 2);

        let req = test::TestRequest::delete()
            .uri(&format!("/stream/close/{}", session_id))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let value: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(value["message"], "Session closed");
        assert_eq!(value["session_id"], session_id.as_str());

        let req = test::TestRequest::delete()
            .uri(&format!("/stream/close/{}", session_id))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = test::call_service(&app, chunk_request(&session_id, 1.0).to_request()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(state.sessions.is_empty());
    }

    #[actix_web::test]
    async fn test_init_body_variants() {
        let app = stream_app!(stub_state(StubBehavior::Frames));

        let value: serde_json::Value =
            test::call_and_read_body_json(&app, init_request("").to_request()).await;
        assert_eq!(value["id_idx"], 0);

        let value: serde_json::Value =
            test::call_and_read_body_json(&app, init_request("{}").to_request()).await;
        assert_eq!(value["id_idx"], 0);

        let resp = test::call_service(&app, init_request(r#"{"id_idx": 99}"#).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = test::call_service(&app, init_request("not json").to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_unknown_session_is_404() {
        let state = stub_state(StubBehavior::Frames);
        let app = stream_app!(state.clone());

        let resp = test::call_service(&app, chunk_request("missing-session", 1.0).to_request()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let value: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(value["error"]["type"], "session_not_found");

        let req = test::TestRequest::get()
            .uri("/stream/session/missing-session")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
        assert!(state.sessions.is_empty());
    }

    #[actix_web::test]
    async fn test_missing_fields() {
        let state = stub_state(StubBehavior::Frames);
        let app = stream_app!(state.clone());
        let session_id = state.sessions.create(0);

        let audio = pcm_tone(1.0);
        let body = multipart_body(&[Part::File("audio_chunk", "chunk.pcm", &audio)]);
        let req = test::TestRequest::post()
            .uri("/stream/chunk")
            .insert_header(("content-type", content_type()))
            .set_payload(body)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let body = multipart_body(&[Part::Text("session_id", &session_id)]);
        let req = test::TestRequest::post()
            .uri("/stream/chunk")
            .insert_header(("content-type", content_type()))
            .set_payload(body)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        assert_eq!(state.sessions.get(&session_id).unwrap().chunk_count, 0);
    }

    #[actix_web::test]
    async fn test_engine_failure_keeps_session() {
        let state = stub_state(StubBehavior::Code(3));
        let app = stream_app!(state.clone());
        let session_id = state.sessions.create(0);

        let resp = test::call_service(&app, chunk_request(&session_id, 1.0).to_request()).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let value: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(value["error"]["message"], "Inference failed with code: 3");
        assert_eq!(state.sessions.get(&session_id).unwrap().chunk_count, 0);
    }

    #[actix_web::test]
    async fn test_disabled_engine_is_503() {
        let app = stream_app!(app_state(None));

        let resp = test::call_service(&app, init_request("").to_request()).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let value: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(value["error"]["type"], "engine_not_ready");

        let resp = test::call_service(&app, chunk_request("any", 1.0).to_request()).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
