//! One-shot inference endpoint.

use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use tracing::debug;

use super::FormData;
use crate::error::{AppError, AppResult};
use crate::pipeline::{process_oneshot, OneShotRequest};
use crate::state::AppState;

/// `POST /infer`: a whole audio clip to an expression sequence.
///
/// ## Multipart fields:
/// - `audio_file` (or `audio`): the clip, any container symphonia can read, or raw 16-bit PCM
///   with `sample_rate`
/// - `id_idx`: speaking style, default 0
/// - `extract_vocal` / `ex_vol`: run vocal isolation first
/// - `movement_smooth`, `brow_movement`: post-processing toggles
pub async fn infer(state: web::Data<AppState>, payload: Multipart) -> AppResult<HttpResponse> {
    let engine = state.engine()?;
    let config = state.get_config();

    let mut form = FormData::read(payload, config.limits.max_upload_mb * 1024 * 1024).await?;
    let file = form
        .take_file(&["audio_file", "audio"])
        .ok_or_else(|| AppError::InvalidRequest("No audio file provided".to_string()))?;

    let request = OneShotRequest {
        upload: file.into_upload(form.number("sample_rate")?),
        style_index: form.number("id_idx")?.unwrap_or(0),
        extract_vocal: form.flag("extract_vocal")? || form.flag("ex_vol")?,
        options: form.postprocess_options()?,
    };
    debug!(
        style_index = request.style_index,
        bytes = request.upload.bytes.len(),
        extract_vocal = request.extract_vocal,
        "One-shot inference requested"
    );

    let payload = process_oneshot(engine, state.isolator(), &config, request).await?;
    Ok(HttpResponse::Ok().json(payload))
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

    #[actix_web::test]
    async fn test_infer_returns_frames() {
        let engine: Arc<dyn ExpressionEngine> = Arc::new(StubEngine::new(StubBehavior::Frames));
        let app = test::init_service(
            App::new()
                .app_data(app_state(Some(engine)))
                .route("/infer", web::post().to(infer)),
        )
        .await;

        let audio = pcm_tone(1.0);
        let body = multipart_body(&[
            Part::File("audio_file", "clip.pcm", &audio),
            Part::Text("id_idx", "1"),
            Part::Text("movement_smooth", "true"),
        ]);
        let req = test::TestRequest::post()
            .uri("/infer")
            .insert_header(("content-type", content_type()))
            .set_payload(body)
            .to_request();

        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let value: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(value["metadata"]["frame_count"], 30);
        assert_eq!(value["names"].as_array().map(|a| a.len()), Some(52));
        let time = value["frames"][1]["time"].as_f64().unwrap();
        assert!((time - 1.0 / 30.0).abs() < 1e-9);
    }

    #[actix_web::test]
    async fn test_infer_without_engine_is_503() {
        let app = test::init_service(
            App::new()
                .app_data(app_state(None))
                .route("/infer", web::post().to(infer)),
        )
        .await;

        let audio = pcm_tone(1.0);
        let body = multipart_body(&[Part::File("audio_file", "clip.pcm", &audio)]);
        let req = test::TestRequest::post()
            .uri("/infer")
            .insert_header(("content-type", content_type()))
            .set_payload(body)
            .to_request();

        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[actix_web::test]
    async fn test_infer_bad_input() {
        let engine: Arc<dyn ExpressionEngine> = Arc::new(StubEngine::new(StubBehavior::Frames));
        let app = test::init_service(
            App::new()
                .app_data(app_state(Some(engine)))
                .route("/infer", web::post().to(infer)),
        )
        .await;

        // no file
        let body = multipart_body(&[Part::Text("id_idx", "0")]);
        let req = test::TestRequest::post()
            .uri("/infer")
            .insert_header(("content-type", content_type()))
            .set_payload(body)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        // undecodable file
        let body = multipart_body(&[Part::File("audio_file", "clip.mp3", b"garbage")]);
        let req = test::TestRequest::post()
            .uri("/infer")
            .insert_header(("content-type", content_type()))
            .set_payload(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let value: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(value["error"]["type"], "invalid_audio");

        // implausible declared sample rate
        let audio = pcm_tone(0.5);
        let body = multipart_body(&[
            Part::File("audio_file", "clip.pcm", &audio),
            Part::Text("sample_rate", "2"),
        ]);
        let req = test::TestRequest::post()
            .uri("/infer")
            .insert_header(("content-type", content_type()))
            .set_payload(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let value: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(value["error"]["type"], "invalid_audio");

        // style out of range
        let audio = pcm_tone(0.5);
        let body = multipart_body(&[
            Part::File("audio_file", "clip.pcm", &audio),
            Part::Text("id_idx", "40"),
        ]);
        let req = test::TestRequest::post()
            .uri("/infer")
            .insert_header(("content-type", content_type()))
            .set_payload(body)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }
}
