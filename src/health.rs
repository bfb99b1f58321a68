use crate::device::DeviceManager;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::process;

/// `GET /`: service name, version and the route map.
pub async fn root() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "service": "expression-stream-server",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "GET /health",
            "metrics": "GET /metrics",
            "config": "GET|PUT /config",
            "infer": "POST /infer",
            "stream_init": "POST /stream/init",
            "stream_chunk": "POST /stream/chunk",
            "stream_close": "DELETE /stream/close/{session_id}",
            "stream_session": "GET /stream/session/{session_id}"
        }
    }))
}

/// `GET /health`
///
/// Always 200; `status` is `not_ready` while no engine is loaded so load balancers can tell
/// a live process from a serving one.
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let model_loaded = state.engine_loaded();
    let engine = state.engine().ok();

    HttpResponse::Ok().json(json!({
        "status": if model_loaded { "healthy" } else { "not_ready" },
        "model_loaded": model_loaded,
        "gpu_available": DeviceManager::is_gpu_available(),
        "sessions": state.sessions.len(),
        "engine": engine.as_ref().map(|engine| json!({
            "name": engine.name(),
            "sample_rate": engine.sample_rate(),
            "fps": engine.fps(),
            "num_styles": engine.num_styles()
        })),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// `GET /metrics`
pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats: Vec<_> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();
    endpoint_stats.sort_by(|a, b| a["endpoint"].as_str().cmp(&b["endpoint"].as_str()));

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "active_sessions": state.sessions.len(),
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "endpoints": endpoint_stats,
        "memory": get_memory_info(),
        "device": DeviceManager::get_device_summary()
    }))
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", process::id())) {
            let field_bytes = |prefix: &str| {
                status
                    .lines()
                    .find(|line| line.starts_with(prefix))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .map_or(0, |kb| kb * 1024)
            };

            return json!({
                "resident_memory_bytes": field_bytes("VmRSS:"),
                "virtual_memory_bytes": field_bytes("VmSize:"),
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": format!("Memory info not available (pid {})", process::id())
    })
}
