//! # Application State Management
//!
//! Shared state handed to every HTTP handler through `web::Data<AppState>`.
//!
//! ## What lives here:
//! - **config**: the effective configuration; the runtime-tunable sections can be replaced
//!   through `PUT /config`
//! - **metrics**: request/error counters and per-endpoint timings, written by the middleware
//! - **sessions**: the streaming session store
//! - **engine**: the inference backend, absent when disabled
//! - **isolator**: the optional vocal isolation collaborator
//!
//! ## Arc<RwLock<T>> Pattern
//! - **Arc**: every actix worker holds a clone of `AppState`; the clones share the same data
//! - **RwLock**: many concurrent readers (handlers reading config) or one writer (config update)
//!
//! Locks here are std locks held for a few instructions at a time and never across an await.
//! A poisoned lock is recovered rather than propagated: the guarded values stay consistent
//! because every write is a single assignment or increment.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use crate::audio::VocalIsolator;
use crate::config::AppConfig;
use crate::engine::ExpressionEngine;
use crate::error::{AppError, AppResult};
use crate::session::SessionStore;

/// The main application state shared across all HTTP request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<AppConfig>>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub sessions: Arc<SessionStore>,
    engine: Option<Arc<dyn ExpressionEngine>>,
    isolator: Option<Arc<dyn VocalIsolator>>,
    /// When the server started (never changes, so no lock needed)
    pub start_time: Instant,
}

/// Counters collected across all HTTP requests.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of 4xx/5xx responses since server start
    pub error_count: u64,

    /// Per-route statistics keyed by "METHOD /route/pattern"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    /// Cumulative processing time (milliseconds)
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        engine: Option<Arc<dyn ExpressionEngine>>,
        isolator: Option<Arc<dyn VocalIsolator>>,
    ) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            sessions: Arc::new(SessionStore::new()),
            engine,
            isolator,
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the lock immediately; a request works on one consistent snapshot
    /// even if the configuration is updated while it runs.
    pub fn get_config(&self) -> AppConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the configuration after validating it.
    pub fn update_config(&self, new_config: AppConfig) -> AppResult<()> {
        new_config
            .validate()
            .map_err(|e| AppError::InvalidRequest(e.to_string()))?;
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = new_config;
        Ok(())
    }

    /// The inference engine, or `EngineNotReady` when none is loaded.
    pub fn engine(&self) -> AppResult<Arc<dyn ExpressionEngine>> {
        self.engine
            .clone()
            .ok_or_else(|| AppError::EngineNotReady("Model not initialized".to_string()))
    }

    pub fn engine_loaded(&self) -> bool {
        self.engine.is_some()
    }

    pub fn isolator(&self) -> Option<Arc<dyn VocalIsolator>> {
        self.isolator.clone()
    }

    /// Increment the total request counter (called by middleware for every request).
    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.request_count += 1;
    }

    /// Increment the total error counter (called for every 4xx/5xx response).
    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.error_count += 1;
    }

    /// Record one request against `endpoint` (e.g. "DELETE /stream/close/{session_id}").
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);

        let endpoint_metric = metrics
            .endpoint_metrics
            .entry(endpoint.to_string())
            .or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Snapshot of current metrics (used for the /metrics endpoint).
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average response time in milliseconds.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of requests that failed (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
