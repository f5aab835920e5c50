use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tokio::task::{self, JoinHandle};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::aggregate::clamp_bucket_minutes;
use crate::monitor::Monitor;
use crate::types::{BurnRateResponse, Stats};
use crate::window::View;

struct Cached<T> {
    at: Instant,
    value: Arc<T>,
}

/// Default-width responses per view plus today's stats, each valid for one
/// refresh interval. Other widths are computed per request and never stored.
#[derive(Default)]
struct ResponseCache {
    responses: RwLock<HashMap<View, Cached<BurnRateResponse>>>,
    stats: RwLock<Option<Cached<Stats>>>,
}

pub struct AppState {
    monitor: Arc<Monitor>,
    cache: ResponseCache,
    ttl: Duration,
    default_bucket: u32,
}

impl AppState {
    pub fn new(monitor: Arc<Monitor>) -> Self {
        let ttl = Duration::from_secs(monitor.config().refresh_secs.max(1));
        let default_bucket = clamp_bucket_minutes(monitor.config().bucket_minutes);
        Self {
            monitor,
            cache: ResponseCache::default(),
            ttl,
            default_bucket,
        }
    }

    fn cached_response(&self, view: View) -> Option<Arc<BurnRateResponse>> {
        let map = self
            .cache
            .responses
            .read()
            .unwrap_or_else(|e| e.into_inner());
        map.get(&view)
            .filter(|c| c.at.elapsed() < self.ttl)
            .map(|c| Arc::clone(&c.value))
    }

    fn cached_stats(&self) -> Option<Arc<Stats>> {
        let slot = self.cache.stats.read().unwrap_or_else(|e| e.into_inner());
        slot.as_ref()
            .filter(|c| c.at.elapsed() < self.ttl)
            .map(|c| Arc::clone(&c.value))
    }

    async fn response(&self, view: View, bucket: u32) -> Result<Arc<BurnRateResponse>> {
        if bucket != self.default_bucket {
            return self.compute_uncached(view, bucket).await;
        }
        match self.cached_response(view) {
            Some(hit) => Ok(hit),
            None => self.compute_response(view).await,
        }
    }

    async fn compute_uncached(&self, view: View, bucket: u32) -> Result<Arc<BurnRateResponse>> {
        let monitor = Arc::clone(&self.monitor);
        let value = task::spawn_blocking(move || monitor.compute(view, bucket))
            .await
            .context("burn rate computation panicked")?;
        Ok(Arc::new(value))
    }

    async fn compute_response(&self, view: View) -> Result<Arc<BurnRateResponse>> {
        let value = self.compute_uncached(view, self.default_bucket).await?;

        let mut map = self
            .cache
            .responses
            .write()
            .unwrap_or_else(|e| e.into_inner());
        map.insert(
            view,
            Cached {
                at: Instant::now(),
                value: Arc::clone(&value),
            },
        );
        Ok(value)
    }

    async fn today_stats(&self) -> Result<Arc<Stats>> {
        match self.cached_stats() {
            Some(hit) => Ok(hit),
            None => self.compute_today_stats().await,
        }
    }

    async fn compute_today_stats(&self) -> Result<Arc<Stats>> {
        let monitor = Arc::clone(&self.monitor);
        let value = Arc::new(
            task::spawn_blocking(move || monitor.compute_stats_for_today())
                .await
                .context("stats computation panicked")?,
        );

        let mut slot = self.cache.stats.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(Cached {
            at: Instant::now(),
            value: Arc::clone(&value),
        });
        Ok(value)
    }

    /// Recompute every default-width view and today's stats. Readers keep
    /// getting the previous snapshot until each replacement lands.
    async fn refresh(&self) -> Result<()> {
        for view in View::ALL {
            self.compute_response(view).await?;
        }
        self.compute_today_stats().await?;
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct BurnRateQuery {
    view: Option<String>,
    bucket: Option<u32>,
}

type ApiError = (StatusCode, String);

fn internal(e: anyhow::Error) -> ApiError {
    error!(error = ?e, "request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

async fn index() -> Html<&'static str> {
    Html(include_str!("index.html"))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn burn_rate(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BurnRateQuery>,
) -> Result<Json<BurnRateResponse>, ApiError> {
    let view = query
        .view
        .as_deref()
        .map_or(View::Current, View::parse_lenient);
    let bucket = query
        .bucket
        .map_or(state.default_bucket, clamp_bucket_minutes);
    let resp = state.response(view, bucket).await.map_err(internal)?;
    Ok(Json(resp.as_ref().clone()))
}

async fn stats(State(state): State<Arc<AppState>>) -> Result<Json<Stats>, ApiError> {
    let stats = state.today_stats().await.map_err(internal)?;
    Ok(Json(stats.as_ref().clone()))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/burn-rate", get(burn_rate))
        .route("/api/stats", get(stats))
        .route("/api/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Keep the default views warm on a fixed interval.
pub fn spawn_refresh(state: Arc<AppState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(state.ttl);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let started = Instant::now();
            match state.refresh().await {
                Ok(()) => debug!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "refreshed burn rate cache"
                ),
                Err(e) => error!(error = ?e, "cache refresh failed"),
            }
        }
    })
}

pub async fn serve(monitor: Arc<Monitor>, bind: &str) -> Result<()> {
    let state = Arc::new(AppState::new(monitor));
    let refresher = spawn_refresh(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    info!(addr = %bind, "burn rate monitor listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    refresher.abort();
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("signal received, shutting down");
}
