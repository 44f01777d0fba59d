use anyhow::Result;
use chrono::{DateTime, Utc};
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

/// Outcome counts of the most recent collection run, served on `/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub accounts_total: usize,
    pub accounts_persisted: usize,
    pub accounts_failed: usize,
    pub region_failures: usize,
    pub instances_collected: i64,
}

/// Liveness, readiness and last-run status endpoints
#[derive(Clone, Default)]
pub struct HealthServer {
    ready: Arc<AtomicBool>,
    last_run: Arc<RwLock<Option<RunSummary>>>,
}

impl HealthServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the collector as ready (store connected, scheduler started)
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
        if ready {
            info!("Collector marked as ready");
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn record_run(&self, summary: RunSummary) {
        if let Ok(mut last_run) = self.last_run.write() {
            *last_run = Some(summary);
        }
    }

    pub fn last_run(&self) -> Option<RunSummary> {
        self.last_run.read().ok().and_then(|last_run| last_run.clone())
    }

    /// Bind `0.0.0.0:port` and answer health checks until the task is dropped.
    pub async fn serve(
        self,
        port: u16,
        ready_signal: tokio::sync::oneshot::Sender<()>,
    ) -> Result<()> {
        let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;
        info!(port, "Health endpoints listening on /healthz, /readyz and /status");

        let _ = ready_signal.send(());
        self.accept(listener).await
    }

    async fn accept(self, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => self.spawn_connection(stream, peer),
                Err(e) => error!(error = %e, "Health listener accept failed"),
            }
        }
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let server = self.clone();
        let service = service_fn(move |req: Request<Incoming>| {
            debug!(method = %req.method(), path = req.uri().path(), "Health request");
            let response = server.route(req.uri().path());
            async move { Ok::<_, Infallible>(response) }
        });

        tokio::spawn(async move {
            let connection = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
            if let Err(e) = connection.await {
                debug!(peer = %peer, error = %e, "Health connection closed with error");
            }
        });
    }

    fn route(&self, path: &str) -> Response<Full<Bytes>> {
        match path {
            "/healthz" | "/health" => text(StatusCode::OK, "ok"),
            "/readyz" | "/ready" => {
                if self.is_ready() {
                    text(StatusCode::OK, "ready")
                } else {
                    text(StatusCode::SERVICE_UNAVAILABLE, "not ready")
                }
            }
            "/status" => self.handle_status(),
            _ => text(StatusCode::NOT_FOUND, "Not Found"),
        }
    }

    fn handle_status(&self) -> Response<Full<Bytes>> {
        let body = serde_json::json!({
            "ready": self.is_ready(),
            "last_run": self.last_run(),
        });

        let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
        if let Ok(value) = "application/json".parse() {
            response.headers_mut().insert(CONTENT_TYPE, value);
        }
        response
    }
}

fn text(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}
