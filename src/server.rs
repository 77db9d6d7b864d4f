//! HTTP listener and request dispatch.
//!
//! One listener serves both mock traffic and the `/mockserver` control
//! plane. Each connection runs on its own task; each request collects its
//! body (bounded), builds a [`RequestRecord`], and either dispatches to the
//! control plane or walks the store's find path.

use crate::config::Config;
use crate::control_api;
use crate::executor;
use crate::request::RequestRecord;
use crate::store::ExpectationStore;
use anyhow::Context;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

/// Bound on the in-flight drain during graceful shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct MockServer {
    config: Config,
    store: Arc<ExpectationStore>,
}

impl MockServer {
    pub fn new(config: Config, store: Arc<ExpectationStore>) -> Self {
        MockServer { config, store }
    }

    /// Bind the configured address. A bind failure is a startup failure.
    pub async fn bind(&self) -> anyhow::Result<TcpListener> {
        TcpListener::bind((self.config.host.as_str(), self.config.port))
            .await
            .with_context(|| {
                format!(
                    "failed to bind {}:{}",
                    self.config.host, self.config.port
                )
            })
    }

    /// Run until interrupted, with signal-driven graceful shutdown.
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = self.bind().await?;

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                let _ = shutdown_tx.send(());
            }
        });

        self.serve(listener, shutdown_rx).await
    }

    /// Accept loop. Stops on the shutdown signal, drains in-flight
    /// handlers (bounded), then flushes persistence.
    pub async fn serve(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!("mock server listening on http://{addr}");
        }
        let active = Arc::new(AtomicUsize::new(0));
        let config = Arc::new(self.config);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, _addr) = match result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };
                    let store = Arc::clone(&self.store);
                    let config = Arc::clone(&config);
                    let active = Arc::clone(&active);

                    active.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);
                        let service = service_fn(move |req| {
                            let store = Arc::clone(&store);
                            let config = Arc::clone(&config);
                            async move { handle_request(req, store, config).await }
                        });
                        if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                            debug!("connection error: {e}");
                        }
                        active.fetch_sub(1, Ordering::SeqCst);
                    });
                }
                _ = shutdown.recv() => {
                    break;
                }
            }
        }

        info!("draining in-flight requests");
        let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
        while active.load(Ordering::SeqCst) > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        self.store.persist().await;
        info!("mock server stopped");
        Ok(())
    }
}

async fn handle_request(
    req: Request<Incoming>,
    store: Arc<ExpectationStore>,
    config: Arc<Config>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let (parts, body) = req.into_parts();

    let bytes = match Limited::new(body, config.max_body_bytes()).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => {
            return Ok(control_api::types::error_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                control_api::types::INCORRECT_FORMAT,
                format!("request body exceeds {} KiB", config.max_body_kb),
            ));
        }
    };

    let path = parts.uri.path();
    if path == control_api::CONTROL_PREFIX
        || path.starts_with(&format!("{}/", control_api::CONTROL_PREFIX))
    {
        return Ok(control_api::dispatch(&parts.method, path, bytes, &store, &config).await);
    }

    let record = RequestRecord::new(&parts.method, &parts.uri, &parts.headers, bytes);

    match store.find(&record) {
        Some(matched) => {
            debug!(
                "request {} {} matched expectation {}",
                record.method,
                record.path,
                matched.id()
            );
            Ok(executor::execute(
                &matched,
                &record,
                Duration::from_secs(config.forward_timeout_secs),
            )
            .await)
        }
        None => {
            debug!("no expectation matched {} {}", record.method, record.path);
            Ok(control_api::types::json_response(
                StatusCode::NOT_FOUND,
                &serde_json::json!({
                    "error": "no expectation matched the request",
                    "method": record.method,
                    "path": record.path,
                }),
            ))
        }
    }
}
