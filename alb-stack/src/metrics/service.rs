use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use pingora::server::ShutdownWatch;
use pingora_core::services::background::BackgroundService;
use tokio::net::TcpListener;

use super::registry;

/// `/metrics` in Prometheus text format and `/healthz` reporting the
/// loaded rule set version.
#[derive(Clone)]
pub struct MetricsSvc {
    listen: String,
    rules_version: Arc<str>,
}

impl MetricsSvc {
    pub fn new(listen: impl Into<String>, rules_version: &str) -> Self {
        Self {
            listen: listen.into(),
            rules_version: Arc::from(rules_version),
        }
    }
}

#[async_trait]
impl BackgroundService for MetricsSvc {
    async fn start(&self, mut shutdown: ShutdownWatch) {
        let listener = match TcpListener::bind(&self.listen).await {
            Ok(l) => {
                tracing::info!("metrics listening on {}", self.listen);
                l
            }
            Err(e) => {
                tracing::error!("metrics bind {} failed: {}", self.listen, e);
                return;
            }
        };

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!("metrics service shutdown");
                    return;
                }
                res = listener.accept() => {
                    let (stream, _peer) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            tracing::warn!("metrics accept error: {}", e);
                            continue;
                        }
                    };

                    let version = self.rules_version.clone();
                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);
                        let svc = service_fn(move |req: Request<hyper::body::Incoming>| {
                            let version = version.clone();
                            async move { Ok::<_, Infallible>(handle(req.uri().path(), &version)) }
                        });

                        let builder = hyper::server::conn::http1::Builder::new();
                        if let Err(e) = builder.serve_connection(io, svc).await {
                            tracing::warn!("metrics conn error: {}", e);
                        }
                    });
                }
            }
        }
    }
}

fn handle(path: &str, rules_version: &str) -> Response<Full<Bytes>> {
    match path {
        "/metrics" => text(StatusCode::OK, registry::CONTENT_TYPE, registry::gather_as_text()),
        "/healthz" => text(
            StatusCode::OK,
            "application/json",
            serde_json::json!({ "status": "ok", "rules_version": rules_version }).to_string(),
        ),
        _ => text(StatusCode::NOT_FOUND, "text/plain; charset=utf-8", "not found".to_string()),
    }
}

fn text(status: StatusCode, content_type: &'static str, body: String) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(Bytes::from(body)));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    resp
}
