use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::Utc;
use once_cell::sync::Lazy;
use pingora::http::{RequestHeader, ResponseHeader};
use pingora::prelude::*;
use pingora_proxy::{ProxyHttp, Session};

use super::response;
use crate::auth::session::SessionVerifier;
use crate::config::TargetSpec;
use crate::error::ConfigError;
use crate::function::{self, FunctionRequest};
use crate::listener::decision::Decision;
use crate::listener::engine::RuleEvaluator;
use crate::listener::request::RequestContext;
use crate::metrics::counters;
use crate::obs::{AccessLog, ObsSink};
use crate::upstream::Upstream;

/// Same cap the load balancer applies to function request bodies.
const MAX_FUNCTION_BODY: usize = 1024 * 1024;

static REQ_COUNTER: Lazy<AtomicU64> = Lazy::new(|| AtomicU64::new(1));

fn gen_request_id() -> String {
    // timestamp(ms) + monotonic counter.
    let n = REQ_COUNTER.fetch_add(1, Ordering::Relaxed);
    let ts = Utc::now().timestamp_millis();
    format!("req-{}-{:x}", ts, n)
}

/// Where a forward action lands in the preview listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Function,
    Http(Upstream),
}

pub fn resolve_targets(
    specs: &BTreeMap<String, TargetSpec>,
) -> Result<BTreeMap<String, Target>, ConfigError> {
    specs
        .iter()
        .map(|(name, spec)| {
            let t = match spec {
                TargetSpec::Function => Target::Function,
                TargetSpec::Http { upstream } => Target::Http(Upstream::parse(name, upstream)?),
            };
            Ok((name.clone(), t))
        })
        .collect()
}

/// Answers requests the way the load balancer listener would: evaluates the
/// rule set, then invokes the function in-process, proxies to an http
/// target, or writes the fixed/redirect response itself.
#[derive(Clone)]
pub struct AlbProxy {
    listener: &'static str,
    secure: bool,
    evaluator: RuleEvaluator,
    targets: Arc<BTreeMap<String, Target>>,
    sessions: Arc<dyn SessionVerifier>,
    obs: ObsSink,
}

impl AlbProxy {
    pub fn new(
        listener: &'static str,
        secure: bool,
        evaluator: RuleEvaluator,
        targets: Arc<BTreeMap<String, Target>>,
        sessions: Arc<dyn SessionVerifier>,
        obs: ObsSink,
    ) -> Self {
        Self {
            listener,
            secure,
            evaluator,
            targets,
            sessions,
            obs,
        }
    }
}

#[derive(Default)]
pub struct ProxyCtx {
    pub request_id: String,
    pub start: Option<Instant>,

    pub method: String,
    pub host: Option<String>,
    pub path: String,
    pub client_ip: Option<String>,

    pub rule_id: Option<String>,
    pub priority: Option<String>,
    pub action: Option<&'static str>,
    pub subject: Option<String>,
    pub target: Option<String>,
    pub upstream: Option<Upstream>,
    pub status: Option<u16>,
}

/// Build the rule-facing view of a request header.
pub fn request_context(req: &RequestHeader, secure: bool) -> RequestContext {
    let target = req
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let mut ctx = RequestContext::new(req.method.as_str(), target).secure(secure);

    // HTTP/2 carries the host in :authority.
    if req.headers.get("host").is_none() {
        if let Some(a) = req.uri.authority() {
            ctx = ctx.with_host(a.as_str());
        }
    }

    for (name, value) in req.headers.iter() {
        if let Ok(v) = value.to_str() {
            ctx = ctx.with_header(name.as_str(), v);
        }
    }
    ctx
}

/// Headers the load balancer adds before handing a request to a target.
fn forwarded_headers(req: &RequestContext, client_ip: Option<&str>) -> Vec<(&'static str, String)> {
    let mut out = vec![
        ("x-forwarded-proto", req.scheme().to_string()),
        ("x-forwarded-port", req.port.to_string()),
    ];
    if let Some(ip) = client_ip {
        let xff = match req.header("x-forwarded-for") {
            Some(prev) => format!("{prev}, {ip}"),
            None => ip.to_string(),
        };
        out.push(("x-forwarded-for", xff));
    }
    out
}

fn function_event(req: &RequestContext, client_ip: Option<&str>, body: &[u8]) -> FunctionRequest {
    let mut headers: BTreeMap<String, String> = req
        .headers()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    for (k, v) in forwarded_headers(req, client_ip) {
        headers.insert(k.to_string(), v);
    }

    FunctionRequest {
        headers,
        method: req.method.clone(),
        body: if body.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(body).into_owned())
        },
    }
}

impl AlbProxy {
    async fn read_body(session: &mut Session) -> pingora::Result<Option<BytesMut>> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = session.read_request_body().await? {
            if buf.len() + chunk.len() > MAX_FUNCTION_BODY {
                return Ok(None);
            }
            buf.extend_from_slice(&chunk);
        }
        Ok(Some(buf))
    }

    async fn invoke_function(
        &self,
        session: &mut Session,
        req: &RequestContext,
        ctx: &mut ProxyCtx,
    ) -> pingora::Result<()> {
        let Some(body) = Self::read_body(session).await? else {
            ctx.status = Some(413);
            return response::write_fixed(
                session,
                413,
                "text/plain",
                "Request Entity Too Large",
                &ctx.request_id,
            )
            .await;
        };

        let event = function_event(req, ctx.client_ip.as_deref(), &body);
        match function::handle(&event) {
            Ok(out) => {
                ctx.status = Some(out.status_code);
                response::write_function(session, &out, &ctx.request_id).await
            }
            Err(e) => {
                tracing::error!(request_id = %ctx.request_id, error = %e, "function invocation failed");
                ctx.status = Some(502);
                response::write_fixed(session, 502, "text/plain", "Bad Gateway", &ctx.request_id)
                    .await
            }
        }
    }
}

#[async_trait]
impl ProxyHttp for AlbProxy {
    type CTX = ProxyCtx;

    fn new_ctx(&self) -> Self::CTX {
        ProxyCtx::default()
    }

    async fn request_filter(&self, session: &mut Session, ctx: &mut Self::CTX) -> pingora::Result<bool> {
        ctx.start = Some(Instant::now());
        ctx.request_id = gen_request_id();
        counters::on_req_start(self.listener);

        let req = request_context(session.req_header(), self.secure);
        ctx.method = req.method.clone();
        ctx.host = req.host.clone();
        ctx.path = req.path.clone();
        ctx.client_ip = session
            .client_addr()
            .and_then(|a| a.to_string().parse::<std::net::SocketAddr>().ok())
            .map(|sa| sa.ip().to_string());

        let outcome = self.evaluator.decide(&req, self.sessions.as_ref(), Utc::now());
        let kind = outcome.decision.kind_str();
        counters::inc_decision(&outcome.rule_id, kind);

        ctx.rule_id = Some(outcome.rule_id);
        ctx.priority = Some(outcome.priority.to_string());
        ctx.action = Some(kind);
        ctx.subject = outcome.subject;

        match outcome.decision {
            Decision::Forward { target } => {
                let resolved = self.targets.get(&target).cloned();
                ctx.target = Some(target);
                match resolved {
                    Some(Target::Function) => {
                        self.invoke_function(session, &req, ctx).await?;
                        Ok(true)
                    }
                    Some(Target::Http(u)) => {
                        ctx.upstream = Some(u);
                        Ok(false)
                    }
                    None => {
                        ctx.status = Some(502);
                        response::write_fixed(session, 502, "text/plain", "Bad Gateway", &ctx.request_id)
                            .await?;
                        Ok(true)
                    }
                }
            }
            Decision::FixedResponse {
                status,
                content_type,
                body,
            } => {
                ctx.status = Some(status);
                response::write_fixed(session, status, &content_type, &body, &ctx.request_id).await?;
                Ok(true)
            }
            Decision::Redirect { status, location } => {
                ctx.status = Some(status);
                response::write_redirect(session, status, &location, &ctx.request_id).await?;
                Ok(true)
            }
            Decision::RedirectToLogin { provider, location } => {
                counters::inc_login_redirect(&provider);
                ctx.status = Some(302);
                response::write_redirect(session, 302, &location, &ctx.request_id).await?;
                Ok(true)
            }
        }
    }

    async fn upstream_peer(&self, _session: &mut Session, ctx: &mut Self::CTX) -> pingora::Result<Box<HttpPeer>> {
        let Some(u) = ctx.upstream.as_ref() else {
            return Err(pingora::Error::new(pingora::ErrorType::InternalError));
        };
        Ok(Box::new(u.peer()))
    }

    async fn upstream_request_filter(
        &self,
        session: &mut Session,
        upstream_request: &mut RequestHeader,
        ctx: &mut Self::CTX,
    ) -> pingora::Result<()> {
        let req = request_context(session.req_header(), self.secure);
        for (k, v) in forwarded_headers(&req, ctx.client_ip.as_deref()) {
            upstream_request.insert_header(k, v)?;
        }
        upstream_request.insert_header("x-request-id", ctx.request_id.as_str())?;
        Ok(())
    }

    async fn response_filter(
        &self,
        _session: &mut Session,
        upstream_response: &mut ResponseHeader,
        ctx: &mut Self::CTX,
    ) -> pingora::Result<()> {
        ctx.status = Some(upstream_response.status.as_u16());
        upstream_response.insert_header("x-request-id", ctx.request_id.as_str())?;
        Ok(())
    }

    async fn logging(&self, _session: &mut Session, err: Option<&pingora::Error>, ctx: &mut Self::CTX) {
        let elapsed = ctx.start.map(|s| s.elapsed().as_secs_f64()).unwrap_or(0.0);
        let action = ctx.action.unwrap_or("none");
        // Upstream failures never reach response_filter.
        let status = ctx.status.unwrap_or(if err.is_some() { 502 } else { 200 });

        counters::on_req_end(action, status, elapsed);

        if let Some(e) = err {
            tracing::warn!(
                request_id = %ctx.request_id,
                target = ctx.target.as_deref().unwrap_or("-"),
                error = %e,
                "request failed"
            );
        }

        self.obs.write_access(&AccessLog {
            ts: Utc::now(),
            request_id: ctx.request_id.clone(),
            listener: self.listener,
            rule_id: ctx.rule_id.clone().unwrap_or_default(),
            priority: ctx.priority.clone().unwrap_or_default(),
            action,
            method: ctx.method.clone(),
            host: ctx.host.clone().unwrap_or_else(|| "unknown".to_string()),
            path: ctx.path.clone(),
            status,
            latency_ms: (elapsed * 1000.0) as u64,
            target: ctx.target.clone(),
            subject: ctx.subject.clone(),
            client_ip: ctx.client_ip.clone(),
            error: err.map(|e| e.to_string()),
        });
    }
}
